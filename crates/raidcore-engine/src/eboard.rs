//! Error board: per-category aggregation of one completed wave.
//!
//! Rebuilt from scratch on every evaluation pass and never persisted
//! across retry cycles. Classification is two-tier: the transport verdict
//! first, then the block (status, qualifier) pair once the transport
//! delivered. An outcome neither tier recognizes forces the overall
//! result to "unrecognized", which the state machine escalates to the
//! unexpected-error terminal rather than passing through silently.

use raidcore_common::{
    BlockQualifier, BlockStatus, PositionSet, Result, TransportStatus,
};
use tracing::warn;

use crate::fruts::FruRequest;
use crate::geometry::Geometry;

/// Classification inputs that do not live on the request itself.
pub struct ClassifyContext<'a> {
    /// The originating operation is monitor-initiated.
    pub monitor_op: bool,
    pub geometry: &'a dyn Geometry,
}

/// Aggregated per-category error state for one wave.
#[derive(Debug, Clone)]
pub struct FruEboard {
    pub retry_err: PositionSet,
    pub retry_err_count: u32,
    pub dead_err: PositionSet,
    pub dead_err_count: u32,
    pub hard_media_err: PositionSet,
    pub hard_media_err_count: u32,
    /// Media errors the drive cannot remap. Subset of hard media errors.
    pub menr_err: PositionSet,
    pub menr_err_count: u32,
    pub drop_err: PositionSet,
    pub drop_err_count: u32,
    pub zeroed: PositionSet,
    pub zeroed_count: u32,
    pub soft_media_err_count: u32,
    pub abort_err_count: u32,
    pub timeout_err_count: u32,
    pub unexpected_err_count: u32,
    pub bad_crc_count: u32,
    pub not_preferred_count: u32,
    pub reduce_qdepth_count: u32,
    pub reduce_qdepth_soft_count: u32,
}

impl FruEboard {
    pub fn new(width: u32) -> Result<Self> {
        Ok(Self {
            retry_err: PositionSet::new(width)?,
            retry_err_count: 0,
            dead_err: PositionSet::new(width)?,
            dead_err_count: 0,
            hard_media_err: PositionSet::new(width)?,
            hard_media_err_count: 0,
            menr_err: PositionSet::new(width)?,
            menr_err_count: 0,
            drop_err: PositionSet::new(width)?,
            drop_err_count: 0,
            zeroed: PositionSet::new(width)?,
            zeroed_count: 0,
            soft_media_err_count: 0,
            abort_err_count: 0,
            timeout_err_count: 0,
            unexpected_err_count: 0,
            bad_crc_count: 0,
            not_preferred_count: 0,
            reduce_qdepth_count: 0,
            reduce_qdepth_soft_count: 0,
        })
    }

    /// Whether the wave saw any outcome that is not plain success.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.retry_err_count > 0
            || self.dead_err_count > 0
            || self.hard_media_err_count > 0
            || self.drop_err_count > 0
            || self.soft_media_err_count > 0
            || self.abort_err_count > 0
            || self.timeout_err_count > 0
            || self.unexpected_err_count > 0
            || self.bad_crc_count > 0
    }

    /// Fold one completed request into the board. Returns false when the
    /// outcome is not recognized by either tier.
    pub fn accumulate(
        &mut self,
        fruts: &mut FruRequest,
        degraded: &mut PositionSet,
        ctx: &ClassifyContext<'_>,
    ) -> bool {
        if fruts.flags().error_inherited {
            // Already counted at the level the error came from.
            return true;
        }
        let position = fruts.position();
        let Some(transport_status) = fruts.transport_status() else {
            warn!(position, "completed request without a transport status");
            self.unexpected_err_count += 1;
            return false;
        };
        match transport_status {
            TransportStatus::Ok => self.accumulate_block(fruts, degraded, ctx),
            TransportStatus::Canceled | TransportStatus::CancelPending => {
                self.abort_err_count += 1;
                true
            }
            TransportStatus::Busy => {
                if ctx.monitor_op && ctx.geometry.edge_state(position).timed_out {
                    // A busy answer from an edge that already timed out
                    // would be retried forever, starving the monitor.
                    warn!(position, "busy on a timed-out edge treated as dead");
                    self.mark_dead(position, degraded);
                } else {
                    self.mark_retryable(position);
                    // Later scans look only at block status; make the
                    // busy answer read as retryable there too.
                    fruts.force_block_status(BlockStatus::IoFailed, BlockQualifier::RetryPossible);
                }
                true
            }
            TransportStatus::Dead => {
                self.mark_dead(position, degraded);
                true
            }
            TransportStatus::Quiesced
            | TransportStatus::Failed
            | TransportStatus::EdgeNotEnabled => {
                self.mark_dead(position, degraded);
                true
            }
            TransportStatus::GenericFailure => {
                self.unexpected_err_count += 1;
                false
            }
        }
    }

    fn accumulate_block(
        &mut self,
        fruts: &mut FruRequest,
        degraded: &mut PositionSet,
        ctx: &ClassifyContext<'_>,
    ) -> bool {
        let position = fruts.position();
        match (fruts.status(), fruts.qualifier()) {
            (BlockStatus::IoFailed, BlockQualifier::RetryPossible) => {
                if ctx.monitor_op && ctx.geometry.edge_state(position).timed_out {
                    warn!(position, "retryable failure on a timed-out edge treated as dead");
                    self.mark_dead(position, degraded);
                } else {
                    self.mark_retryable(position);
                }
                true
            }
            (BlockStatus::IoFailed, BlockQualifier::LockFailed) => {
                self.mark_retryable(position);
                true
            }
            (BlockStatus::IoFailed, BlockQualifier::RetryNotPossible) => {
                self.mark_dead(position, degraded);
                true
            }
            (BlockStatus::IoFailed, BlockQualifier::CrcError) => {
                self.bad_crc_count += 1;
                true
            }
            (BlockStatus::IoFailed, BlockQualifier::NotPreferred) => {
                self.not_preferred_count += 1;
                true
            }
            (BlockStatus::IoFailed, BlockQualifier::Congested) => {
                self.reduce_qdepth_count += 1;
                true
            }
            (BlockStatus::MediaError, BlockQualifier::DataLost) => {
                self.record(position, |b| {
                    b.hard_media_err.insert(position)?;
                    b.hard_media_err_count += 1;
                    Ok(())
                });
                true
            }
            (BlockStatus::MediaError, BlockQualifier::NoRemap) => {
                self.record(position, |b| {
                    b.menr_err.insert(position)?;
                    b.menr_err_count += 1;
                    b.hard_media_err.insert(position)?;
                    b.hard_media_err_count += 1;
                    Ok(())
                });
                true
            }
            (BlockStatus::RequestAborted, BlockQualifier::OptionalAbortedLegacy) => {
                self.record(position, |b| {
                    b.drop_err.insert(position)?;
                    b.drop_err_count += 1;
                    Ok(())
                });
                true
            }
            (
                BlockStatus::RequestAborted,
                BlockQualifier::ClientAborted | BlockQualifier::WriteNotStartedAborted,
            ) => {
                self.abort_err_count += 1;
                true
            }
            (BlockStatus::Success, BlockQualifier::RemapRequired) => {
                self.soft_media_err_count += 1;
                true
            }
            (BlockStatus::Success, BlockQualifier::Zeroed) => {
                self.record(position, |b| {
                    b.zeroed.insert(position)?;
                    b.zeroed_count += 1;
                    Ok(())
                });
                true
            }
            (BlockStatus::Success, BlockQualifier::StillCongested) => {
                self.reduce_qdepth_soft_count += 1;
                true
            }
            (BlockStatus::Success, BlockQualifier::None) => true,
            (BlockStatus::Timeout, _) => {
                self.timeout_err_count += 1;
                true
            }
            (status, qualifier) => {
                warn!(position, ?status, ?qualifier, "unrecognized block outcome");
                self.unexpected_err_count += 1;
                false
            }
        }
    }

    fn mark_retryable(&mut self, position: u32) {
        self.record(position, |b| {
            b.retry_err.insert(position)?;
            b.retry_err_count += 1;
            Ok(())
        });
    }

    fn mark_dead(&mut self, position: u32, degraded: &mut PositionSet) {
        self.record(position, |b| {
            b.dead_err.insert(position)?;
            b.dead_err_count += 1;
            Ok(())
        });
        if let Err(err) = degraded.insert(position) {
            warn!(position, %err, "cannot record degraded position");
        }
    }

    fn record(&mut self, position: u32, f: impl FnOnce(&mut Self) -> Result<()>) {
        // Positions were validated at send time; a failure here means the
        // board was sized for the wrong width.
        if let Err(err) = f(self) {
            warn!(position, %err, "eboard bitmap update failed");
            self.unexpected_err_count += 1;
        }
    }
}

impl std::fmt::Display for FruEboard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "retry {}({}) dead {}({}) hard_media {}({}) menr {}({}) drop {}({}) \
             zeroed {}({}) soft_media {} abort {} timeout {} unexpected {} crc {}",
            self.retry_err,
            self.retry_err_count,
            self.dead_err,
            self.dead_err_count,
            self.hard_media_err,
            self.hard_media_err_count,
            self.menr_err,
            self.menr_err_count,
            self.drop_err,
            self.drop_err_count,
            self.zeroed,
            self.zeroed_count,
            self.soft_media_err_count,
            self.abort_err_count,
            self.timeout_err_count,
            self.unexpected_err_count,
            self.bad_crc_count,
        )
    }
}
