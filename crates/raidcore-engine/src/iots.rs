//! IOTS: the top-level tracking object for one logical block operation.
//!
//! Finished sub-requests merge their (status, qualifier) here through the
//! fixed error-precedence order, which makes the aggregate independent of
//! completion order. The IOTS completes exactly once: when every block is
//! transferred, or when it holds an error with nothing outstanding and no
//! allocation/generation in flight.

use std::sync::Arc;

use parking_lot::Mutex;
use raidcore_common::{
    BlockCount, BlockQualifier, BlockStatus, IoPriority, Lba, Opcode, Result, merge_status,
};
use tokio::sync::oneshot;
use tracing::{debug, error};

use crate::context::RaidContext;
use crate::siots::{AlgorithmTag, Siots};

#[derive(Debug, Clone, Copy, Default)]
pub struct IotsFlags {
    pub aborted: bool,
    pub quiesce: bool,
    /// Resource allocation for a new sub-request is in flight.
    pub allocating: bool,
    /// Sub-request generation is in flight.
    pub generating: bool,
    pub complete: bool,
}

pub(crate) struct IotsInner {
    pub(crate) siots: Vec<Arc<Siots>>,
    pub(crate) outstanding_requests: u32,
    pub(crate) blocks_transferred: BlockCount,
    pub(crate) status: BlockStatus,
    pub(crate) qualifier: BlockQualifier,
    pub(crate) flags: IotsFlags,
}

/// Final outcome delivered on the completion channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IotsOutcome {
    pub status: BlockStatus,
    pub qualifier: BlockQualifier,
    pub blocks_transferred: BlockCount,
}

/// Construction parameters for one logical operation.
#[derive(Debug, Clone)]
pub struct IotsParams {
    pub opcode: Opcode,
    pub lba: Lba,
    pub blocks: BlockCount,
    pub priority: IoPriority,
    pub checksum_enabled: bool,
    pub encryption_epoch: u64,
    /// Monitor-initiated operations bypass quiesce and use stricter
    /// aliasing against timed-out edges.
    pub monitor_op: bool,
}

pub struct Iots {
    opcode: Opcode,
    lba: Lba,
    blocks: BlockCount,
    priority: IoPriority,
    checksum_enabled: bool,
    encryption_epoch: u64,
    monitor_op: bool,
    ctx: Arc<RaidContext>,
    pub(crate) inner: Mutex<IotsInner>,
    completion: Mutex<Option<oneshot::Sender<IotsOutcome>>>,
}

impl Iots {
    /// Create the tracker and its one-shot completion channel.
    pub fn new(
        ctx: Arc<RaidContext>,
        params: IotsParams,
    ) -> (Arc<Self>, oneshot::Receiver<IotsOutcome>) {
        let (tx, rx) = oneshot::channel();
        let iots = Arc::new(Self {
            opcode: params.opcode,
            lba: params.lba,
            blocks: params.blocks,
            priority: params.priority,
            checksum_enabled: params.checksum_enabled,
            encryption_epoch: params.encryption_epoch,
            monitor_op: params.monitor_op,
            ctx,
            inner: Mutex::new(IotsInner {
                siots: Vec::new(),
                outstanding_requests: 0,
                blocks_transferred: 0,
                status: BlockStatus::Invalid,
                qualifier: BlockQualifier::Invalid,
                flags: IotsFlags::default(),
            }),
            completion: Mutex::new(Some(tx)),
        });
        (iots, rx)
    }

    // --- accessors -------------------------------------------------------

    #[must_use]
    pub fn opcode(&self) -> Opcode {
        self.opcode
    }

    #[must_use]
    pub fn lba(&self) -> Lba {
        self.lba
    }

    #[must_use]
    pub fn blocks(&self) -> BlockCount {
        self.blocks
    }

    #[must_use]
    pub fn priority(&self) -> IoPriority {
        self.priority
    }

    #[must_use]
    pub fn checksum_enabled(&self) -> bool {
        self.checksum_enabled
    }

    #[must_use]
    pub fn encryption_epoch(&self) -> u64 {
        self.encryption_epoch
    }

    #[must_use]
    pub fn is_monitor_op(&self) -> bool {
        self.monitor_op
    }

    #[must_use]
    pub fn status(&self) -> (BlockStatus, BlockQualifier) {
        let inner = self.inner.lock();
        (inner.status, inner.qualifier)
    }

    #[must_use]
    pub fn blocks_transferred(&self) -> BlockCount {
        self.inner.lock().blocks_transferred
    }

    #[must_use]
    pub fn outstanding_requests(&self) -> u32 {
        self.inner.lock().outstanding_requests
    }

    #[must_use]
    pub fn active_siots(&self) -> usize {
        self.inner.lock().siots.len()
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.inner.lock().flags.complete
    }

    #[must_use]
    pub fn is_abort_requested(&self) -> bool {
        self.inner.lock().flags.aborted
    }

    // --- sub-request management ------------------------------------------

    /// Split off one sub-request. It joins the active list and bumps
    /// outstanding_requests until it finishes.
    pub fn allocate_siots(
        self: &Arc<Self>,
        algorithm: AlgorithmTag,
        lba: Lba,
        blocks: BlockCount,
    ) -> Result<Arc<Siots>> {
        let siots = Siots::new(
            Arc::clone(&self.ctx),
            Arc::downgrade(self),
            None,
            algorithm,
            lba,
            blocks,
            self.monitor_op,
        )?;
        let mut inner = self.inner.lock();
        inner.siots.push(Arc::clone(&siots));
        inner.outstanding_requests += 1;
        Ok(siots)
    }

    /// Mark resource allocation in flight; completion detection holds off
    /// while set.
    pub fn set_allocating(&self, allocating: bool) {
        self.inner.lock().flags.allocating = allocating;
    }

    /// Mark sub-request generation in flight.
    pub fn set_generating(&self, generating: bool) {
        self.inner.lock().flags.generating = generating;
    }

    pub fn set_quiesce(&self, quiesce: bool) {
        self.inner.lock().flags.quiesce = quiesce;
    }

    /// Request cancellation: flag the IOTS and cancel every outstanding
    /// per-drive request that is safe to cancel. Idempotent.
    pub fn abort(self: &Arc<Self>) {
        let active: Vec<Arc<Siots>> = {
            let mut inner = self.inner.lock();
            if inner.flags.aborted {
                return;
            }
            inner.flags.aborted = true;
            inner.siots.clone()
        };
        debug!(active = active.len(), "abort requested");
        for siots in active {
            siots.abort_fruts_chain();
        }
    }

    // --- status rollup ---------------------------------------------------

    /// Merge a finished sub-request status through the precedence order.
    pub fn merge_siots_status(&self, status: BlockStatus, qualifier: BlockQualifier) {
        let mut inner = self.inner.lock();
        self.merge_locked(&mut inner, status, qualifier);
    }

    pub(crate) fn merge_locked(
        &self,
        inner: &mut IotsInner,
        status: BlockStatus,
        qualifier: BlockQualifier,
    ) {
        let merged = merge_status((inner.status, inner.qualifier), (status, qualifier));
        if merged != (inner.status, inner.qualifier) {
            debug!(from = ?(inner.status, inner.qualifier), to = ?merged, "status merge");
        }
        (inner.status, inner.qualifier) = merged;
    }

    /// An aborted request that never errored, never finished its
    /// transfer and has nothing left in flight reports client-aborted.
    pub(crate) fn apply_abort_locked(&self, inner: &mut IotsInner) {
        if inner.flags.aborted
            && matches!(inner.status, BlockStatus::Invalid | BlockStatus::Success)
            && inner.outstanding_requests == 0
            && inner.blocks_transferred != self.blocks
            && !inner.flags.allocating
            && !inner.flags.generating
        {
            inner.status = BlockStatus::RequestAborted;
            inner.qualifier = BlockQualifier::ClientAborted;
        }
    }

    /// Decide completion under the lock. Marks the complete flag so the
    /// decision is made exactly once. Either way the request must be
    /// idle: a fully transferred request with a sibling sub-request
    /// still in flight is not done.
    pub(crate) fn check_complete_locked(&self, inner: &mut IotsInner) -> bool {
        if inner.flags.complete {
            return false;
        }
        let idle = inner.outstanding_requests == 0
            && !inner.flags.allocating
            && !inner.flags.generating;
        let transferred = inner.blocks_transferred >= self.blocks;
        let errored = !matches!(inner.status, BlockStatus::Invalid | BlockStatus::Success);
        if !(idle && (transferred || errored)) {
            return false;
        }
        if inner.status == BlockStatus::Invalid {
            inner.status = BlockStatus::Success;
            inner.qualifier = BlockQualifier::None;
        }
        inner.flags.complete = true;
        true
    }

    /// Deliver the outcome. The one-shot channel enforces single
    /// completion; a second attempt is a logged logic fault.
    pub(crate) fn fire_completion(&self) {
        let outcome = {
            let inner = self.inner.lock();
            IotsOutcome {
                status: inner.status,
                qualifier: inner.qualifier,
                blocks_transferred: inner.blocks_transferred,
            }
        };
        let Some(tx) = self.completion.lock().take() else {
            error!("request completed twice");
            return;
        };
        debug!(?outcome, lba = self.lba, "request complete");
        // The caller may have dropped the receiver; that is their choice.
        let _ = tx.send(outcome);
    }
}

impl std::fmt::Debug for Iots {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("Iots")
            .field("opcode", &self.opcode)
            .field("lba", &self.lba)
            .field("blocks", &self.blocks)
            .field("status", &inner.status)
            .field("outstanding", &inner.outstanding_requests)
            .finish_non_exhaustive()
    }
}
