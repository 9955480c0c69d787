//! FRUTS: one in-flight I/O to one drive position.
//!
//! A `FruRequest` lives in the arena of its owning SIOTS and never leaves
//! it; dispatch, completion routing and retry scheduling are driven by the
//! SIOTS (see [`crate::siots`]), which is the only code that can pair a
//! request with a completion token. This module owns the per-request data
//! and its lifecycle state machine:
//!
//! Invalid -> Initialized -> Outstanding -> Completed -> (reset) ->
//! Initialized -> ... -> Destroyed. Any operation against a Destroyed
//! request is a loud logic fault, never a silent success.

use std::time::Duration;

use raidcore_common::{
    BlockCount, BlockQualifier, BlockStatus, Error, Lba, Opcode, Position, Result, TransportStatus,
};
use tracing::warn;

use crate::transport::FruCompletion;

/// Arena slot tag. Only slots claimed for FRU requests may be initialized
/// as one; anything else is caller confusion surfaced as InvalidArgument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotTag {
    FruRequest,
    Unclaimed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrutsState {
    Invalid,
    Initialized,
    Outstanding,
    Completed,
    Destroyed,
}

/// Per-request flags. `packet_initialized` is the only one surviving a
/// retry reset, so expensive transport setup is amortized across retries.
#[derive(Debug, Clone, Copy, Default)]
pub struct FrutsFlags {
    pub started: bool,
    pub packet_initialized: bool,
    /// Retried after a physical error; the original deadline stays in
    /// force so a chain of retries against one slow drive stays bounded.
    pub retried_physical: bool,
    /// Error copied from a parent request; never recounted by the
    /// classifier.
    pub error_inherited: bool,
}

#[derive(Debug)]
pub struct FruRequest {
    tag: SlotTag,
    state: FrutsState,
    position: Position,
    lba: Lba,
    blocks: BlockCount,
    opcode: Opcode,
    status: BlockStatus,
    qualifier: BlockQualifier,
    transport_status: Option<TransportStatus>,
    transport_qualifier: u32,
    retry_count: u32,
    media_error_lba: Option<Lba>,
    retry_wait: Option<Duration>,
    submission_id: Option<u64>,
    cancelled: bool,
    flags: FrutsFlags,
}

impl FruRequest {
    /// Claim an arena slot. The slot starts Invalid and must be
    /// initialized before it can be sent.
    #[must_use]
    pub fn new(tag: SlotTag) -> Self {
        Self {
            tag,
            state: FrutsState::Invalid,
            position: 0,
            lba: 0,
            blocks: 0,
            opcode: Opcode::Nop,
            status: BlockStatus::Invalid,
            qualifier: BlockQualifier::Invalid,
            transport_status: None,
            transport_qualifier: 0,
            retry_count: 0,
            media_error_lba: None,
            retry_wait: None,
            submission_id: None,
            cancelled: false,
            flags: FrutsFlags::default(),
        }
    }

    /// Set up (or re-set up) the request for one send cycle. Status,
    /// qualifier and media error lba are reset; `packet_initialized`
    /// survives.
    pub fn initialize(
        &mut self,
        position: Position,
        lba: Lba,
        blocks: BlockCount,
        opcode: Opcode,
    ) -> Result<()> {
        if self.tag != SlotTag::FruRequest {
            return Err(Error::invalid_argument(
                "arena slot is not tagged as a FRU request",
            ));
        }
        if self.state == FrutsState::Destroyed {
            return Err(Error::logic_fault("initialize on a destroyed FRU request"));
        }
        if self.state == FrutsState::Outstanding {
            return Err(Error::logic_fault(format!(
                "initialize on an outstanding FRU request at position {}",
                self.position
            )));
        }
        self.position = position;
        self.lba = lba;
        self.blocks = blocks;
        self.opcode = opcode;
        self.status = BlockStatus::Invalid;
        self.qualifier = BlockQualifier::Invalid;
        self.transport_status = None;
        self.transport_qualifier = 0;
        self.media_error_lba = None;
        self.retry_wait = None;
        self.cancelled = false;
        let packet_initialized = self.flags.packet_initialized;
        self.flags = FrutsFlags {
            packet_initialized,
            ..FrutsFlags::default()
        };
        self.state = FrutsState::Initialized;
        Ok(())
    }

    /// Per-send validation, before a descriptor is built.
    pub fn validate_for_send(&self, width: u32, max_blocks: BlockCount) -> Result<()> {
        if self.state == FrutsState::Destroyed {
            return Err(Error::logic_fault("send on a destroyed FRU request"));
        }
        if self.state != FrutsState::Initialized {
            return Err(Error::logic_fault(format!(
                "send in state {:?} at position {}",
                self.state, self.position
            )));
        }
        if self.flags.started {
            return Err(Error::logic_fault(format!(
                "send on an already started request at position {}",
                self.position
            )));
        }
        if self.position >= width {
            return Err(Error::invalid_argument(format!(
                "position {} >= width {width}",
                self.position
            )));
        }
        if self.blocks == 0 || self.blocks > max_blocks {
            return Err(Error::invalid_argument(format!(
                "transfer of {} blocks outside 1..={max_blocks}",
                self.blocks
            )));
        }
        Ok(())
    }

    /// Transition to Outstanding once the transport accepted the
    /// descriptor.
    pub fn mark_sent(&mut self, submission_id: u64) {
        self.flags.started = true;
        self.flags.packet_initialized = true;
        self.submission_id = Some(submission_id);
        self.state = FrutsState::Outstanding;
    }

    /// Synchronous send failure: complete locally with a generic failure
    /// so a later status scan sees a written outcome. No token will fire.
    pub fn mark_send_failed(&mut self) {
        self.flags.started = true;
        self.submission_id = None;
        self.transport_status = Some(TransportStatus::GenericFailure);
        self.state = FrutsState::Completed;
    }

    /// Record one completion. The block status slot must still be unset
    /// for this send cycle; a second write is logged and kept all the
    /// same so the evaluation sees the freshest data.
    pub fn record_completion(&mut self, completion: &FruCompletion) {
        if self.status != BlockStatus::Invalid {
            warn!(
                position = self.position,
                status = ?self.status,
                "block status already written this send cycle"
            );
        }
        self.transport_status = Some(completion.transport_status);
        self.transport_qualifier = completion.transport_qualifier;
        self.status = completion.block_status;
        self.qualifier = completion.block_qualifier;
        self.media_error_lba = completion.media_error_lba;
        self.retry_wait = completion.retry_wait;
        self.submission_id = None;
        self.state = FrutsState::Completed;
    }

    /// Whether this completion left the request in a clean state.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.transport_status == Some(TransportStatus::Ok) && self.status == BlockStatus::Success
    }

    /// Reset for a resend. Only `packet_initialized` survives the flag
    /// reset; the physical-error variant keeps the original deadline by
    /// flagging `retried_physical`.
    pub fn reset_for_retry(&mut self, opcode: Opcode, physical_error: bool) -> Result<()> {
        if self.state == FrutsState::Destroyed {
            return Err(Error::logic_fault("retry on a destroyed FRU request"));
        }
        if self.state == FrutsState::Outstanding {
            return Err(Error::logic_fault(format!(
                "retry on an outstanding request at position {}",
                self.position
            )));
        }
        self.opcode = opcode;
        self.status = BlockStatus::Invalid;
        self.qualifier = BlockQualifier::Invalid;
        self.transport_status = None;
        self.transport_qualifier = 0;
        self.media_error_lba = None;
        self.cancelled = false;
        let packet_initialized = self.flags.packet_initialized;
        self.flags = FrutsFlags {
            packet_initialized,
            retried_physical: physical_error,
            ..FrutsFlags::default()
        };
        self.retry_count += 1;
        self.state = FrutsState::Initialized;
        Ok(())
    }

    /// Mark a cancellation request issued for the in-flight submission.
    /// Returns the submission id to cancel, or None when there is nothing
    /// to cancel (not outstanding, or already cancelled) so a second
    /// abort has no additional effect.
    pub fn take_cancel(&mut self) -> Option<u64> {
        if self.state != FrutsState::Outstanding || self.cancelled {
            return None;
        }
        self.cancelled = true;
        self.submission_id
    }

    /// Idempotent release of the transport resource.
    pub fn destroy(&mut self) {
        if self.state == FrutsState::Destroyed {
            return;
        }
        self.submission_id = None;
        self.flags.packet_initialized = false;
        self.state = FrutsState::Destroyed;
    }

    #[must_use]
    pub fn is_nop(&self) -> bool {
        self.opcode == Opcode::Nop
    }

    #[must_use]
    pub fn state(&self) -> FrutsState {
        self.state
    }

    #[must_use]
    pub fn position(&self) -> Position {
        self.position
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
    pub fn opcode(&self) -> Opcode {
        self.opcode
    }

    #[must_use]
    pub fn status(&self) -> BlockStatus {
        self.status
    }

    #[must_use]
    pub fn qualifier(&self) -> BlockQualifier {
        self.qualifier
    }

    #[must_use]
    pub fn transport_status(&self) -> Option<TransportStatus> {
        self.transport_status
    }

    #[must_use]
    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    #[must_use]
    pub fn media_error_lba(&self) -> Option<Lba> {
        self.media_error_lba
    }

    #[must_use]
    pub fn retry_wait(&self) -> Option<Duration> {
        self.retry_wait
    }

    #[must_use]
    pub fn flags(&self) -> FrutsFlags {
        self.flags
    }

    /// Flag the recorded error as inherited from a parent request so the
    /// classifier does not count it again.
    pub fn set_error_inherited(&mut self) {
        self.flags.error_inherited = true;
    }

    /// Clear the inherited-error marker ahead of a retry wave.
    pub fn clear_error_inherited(&mut self) {
        self.flags.error_inherited = false;
    }

    /// Force the block-level outcome. Used by the classifier when a
    /// transport-busy answer must read as retryable IO_FAILED in later
    /// scans that only look at block status.
    pub fn force_block_status(&mut self, status: BlockStatus, qualifier: BlockQualifier) {
        self.status = status;
        self.qualifier = qualifier;
    }
}
