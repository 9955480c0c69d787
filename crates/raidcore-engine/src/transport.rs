//! The block transport seam: submission descriptors, completion payloads
//! and the one-shot completion token.
//!
//! The token is the contract that turns N racing drive completions into
//! exactly one forward-progress event per submission: firing it consumes
//! it, so a transport cannot complete a submission twice without the type
//! system objecting.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use raidcore_common::{
    BlockCount, BlockQualifier, BlockStatus, IoPriority, Lba, Opcode, Position, TransportStatus,
};

/// Everything the transport needs to issue one per-drive request.
#[derive(Debug, Clone)]
pub struct FruDescriptor {
    pub position: Position,
    /// Position-adjusted lba.
    pub lba: Lba,
    pub blocks: BlockCount,
    pub opcode: Opcode,
    pub priority: IoPriority,
    pub checksum_enabled: bool,
    pub encryption_epoch: u64,
    /// Monitor-initiated requests bypass quiesce at the lower level.
    pub monitor_op: bool,
    /// Handle for [`BlockTransport::cancel`].
    pub submission_id: u64,
}

/// What the transport reports back for one submission.
#[derive(Debug, Clone)]
pub struct FruCompletion {
    pub transport_status: TransportStatus,
    pub transport_qualifier: u32,
    pub block_status: BlockStatus,
    pub block_qualifier: BlockQualifier,
    pub media_error_lba: Option<Lba>,
    /// Delay the lower level would like before a retry, if it has an
    /// opinion. Clamped by the engine before use.
    pub retry_wait: Option<Duration>,
}

impl FruCompletion {
    #[must_use]
    pub fn success() -> Self {
        Self {
            transport_status: TransportStatus::Ok,
            transport_qualifier: 0,
            block_status: BlockStatus::Success,
            block_qualifier: BlockQualifier::None,
            media_error_lba: None,
            retry_wait: None,
        }
    }

    /// Block-level outcome with a clean transport.
    #[must_use]
    pub fn block(status: BlockStatus, qualifier: BlockQualifier) -> Self {
        Self {
            block_status: status,
            block_qualifier: qualifier,
            ..Self::success()
        }
    }

    /// Transport-level failure; the block status was never written.
    #[must_use]
    pub fn transport(status: TransportStatus) -> Self {
        Self {
            transport_status: status,
            block_status: BlockStatus::Invalid,
            block_qualifier: BlockQualifier::Invalid,
            ..Self::success()
        }
    }

    #[must_use]
    pub fn with_retry_wait(mut self, wait: Duration) -> Self {
        self.retry_wait = Some(wait);
        self
    }

    #[must_use]
    pub fn with_media_error_lba(mut self, lba: Lba) -> Self {
        self.media_error_lba = Some(lba);
        self
    }
}

/// Drive-health condition reported out-of-band by a usurper.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriveFault {
    /// The drive accumulated timeout errors.
    Timeout,
    /// Checksum errors on data read from the drive.
    Crc,
    CrcSingleBit,
    CrcMultiBit,
}

type CompletionFn = Box<dyn FnOnce(FruCompletion) + Send + 'static>;

/// One-shot continuation handed to the transport with each submission.
/// Firing it consumes it; dropping it unfired is the "submission refused"
/// case and the engine fixes its wait accounting itself.
pub struct CompletionToken {
    submission_id: u64,
    complete: CompletionFn,
}

impl CompletionToken {
    pub fn new(submission_id: u64, complete: impl FnOnce(FruCompletion) + Send + 'static) -> Self {
        Self {
            submission_id,
            complete: Box::new(complete),
        }
    }

    #[must_use]
    pub fn submission_id(&self) -> u64 {
        self.submission_id
    }

    /// Deliver the completion. Consumes the token.
    pub fn complete(self, completion: FruCompletion) {
        (self.complete)(completion);
    }
}

impl std::fmt::Debug for CompletionToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionToken")
            .field("submission_id", &self.submission_id)
            .finish_non_exhaustive()
    }
}

/// Monotonic submission id source, one per array.
#[derive(Debug, Default)]
pub struct SubmissionIds {
    next: AtomicU64,
}

impl SubmissionIds {
    #[must_use]
    pub fn next(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}

/// The asynchronous block transport beneath the engine.
///
/// `submit` returning `false` guarantees the token will never fire;
/// returning `true` guarantees it fires exactly once, on an arbitrary
/// task, at an arbitrary later time.
pub trait BlockTransport: Send + Sync {
    fn submit(&self, descriptor: FruDescriptor, token: CompletionToken) -> bool;

    /// Out-of-band drive-health notification. Same token contract as
    /// `submit`.
    fn submit_control(&self, position: Position, fault: DriveFault, token: CompletionToken)
    -> bool;

    /// Cancel an in-flight submission. The transport completes the
    /// original token with [`TransportStatus::Canceled`]; cancelling an
    /// unknown or already-completed id is a no-op.
    fn cancel(&self, submission_id: u64);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicU32;

    #[test]
    fn test_token_fires_exactly_once() {
        let fired = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&fired);
        let token = CompletionToken::new(7, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(token.submission_id(), 7);
        token.complete(FruCompletion::success());
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_dropped_token_never_fires() {
        let fired = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&fired);
        let token = CompletionToken::new(1, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        drop(token);
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_submission_ids_monotonic() {
        let ids = SubmissionIds::default();
        let a = ids.next();
        let b = ids.next();
        assert!(b > a);
    }

    #[test]
    fn test_completion_constructors() {
        let c = FruCompletion::transport(TransportStatus::Dead);
        assert_eq!(c.transport_status, TransportStatus::Dead);
        assert_eq!(c.block_status, BlockStatus::Invalid);

        let c = FruCompletion::block(BlockStatus::IoFailed, BlockQualifier::RetryPossible)
            .with_retry_wait(Duration::from_millis(250));
        assert!(c.transport_status.is_ok());
        assert_eq!(c.retry_wait, Some(Duration::from_millis(250)));
    }
}
