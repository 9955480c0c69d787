//! Range/stripe lock seam.
//!
//! Lock acquisition itself lives outside this engine; the engine only
//! needs the status vocabulary and the retry-vs-fail decision for a
//! dropped request.

use async_trait::async_trait;
use raidcore_common::{BlockCount, Lba};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockStatus {
    Ok,
    /// The lock service shed the request under load.
    Dropped,
    Aborted,
    Cancelled,
    IllegalRequest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Read,
    Write,
}

/// Half-open lba range covered by one lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockRange {
    pub start: Lba,
    pub count: BlockCount,
}

impl LockRange {
    #[must_use]
    pub fn new(start: Lba, count: BlockCount) -> Self {
        Self { start, count }
    }

    #[must_use]
    pub fn end(&self) -> Lba {
        self.start.saturating_add(self.count)
    }

    #[must_use]
    pub fn overlaps(&self, other: &Self) -> bool {
        self.start < other.end() && other.start < self.end()
    }
}

/// A dropped acquisition on a holder that allows holds should be retried
/// later rather than failed.
#[must_use]
pub fn should_retry(status: LockStatus, allow_hold: bool) -> bool {
    status == LockStatus::Dropped && allow_hold
}

/// External stripe-lock service.
#[async_trait]
pub trait StripeLockService: Send + Sync {
    async fn acquire(&self, range: LockRange, mode: LockMode, allow_hold: bool) -> LockStatus;

    async fn release(&self, range: LockRange) -> LockStatus;
}
