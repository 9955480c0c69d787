//! Integrity-check seam. The checksum/XOR library is external; the engine
//! only invokes it on fully transferred reads when data checking is
//! enabled.

use crate::lock::LockRange;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntegrityStatus {
    Ok,
    ChecksumMismatch,
    /// The range holds deliberately invalidated sectors.
    InvalidatedData,
}

/// Synchronous data-pattern/checksum verification.
pub trait IntegrityService: Send + Sync {
    fn check(&self, range: LockRange) -> IntegrityStatus;
}
