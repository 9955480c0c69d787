//! Error types for raidcore
//!
//! Drive and transport failures are not errors in this sense: they flow
//! through the status taxonomy in [`crate::status`] and are classified,
//! retried and merged by the engine. The error type here covers API misuse
//! and internal invariant violations only.

use thiserror::Error;

/// Common result type for raidcore operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for raidcore
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// An internal invariant was violated. Never retried; the detecting
    /// level logs it as critical and stops making progress.
    #[error("logic fault: {0}")]
    LogicFault(String),

    #[error("send failed at position {position}: {reason}")]
    SendFailed { position: u32, reason: String },

    #[error("unsupported operation: {0}")]
    Unsupported(String),
}

impl Error {
    /// Create an invalid argument error
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Create a logic fault error
    pub fn logic_fault(msg: impl Into<String>) -> Self {
        Self::LogicFault(msg.into())
    }

    /// Create an unsupported operation error
    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::Unsupported(msg.into())
    }

    /// Check if this is an internal invariant violation
    #[must_use]
    pub fn is_logic_fault(&self) -> bool {
        matches!(self, Self::LogicFault(_))
    }
}
