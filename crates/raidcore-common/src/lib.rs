//! Raidcore Common - Shared types for the per-drive I/O engine
//!
//! This crate provides the status taxonomy, position sets, configuration
//! and error definitions shared by the raidcore crates.

pub mod config;
pub mod error;
pub mod position;
pub mod status;
pub mod types;

pub use config::{EngineConfig, MAX_RETRY_DELAY, MIN_RETRY_DELAY};
pub use error::{Error, Result};
pub use position::{MAX_WIDTH, PositionSet};
pub use status::{BlockQualifier, BlockStatus, ErrorPrecedence, TransportStatus, merge_status};
pub use types::*;
