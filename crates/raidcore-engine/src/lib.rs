//! Raidcore Engine - per-drive I/O dispatch and completion
//!
//! This crate turns one logical sub-request (SIOTS) into a set of
//! per-drive requests (FRUTS), dispatches them concurrently over an
//! asynchronous block transport, classifies every outcome into a uniform
//! error taxonomy, drives retry/backoff and degraded-position bookkeeping,
//! and rolls per-drive results back up into one deterministic outcome per
//! sub-request and per logical request (IOTS).
//!
//! The engine never blocks a thread: waiting is always a timer or a
//! completion token, and the only synchronization is one atomic wait
//! count per SIOTS plus two short-held mutexes (SIOTS companion state,
//! IOTS rollup state). Timers require a tokio runtime.

pub mod context;
pub mod eboard;
pub mod fruts;
pub mod geometry;
pub mod integrity;
pub mod iots;
pub mod lock;
pub mod siots;
pub mod transport;

pub use context::RaidContext;
pub use eboard::{ClassifyContext, FruEboard};
pub use fruts::{FruRequest, FrutsFlags, FrutsState, SlotTag};
pub use geometry::{EdgeState, FixedGeometry, Geometry, RaidKind};
pub use integrity::{IntegrityService, IntegrityStatus};
pub use iots::{Iots, IotsFlags, IotsOutcome, IotsParams};
pub use lock::{LockMode, LockRange, LockStatus, StripeLockService};
pub use siots::{
    AlgorithmTag, MAX_DEGRADED_POSITIONS, Siots, SiotsFlags, SiotsState, SiotsStatus,
};
pub use transport::{
    BlockTransport, CompletionToken, DriveFault, FruCompletion, FruDescriptor, SubmissionIds,
};
