//! Engine configuration.

use std::time::Duration;

use crate::error::{Error, Result};
use crate::types::BlockCount;

/// Lower clamp for a transport-suggested retry delay.
pub const MIN_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Upper clamp for a transport-suggested retry delay.
pub const MAX_RETRY_DELAY: Duration = Duration::from_millis(2000);

/// Tunables for the dispatch/completion engine. The embedding RAID object
/// fills this in once per array; the engine never mutates it.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Shortest delay before a retry wave is resent.
    pub min_retry_delay: Duration,
    /// Longest delay before a retry wave is resent.
    pub max_retry_delay: Duration,
    /// Largest single transfer accepted for one drive position.
    pub max_blocks_per_drive: BlockCount,
    /// Run the integrity check on fully transferred reads before
    /// completing them.
    pub check_data: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            min_retry_delay: MIN_RETRY_DELAY,
            max_retry_delay: MAX_RETRY_DELAY,
            max_blocks_per_drive: 0x1000,
            check_data: false,
        }
    }
}

impl EngineConfig {
    /// Validate the configuration before handing it to the engine.
    pub fn validate(&self) -> Result<()> {
        if self.min_retry_delay > self.max_retry_delay {
            return Err(Error::invalid_argument(format!(
                "min retry delay {:?} exceeds max {:?}",
                self.min_retry_delay, self.max_retry_delay
            )));
        }
        if self.max_blocks_per_drive == 0 {
            return Err(Error::invalid_argument("max_blocks_per_drive is zero"));
        }
        Ok(())
    }

    /// Clamp a transport-suggested retry delay into the configured window.
    #[must_use]
    pub fn clamp_retry_delay(&self, suggested: Option<Duration>) -> Duration {
        suggested
            .unwrap_or(self.min_retry_delay)
            .clamp(self.min_retry_delay, self.max_retry_delay)
    }
}
