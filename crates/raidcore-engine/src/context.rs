//! Shared per-array context handed to every request object.

use std::sync::Arc;

use raidcore_common::{EngineConfig, Result};

use crate::geometry::Geometry;
use crate::integrity::IntegrityService;
use crate::transport::{BlockTransport, SubmissionIds};

/// Read-only collaborators and tunables, one per array, shared by every
/// IOTS/SIOTS/FRUTS built against it.
pub struct RaidContext {
    pub transport: Arc<dyn BlockTransport>,
    pub geometry: Arc<dyn Geometry>,
    pub integrity: Option<Arc<dyn IntegrityService>>,
    pub config: EngineConfig,
    pub submission_ids: SubmissionIds,
}

impl RaidContext {
    pub fn new(
        transport: Arc<dyn BlockTransport>,
        geometry: Arc<dyn Geometry>,
        config: EngineConfig,
    ) -> Result<Arc<Self>> {
        config.validate()?;
        Ok(Arc::new(Self {
            transport,
            geometry,
            integrity: None,
            config,
            submission_ids: SubmissionIds::default(),
        }))
    }

    pub fn with_integrity(
        transport: Arc<dyn BlockTransport>,
        geometry: Arc<dyn Geometry>,
        integrity: Arc<dyn IntegrityService>,
        config: EngineConfig,
    ) -> Result<Arc<Self>> {
        config.validate()?;
        Ok(Arc::new(Self {
            transport,
            geometry,
            integrity: Some(integrity),
            config,
            submission_ids: SubmissionIds::default(),
        }))
    }
}

impl std::fmt::Debug for RaidContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RaidContext")
            .field("width", &self.geometry.width())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
