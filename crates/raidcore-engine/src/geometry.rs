//! Geometry lookups the engine needs from the surrounding RAID object.
//!
//! All calls are synchronous and read-only; geometry is the only state
//! shared across unrelated logical requests.

use raidcore_common::{Lba, Position, PositionSet, Result};

/// Redundancy class of an array. The engine only cares whether losing a
/// drive mid-write can leave a stripe inconsistent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RaidKind {
    /// No redundancy (plain striping).
    Striper,
    Mirror,
    Parity,
}

impl RaidKind {
    /// Redundant geometries must never have an in-flight media-modifying
    /// request cancelled out from under them.
    #[must_use]
    pub fn is_redundant(self) -> bool {
        matches!(self, Self::Mirror | Self::Parity)
    }
}

/// Health of the edge leading to one drive position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EdgeState {
    pub enabled: bool,
    /// The edge has already accumulated timeout errors. A busy answer from
    /// such an edge is treated as dead for monitor-initiated operations.
    pub timed_out: bool,
}

/// Synchronous layout/health lookups.
pub trait Geometry: Send + Sync {
    /// Number of drive positions in the array.
    fn width(&self) -> u32;

    fn kind(&self) -> RaidKind;

    /// Positions holding parity for this array.
    fn parity_positions(&self) -> PositionSet;

    /// Positions currently being rebuilt.
    fn rebuild_positions(&self) -> PositionSet;

    fn edge_state(&self, position: Position) -> EdgeState;

    /// Physical offset added to a logical lba for this position.
    fn position_offset(&self, position: Position) -> Lba;

    /// Whether an lba falls inside a metadata/journal region.
    fn is_metadata_lba(&self, lba: Lba) -> bool;
}

/// Static geometry for embedders with a fixed layout, and for tests.
#[derive(Debug, Clone)]
pub struct FixedGeometry {
    width: u32,
    kind: RaidKind,
    parity: PositionSet,
    rebuild: PositionSet,
    timed_out_edges: PositionSet,
    disabled_edges: PositionSet,
    position_offset: Lba,
    metadata_start: Lba,
}

impl FixedGeometry {
    /// All edges enabled and healthy, no parity, metadata at the top of
    /// the address space.
    pub fn new(width: u32, kind: RaidKind) -> Result<Self> {
        Ok(Self {
            width,
            kind,
            parity: PositionSet::new(width)?,
            rebuild: PositionSet::new(width)?,
            timed_out_edges: PositionSet::new(width)?,
            disabled_edges: PositionSet::new(width)?,
            position_offset: 0,
            metadata_start: Lba::MAX,
        })
    }

    pub fn with_parity_position(mut self, position: Position) -> Result<Self> {
        self.parity.insert(position)?;
        Ok(self)
    }

    pub fn with_rebuild_position(mut self, position: Position) -> Result<Self> {
        self.rebuild.insert(position)?;
        Ok(self)
    }

    pub fn with_timed_out_edge(mut self, position: Position) -> Result<Self> {
        self.timed_out_edges.insert(position)?;
        Ok(self)
    }

    pub fn with_disabled_edge(mut self, position: Position) -> Result<Self> {
        self.disabled_edges.insert(position)?;
        Ok(self)
    }

    #[must_use]
    pub fn with_position_offset(mut self, offset: Lba) -> Self {
        self.position_offset = offset;
        self
    }

    #[must_use]
    pub fn with_metadata_start(mut self, start: Lba) -> Self {
        self.metadata_start = start;
        self
    }
}

impl Geometry for FixedGeometry {
    fn width(&self) -> u32 {
        self.width
    }

    fn kind(&self) -> RaidKind {
        self.kind
    }

    fn parity_positions(&self) -> PositionSet {
        self.parity
    }

    fn rebuild_positions(&self) -> PositionSet {
        self.rebuild
    }

    fn edge_state(&self, position: Position) -> EdgeState {
        EdgeState {
            enabled: !self.disabled_edges.contains(position),
            timed_out: self.timed_out_edges.contains(position),
        }
    }

    fn position_offset(&self, _position: Position) -> Lba {
        self.position_offset
    }

    fn is_metadata_lba(&self, lba: Lba) -> bool {
        lba >= self.metadata_start
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redundancy_classes() {
        assert!(RaidKind::Mirror.is_redundant());
        assert!(RaidKind::Parity.is_redundant());
        assert!(!RaidKind::Striper.is_redundant());
    }

    #[test]
    fn test_fixed_geometry_edges() {
        let geometry = FixedGeometry::new(5, RaidKind::Parity)
            .unwrap()
            .with_parity_position(4)
            .unwrap()
            .with_timed_out_edge(2)
            .unwrap()
            .with_disabled_edge(3)
            .unwrap();
        assert_eq!(geometry.width(), 5);
        assert!(geometry.edge_state(2).timed_out);
        assert!(geometry.edge_state(2).enabled);
        assert!(!geometry.edge_state(3).enabled);
        assert!(geometry.parity_positions().contains(4));
    }

    #[test]
    fn test_fixed_geometry_metadata_region() {
        let geometry = FixedGeometry::new(4, RaidKind::Striper)
            .unwrap()
            .with_metadata_start(0x1000);
        assert!(!geometry.is_metadata_lba(0xfff));
        assert!(geometry.is_metadata_lba(0x1000));
    }
}
