//! Load-time pool definitions
//!
//! Paths are given as (section, direction) pairs and are checked against the
//! track network when the pool is loaded.

use super::types::{
    DeviceId, Direction, SectionId, DEFAULT_APPROACH_CLEARANCE, DEFAULT_ENTRY_CLEARANCE,
    DEFAULT_RELEASE_CLEARANCE,
};

/// A path as authored in a pool definition
pub type PathDefinition = Vec<(SectionId, Direction)>;

/// One storage track of a pool
#[derive(Debug, Clone)]
pub struct StorageTrackDefinition {
    pub name: String,
    /// From the track entrance to its dead end (turntable pools: from the deck)
    pub storage_path: PathDefinition,
    /// Outbound from the track entrance (plain pools only)
    pub access_paths: Vec<PathDefinition>,
    pub max_occupants: Option<usize>,
}

impl StorageTrackDefinition {
    pub fn new(name: impl Into<String>, storage_path: PathDefinition) -> Self {
        Self {
            name: name.into(),
            storage_path,
            access_paths: Vec::new(),
            max_occupants: None,
        }
    }

    pub fn with_access_path(mut self, path: PathDefinition) -> Self {
        self.access_paths.push(path);
        self
    }

    pub fn with_max_occupants(mut self, max: usize) -> Self {
        self.max_occupants = Some(max);
        self
    }
}

/// A plain storage pool
#[derive(Debug, Clone)]
pub struct PoolDefinition {
    pub name: String,
    pub tracks: Vec<StorageTrackDefinition>,
    pub force_creation_on_underflow: bool,
    /// Margin kept free at each track entrance (switch clearance)
    pub entry_clearance: f32,
    pub length_correction: f32,
}

impl PoolDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tracks: Vec::new(),
            force_creation_on_underflow: false,
            entry_clearance: DEFAULT_ENTRY_CLEARANCE,
            length_correction: 0.0,
        }
    }

    pub fn with_track(mut self, track: StorageTrackDefinition) -> Self {
        self.tracks.push(track);
        self
    }
}

/// A pool whose tracks radiate from a turntable
#[derive(Debug, Clone)]
pub struct TurntablePoolDefinition {
    pub name: String,
    pub device: DeviceId,
    /// Outbound from the deck to the network
    pub access_paths: Vec<PathDefinition>,
    pub tracks: Vec<StorageTrackDefinition>,
    pub force_creation_on_underflow: bool,
    pub approach_clearance: f32,
    pub release_clearance: f32,
    pub length_correction: f32,
    pub deck_speed_limit: Option<f32>,
    pub frame_rate: Option<f32>,
}

impl TurntablePoolDefinition {
    pub fn new(name: impl Into<String>, device: DeviceId) -> Self {
        Self {
            name: name.into(),
            device,
            access_paths: Vec::new(),
            tracks: Vec::new(),
            force_creation_on_underflow: false,
            approach_clearance: DEFAULT_APPROACH_CLEARANCE,
            release_clearance: DEFAULT_RELEASE_CLEARANCE,
            length_correction: 0.0,
            deck_speed_limit: None,
            frame_rate: None,
        }
    }

    pub fn with_access_path(mut self, path: PathDefinition) -> Self {
        self.access_paths.push(path);
        self
    }

    pub fn with_track(mut self, track: StorageTrackDefinition) -> Self {
        self.tracks.push(track);
        self
    }
}
