//! Storage pool and turntable simulation
//!
//! Pools park trains on capacity-tracked storage tracks; turntable pools
//! reach their tracks across a shared rotating deck. Everything runs from a
//! single fixed-step tick loop and can be driven from tests without the
//! command-line front end.

mod config;
mod path;
mod pool;
mod snapshot;
mod stats;
mod storage_track;
mod track_network;
mod train;
mod train_manager;
mod turntable;
mod turntable_control;
mod turntable_pool;
mod types;
mod world;

// Re-export public types for external use
// These may not be used within this crate but are part of the public API
#[allow(unused_imports)]
pub use config::{PathDefinition, PoolDefinition, StorageTrackDefinition, TurntablePoolDefinition};
#[allow(unused_imports)]
pub use path::{PathElement, TrackPath};
#[allow(unused_imports)]
pub use pool::{ExtractOutcome, Placement, Pool, PoolContext, PoolKind, StoragePool, TrackSelection};
#[allow(unused_imports)]
pub use snapshot::{unwrap_header, wrap_with_header, WorldSnapshot, FORMAT_VERSION, HEADER_SIZE, MAGIC};
#[allow(unused_imports)]
pub use stats::PoolStats;
#[allow(unused_imports)]
pub use storage_track::{DeviceOffsets, StorageTrack};
#[allow(unused_imports)]
pub use track_network::{TrackNetwork, TrackSection};
#[allow(unused_imports)]
pub use train::{
    Car, ConsistTransfer, DetachMode, DistanceAction, SimTrain, StandardConsistTransfer,
    TrainState, TrainUpdateResult,
};
#[allow(unused_imports)]
pub use turntable::{DeckAlignment, Rotation, Turntable, TurntableExit};
#[allow(unused_imports)]
pub use turntable_control::{
    BoardingFlags, ControlAction, ControlContext, ControlState, TurntableControl,
};
#[allow(unused_imports)]
pub use turntable_pool::{AccessPathDetails, TurntablePool};
#[allow(unused_imports)]
pub use types::{
    normalize_angle, signed_angle_delta, DeviceId, Direction, Position, SectionEnd, SectionId,
    SimId, TrackPosition, TrainId, ALIGNMENT_TOLERANCE, BOARDING_TOLERANCE,
    DEFAULT_APPROACH_CLEARANCE, DEFAULT_DECK_SPEED, DEFAULT_ENTRY_CLEARANCE,
    DEFAULT_RELEASE_CLEARANCE, DEFAULT_ROTATION_SPEED, DEFAULT_TRAIN_SPEED, POSITION_EPSILON,
    SPEED_EPSILON,
};
pub use world::SimWorld;
