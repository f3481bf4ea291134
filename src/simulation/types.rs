//! Core types for the storage pool simulation
//!
//! Identifiers, world positions, track positions and the tuning constants
//! shared by pools, turntables and trains.

use std::fmt;

/// A unique identifier for simulation entities
/// This is a simple wrapper around a usize for type safety
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SimId(pub usize);

/// A wrapper type for train IDs (the train "number")
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TrainId(pub SimId);

/// A wrapper type for track section IDs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SectionId(pub SimId);

/// A wrapper type for turntable device handles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceId(pub SimId);

impl fmt::Display for TrainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "train {}", self.0 .0)
    }
}

impl fmt::Display for SectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "section {}", self.0 .0)
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "device {}", self.0 .0)
    }
}

/// Direction of travel along a track section.
/// `Forward` runs from the section start (offset 0) towards its end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Direction {
    Forward,
    Backward,
}

impl Direction {
    pub fn reverse(self) -> Self {
        match self {
            Direction::Forward => Direction::Backward,
            Direction::Backward => Direction::Forward,
        }
    }

    pub fn is_forward(self) -> bool {
        self == Direction::Forward
    }

    pub fn from_forward(forward: bool) -> Self {
        if forward {
            Direction::Forward
        } else {
            Direction::Backward
        }
    }
}

/// One of the two ends of a track section
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SectionEnd {
    Start,
    End,
}

impl SectionEnd {
    pub fn opposite(self) -> Self {
        match self {
            SectionEnd::Start => SectionEnd::End,
            SectionEnd::End => SectionEnd::Start,
        }
    }

    /// Direction of travel that leaves a section through this end
    pub fn leaving_direction(self) -> Direction {
        match self {
            SectionEnd::Start => Direction::Backward,
            SectionEnd::End => Direction::Forward,
        }
    }

    /// Direction of travel that enters a section through this end
    pub fn entering_direction(self) -> Direction {
        self.leaving_direction().reverse()
    }
}

/// A position on the track network: section, offset from the section start,
/// and the direction of travel. Also used as a path "traveller".
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackPosition {
    pub section: SectionId,
    pub offset: f32,
    pub direction: Direction,
}

impl TrackPosition {
    pub fn new(section: SectionId, offset: f32, direction: Direction) -> Self {
        Self {
            section,
            offset,
            direction,
        }
    }
}

/// A 3D position in the simulation
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Position {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Position {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn distance(&self, other: &Position) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        (dx * dx + dy * dy + dz * dz).sqrt()
    }

    pub fn lerp(&self, other: &Position, t: f32) -> Position {
        Position {
            x: self.x + (other.x - self.x) * t,
            y: self.y + (other.y - self.y) * t,
            z: self.z + (other.z - self.z) * t,
        }
    }

    /// Heading in degrees from this position to another, measured in the
    /// x/z plane counter-clockwise from +x, normalised to [0, 360)
    pub fn heading_to(&self, other: &Position) -> f32 {
        let dx = other.x - self.x;
        let dz = other.z - self.z;
        normalize_angle(dz.atan2(dx).to_degrees())
    }

    /// The point `distance` away from this one along `heading` degrees
    pub fn offset_by(&self, heading: f32, distance: f32) -> Position {
        let radians = heading.to_radians();
        Position {
            x: self.x + radians.cos() * distance,
            y: self.y,
            z: self.z + radians.sin() * distance,
        }
    }
}

/// Normalise an angle in degrees to [0, 360)
pub fn normalize_angle(angle: f32) -> f32 {
    let wrapped = angle.rem_euclid(360.0);
    if wrapped >= 360.0 {
        0.0
    } else {
        wrapped
    }
}

/// Signed shortest rotation in degrees from `from` to `to`, in (-180, 180].
/// Positive values are counter-clockwise.
pub fn signed_angle_delta(from: f32, to: f32) -> f32 {
    let delta = normalize_angle(to - from);
    if delta > 180.0 {
        delta - 360.0
    } else {
        delta
    }
}

/// Speed below which a train counts as stationary (m/s)
pub const SPEED_EPSILON: f32 = 0.05;

/// Distance tolerance for stop targets and route ends (m)
pub const POSITION_EPSILON: f32 = 0.01;

/// Extra slack when testing whether a train end is on the deck (m)
pub const BOARDING_TOLERANCE: f32 = 0.1;

/// Angular tolerance for deck alignment (degrees)
pub const ALIGNMENT_TOLERANCE: f32 = 0.05;

/// Default distance kept clear of the deck edge while queueing (m)
pub const DEFAULT_APPROACH_CLEARANCE: f32 = 5.0;

/// Default distance a departing train must clear beyond the deck (m)
pub const DEFAULT_RELEASE_CLEARANCE: f32 = 5.0;

/// Default margin kept free at the entrance of a plain storage track (m)
pub const DEFAULT_ENTRY_CLEARANCE: f32 = 2.0;

/// Default speed limit on and around a turntable deck (m/s)
pub const DEFAULT_DECK_SPEED: f32 = 2.0;

/// Default angular speed of a turntable deck (degrees per second)
pub const DEFAULT_ROTATION_SPEED: f32 = 30.0;

/// Default maximum speed for trains (m/s)
pub const DEFAULT_TRAIN_SPEED: f32 = 10.0;
