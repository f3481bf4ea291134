//! Storage tracks: the capacity-tracked sidings that make up a pool
//!
//! Storage paths are authored from the track entrance to its dead end.
//! Trains stack up from the dead end towards the entrance, so the free
//! space is everything between the entrance margin and the entrance-side
//! end of the most recently arrived train.

use log::warn;
use std::collections::HashMap;

use super::path::TrackPath;
use super::train::SimTrain;
use super::types::{TrackPosition, TrainId};

/// Geometry linking a path to a turntable deck
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeviceOffsets {
    /// Index of the turntable exit the path leaves through
    pub exit_index: usize,
    /// Inbound distance from the outer end at which a train queues
    pub approach_offset: f32,
    /// Inbound distance from the outer end to the deck centre
    pub deck_center_entry_offset: f32,
    /// Outbound distance from the path start to the deck centre
    pub deck_center_exit_offset: f32,
}

/// A storage track in a pool
#[derive(Debug, Clone, PartialEq)]
pub struct StorageTrack {
    pub name: String,
    pub storage_path: TrackPath,
    pub start_traveller: Option<TrackPosition>,
    pub reverse_traveller: Option<TrackPosition>,
    /// Paths to the outside network, authored outbound from the track
    pub access_paths: Vec<TrackPath>,
    pub capacity_length: f32,
    pub length_correction: f32,
    /// Stored trains, oldest first
    pub occupants: Vec<TrainId>,
    /// Trains that hold a reservation but have not arrived yet
    pub claims: Vec<TrainId>,
    pub max_occupants: Option<usize>,
    pub remaining_length: f32,
    pub device_offsets: Option<DeviceOffsets>,
}

impl StorageTrack {
    pub fn new(
        name: impl Into<String>,
        storage_path: TrackPath,
        access_paths: Vec<TrackPath>,
        capacity_length: f32,
        length_correction: f32,
        max_occupants: Option<usize>,
    ) -> Self {
        let start_traveller = storage_path.start_traveller();
        let reverse_traveller = storage_path.reverse_traveller();
        Self {
            name: name.into(),
            storage_path,
            start_traveller,
            reverse_traveller,
            access_paths,
            capacity_length,
            length_correction,
            occupants: Vec::new(),
            claims: Vec::new(),
            max_occupants,
            remaining_length: capacity_length,
            device_offsets: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.occupants.is_empty()
    }

    pub fn has_claims(&self) -> bool {
        !self.claims.is_empty()
    }

    pub fn holds_claim(&self, train: TrainId) -> bool {
        self.claims.contains(&train)
    }

    pub fn is_occupant(&self, train: TrainId) -> bool {
        self.occupants.contains(&train)
    }

    /// Train appears among the occupants or claims
    pub fn involves(&self, train: TrainId) -> bool {
        self.holds_claim(train) || self.is_occupant(train)
    }

    /// Most recently arrived occupant
    pub fn tail_occupant(&self) -> Option<TrainId> {
        self.occupants.last().copied()
    }

    /// Length a new train may use. An empty track still keeps the length
    /// correction in reserve so the first arrival respects it.
    pub fn available_length(&self) -> f32 {
        if self.is_empty() {
            self.capacity_length - self.length_correction
        } else {
            self.remaining_length
        }
    }

    /// Track has room for a train of this length and no pending claims
    pub fn accepts(&self, length: f32) -> bool {
        let below_cap = self
            .max_occupants
            .map_or(true, |max| self.occupants.len() < max);
        !self.has_claims() && below_cap && self.available_length() > length
    }

    pub fn add_claim(&mut self, train: TrainId) {
        if !self.claims.contains(&train) {
            self.claims.push(train);
        }
    }

    pub fn remove_claim(&mut self, train: TrainId) -> bool {
        let before = self.claims.len();
        self.claims.retain(|id| *id != train);
        self.claims.len() != before
    }

    /// Append an occupant once
    pub fn add_occupant(&mut self, train: TrainId) {
        if !self.occupants.contains(&train) {
            self.occupants.push(train);
        }
    }

    pub fn remove_occupant(&mut self, train: TrainId) -> bool {
        let before = self.occupants.len();
        self.occupants.retain(|id| *id != train);
        self.occupants.len() != before
    }

    /// Distance from the dead end to the entrance-side end of the stored
    /// trains, derived from the remaining length
    pub fn occupied_extent(&self) -> f32 {
        if self.is_empty() {
            0.0
        } else {
            (self.capacity_length - self.remaining_length - self.length_correction).max(0.0)
        }
    }

    /// Distance along the storage path at which the next arrival's front stops
    pub fn stop_offset(&self) -> f32 {
        self.storage_path.total_length() - self.occupied_extent()
    }

    /// Distance along the storage path of the train's entrance-side end.
    /// Same-direction travel measures from the rear marker, opposite
    /// direction from the front marker.
    pub fn tail_distance(&self, train: &SimTrain) -> Option<f32> {
        let front = train.front_position()?;
        let (front_distance, same_direction) = self.storage_path.project(&front)?;
        if !same_direction {
            return Some(front_distance);
        }
        let rear = train
            .rear_position()
            .and_then(|rear| self.storage_path.project(&rear))
            .map(|(distance, _)| distance);
        Some(rear.unwrap_or(front_distance - train.length()))
    }

    /// Drop tail occupants that no longer exist, then recompute the
    /// remaining length from the first live tail
    pub fn settle_tail(&mut self, trains: &HashMap<TrainId, SimTrain>) {
        while let Some(tail) = self.tail_occupant() {
            if let Some(train) = trains.get(&tail) {
                self.recompute_remaining(Some(train));
                return;
            }
            warn!(
                "Stored {} on storage track {} no longer exists; dropping it",
                tail, self.name
            );
            self.remove_occupant(tail);
        }
        self.recompute_remaining(None);
    }

    /// Recompute the remaining length after `tail` became the last occupant.
    /// `None` empties the track back to full capacity.
    pub fn recompute_remaining(&mut self, tail: Option<&SimTrain>) {
        let Some(train) = tail else {
            self.remaining_length = self.capacity_length;
            return;
        };
        match self.tail_distance(train) {
            Some(tail_distance) => {
                let extent = self.storage_path.total_length() - tail_distance;
                self.remaining_length =
                    (self.capacity_length - extent - self.length_correction).max(0.0);
            }
            None => {
                warn!(
                    "{} ({}) is not on storage track {}; estimating remaining length from its length",
                    train.id, train.name, self.name
                );
                let extent = self.occupied_extent() + train.length();
                self.remaining_length =
                    (self.capacity_length - extent - self.length_correction).max(0.0);
            }
        }
    }
}
