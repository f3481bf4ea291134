//! Storage pools
//!
//! A pool is a named, ordered set of storage tracks. Trains are allocated
//! first-fit in declaration order. A train heading for a track holds a claim
//! on it until it physically arrives, at which point the claim becomes an
//! occupancy. Nothing here blocks: contention is reported as a status and
//! the caller retries on a later tick.

use anyhow::{Context, Result};
use log::{info, warn};
use std::collections::HashMap;

use super::config::PoolDefinition;
use super::path::TrackPath;
use super::storage_track::StorageTrack;
use super::track_network::TrackNetwork;
use super::train::{ConsistTransfer, DetachMode, SimTrain, TrainState};
use super::turntable_control::TurntableControl;
use super::turntable_pool::TurntablePool;
use super::types::{SectionId, TrainId};

/// Outcome of choosing a storage track for an arriving train
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackSelection {
    /// Index of the chosen track
    Track(usize),
    /// No track has room
    Overflow,
    /// No track has room but a claim in progress may change that; try later
    Claimed,
    /// The train can never be stored here
    Invalid,
}

impl TrackSelection {
    pub fn track(self) -> Option<usize> {
        match self {
            TrackSelection::Track(index) => Some(index),
            _ => None,
        }
    }
}

/// Result of placing a train in a pool
#[derive(Debug, Clone, PartialEq)]
pub struct Placement {
    pub selection: TrackSelection,
    pub access_path: Option<usize>,
    /// Route to storage when the train's own route was not extended
    pub route: Option<TrackPath>,
}

impl Placement {
    pub fn rejected(selection: TrackSelection) -> Self {
        Self {
            selection,
            access_path: None,
            route: None,
        }
    }

    pub fn storage_index(&self) -> Option<usize> {
        self.selection.track()
    }
}

/// Outcome of asking a pool for a stored train
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractOutcome {
    /// Pool is empty and may not create trains
    NotCreated,
    /// Contention; retry on a later tick
    Delayed,
    /// The requester took over a stored train
    Formed,
    /// Pool is empty and the requester may be created from nothing
    ForceCreated,
    /// No access path joins the pool to the requester's route
    Failed,
}

/// Mutable simulation state pool operations act on
pub struct PoolContext<'a> {
    pub trains: &'a mut HashMap<TrainId, SimTrain>,
    pub network: &'a mut TrackNetwork,
    pub controls: &'a mut Vec<TurntableControl>,
    pub consist: &'a dyn ConsistTransfer,
}

/// Operations shared by plain and turntable pools
pub trait StoragePool {
    fn name(&self) -> &str;

    fn select_track_for_entry(&self, train: &SimTrain) -> TrackSelection;

    /// Route a train into the pool and claim a track for it. With
    /// `extend_route` unset the train's route is left alone and a route
    /// made only of pool paths is returned instead.
    fn place_in_pool(
        &mut self,
        train: TrainId,
        extend_route: bool,
        ctx: &mut PoolContext,
    ) -> Placement;

    /// Record a train's claim, or commit its arrival
    fn add_unit(&mut self, train: &SimTrain, claim_only: bool);

    fn extract_train(
        &mut self,
        requester: TrainId,
        clock_time: f32,
        ctx: &mut PoolContext,
    ) -> ExtractOutcome;

    /// Distance along the train's route at which it should stop in storage
    fn end_of_route_distance(&self, train: &SimTrain) -> Option<f32>;
}

/// A plain storage pool
#[derive(Debug, Clone, PartialEq)]
pub struct Pool {
    pub name: String,
    pub force_creation_on_underflow: bool,
    pub tracks: Vec<StorageTrack>,
}

impl Pool {
    pub fn new(name: impl Into<String>, force_creation_on_underflow: bool) -> Self {
        Self {
            name: name.into(),
            force_creation_on_underflow,
            tracks: Vec::new(),
        }
    }

    /// Build a pool from its definition. Tracks that fail validation are
    /// dropped with a warning; a pool left without tracks is an error.
    pub fn from_definition(definition: &PoolDefinition, network: &TrackNetwork) -> Result<Self> {
        let mut pool = Pool::new(&definition.name, definition.force_creation_on_underflow);
        for track_def in &definition.tracks {
            let built = (|| -> Result<StorageTrack> {
                let storage_path = network.path_from(&track_def.storage_path)?;
                if storage_path.has_repeated_section() {
                    anyhow::bail!("storage path reverses on itself");
                }
                if track_def.access_paths.is_empty() {
                    anyhow::bail!("no access paths");
                }
                let access_paths = track_def
                    .access_paths
                    .iter()
                    .map(|path| network.path_from(path))
                    .collect::<Result<Vec<_>>>()?;
                let capacity = storage_path.total_length() - definition.entry_clearance;
                if capacity <= 0.0 {
                    anyhow::bail!("no usable length after entry clearance");
                }
                Ok(StorageTrack::new(
                    &track_def.name,
                    storage_path,
                    access_paths,
                    capacity,
                    definition.length_correction,
                    track_def.max_occupants,
                ))
            })()
            .with_context(|| format!("track {} of pool {}", track_def.name, definition.name));

            match built {
                Ok(track) => pool.tracks.push(track),
                Err(e) => warn!("Dropping storage track: {e:#}"),
            }
        }
        if pool.tracks.is_empty() {
            anyhow::bail!("Pool {} has no usable storage tracks", definition.name);
        }
        Ok(pool)
    }

    /// Track whose occupants or claims include the train
    pub fn track_of(&self, train: TrainId) -> Option<usize> {
        self.tracks.iter().position(|track| track.involves(train))
    }

    pub fn has_claims(&self) -> bool {
        self.tracks.iter().any(StorageTrack::has_claims)
    }

    /// First-fit selection shared by all pool kinds
    pub fn select_track(&self, train: &SimTrain) -> TrackSelection {
        let length = train.length();
        if length <= 0.0 || self.tracks.is_empty() {
            return TrackSelection::Invalid;
        }
        if let Some(index) = self
            .tracks
            .iter()
            .position(|track| track.holds_claim(train.id))
        {
            return TrackSelection::Track(index);
        }
        if let Some(index) = self.tracks.iter().position(|track| track.accepts(length)) {
            return TrackSelection::Track(index);
        }
        if self.has_claims() {
            TrackSelection::Claimed
        } else {
            TrackSelection::Overflow
        }
    }

    /// Find where the train's route meets an access path of the track.
    /// Returns (route element index, access path index).
    pub fn test_pool_exit(&self, route: &TrackPath, track: usize) -> Option<(usize, usize)> {
        let access_paths = &self.tracks.get(track)?.access_paths;
        route
            .elements()
            .iter()
            .enumerate()
            .rev()
            .find_map(|(route_index, element)| {
                access_paths
                    .iter()
                    .position(|access| access.last().is_some_and(|last| last.opposes(element)))
                    .map(|access_index| (route_index, access_index))
            })
    }

    /// Route into storage through an access path, authored inbound
    fn inbound_route(&self, track: usize, access: usize) -> Option<TrackPath> {
        let track = self.tracks.get(track)?;
        let access = track.access_paths.get(access)?;
        Some(access.reversed().joined(&track.storage_path))
    }

    /// Commit or claim bookkeeping shared by all pool kinds
    pub fn record_unit(&mut self, train: &SimTrain, claim_only: bool) {
        let claimed = self
            .tracks
            .iter()
            .position(|track| track.holds_claim(train.id));

        if claim_only {
            if claimed.is_some() || self.tracks.iter().any(|track| track.is_occupant(train.id)) {
                return;
            }
            match self.select_track(train) {
                TrackSelection::Track(index) => self.tracks[index].add_claim(train.id),
                other => warn!(
                    "Cannot claim space for {} ({}) in pool {}: {:?}",
                    train.id, train.name, self.name, other
                ),
            }
            return;
        }

        let index = match claimed {
            Some(index) => {
                self.tracks[index].remove_claim(train.id);
                index
            }
            None => {
                if let Some(index) = self
                    .tracks
                    .iter()
                    .position(|track| track.is_occupant(train.id))
                {
                    let track = &mut self.tracks[index];
                    if track.tail_occupant() == Some(train.id) {
                        track.recompute_remaining(Some(train));
                    }
                    return;
                }
                match self.select_track(train) {
                    TrackSelection::Track(index) => index,
                    other => {
                        warn!(
                            "No storage for {} ({}) in pool {}: {:?}",
                            train.id, train.name, self.name, other
                        );
                        return;
                    }
                }
            }
        };

        let track = &mut self.tracks[index];
        track.add_occupant(train.id);
        track.recompute_remaining(Some(train));
        info!(
            "{} ({}) stored on {} in pool {}, {:.1} remaining",
            train.id, train.name, track.name, self.name, track.remaining_length
        );
    }

    /// Pick the train to hand out, applying the first two extraction rules.
    /// Stale occupant ids are dropped and the search retried.
    pub fn find_extraction_candidate(
        &mut self,
        trains: &HashMap<TrainId, SimTrain>,
    ) -> std::result::Result<(usize, TrainId), ExtractOutcome> {
        loop {
            let candidate = self
                .tracks
                .iter()
                .enumerate()
                .find(|(_, track)| !track.has_claims() && !track.is_empty())
                .and_then(|(index, track)| track.tail_occupant().map(|id| (index, id)));

            let Some((index, stored)) = candidate else {
                if self.has_claims() {
                    return Err(ExtractOutcome::Delayed);
                }
                return Err(if self.force_creation_on_underflow {
                    ExtractOutcome::ForceCreated
                } else {
                    ExtractOutcome::NotCreated
                });
            };

            if trains.contains_key(&stored) {
                return Ok((index, stored));
            }

            warn!(
                "Stored {} in pool {} no longer exists; dropping it",
                stored, self.name
            );
            let track = &mut self.tracks[index];
            track.remove_occupant(stored);
            track.settle_tail(trains);
        }
    }

    /// Another train heading into this pool holds or occupies part of the
    /// outbound route
    pub fn is_exit_contested(
        &self,
        outbound: &TrackPath,
        requester: TrainId,
        stored: TrainId,
        trains: &HashMap<TrainId, SimTrain>,
    ) -> bool {
        trains.values().any(|other| {
            if other.id == requester || other.id == stored || !other.is_active() {
                return false;
            }
            if other.pool_exit.as_deref() != Some(self.name.as_str()) {
                return false;
            }
            let mut sections: Vec<SectionId> = other.reserved_sections();
            sections.extend(other.occupied_sections().iter().map(|(section, _)| *section));
            sections
                .iter()
                .any(|section| outbound.contains_section(*section))
        })
    }

    /// Retire a stored train and move its consist onto the requester.
    /// Returns the stored train's entrance-side distance along the storage path.
    pub fn form_from_occupant(
        &mut self,
        track_index: usize,
        stored: TrainId,
        requester: TrainId,
        ctx: &mut PoolContext,
    ) -> Option<f32> {
        let mut stored_train = ctx.trains.remove(&stored)?;
        let track = &mut self.tracks[track_index];
        let tail = track
            .tail_distance(&stored_train)
            .unwrap_or(stored_train.length());

        track.remove_occupant(stored);
        ctx.network.remove_train_from_tracking(stored);
        track.settle_tail(ctx.trains);

        let Some(train) = ctx.trains.get_mut(&requester) else {
            warn!("Requesting {} vanished during extraction", requester);
            return None;
        };
        train.cars.clear();
        let units = stored_train.cars.len();
        ctx.consist
            .transfer_consist(&mut stored_train, train, DetachMode::FromFront, units, &[]);
        train.reversed = stored_train.reversed;
        train.intended_front_first = stored_train.intended_front_first;
        Some(tail)
    }

    fn requester_route(ctx: &PoolContext, requester: TrainId) -> Option<TrackPath> {
        ctx.trains.get(&requester).map(|train| train.route.clone())
    }
}

impl StoragePool for Pool {
    fn name(&self) -> &str {
        &self.name
    }

    fn select_track_for_entry(&self, train: &SimTrain) -> TrackSelection {
        self.select_track(train)
    }

    fn place_in_pool(
        &mut self,
        train_id: TrainId,
        extend_route: bool,
        ctx: &mut PoolContext,
    ) -> Placement {
        let Some(train) = ctx.trains.get_mut(&train_id) else {
            return Placement::rejected(TrackSelection::Invalid);
        };
        let selection = self.select_track(train);
        let Some(track) = selection.track() else {
            warn!(
                "{} ({}) cannot enter pool {}: {:?}",
                train.id, train.name, self.name, selection
            );
            return Placement::rejected(selection);
        };

        if !extend_route {
            let Some(route) = self.inbound_route(track, 0) else {
                return Placement::rejected(TrackSelection::Invalid);
            };
            self.tracks[track].add_claim(train_id);
            return Placement {
                selection,
                access_path: Some(0),
                route: Some(route),
            };
        }

        let Some((route_index, access)) = self.test_pool_exit(&train.route, track) else {
            warn!(
                "Route of {} ({}) does not reach pool {}",
                train.id, train.name, self.name
            );
            return Placement::rejected(TrackSelection::Invalid);
        };

        let Some(inbound) = self.inbound_route(track, access) else {
            return Placement::rejected(TrackSelection::Invalid);
        };
        train.truncate_route(route_index + 1);
        train.extend_route(&inbound);
        train.pool_exit = Some(self.name.clone());
        self.tracks[track].add_claim(train_id);
        if let Some(stop) = self.end_of_route_distance(train) {
            train.request_stop(stop);
        }
        info!(
            "{} ({}) routed to {} in pool {}",
            train.id, train.name, self.tracks[track].name, self.name
        );

        Placement {
            selection,
            access_path: Some(access),
            route: None,
        }
    }

    fn add_unit(&mut self, train: &SimTrain, claim_only: bool) {
        self.record_unit(train, claim_only);
    }

    fn extract_train(
        &mut self,
        requester: TrainId,
        clock_time: f32,
        ctx: &mut PoolContext,
    ) -> ExtractOutcome {
        let (track_index, stored) = match self.find_extraction_candidate(ctx.trains) {
            Ok(candidate) => candidate,
            Err(outcome) => return outcome,
        };
        let Some(requester_route) = Self::requester_route(ctx, requester) else {
            return ExtractOutcome::Failed;
        };

        let track = &self.tracks[track_index];
        let Some(access) = track.access_paths.iter().find(|access| {
            match (access.last(), requester_route.first()) {
                (Some(last), Some(first)) => last.matches(first),
                _ => false,
            }
        }) else {
            warn!(
                "No access path joins {} in pool {} to the route of {}",
                track.name, self.name, requester
            );
            return ExtractOutcome::Failed;
        };

        let outbound = track
            .storage_path
            .reversed()
            .joined(access)
            .joined(&requester_route);
        if self.is_exit_contested(&outbound, requester, stored, ctx.trains) {
            return ExtractOutcome::Delayed;
        }

        let storage_length = track.storage_path.total_length();
        let Some(tail) = self.form_from_occupant(track_index, stored, requester, ctx) else {
            return ExtractOutcome::Failed;
        };
        let Some(train) = ctx.trains.get_mut(&requester) else {
            return ExtractOutcome::Failed;
        };
        train.reverse_formation();
        train.replace_route(outbound, (storage_length - tail).max(0.0));
        train.state = TrainState::Running;
        info!(
            "{} ({}) formed from {} on {} in pool {} at {:.1}s",
            train.id, train.name, stored, self.tracks[track_index].name, self.name, clock_time
        );
        ExtractOutcome::Formed
    }

    fn end_of_route_distance(&self, train: &SimTrain) -> Option<f32> {
        let track = &self.tracks[self.track_of(train.id)?];
        Some(train.route.total_length() - track.occupied_extent())
    }
}

/// A pool of either kind
#[derive(Debug, Clone, PartialEq)]
pub enum PoolKind {
    Plain(Pool),
    Turntable(TurntablePool),
}

impl PoolKind {
    /// The allocation core shared by both kinds
    pub fn core(&self) -> &Pool {
        match self {
            PoolKind::Plain(pool) => pool,
            PoolKind::Turntable(pool) => &pool.pool,
        }
    }

    pub fn as_turntable(&self) -> Option<&TurntablePool> {
        match self {
            PoolKind::Turntable(pool) => Some(pool),
            PoolKind::Plain(_) => None,
        }
    }

    fn inner(&self) -> &dyn StoragePool {
        match self {
            PoolKind::Plain(pool) => pool,
            PoolKind::Turntable(pool) => pool,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn StoragePool {
        match self {
            PoolKind::Plain(pool) => pool,
            PoolKind::Turntable(pool) => pool,
        }
    }
}

impl StoragePool for PoolKind {
    fn name(&self) -> &str {
        self.inner().name()
    }

    fn select_track_for_entry(&self, train: &SimTrain) -> TrackSelection {
        self.inner().select_track_for_entry(train)
    }

    fn place_in_pool(
        &mut self,
        train: TrainId,
        extend_route: bool,
        ctx: &mut PoolContext,
    ) -> Placement {
        self.inner_mut().place_in_pool(train, extend_route, ctx)
    }

    fn add_unit(&mut self, train: &SimTrain, claim_only: bool) {
        self.inner_mut().add_unit(train, claim_only)
    }

    fn extract_train(
        &mut self,
        requester: TrainId,
        clock_time: f32,
        ctx: &mut PoolContext,
    ) -> ExtractOutcome {
        self.inner_mut().extract_train(requester, clock_time, ctx)
    }

    fn end_of_route_distance(&self, train: &SimTrain) -> Option<f32> {
        self.inner().end_of_route_distance(train)
    }
}
