//! Turntable pools
//!
//! Storage tracks radiate from a single turntable. Every access and storage
//! path starts on the deck and leads away from it. Offsets along each path
//! are worked out once at load time so that a control can park a train with
//! its midpoint on the deck centre.

use anyhow::{Context, Result};
use log::{info, warn};

use super::config::{PathDefinition, TurntablePoolDefinition};
use super::path::TrackPath;
use super::pool::{
    ExtractOutcome, Placement, Pool, PoolContext, StoragePool, TrackSelection,
};
use super::storage_track::{DeviceOffsets, StorageTrack};
use super::track_network::TrackNetwork;
use super::train::{SimTrain, TrainState};
use super::turntable::Turntable;
use super::turntable_control::{ControlAction, TurntableControl};
use super::types::{DeviceId, SectionId, TrackPosition, TrainId};

/// An access path between the deck and the network
#[derive(Debug, Clone, PartialEq)]
pub struct AccessPathDetails {
    /// Outbound from the deck
    pub path: TrackPath,
    pub traveller: Option<TrackPosition>,
    pub offsets: DeviceOffsets,
}

/// A pool served by a turntable
#[derive(Debug, Clone, PartialEq)]
pub struct TurntablePool {
    pub pool: Pool,
    pub access_paths: Vec<AccessPathDetails>,
    pub device: DeviceId,
    pub deck_section: SectionId,
    pub deck_length: f32,
    pub approach_clearance: f32,
    pub release_clearance: f32,
    pub deck_speed_limit: Option<f32>,
    pub frame_rate: Option<f32>,
}

impl TurntablePool {
    pub fn new(
        definition: &TurntablePoolDefinition,
        device: &Turntable,
        network: &TrackNetwork,
    ) -> Result<Self> {
        let mut pool = Self {
            pool: Pool::new(&definition.name, definition.force_creation_on_underflow),
            access_paths: Vec::new(),
            device: device.id,
            deck_section: device.deck_section,
            deck_length: device.deck_length,
            approach_clearance: definition.approach_clearance,
            release_clearance: definition.release_clearance,
            deck_speed_limit: definition.deck_speed_limit,
            frame_rate: definition.frame_rate,
        };

        for (index, authored) in definition.access_paths.iter().enumerate() {
            let built = pool
                .device_path(authored, device, network)
                .with_context(|| format!("access path {index} of pool {}", definition.name));
            match built {
                Ok((path, offsets)) => pool.access_paths.push(AccessPathDetails {
                    traveller: path.start_traveller(),
                    path,
                    offsets,
                }),
                Err(e) => warn!("Dropping access path: {e:#}"),
            }
        }
        if pool.access_paths.is_empty() {
            anyhow::bail!("Pool {} has no usable access paths", definition.name);
        }

        for track_def in &definition.tracks {
            let built = pool
                .device_path(&track_def.storage_path, device, network)
                .and_then(|(path, offsets)| {
                    if path.has_repeated_section() {
                        anyhow::bail!("storage path reverses on itself");
                    }
                    let capacity =
                        path.total_length() - pool.deck_length - pool.release_clearance;
                    if capacity <= 0.0 {
                        anyhow::bail!("no usable length beyond the release clearance");
                    }
                    let mut track = StorageTrack::new(
                        &track_def.name,
                        path,
                        Vec::new(),
                        capacity,
                        definition.length_correction,
                        track_def.max_occupants,
                    );
                    track.device_offsets = Some(offsets);
                    Ok(track)
                })
                .with_context(|| {
                    format!("track {} of pool {}", track_def.name, definition.name)
                });
            match built {
                Ok(track) => pool.pool.tracks.push(track),
                Err(e) => warn!("Dropping storage track: {e:#}"),
            }
        }
        if pool.pool.tracks.is_empty() {
            anyhow::bail!("Pool {} has no usable storage tracks", definition.name);
        }
        Ok(pool)
    }

    /// Validate a path against the device and work out its offsets.
    /// Paths authored towards the deck are turned round.
    fn device_path(
        &self,
        authored: &PathDefinition,
        device: &Turntable,
        network: &TrackNetwork,
    ) -> Result<(TrackPath, DeviceOffsets)> {
        let path = network.path_from(authored)?;
        let starts_on_deck = path.first().is_some_and(|e| e.section == self.deck_section);
        let ends_on_deck = path.last().is_some_and(|e| e.section == self.deck_section);
        let path = match (starts_on_deck, ends_on_deck) {
            (true, _) => path,
            (false, true) => path.reversed(),
            (false, false) => anyhow::bail!("path does not reach turntable {}", device.name),
        };
        let exit_section = path
            .elements()
            .get(1)
            .map(|element| element.section)
            .context("path ends on the deck")?;
        let exit_index = device
            .exit_index_of(exit_section)
            .with_context(|| format!("{exit_section} is not an exit of {}", device.name))?;

        let total = path.total_length();
        let offsets = DeviceOffsets {
            exit_index,
            approach_offset: (total - self.deck_length - self.approach_clearance).max(0.0),
            deck_center_entry_offset: total - self.deck_length / 2.0,
            deck_center_exit_offset: self.deck_length / 2.0,
        };
        Ok((path, offsets))
    }

    pub fn name(&self) -> &str {
        &self.pool.name
    }

    pub fn tracks(&self) -> &[StorageTrack] {
        &self.pool.tracks
    }

    /// Find where the train's route meets an access path.
    /// Returns (route element index, access path index).
    pub fn test_pool_access(&self, route: &TrackPath) -> Option<(usize, usize)> {
        route
            .elements()
            .iter()
            .enumerate()
            .rev()
            .find_map(|(route_index, element)| {
                self.access_paths
                    .iter()
                    .position(|access| {
                        access
                            .path
                            .last()
                            .is_some_and(|last| last.opposes(element))
                    })
                    .map(|access_index| (route_index, access_index))
            })
    }

    /// Access path the requester's route starts from
    fn departure_access(&self, route: &TrackPath) -> Option<usize> {
        let first = route.first()?;
        self.access_paths.iter().position(|access| {
            access
                .path
                .last()
                .is_some_and(|last| last.matches(first))
        })
    }

    fn has_control(ctx: &PoolContext, train: TrainId) -> bool {
        ctx.controls.iter().any(|control| control.train == train)
    }
}

impl StoragePool for TurntablePool {
    fn name(&self) -> &str {
        &self.pool.name
    }

    fn select_track_for_entry(&self, train: &SimTrain) -> TrackSelection {
        if train.length() > self.deck_length {
            return TrackSelection::Invalid;
        }
        self.pool.select_track(train)
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
        if train.length() > self.deck_length {
            warn!(
                "{} ({}) length {:.1} exceeds deck length {:.1} of pool {}",
                train.id,
                train.name,
                train.length(),
                self.deck_length,
                self.pool.name
            );
            return Placement::rejected(TrackSelection::Invalid);
        }
        let selection = self.pool.select_track(train);
        let Some(track) = selection.track() else {
            warn!(
                "{} ({}) cannot enter pool {}: {:?}",
                train.id, train.name, self.pool.name, selection
            );
            return Placement::rejected(selection);
        };

        if !extend_route {
            self.pool.tracks[track].add_claim(train_id);
            return Placement {
                selection,
                access_path: None,
                route: Some(self.pool.tracks[track].storage_path.clone()),
            };
        }

        let Some((route_index, access)) = self.test_pool_access(&train.route) else {
            warn!(
                "Route of {} ({}) does not reach pool {}",
                train.id, train.name, self.pool.name
            );
            return Placement::rejected(TrackSelection::Invalid);
        };

        let details = &self.access_paths[access];
        train.truncate_route(route_index + 1);
        let approach_start = train.route.element_start_distance(route_index);
        train.extend_route(&details.path.reversed().without_last());
        train.request_stop(approach_start + details.offsets.approach_offset);
        train.pool_exit = Some(self.pool.name.clone());
        self.pool.tracks[track].add_claim(train_id);
        info!(
            "{} ({}) routed to {} via turntable in pool {}",
            train.id, train.name, self.pool.tracks[track].name, self.pool.name
        );

        if !Self::has_control(ctx, train_id) {
            ctx.controls.push(TurntableControl::new(
                train_id,
                &self.pool.name,
                self.device,
                ControlAction::FromAccess,
                access,
                track,
            ));
        }

        Placement {
            selection,
            access_path: Some(access),
            route: None,
        }
    }

    fn add_unit(&mut self, train: &SimTrain, claim_only: bool) {
        self.pool.record_unit(train, claim_only);
    }

    fn extract_train(
        &mut self,
        requester: TrainId,
        clock_time: f32,
        ctx: &mut PoolContext,
    ) -> ExtractOutcome {
        let (track_index, stored) = match self.pool.find_extraction_candidate(ctx.trains) {
            Ok(candidate) => candidate,
            Err(outcome) => return outcome,
        };
        let Some(requester_route) = ctx.trains.get(&requester).map(|t| t.route.clone()) else {
            return ExtractOutcome::Failed;
        };
        let Some(access) = self.departure_access(&requester_route) else {
            warn!(
                "No access path of pool {} joins the route of {}",
                self.pool.name, requester
            );
            return ExtractOutcome::Failed;
        };

        let track = &self.pool.tracks[track_index];
        let storage_length = track.storage_path.total_length();
        let approach_offset = track
            .device_offsets
            .map_or(0.0, |offsets| offsets.approach_offset);
        let to_deck = track.storage_path.reversed().without_last();
        let continuation = self.access_paths[access].path.joined(&requester_route);
        let outbound = track
            .storage_path
            .reversed()
            .joined(&continuation);
        if self
            .pool
            .is_exit_contested(&outbound, requester, stored, ctx.trains)
        {
            return ExtractOutcome::Delayed;
        }

        let Some(tail) = self
            .pool
            .form_from_occupant(track_index, stored, requester, ctx)
        else {
            return ExtractOutcome::Failed;
        };
        let Some(train) = ctx.trains.get_mut(&requester) else {
            return ExtractOutcome::Failed;
        };
        train.reverse_formation();
        train.replace_route(to_deck, (storage_length - tail).max(0.0));
        train.request_stop(approach_offset);
        train.continuation = Some(continuation);
        train.state = TrainState::Running;
        info!(
            "{} ({}) formed from {} on {} in pool {} at {:.1}s",
            train.id, train.name, stored, self.pool.tracks[track_index].name, self.pool.name, clock_time
        );

        if !Self::has_control(ctx, requester) {
            ctx.controls.push(TurntableControl::new(
                requester,
                &self.pool.name,
                self.device,
                ControlAction::FromStorage,
                access,
                track_index,
            ));
        }
        ExtractOutcome::Formed
    }

    fn end_of_route_distance(&self, train: &SimTrain) -> Option<f32> {
        let track = &self.pool.tracks[self.pool.track_of(train.id)?];
        let route_length = train.route.total_length();
        let ends_in_storage = match (train.route.last(), track.storage_path.last()) {
            (Some(route_end), Some(storage_end)) => route_end.matches(storage_end),
            _ => false,
        };
        if ends_in_storage {
            Some(route_length - track.occupied_extent())
        } else {
            Some((route_length - self.approach_clearance).max(0.0))
        }
    }
}
