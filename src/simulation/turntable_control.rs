//! Per-train turntable maneuvers
//!
//! One control exists for every train working a turntable. It is polled
//! once per tick and moves through its states as the device and the train
//! report progress:
//!
//! Inactive -> WaitingForDevice -> WaitingApproach -> Approaching -> OnDevice
//! -> WaitingDeparture -> Departing -> Completed
//!
//! The device is held from WaitingApproach until Completed.

use log::debug;

use super::path::{PathElement, TrackPath};
use super::storage_track::DeviceOffsets;
use super::track_network::TrackNetwork;
use super::train::{DistanceAction, SimTrain};
use super::turntable::{DeckAlignment, Rotation, Turntable};
use super::turntable_pool::TurntablePool;
use super::types::{DeviceId, TrackPosition, TrainId, BOARDING_TOLERANCE, SPEED_EPSILON};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlState {
    Inactive,
    WaitingForDevice,
    WaitingApproach,
    Approaching,
    OnDevice,
    WaitingDeparture,
    Departing,
    Completed,
}

/// Side of the device the maneuver starts from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlAction {
    FromAccess,
    FromStorage,
}

/// Which ends of the train have been seen on the deck
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BoardingFlags {
    pub front_on_board: bool,
    pub rear_on_board: bool,
}

impl BoardingFlags {
    pub fn on_board(&self) -> bool {
        self.front_on_board && self.rear_on_board
    }
}

/// What a control may touch while advancing
pub struct ControlContext<'a> {
    pub train: &'a mut SimTrain,
    pub device: &'a mut Turntable,
    pub pool: &'a TurntablePool,
    pub network: &'a TrackNetwork,
}

/// A train's maneuver across a turntable
#[derive(Debug, Clone, PartialEq)]
pub struct TurntableControl {
    pub train: TrainId,
    pub pool: String,
    pub device: DeviceId,
    pub state: ControlState,
    pub action: ControlAction,
    pub access_path_index: usize,
    pub storage_track_index: usize,
    pub reverse_formation: bool,
    /// Alignment the deck must reach before departure
    pub target_exit: Option<DeckAlignment>,
    /// Speed cap in force before the maneuver, restored on completion
    pub saved_speed_cap: Option<f32>,
    /// Stop distance that centres the train on the deck
    pub stop_offset: Option<f32>,
    pub boarding: Option<BoardingFlags>,
}

impl TurntableControl {
    pub fn new(
        train: TrainId,
        pool: impl Into<String>,
        device: DeviceId,
        action: ControlAction,
        access_path_index: usize,
        storage_track_index: usize,
    ) -> Self {
        Self {
            train,
            pool: pool.into(),
            device,
            state: ControlState::Inactive,
            action,
            access_path_index,
            storage_track_index,
            reverse_formation: false,
            target_exit: None,
            saved_speed_cap: None,
            stop_offset: None,
            boarding: None,
        }
    }

    /// Whether the control may still be dropped without disturbing the device
    pub fn is_cancellable(&self) -> bool {
        matches!(
            self.state,
            ControlState::Inactive | ControlState::WaitingForDevice
        )
    }

    /// Ask for the device; true once this train holds it
    pub fn check_device_available(&mut self, device: &mut Turntable) -> bool {
        device.request(self.train)
    }

    /// Path and offsets the train arrives on, outbound from the deck
    fn entry_path<'p>(&self, pool: &'p TurntablePool) -> Option<(&'p TrackPath, DeviceOffsets)> {
        match self.action {
            ControlAction::FromAccess => pool
                .access_paths
                .get(self.access_path_index)
                .map(|access| (&access.path, access.offsets)),
            ControlAction::FromStorage => {
                let track = pool.pool.tracks.get(self.storage_track_index)?;
                Some((&track.storage_path, track.device_offsets?))
            }
        }
    }

    /// Offsets of the path the train leaves on
    fn exit_offsets(&self, pool: &TurntablePool) -> Option<DeviceOffsets> {
        match self.action {
            ControlAction::FromAccess => pool
                .pool
                .tracks
                .get(self.storage_track_index)
                .and_then(|track| track.device_offsets),
            ControlAction::FromStorage => pool
                .access_paths
                .get(self.access_path_index)
                .map(|access| access.offsets),
        }
    }

    fn set_state(&mut self, state: ControlState) {
        if self.state != state {
            debug!(
                "{} turntable control {:?}: {:?} -> {:?}",
                self.train, self.action, self.state, state
            );
            self.state = state;
        }
    }

    /// Advance the maneuver by one tick
    pub fn advance_state(
        &mut self,
        _elapsed: f32,
        clock_time: f32,
        ctx: &mut ControlContext,
    ) -> ControlState {
        match self.state {
            ControlState::Inactive => {
                if ctx.train.at_requested_stop() {
                    self.set_state(ControlState::WaitingForDevice);
                    self.try_acquire(ctx);
                }
            }
            ControlState::WaitingForDevice => self.try_acquire(ctx),
            ControlState::WaitingApproach => self.wait_for_entry_alignment(ctx),
            ControlState::Approaching => {
                self.update_boarding(ctx);
                if self.boarding.is_some_and(|flags| flags.on_board()) {
                    self.set_state(ControlState::OnDevice);
                }
            }
            ControlState::OnDevice => self.rotate_to_exit(ctx),
            ControlState::WaitingDeparture => {
                if ctx.train.speed > SPEED_EPSILON {
                    self.set_state(ControlState::Departing);
                }
            }
            ControlState::Departing => {
                if ctx.train.has_cleared(self.device) {
                    ctx.train.set_pending_speed_cap(self.saved_speed_cap);
                    ctx.train.forget_cleared(self.device);
                    ctx.device.release(self.train);
                    debug!("{} cleared turntable at {:.1}s", self.train, clock_time);
                    self.set_state(ControlState::Completed);
                }
            }
            ControlState::Completed => {}
        }
        self.state
    }

    fn try_acquire(&mut self, ctx: &mut ControlContext) {
        if !self.check_device_available(ctx.device) {
            return;
        }
        let Some((_, offsets)) = self.entry_path(ctx.pool) else {
            return;
        };
        if let Some(alignment) = ctx.device.nearest_alignment(offsets.exit_index) {
            ctx.device.start_rotation(self.train, alignment);
        }
        self.set_state(ControlState::WaitingApproach);
    }

    /// Once the deck faces the entry exit, run the train onto it
    fn wait_for_entry_alignment(&mut self, ctx: &mut ControlContext) {
        let Some((entry_path, offsets)) = self.entry_path(ctx.pool) else {
            return;
        };
        let entry_end = match ctx.device.end_facing(offsets.exit_index) {
            Some(end) if ctx.device.rotation == Rotation::Idle => end,
            _ => {
                if let Some(alignment) = ctx.device.nearest_alignment(offsets.exit_index) {
                    ctx.device.start_rotation(self.train, alignment);
                }
                return;
            }
        };

        let deck = PathElement::new(
            ctx.device.deck_section,
            entry_end.entering_direction(),
            ctx.device.deck_length,
        );
        let entry_length = entry_path.total_length();
        let train = &mut *ctx.train;
        train.extend_route(&TrackPath::new(vec![deck]));

        let center =
            train.route.total_length() - entry_length + offsets.deck_center_entry_offset;
        let stop = center + train.length() / 2.0;
        train.request_stop(stop);
        self.stop_offset = Some(stop);

        self.saved_speed_cap = train.speed_cap();
        let deck_speed = ctx.pool.deck_speed_limit.unwrap_or(ctx.device.speed_limit);
        let cap = deck_speed.min(train.device_speed.unwrap_or(f32::INFINITY));
        train.set_pending_speed_cap(Some(cap));

        self.boarding = Some(BoardingFlags::default());
        self.set_state(ControlState::Approaching);
    }

    fn update_boarding(&mut self, ctx: &mut ControlContext) {
        let reach = ctx.device.deck_length / 2.0 + BOARDING_TOLERANCE;
        let center = ctx.device.center;
        let within = |position: TrackPosition| {
            ctx.network
                .world_position(&position)
                .is_some_and(|world| world.distance(&center) <= reach)
        };
        let front = ctx.train.front_position().is_some_and(within);
        let rear = ctx.train.rear_position().is_some_and(within);
        let flags = self.boarding.get_or_insert_with(BoardingFlags::default);
        flags.front_on_board |= front;
        flags.rear_on_board |= rear;
    }

    /// Turn the loaded deck to the departure exit, then hand the train its
    /// onward route
    fn rotate_to_exit(&mut self, ctx: &mut ControlContext) {
        let Some(exit_offsets) = self.exit_offsets(ctx.pool) else {
            return;
        };

        let Some(target) = self.target_exit else {
            let ready = self.boarding.is_some_and(|flags| flags.on_board())
                && ctx.train.is_stopped()
                && ctx.train.controls_neutral;
            if !ready {
                return;
            }
            let Some((_, entry_offsets)) = self.entry_path(ctx.pool) else {
                return;
            };
            let Some(entry_end) = ctx.device.end_facing(entry_offsets.exit_index) else {
                return;
            };
            self.reverse_formation =
                ctx.train.front_leading() != ctx.train.intended_front_first;
            let required_end = if self.reverse_formation {
                entry_end
            } else {
                entry_end.opposite()
            };
            let alignment = DeckAlignment {
                exit: exit_offsets.exit_index,
                end: required_end,
            };
            self.target_exit = Some(alignment);
            ctx.device.start_rotation(self.train, alignment);
            return;
        };

        if !ctx.device.is_aligned(target) || ctx.device.rotation != Rotation::Idle {
            ctx.device.start_rotation(self.train, target);
            return;
        }
        self.place_for_departure(target, exit_offsets, ctx);
        self.set_state(ControlState::WaitingDeparture);
    }

    fn place_for_departure(
        &mut self,
        target: DeckAlignment,
        exit_offsets: DeviceOffsets,
        ctx: &mut ControlContext,
    ) {
        let train = &mut *ctx.train;
        if self.reverse_formation {
            train.reverse_formation();
        }

        let direction = target.end.leaving_direction();
        let (exit_path, stop) = match self.action {
            ControlAction::FromAccess => {
                let Some(track) = ctx.pool.pool.tracks.get(self.storage_track_index) else {
                    return;
                };
                (track.storage_path.clone(), Some(track.stop_offset()))
            }
            ControlAction::FromStorage => {
                let path = train.continuation.take().or_else(|| {
                    ctx.pool
                        .access_paths
                        .get(self.access_path_index)
                        .map(|access| access.path.clone())
                });
                let Some(path) = path else {
                    return;
                };
                (path, None)
            }
        };

        let half_train = train.length() / 2.0;
        let front = exit_offsets.deck_center_exit_offset + half_train;
        train.replace_route(exit_path.with_first_direction(direction), front);
        if let Some(stop) = stop {
            train.request_stop(stop);
        }
        train.add_action(DistanceAction::ClearDevice {
            device: self.device,
            trigger_distance: front + half_train + ctx.device.deck_length / 2.0
                + ctx.pool.release_clearance,
            restore_cap: self.saved_speed_cap,
        });
        self.stop_offset = stop;
    }
}
