//! Train collaborator for the storage pool simulation
//!
//! A deliberately simple mover: the front of the train advances along its
//! route at the capped speed and halts at the requested stop or the end of
//! the route. Pools and turntable controls only read its position and speed
//! and send it route, stop and speed-cap commands.

use super::path::TrackPath;
use super::types::{
    DeviceId, SectionId, TrackPosition, TrainId, DEFAULT_TRAIN_SPEED, POSITION_EPSILON,
    SPEED_EPSILON,
};

/// One unit of rolling stock
#[derive(Debug, Clone, PartialEq)]
pub struct Car {
    pub id: String,
    pub length: f32,
    pub powered: bool,
    /// Car runs reversed relative to its authored orientation
    pub flipped: bool,
}

impl Car {
    pub fn new(id: impl Into<String>, length: f32, powered: bool) -> Self {
        Self {
            id: id.into(),
            length,
            powered,
            flipped: false,
        }
    }
}

/// Lifecycle state of a train
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrainState {
    /// Following its route
    Running,
    /// Halted at a stop or at the end of its route
    Stopped,
    /// Parked in a pool, not an active entity
    Stored,
    /// Waiting for a pool to form it
    Pending,
}

/// Actions triggered once the train front passes a route distance
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DistanceAction {
    /// The train has cleared a turntable; restore the saved speed cap
    ClearDevice {
        device: DeviceId,
        trigger_distance: f32,
        restore_cap: Option<f32>,
    },
}

/// Result of a train update indicating what action should be taken
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrainUpdateResult {
    Continue,
    ReachedStop,
    ReachedEndOfRoute,
}

/// A train in the simulation
#[derive(Debug, Clone)]
pub struct SimTrain {
    pub id: TrainId,
    pub name: String,
    pub cars: Vec<Car>,
    pub route: TrackPath,
    /// Distance of the train front from the route start
    pub front_distance: f32,
    pub speed: f32,
    pub max_speed: f32,
    speed_cap: Option<f32>,
    pending_speed_cap: Option<Option<f32>>,
    /// The train's own speed setting for turntable decks
    pub device_speed: Option<f32>,
    stop_distance: Option<f32>,
    /// Throttle idle and reverser centred
    pub controls_neutral: bool,
    pub state: TrainState,
    /// Leading end is the original rear of the formation
    pub reversed: bool,
    /// Formation should leave a turntable with its original front leading
    pub intended_front_first: bool,
    /// Pool this train is heading into
    pub pool_exit: Option<String>,
    /// Route to follow once a turntable maneuver has finished
    pub continuation: Option<TrackPath>,
    actions: Vec<DistanceAction>,
    cleared_devices: Vec<DeviceId>,
}

impl SimTrain {
    pub fn new(
        id: TrainId,
        name: impl Into<String>,
        cars: Vec<Car>,
        route: TrackPath,
        front_distance: f32,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            cars,
            route,
            front_distance,
            speed: 0.0,
            max_speed: DEFAULT_TRAIN_SPEED,
            speed_cap: None,
            pending_speed_cap: None,
            device_speed: None,
            stop_distance: None,
            controls_neutral: true,
            state: TrainState::Running,
            reversed: false,
            intended_front_first: true,
            pool_exit: None,
            continuation: None,
            actions: Vec::new(),
            cleared_devices: Vec::new(),
        }
    }

    pub fn length(&self) -> f32 {
        self.cars.iter().map(|car| car.length).sum()
    }

    pub fn front_position(&self) -> Option<TrackPosition> {
        self.route.locate(self.front_distance)
    }

    pub fn rear_distance(&self) -> f32 {
        (self.front_distance - self.length()).max(0.0)
    }

    pub fn rear_position(&self) -> Option<TrackPosition> {
        self.route.locate(self.rear_distance())
    }

    /// Sections under the train, each with the offset of the front-most
    /// point of the train on that section
    pub fn occupied_sections(&self) -> Vec<(SectionId, f32)> {
        let rear = self.rear_distance();
        let front = self.front_distance;
        let mut occupied = Vec::new();
        let mut travelled = 0.0;
        for element in self.route.elements() {
            let start = travelled;
            let end = travelled + element.length;
            travelled = end;
            if end < rear - POSITION_EPSILON || start > front + POSITION_EPSILON {
                continue;
            }
            let along = (front.min(end) - start).clamp(0.0, element.length);
            let offset = if element.direction.is_forward() {
                along
            } else {
                element.length - along
            };
            occupied.push((element.section, offset));
        }
        occupied
    }

    /// Sections from the rear of the train to the end of its route
    pub fn reserved_sections(&self) -> Vec<SectionId> {
        self.route
            .sections_between(self.rear_distance(), self.route.total_length())
    }

    pub fn is_active(&self) -> bool {
        matches!(self.state, TrainState::Running | TrainState::Stopped)
    }

    pub fn is_stopped(&self) -> bool {
        self.speed <= SPEED_EPSILON
    }

    /// Append a path to the route
    pub fn extend_route(&mut self, path: &TrackPath) {
        self.route.append(path);
        if self.state == TrainState::Stopped {
            self.state = TrainState::Running;
        }
    }

    /// Cut the route after its first `len` elements
    pub fn truncate_route(&mut self, len: usize) {
        self.route.truncate(len);
    }

    /// Replace the route and place the front at `front_distance` along it
    pub fn replace_route(&mut self, route: TrackPath, front_distance: f32) {
        self.route = route;
        self.front_distance = front_distance;
        self.stop_distance = None;
        if self.state == TrainState::Stopped {
            self.state = TrainState::Running;
        }
    }

    /// Effective speed cap, including a cap not yet applied
    pub fn speed_cap(&self) -> Option<f32> {
        match self.pending_speed_cap {
            Some(pending) => pending,
            None => self.speed_cap,
        }
    }

    /// Cap the speed from the next update onwards (`None` lifts the cap)
    pub fn set_pending_speed_cap(&mut self, cap: Option<f32>) {
        self.pending_speed_cap = Some(cap);
    }

    /// Request a stop with the front at `distance` along the route
    pub fn request_stop(&mut self, distance: f32) {
        self.stop_distance = Some(distance);
        if self.state == TrainState::Stopped && distance > self.front_distance + POSITION_EPSILON {
            self.state = TrainState::Running;
        }
    }

    pub fn stop_distance(&self) -> Option<f32> {
        self.stop_distance
    }

    /// Train is stationary with its front at the requested stop
    pub fn at_requested_stop(&self) -> bool {
        self.is_stopped()
            && self
                .stop_distance
                .is_some_and(|stop| self.front_distance >= stop - POSITION_EPSILON)
    }

    pub fn add_action(&mut self, action: DistanceAction) {
        self.actions.push(action);
    }

    pub fn has_cleared(&self, device: DeviceId) -> bool {
        self.cleared_devices.contains(&device)
    }

    pub fn forget_cleared(&mut self, device: DeviceId) {
        self.cleared_devices.retain(|cleared| *cleared != device);
    }

    /// Front of the formation is its original front
    pub fn front_leading(&self) -> bool {
        !self.reversed
    }

    /// Swap the leading end: reverse the car order and flip every car
    pub fn reverse_formation(&mut self) {
        self.cars.reverse();
        for car in &mut self.cars {
            car.flipped = !car.flipped;
        }
        self.reversed = !self.reversed;
    }

    /// Update train movement
    /// Returns TrainUpdateResult indicating what action should be taken
    pub fn update(&mut self, delta_secs: f32) -> TrainUpdateResult {
        if let Some(pending) = self.pending_speed_cap.take() {
            self.speed_cap = pending;
        }

        if !self.is_active() {
            self.speed = 0.0;
            return TrainUpdateResult::Continue;
        }

        let route_length = self.route.total_length();
        let target = self
            .stop_distance
            .map_or(route_length, |stop| stop.min(route_length));
        let remaining = target - self.front_distance;

        if remaining <= POSITION_EPSILON || delta_secs <= 0.0 {
            self.speed = 0.0;
            self.controls_neutral = true;
            if self.state == TrainState::Stopped {
                return TrainUpdateResult::Continue;
            }
            self.state = TrainState::Stopped;
            return if target < route_length - POSITION_EPSILON {
                TrainUpdateResult::ReachedStop
            } else {
                TrainUpdateResult::ReachedEndOfRoute
            };
        }

        let allowed = match self.speed_cap {
            Some(cap) => cap.min(self.max_speed),
            None => self.max_speed,
        };
        let step = (allowed * delta_secs).min(remaining);
        self.front_distance += step;
        self.speed = step / delta_secs;
        self.controls_neutral = false;
        self.state = TrainState::Running;

        self.process_actions();

        TrainUpdateResult::Continue
    }

    fn process_actions(&mut self) {
        let front = self.front_distance;
        let mut fired = Vec::new();
        self.actions.retain(|action| match action {
            DistanceAction::ClearDevice {
                trigger_distance, ..
            } if front >= *trigger_distance - POSITION_EPSILON => {
                fired.push(*action);
                false
            }
            _ => true,
        });
        for action in fired {
            match action {
                DistanceAction::ClearDevice {
                    device,
                    restore_cap,
                    ..
                } => {
                    self.speed_cap = restore_cap;
                    self.pending_speed_cap = None;
                    self.cleared_devices.push(device);
                }
            }
        }
    }
}

/// How units are chosen when a consist is split
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetachMode {
    /// `count` units from the front
    FromFront,
    /// `count` units from the rear
    FromRear,
    /// The leading run of powered units
    LeadingPowered,
    /// Units whose ids appear in the consist name list, counted from the front
    NamedConsists,
}

/// Split primitive supplied by the attach/detach collaborator
pub trait ConsistTransfer {
    /// Number of units to detach and whether they come off the front
    fn units_to_detach(
        &self,
        train: &SimTrain,
        mode: DetachMode,
        count: usize,
        consist_names: &[String],
    ) -> (usize, bool);

    /// Move units selected by `units_to_detach` from one train to another
    fn transfer_consist(
        &self,
        from: &mut SimTrain,
        to: &mut SimTrain,
        mode: DetachMode,
        count: usize,
        consist_names: &[String],
    ) {
        let (units, from_front) = self.units_to_detach(from, mode, count, consist_names);
        let units = units.min(from.cars.len());
        let moved: Vec<Car> = if from_front {
            from.cars.drain(..units).collect()
        } else {
            let split = from.cars.len() - units;
            from.cars.drain(split..).collect()
        };
        to.cars.extend(moved);
    }
}

/// Default split rules used when a pool hands a stored consist to a new train
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardConsistTransfer;

impl ConsistTransfer for StandardConsistTransfer {
    fn units_to_detach(
        &self,
        train: &SimTrain,
        mode: DetachMode,
        count: usize,
        consist_names: &[String],
    ) -> (usize, bool) {
        let total = train.cars.len();
        match mode {
            DetachMode::FromFront => (count.min(total), true),
            DetachMode::FromRear => (count.min(total), false),
            DetachMode::LeadingPowered => (
                train.cars.iter().take_while(|car| car.powered).count(),
                true,
            ),
            DetachMode::NamedConsists => (
                train
                    .cars
                    .iter()
                    .take_while(|car| consist_names.iter().any(|name| *name == car.id))
                    .count(),
                true,
            ),
        }
    }
}
