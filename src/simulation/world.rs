//! Main simulation world that ties everything together
//!
//! The world owns the track network, the trains, the turntables, the pools
//! and the active turntable controls, and advances them in a fixed order
//! every tick.

use anyhow::{Context, Result};
use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::Rng;
use rand::SeedableRng;
use std::collections::{BTreeMap, HashMap};

use super::config::{PoolDefinition, StorageTrackDefinition, TurntablePoolDefinition};
use super::path::TrackPath;
use super::pool::{ExtractOutcome, Placement, Pool, PoolContext, PoolKind, StoragePool, TrackSelection};
use super::snapshot::{SavePoolEntry, SaveTurntable, WorldSnapshot};
use super::stats::PoolStats;
use super::track_network::{TrackNetwork, TrackSection};
use super::train::{Car, SimTrain, StandardConsistTransfer, TrainState};
use super::train_manager;
use super::turntable::Turntable;
use super::turntable_control::{ControlContext, ControlState, TurntableControl};
use super::turntable_pool::TurntablePool;
use super::types::{
    DeviceId, Direction, Position, SectionEnd, SectionId, SimId, TrainId, POSITION_EPSILON,
};

/// The main simulation world
pub struct SimWorld {
    /// Track graph and occupancy index
    pub network: TrackNetwork,

    /// All trains, including stored ones
    pub trains: HashMap<TrainId, SimTrain>,

    /// All turntables
    pub turntables: HashMap<DeviceId, Turntable>,

    /// Pools by name
    pub pools: BTreeMap<String, PoolKind>,

    /// Maneuvers in progress
    pub controls: Vec<TurntableControl>,

    /// Trains told to wait for a claim to clear before entering a pool
    pending_entries: Vec<(TrainId, String)>,

    /// Extraction requests to retry
    pending_requests: Vec<(TrainId, String)>,

    /// Next ID to assign
    next_id: usize,

    /// Simulation time
    pub time: f32,

    /// Optional seeded RNG for reproducible simulations
    rng: Option<StdRng>,

    pub stats: PoolStats,

    consist: StandardConsistTransfer,
}

impl Default for SimWorld {
    fn default() -> Self {
        Self::new()
    }
}

impl SimWorld {
    fn new_internal(rng: Option<StdRng>) -> Self {
        Self {
            network: TrackNetwork::new(),
            trains: HashMap::new(),
            turntables: HashMap::new(),
            pools: BTreeMap::new(),
            controls: Vec::new(),
            pending_entries: Vec::new(),
            pending_requests: Vec::new(),
            next_id: 0,
            time: 0.0,
            rng,
            stats: PoolStats::default(),
            consist: StandardConsistTransfer,
        }
    }

    pub fn new() -> Self {
        Self::new_internal(None)
    }

    /// Create a new SimWorld with a seeded RNG for reproducible simulations
    pub fn new_with_seed(seed: u64) -> Self {
        Self::new_internal(Some(StdRng::seed_from_u64(seed)))
    }

    /// Get a random value in the given range, using seeded RNG if available
    fn random_range(&mut self, range: std::ops::Range<f32>) -> f32 {
        match &mut self.rng {
            Some(rng) => rng.random_range(range),
            None => rand::rng().random_range(range),
        }
    }

    fn next_sim_id(&mut self) -> SimId {
        let id = SimId(self.next_id);
        self.next_id += 1;
        id
    }

    /// Add a straight track section
    pub fn add_section(&mut self, start: Position, end: Position) -> SectionId {
        let id = SectionId(self.next_sim_id());
        self.network.add_section(TrackSection::new(id, start, end));
        id
    }

    /// Join two section ends
    pub fn connect(
        &mut self,
        a: SectionId,
        a_end: SectionEnd,
        b: SectionId,
        b_end: SectionEnd,
    ) -> Result<()> {
        self.network.connect(a, a_end, b, b_end)
    }

    /// Add a turntable. Its deck becomes a section of the network, lying
    /// along heading 0 until it first rotates.
    pub fn add_turntable(&mut self, name: &str, center: Position, deck_length: f32) -> DeviceId {
        let deck = SectionId(self.next_sim_id());
        let id = DeviceId(self.next_sim_id());
        let device = Turntable::new(id, name, center, deck, deck_length);
        let (start, end) = device.deck_ends();
        self.network.add_section(TrackSection::new(deck, start, end));
        self.turntables.insert(id, device);
        id
    }

    /// Make a section end reachable from both ends of the deck
    pub fn add_turntable_exit(
        &mut self,
        device: DeviceId,
        section: SectionId,
        end: SectionEnd,
    ) -> Result<usize> {
        let turntable = self
            .turntables
            .get_mut(&device)
            .with_context(|| format!("{device} not found"))?;
        let position = self
            .network
            .section(section)
            .with_context(|| format!("{section} not found"))?
            .end_position(end);
        let angle = turntable.center.heading_to(&position);
        let index = turntable.add_exit(section, angle);
        let deck = turntable.deck_section;
        self.network.connect(deck, SectionEnd::Start, section, end)?;
        self.network.connect(deck, SectionEnd::End, section, end)?;
        Ok(index)
    }

    /// Load a plain pool. A pool that fails validation is dropped.
    pub fn load_pool(&mut self, definition: &PoolDefinition) -> bool {
        if self.pools.contains_key(&definition.name) {
            warn!("Pool {} is defined twice; ignoring the second", definition.name);
            return false;
        }
        match Pool::from_definition(definition, &self.network) {
            Ok(pool) => {
                info!(
                    "Loaded pool {} with {} storage tracks",
                    pool.name,
                    pool.tracks.len()
                );
                self.pools
                    .insert(definition.name.clone(), PoolKind::Plain(pool));
                true
            }
            Err(e) => {
                warn!("Dropping pool {}: {e:#}", definition.name);
                false
            }
        }
    }

    /// Load a turntable pool. A pool that fails validation is dropped.
    pub fn load_turntable_pool(&mut self, definition: &TurntablePoolDefinition) -> bool {
        if self.pools.contains_key(&definition.name) {
            warn!("Pool {} is defined twice; ignoring the second", definition.name);
            return false;
        }
        let Some(device) = self.turntables.get_mut(&definition.device) else {
            warn!(
                "Dropping pool {}: {} does not exist",
                definition.name, definition.device
            );
            return false;
        };
        match TurntablePool::new(definition, device, &self.network) {
            Ok(pool) => {
                if let Some(rate) = definition.frame_rate {
                    device.frame_rate = Some(rate);
                }
                info!(
                    "Loaded turntable pool {} with {} storage tracks and {} access paths",
                    definition.name,
                    pool.tracks().len(),
                    pool.access_paths.len()
                );
                self.pools
                    .insert(definition.name.clone(), PoolKind::Turntable(pool));
                true
            }
            Err(e) => {
                warn!("Dropping pool {}: {e:#}", definition.name);
                false
            }
        }
    }

    /// Put a train on the track
    pub fn spawn_train(
        &mut self,
        name: &str,
        cars: Vec<Car>,
        route: TrackPath,
        front_distance: f32,
    ) -> Result<TrainId> {
        let id = TrainId(self.next_sim_id());
        let train =
            train_manager::spawn_train(id, name, cars, route, front_distance, &mut self.network)?;
        self.trains.insert(id, train);
        self.stats.trains_spawned += 1;
        Ok(id)
    }

    /// Run a pool operation with the world's trains, network and controls
    fn with_pool<R>(
        &mut self,
        pool_name: &str,
        operation: impl FnOnce(&mut PoolKind, &mut PoolContext) -> R,
    ) -> Option<R> {
        let pool = self.pools.get_mut(pool_name)?;
        let mut ctx = PoolContext {
            trains: &mut self.trains,
            network: &mut self.network,
            controls: &mut self.controls,
            consist: &self.consist,
        };
        Some(operation(pool, &mut ctx))
    }

    /// Route a running train into a pool. A `Claimed` answer is retried
    /// every tick until the pool accepts or rejects the train.
    pub fn send_train_to_pool(&mut self, train: TrainId, pool_name: &str) -> Option<Placement> {
        let Some(placement) =
            self.with_pool(pool_name, |pool, ctx| pool.place_in_pool(train, true, ctx))
        else {
            warn!("{train} asked for unknown pool {pool_name}");
            return None;
        };

        match placement.selection {
            TrackSelection::Claimed => {
                if !self.pending_entries.iter().any(|(id, _)| *id == train) {
                    debug!("{train} waits for a claim in pool {pool_name}");
                    self.pending_entries.push((train, pool_name.to_string()));
                }
            }
            TrackSelection::Track(_) => self.pending_entries.retain(|(id, _)| *id != train),
            TrackSelection::Overflow | TrackSelection::Invalid => {
                self.pending_entries.retain(|(id, _)| *id != train);
                self.stats.requests_rejected += 1;
            }
        }
        Some(placement)
    }

    /// Park a train in a pool before the simulation starts
    pub fn place_train_in_pool(&mut self, train_id: TrainId, pool_name: &str) -> Result<usize> {
        let placement = self
            .with_pool(pool_name, |pool, ctx| pool.place_in_pool(train_id, false, ctx))
            .with_context(|| format!("Pool {pool_name} not found"))?;
        let track = placement.storage_index().with_context(|| {
            format!(
                "{train_id} cannot be placed in pool {pool_name}: {:?}",
                placement.selection
            )
        })?;
        let route = placement
            .route
            .with_context(|| format!("Pool {pool_name} returned no storage route"))?;

        let pool = self
            .pools
            .get_mut(pool_name)
            .with_context(|| format!("Pool {pool_name} not found"))?;
        let train = self
            .trains
            .get_mut(&train_id)
            .with_context(|| format!("{train_id} not found"))?;
        let route_length = route.total_length();
        train.replace_route(route, 0.0);
        train.front_distance = pool
            .end_of_route_distance(train)
            .unwrap_or(route_length)
            .clamp(0.0, route_length);
        pool.add_unit(train, false);
        train.state = TrainState::Stored;
        train.speed = 0.0;
        self.network
            .update_train_occupancy(train_id, &train.occupied_sections());
        self.stats.trains_stored += 1;
        Ok(track)
    }

    /// Create a service that should take its consist from a pool
    pub fn request_train_from_pool(
        &mut self,
        name: &str,
        cars: Vec<Car>,
        route: TrackPath,
        pool_name: &str,
    ) -> Result<(TrainId, ExtractOutcome)> {
        let id = self.spawn_train(name, cars, route, 0.0)?;
        if let Some(train) = self.trains.get_mut(&id) {
            train.state = TrainState::Pending;
        }
        self.network.remove_train_from_tracking(id);
        let outcome = self.attempt_extraction(id, pool_name);
        Ok((id, outcome))
    }

    fn attempt_extraction(&mut self, train_id: TrainId, pool_name: &str) -> ExtractOutcome {
        let time = self.time;
        let Some(outcome) =
            self.with_pool(pool_name, |pool, ctx| pool.extract_train(train_id, time, ctx))
        else {
            warn!("{train_id} asked for unknown pool {pool_name}");
            self.pending_requests.retain(|(id, _)| *id != train_id);
            train_manager::despawn_train(train_id, &mut self.trains, &mut self.network);
            self.stats.requests_rejected += 1;
            return ExtractOutcome::Failed;
        };
        let force_creation = self
            .pools
            .get(pool_name)
            .is_some_and(|pool| pool.core().force_creation_on_underflow);

        if outcome != ExtractOutcome::Delayed {
            self.pending_requests.retain(|(id, _)| *id != train_id);
        }
        match outcome {
            ExtractOutcome::Formed => self.stats.trains_formed += 1,
            ExtractOutcome::ForceCreated => self.start_created_train(train_id),
            ExtractOutcome::NotCreated => {
                info!("Pool {pool_name} is empty; {train_id} is not created");
                train_manager::despawn_train(train_id, &mut self.trains, &mut self.network);
            }
            ExtractOutcome::Delayed => {
                if !self.pending_requests.iter().any(|(id, _)| *id == train_id) {
                    debug!("{train_id} waits for pool {pool_name}");
                    self.pending_requests
                        .push((train_id, pool_name.to_string()));
                    self.stats.requests_delayed += 1;
                }
            }
            ExtractOutcome::Failed => {
                warn!("{train_id} cannot be formed from pool {pool_name}");
                if force_creation {
                    self.start_created_train(train_id);
                } else {
                    train_manager::despawn_train(train_id, &mut self.trains, &mut self.network);
                    self.stats.requests_rejected += 1;
                }
            }
        }
        outcome
    }

    /// Start a requested train from nothing at the beginning of its route
    fn start_created_train(&mut self, train_id: TrainId) {
        if let Some(train) = self.trains.get_mut(&train_id) {
            train.front_distance = train.length().min(train.route.total_length());
            train.state = TrainState::Running;
            info!("{} ({}) created at the start of its route", train.id, train.name);
            self.stats.trains_force_created += 1;
        }
    }

    /// Abandon a turntable maneuver that has not yet been granted the
    /// device. Returns false once the train holds the device.
    pub fn cancel_turntable_request(&mut self, train: TrainId) -> bool {
        let Some(index) = self.controls.iter().position(|control| control.train == train) else {
            return false;
        };
        if !self.controls[index].is_cancellable() {
            return false;
        }
        let control = self.controls.remove(index);
        if let Some(device) = self.turntables.get_mut(&control.device) {
            device.dequeue(train);
        }
        if let Some(PoolKind::Turntable(pool)) = self.pools.get_mut(&control.pool) {
            for track in &mut pool.pool.tracks {
                track.remove_claim(train);
            }
        }
        if let Some(train) = self.trains.get_mut(&train) {
            if train.pool_exit.as_deref() == Some(control.pool.as_str()) {
                train.pool_exit = None;
            }
        }
        info!("{train} abandoned its turntable request");
        true
    }

    /// Advance the simulation by one tick
    pub fn tick(&mut self, delta_secs: f32) {
        self.time += delta_secs;

        self.retry_pending();
        self.update_turntables(delta_secs);
        self.update_controls(delta_secs);

        let results = train_manager::update_trains(delta_secs, &mut self.trains);
        for (train_id, result) in results {
            debug!("{train_id}: {result:?}");
        }

        self.process_arrivals();
        train_manager::update_occupancy(&self.trains, &mut self.network);
    }

    fn retry_pending(&mut self) {
        for (train, pool) in self.pending_entries.clone() {
            if self.trains.contains_key(&train) {
                self.send_train_to_pool(train, &pool);
            } else {
                self.pending_entries.retain(|(id, _)| *id != train);
            }
        }
        for (train, pool) in self.pending_requests.clone() {
            if self.trains.contains_key(&train) {
                self.attempt_extraction(train, &pool);
            } else {
                self.pending_requests.retain(|(id, _)| *id != train);
            }
        }
    }

    /// Rotate every deck and move its section to match
    fn update_turntables(&mut self, delta_secs: f32) {
        for device in self.turntables.values_mut() {
            device.update(delta_secs);
            let (start, end) = device.deck_ends();
            self.network
                .set_section_geometry(device.deck_section, start, end);
        }
    }

    fn update_controls(&mut self, delta_secs: f32) {
        let time = self.time;
        let mut finished = Vec::new();
        let mut orphaned = Vec::new();

        for (index, control) in self.controls.iter_mut().enumerate() {
            let (Some(train), Some(device), Some(pool)) = (
                self.trains.get_mut(&control.train),
                self.turntables.get_mut(&control.device),
                self.pools.get(&control.pool).and_then(PoolKind::as_turntable),
            ) else {
                warn!(
                    "Dropping turntable control of {}: its train or pool is gone",
                    control.train
                );
                finished.push(index);
                orphaned.push((control.train, control.device));
                continue;
            };
            let mut ctx = ControlContext {
                train,
                device,
                pool,
                network: &self.network,
            };
            if control.advance_state(delta_secs, time, &mut ctx) == ControlState::Completed {
                finished.push(index);
                self.stats.maneuvers_completed += 1;
            }
        }

        for index in finished.into_iter().rev() {
            self.controls.remove(index);
        }
        for (train, device) in orphaned {
            if let Some(device) = self.turntables.get_mut(&device) {
                device.dequeue(train);
                device.release(train);
            }
        }
    }

    /// Commit trains that have come to rest in storage and retire trains
    /// that have finished their route
    fn process_arrivals(&mut self) {
        let mut arrived = Vec::new();
        let mut finished = Vec::new();
        for train in self.trains.values() {
            if train.state != TrainState::Stopped
                || self.controls.iter().any(|control| control.train == train.id)
            {
                continue;
            }
            match &train.pool_exit {
                Some(pool) => {
                    if train.stop_distance().is_none() || train.at_requested_stop() {
                        arrived.push((train.id, pool.clone()));
                    }
                }
                None => {
                    let at_end = train.front_distance
                        >= train.route.total_length() - POSITION_EPSILON;
                    let waiting = self.pending_entries.iter().any(|(id, _)| *id == train.id);
                    if at_end && !waiting {
                        finished.push(train.id);
                    }
                }
            }
        }

        for (train_id, pool_name) in arrived {
            let (Some(pool), Some(train)) =
                (self.pools.get_mut(&pool_name), self.trains.get_mut(&train_id))
            else {
                continue;
            };
            pool.add_unit(train, false);
            train.state = TrainState::Stored;
            train.pool_exit = None;
            self.stats.trains_stored += 1;
        }

        for train_id in finished {
            if let Some(train) =
                train_manager::despawn_train(train_id, &mut self.trains, &mut self.network)
            {
                info!("{} ({}) completed its route", train.id, train.name);
                self.stats.trains_completed += 1;
            }
        }
    }

    /// Encode pools, turntables and controls
    pub fn snapshot(&self) -> Vec<u8> {
        let mut devices: Vec<&Turntable> = self.turntables.values().collect();
        devices.sort_by_key(|device| device.id);
        WorldSnapshot {
            pools: self.pools.values().map(SavePoolEntry::from).collect(),
            devices: devices.into_iter().map(SaveTurntable::from).collect(),
            controls: self.controls.iter().map(Into::into).collect(),
        }
        .encode()
    }

    /// Replace pools, turntables and controls from a snapshot. Nothing is
    /// changed if the snapshot cannot be decoded.
    pub fn restore(&mut self, bytes: &[u8]) -> Result<()> {
        let snapshot = WorldSnapshot::decode(bytes)?;

        let pools: BTreeMap<String, PoolKind> = snapshot
            .pools
            .iter()
            .map(|entry| {
                let pool = PoolKind::from(entry);
                (pool.name().to_string(), pool)
            })
            .collect();
        let turntables = snapshot
            .devices
            .iter()
            .map(|saved| Turntable::try_from(saved).map(|device| (device.id, device)))
            .collect::<Result<HashMap<_, _>>>()?;
        let controls = snapshot
            .controls
            .iter()
            .map(TurntableControl::try_from)
            .collect::<Result<Vec<_>>>()?;
        check_restored_references(&pools, &turntables, &controls)?;

        self.pools = pools;
        self.turntables = turntables;
        self.controls = controls;
        for device in self.turntables.values() {
            let (start, end) = device.deck_ends();
            self.network
                .set_section_geometry(device.deck_section, start, end);
        }
        info!(
            "Restored {} pools, {} turntables and {} controls",
            self.pools.len(),
            self.turntables.len(),
            self.controls.len()
        );
        Ok(())
    }

    pub fn stored_train_count(&self) -> usize {
        self.trains
            .values()
            .filter(|train| train.state == TrainState::Stored)
            .count()
    }

    /// Log the state of every pool
    pub fn log_pools(&self) {
        for pool in self.pools.values() {
            for track in &pool.core().tracks {
                info!(
                    "  {} / {}: occupants={:?} claims={:?} remaining={:.1}",
                    pool.name(),
                    track.name,
                    track.occupants,
                    track.claims,
                    track.remaining_length
                );
            }
        }
    }

    /// Log the end-of-run report
    pub fn log_summary(&self) {
        let active = self.trains.values().filter(|train| train.is_active()).count();
        self.stats
            .log_summary(self.time, active, self.stored_train_count());
        self.log_pools();
    }

    /// Create a default test world with a yard and a turntable shed
    pub fn create_test_world() -> Result<Self> {
        Self::build_test_world(SimWorld::new())
    }

    /// Create a default test world with a seeded RNG for reproducible simulations
    pub fn create_test_world_with_seed(seed: u64) -> Result<Self> {
        Self::build_test_world(SimWorld::new_with_seed(seed))
    }

    /// Internal helper to build the test world structure
    pub fn build_test_world(mut world: SimWorld) -> Result<Self> {
        use Direction::{Backward, Forward};

        // Main line from the sidings throat to the turntable approach
        let line = world.add_section(Position::new(-300.0, 0.0, 0.0), Position::new(-110.0, 0.0, 0.0));
        let approach = world.add_section(Position::new(-110.0, 0.0, 0.0), Position::new(-10.0, 0.0, 0.0));
        world.connect(line, SectionEnd::End, approach, SectionEnd::Start)?;

        // Two dead-end sidings off the west end of the line
        let siding_1 = world.add_section(Position::new(-300.0, 0.0, 0.0), Position::new(-400.0, 0.0, 0.0));
        let siding_2 = world.add_section(Position::new(-300.0, 0.0, 0.0), Position::new(-400.0, 0.0, 20.0));
        world.connect(line, SectionEnd::Start, siding_1, SectionEnd::Start)?;
        world.connect(line, SectionEnd::Start, siding_2, SectionEnd::Start)?;

        // Turntable with three stalls
        let shed = world.add_turntable("shed", Position::new(0.0, 0.0, 0.0), 20.0);
        let deck = world.turntables[&shed].deck_section;
        let stalls = [
            (Position::new(10.0, 0.0, 0.0), Position::new(70.0, 0.0, 0.0)),
            (Position::new(0.0, 0.0, 10.0), Position::new(0.0, 0.0, 70.0)),
            (Position::new(0.0, 0.0, -10.0), Position::new(0.0, 0.0, -70.0)),
        ];
        world.add_turntable_exit(shed, approach, SectionEnd::End)?;
        let mut stall_sections = Vec::new();
        for (start, end) in stalls {
            let stall = world.add_section(start, end);
            world.add_turntable_exit(shed, stall, SectionEnd::Start)?;
            stall_sections.push(stall);
        }

        let mut sidings = PoolDefinition::new("sidings");
        sidings.force_creation_on_underflow = true;
        for (name, section) in [("siding 1", siding_1), ("siding 2", siding_2)] {
            sidings = sidings.with_track(
                StorageTrackDefinition::new(name, vec![(section, Forward)])
                    .with_access_path(vec![(line, Forward)]),
            );
        }
        world.load_pool(&sidings);

        let mut shed_pool = TurntablePoolDefinition::new("shed", shed)
            .with_access_path(vec![(deck, Backward), (approach, Backward)]);
        for (index, stall) in stall_sections.iter().enumerate() {
            shed_pool = shed_pool.with_track(StorageTrackDefinition::new(
                format!("stall {}", index + 1),
                vec![(deck, Forward), (*stall, Forward)],
            ));
        }
        world.load_turntable_pool(&shed_pool);

        let to_shed = world
            .network
            .find_route((line, Forward), (approach, Forward))
            .context("No route from the sidings to the shed")?;
        let to_sidings = world
            .network
            .find_route((approach, Backward), (line, Backward))
            .context("No route from the shed to the sidings")?;

        // Stock already in storage
        let goods = vec![
            Car::new("loco 1", 16.0, true),
            Car::new("wagon 1", 12.0, false),
            Car::new("wagon 2", 12.0, false),
        ];
        let stored = world.spawn_train("stored goods", goods, to_sidings.clone(), 40.0)?;
        world.place_train_in_pool(stored, "sidings")?;
        let shunter = world.spawn_train(
            "shunter",
            vec![Car::new("shunter", 15.0, true)],
            to_shed.clone(),
            15.0,
        )?;
        world.place_train_in_pool(shunter, "shed")?;

        // Arrivals
        let engine = world.spawn_train(
            "light engine",
            vec![Car::new("loco 2", 14.0, true)],
            to_shed.clone(),
            14.0,
        )?;
        let arrival_cars = vec![
            Car::new("loco 3", 15.0, true),
            Car::new("wagon 3", 10.0, false),
            Car::new("wagon 4", 10.0, false),
        ];
        let arrival = world.spawn_train("goods arrival", arrival_cars, to_sidings.clone(), 35.0)?;
        for id in [engine, arrival] {
            let speed = world.random_range(8.0..12.0);
            if let Some(train) = world.trains.get_mut(&id) {
                train.max_speed = speed;
            }
        }
        world.send_train_to_pool(engine, "shed");
        world.send_train_to_pool(arrival, "sidings");

        // Departures
        world.request_train_from_pool(
            "goods departure",
            vec![Car::new("loco 4", 16.0, true)],
            to_shed,
            "sidings",
        )?;
        world.request_train_from_pool(
            "engine departure",
            vec![Car::new("loco 5", 14.0, true)],
            to_sidings,
            "shed",
        )?;

        Ok(world)
    }
}

/// Reject a decoded snapshot whose indices point past the pools and devices
/// it describes
fn check_restored_references(
    pools: &BTreeMap<String, PoolKind>,
    turntables: &HashMap<DeviceId, Turntable>,
    controls: &[TurntableControl],
) -> Result<()> {
    for pool in pools.values().filter_map(PoolKind::as_turntable) {
        let Some(device) = turntables.get(&pool.device) else {
            anyhow::bail!("Pool {} uses missing turntable {}", pool.pool.name, pool.device);
        };
        let exits = pool
            .access_paths
            .iter()
            .map(|access| access.offsets.exit_index)
            .chain(
                pool.pool
                    .tracks
                    .iter()
                    .filter_map(|track| track.device_offsets)
                    .map(|offsets| offsets.exit_index),
            );
        for exit in exits {
            if exit >= device.exits.len() {
                anyhow::bail!(
                    "Pool {} uses exit {} of turntable {}, which has {} exits",
                    pool.pool.name,
                    exit,
                    device.name,
                    device.exits.len()
                );
            }
        }
    }

    for control in controls {
        let Some(pool) = pools.get(&control.pool).and_then(PoolKind::as_turntable) else {
            anyhow::bail!(
                "Control for {} refers to unknown turntable pool {}",
                control.train,
                control.pool
            );
        };
        let Some(device) = turntables.get(&control.device) else {
            anyhow::bail!(
                "Control for {} refers to missing turntable {}",
                control.train,
                control.device
            );
        };
        if control.access_path_index >= pool.access_paths.len() {
            anyhow::bail!(
                "Control for {} uses access path {} of pool {}, which has {}",
                control.train,
                control.access_path_index,
                control.pool,
                pool.access_paths.len()
            );
        }
        if control.storage_track_index >= pool.pool.tracks.len() {
            anyhow::bail!(
                "Control for {} uses storage track {} of pool {}, which has {}",
                control.train,
                control.storage_track_index,
                control.pool,
                pool.pool.tracks.len()
            );
        }
        if let Some(target) = control.target_exit {
            if target.exit >= device.exits.len() {
                anyhow::bail!(
                    "Control for {} targets exit {} of turntable {}, which has {}",
                    control.train,
                    target.exit,
                    device.name,
                    device.exits.len()
                );
            }
        }
    }
    Ok(())
}
