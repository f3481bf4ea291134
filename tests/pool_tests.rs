//! Storage pool allocation tests
//!
//! A short line `a` runs east into one or two dead-end sidings. Trains
//! arriving from the west are stored; trains leaving run back west.

use train_pool::simulation::{
    Car, Direction, ExtractOutcome, PoolDefinition, PoolKind, Position, SectionEnd, SectionId,
    SimWorld, StorageTrackDefinition, StoragePool, TrackPath, TrackSelection, TrainId,
    TrainState,
};

use Direction::{Backward, Forward};

struct Yard {
    world: SimWorld,
    line: SectionId,
    siding_1: SectionId,
    siding_2: SectionId,
}

fn build_yard() -> Yard {
    let mut world = SimWorld::new_with_seed(42);
    let line = world.add_section(Position::new(0.0, 0.0, 0.0), Position::new(100.0, 0.0, 0.0));
    let siding_1 = world.add_section(
        Position::new(100.0, 0.0, 0.0),
        Position::new(150.0, 0.0, 0.0),
    );
    let siding_2 = world.add_section(
        Position::new(100.0, 0.0, 0.0),
        Position::new(150.0, 0.0, 10.0),
    );
    world
        .connect(line, SectionEnd::End, siding_1, SectionEnd::Start)
        .unwrap();
    world
        .connect(line, SectionEnd::End, siding_2, SectionEnd::Start)
        .unwrap();
    Yard {
        world,
        line,
        siding_1,
        siding_2,
    }
}

fn pool_definition(yard: &Yard, two_tracks: bool, force: bool) -> PoolDefinition {
    let mut definition = PoolDefinition::new("yard");
    definition.entry_clearance = 0.0;
    definition.force_creation_on_underflow = force;
    definition = definition.with_track(
        StorageTrackDefinition::new("siding 1", vec![(yard.siding_1, Forward)])
            .with_access_path(vec![(yard.line, Backward)]),
    );
    if two_tracks {
        definition = definition.with_track(
            StorageTrackDefinition::new("siding 2", vec![(yard.siding_2, Forward)])
                .with_access_path(vec![(yard.line, Backward)]),
        );
    }
    definition
}

fn yard_with_pool(two_tracks: bool, force: bool) -> Yard {
    let mut yard = build_yard();
    let definition = pool_definition(&yard, two_tracks, force);
    assert!(yard.world.load_pool(&definition));
    yard
}

fn consist(name: &str, length: f32) -> Vec<Car> {
    vec![Car::new(name, length, true)]
}

fn inbound_route(yard: &Yard) -> TrackPath {
    yard.world.network.path_from(&[(yard.line, Forward)]).unwrap()
}

fn outbound_route(yard: &Yard) -> TrackPath {
    yard.world.network.path_from(&[(yard.line, Backward)]).unwrap()
}

fn spawn_arrival(yard: &mut Yard, name: &str, length: f32) -> TrainId {
    let route = inbound_route(yard);
    yard.world
        .spawn_train(name, consist(name, length), route, length)
        .unwrap()
}

fn pool(world: &SimWorld) -> &PoolKind {
    &world.pools["yard"]
}

fn tick_until(world: &mut SimWorld, max_ticks: u32, done: impl Fn(&SimWorld) -> bool) -> bool {
    for _ in 0..max_ticks {
        if done(world) {
            return true;
        }
        world.tick(0.1);
    }
    done(world)
}

/// Send a train into the yard and run until it is stored
fn store(yard: &mut Yard, name: &str, length: f32) -> TrainId {
    let id = spawn_arrival(yard, name, length);
    let placement = yard.world.send_train_to_pool(id, "yard").unwrap();
    assert!(placement.storage_index().is_some(), "{name} was not placed");
    assert!(tick_until(&mut yard.world, 2000, |world| {
        world.trains[&id].state == TrainState::Stored
    }));
    id
}

#[test]
fn test_empty_pool_selects_first_track() {
    let mut yard = yard_with_pool(false, false);
    let id = spawn_arrival(&mut yard, "arrival", 30.0);
    let selection = pool(&yard.world).select_track_for_entry(&yard.world.trains[&id]);
    assert_eq!(selection, TrackSelection::Track(0));
}

#[test]
fn test_remaining_length_after_arrival() {
    let mut yard = yard_with_pool(false, false);
    let id = store(&mut yard, "arrival", 30.0);

    let track = &pool(&yard.world).core().tracks[0];
    assert_eq!(track.occupants, vec![id]);
    assert!(track.claims.is_empty());
    assert!(
        (track.remaining_length - 20.0).abs() < 0.01,
        "remaining {}",
        track.remaining_length
    );
}

#[test]
fn test_overflow_when_train_does_not_fit() {
    let mut yard = yard_with_pool(false, false);
    store(&mut yard, "first", 30.0);

    let second = spawn_arrival(&mut yard, "second", 25.0);
    let selection = pool(&yard.world).select_track_for_entry(&yard.world.trains[&second]);
    assert_eq!(selection, TrackSelection::Overflow);

    let placement = yard.world.send_train_to_pool(second, "yard").unwrap();
    assert_eq!(placement.storage_index(), None);
    assert_eq!(yard.world.stats.requests_rejected, 1);
}

#[test]
fn test_outstanding_claim_reports_claimed() {
    let mut yard = yard_with_pool(false, false);
    let first = spawn_arrival(&mut yard, "first", 20.0);
    yard.world.send_train_to_pool(first, "yard").unwrap();
    assert_eq!(pool(&yard.world).core().tracks[0].claims, vec![first]);

    let second = spawn_arrival(&mut yard, "second", 10.0);
    let selection = pool(&yard.world).select_track_for_entry(&yard.world.trains[&second]);
    assert_eq!(selection, TrackSelection::Claimed);
}

#[test]
fn test_claimed_entry_is_retried_until_track_frees() {
    let mut yard = yard_with_pool(false, false);
    let first = spawn_arrival(&mut yard, "first", 20.0);
    yard.world.send_train_to_pool(first, "yard").unwrap();
    let second = spawn_arrival(&mut yard, "second", 10.0);
    let placement = yard.world.send_train_to_pool(second, "yard").unwrap();
    assert_eq!(placement.selection, TrackSelection::Claimed);

    assert!(tick_until(&mut yard.world, 3000, |world| {
        world.trains[&second].state == TrainState::Stored
    }));
    let track = &pool(&yard.world).core().tracks[0];
    assert_eq!(track.occupants, vec![first, second]);
    assert!((track.remaining_length - 20.0).abs() < 0.01);
}

#[test]
fn test_selection_is_idempotent_for_claim_holder() {
    let mut yard = yard_with_pool(true, false);
    let id = spawn_arrival(&mut yard, "arrival", 20.0);
    yard.world.send_train_to_pool(id, "yard").unwrap();
    let selection = pool(&yard.world).select_track_for_entry(&yard.world.trains[&id]);
    assert_eq!(selection, TrackSelection::Track(0));
}

#[test]
fn test_first_fit_skips_full_track() {
    let mut yard = yard_with_pool(true, false);
    store(&mut yard, "first", 30.0);
    let second = spawn_arrival(&mut yard, "second", 25.0);
    let selection = pool(&yard.world).select_track_for_entry(&yard.world.trains[&second]);
    assert_eq!(selection, TrackSelection::Track(1));
}

#[test]
fn test_zero_length_train_is_invalid() {
    let mut yard = yard_with_pool(false, false);
    let route = inbound_route(&yard);
    let id = yard.world.spawn_train("empty", Vec::new(), route, 0.0).unwrap();
    let selection = pool(&yard.world).select_track_for_entry(&yard.world.trains[&id]);
    assert_eq!(selection, TrackSelection::Invalid);
}

#[test]
fn test_max_occupants_caps_track() {
    let mut yard = build_yard();
    let mut definition = PoolDefinition::new("yard");
    definition.entry_clearance = 0.0;
    let definition = definition.with_track(
        StorageTrackDefinition::new("siding 1", vec![(yard.siding_1, Forward)])
            .with_access_path(vec![(yard.line, Backward)])
            .with_max_occupants(1),
    );
    assert!(yard.world.load_pool(&definition));
    store(&mut yard, "first", 10.0);

    let second = spawn_arrival(&mut yard, "second", 10.0);
    let selection = pool(&yard.world).select_track_for_entry(&yard.world.trains[&second]);
    assert_eq!(selection, TrackSelection::Overflow);
}

#[test]
fn test_claim_then_commit() {
    let mut yard = yard_with_pool(false, false);
    let id = spawn_arrival(&mut yard, "arrival", 30.0);

    let train = &yard.world.trains[&id];
    let pool = yard.world.pools.get_mut("yard").unwrap();
    pool.add_unit(train, true);
    assert_eq!(pool.core().tracks[0].claims, vec![id]);
    assert!(pool.core().tracks[0].occupants.is_empty());

    pool.add_unit(train, false);
    pool.add_unit(train, false);
    let track = &pool.core().tracks[0];
    assert!(track.claims.is_empty());
    assert_eq!(track.occupants, vec![id]);
}

#[test]
fn test_commit_without_claim_is_fresh_add() {
    let mut yard = yard_with_pool(false, false);
    let id = spawn_arrival(&mut yard, "arrival", 30.0);

    let train = &yard.world.trains[&id];
    let pool = yard.world.pools.get_mut("yard").unwrap();
    pool.add_unit(train, false);
    let track = &pool.core().tracks[0];
    assert_eq!(track.occupants, vec![id]);
    assert!(track.claims.is_empty());
    // Not yet on the siding, so the length is estimated from the train
    assert!((track.remaining_length - 20.0).abs() < 0.01);
}

#[test]
fn test_train_is_never_in_two_tracks() {
    let mut yard = yard_with_pool(true, false);
    let id = store(&mut yard, "arrival", 20.0);

    let train = yard.world.trains[&id].clone();
    let pool = yard.world.pools.get_mut("yard").unwrap();
    pool.add_unit(&train, true);
    pool.add_unit(&train, false);

    let appearances: usize = pool
        .core()
        .tracks
        .iter()
        .map(|track| {
            track.occupants.iter().filter(|other| **other == id).count()
                + track.claims.iter().filter(|other| **other == id).count()
        })
        .sum();
    assert_eq!(appearances, 1);
}

#[test]
fn test_stored_lengths_stay_within_capacity() {
    let mut yard = yard_with_pool(false, false);
    store(&mut yard, "first", 20.0);
    store(&mut yard, "second", 20.0);

    let third = spawn_arrival(&mut yard, "third", 20.0);
    let placement = yard.world.send_train_to_pool(third, "yard").unwrap();
    assert_eq!(placement.selection, TrackSelection::Overflow);

    let track = &pool(&yard.world).core().tracks[0];
    let stored: f32 = track
        .occupants
        .iter()
        .map(|id| yard.world.trains[id].length())
        .sum();
    assert!(stored <= track.capacity_length - track.length_correction);
    assert!((track.remaining_length - 10.0).abs() < 0.01);
}

#[test]
fn test_second_arrival_stops_behind_first() {
    let mut yard = yard_with_pool(false, false);
    let first = store(&mut yard, "first", 20.0);
    let second = store(&mut yard, "second", 15.0);

    let first_front = yard.world.trains[&first].front_position().unwrap();
    let second_front = yard.world.trains[&second].front_position().unwrap();
    assert_eq!(first_front.section, yard.siding_1);
    assert!((first_front.offset - 50.0).abs() < 0.01);
    assert!((second_front.offset - 30.0).abs() < 0.01);
}

#[test]
fn test_extract_from_empty_pool_not_created() {
    let mut yard = yard_with_pool(false, false);
    let route = outbound_route(&yard);
    let (id, outcome) = yard
        .world
        .request_train_from_pool("departure", consist("loco", 20.0), route, "yard")
        .unwrap();
    assert_eq!(outcome, ExtractOutcome::NotCreated);
    assert!(!yard.world.trains.contains_key(&id));
}

#[test]
fn test_extract_from_empty_pool_force_created() {
    let mut yard = yard_with_pool(false, true);
    let route = outbound_route(&yard);
    let (id, outcome) = yard
        .world
        .request_train_from_pool("departure", consist("loco", 20.0), route, "yard")
        .unwrap();
    assert_eq!(outcome, ExtractOutcome::ForceCreated);
    let train = &yard.world.trains[&id];
    assert_eq!(train.state, TrainState::Running);
    assert!((train.front_distance - 20.0).abs() < 0.01);
    assert_eq!(yard.world.stats.trains_force_created, 1);
}

#[test]
fn test_extract_forms_train_from_tail_occupant() {
    let mut yard = yard_with_pool(false, false);
    let first = store(&mut yard, "first", 20.0);
    let second = store(&mut yard, "second", 15.0);

    let route = outbound_route(&yard);
    let (id, outcome) = yard
        .world
        .request_train_from_pool("departure", Vec::new(), route, "yard")
        .unwrap();
    assert_eq!(outcome, ExtractOutcome::Formed);

    // The most recent arrival leaves first
    assert!(!yard.world.trains.contains_key(&second));
    assert!(yard.world.trains.contains_key(&first));

    let train = &yard.world.trains[&id];
    assert_eq!(train.state, TrainState::Running);
    assert!((train.length() - 15.0).abs() < 0.01);
    assert!(train.reversed);
    assert!(train.cars[0].flipped);
    assert_eq!(train.route.first().unwrap().section, yard.siding_1);
    assert_eq!(train.route.first().unwrap().direction, Backward);
    // The old rear of the second arrival now leads, 35m from the dead end
    assert!((train.front_distance - 35.0).abs() < 0.01);

    let track = &pool(&yard.world).core().tracks[0];
    assert_eq!(track.occupants, vec![first]);
    assert!((track.remaining_length - 30.0).abs() < 0.01);
}

#[test]
fn test_extract_last_occupant_resets_capacity() {
    let mut yard = yard_with_pool(false, false);
    store(&mut yard, "only", 20.0);
    let route = outbound_route(&yard);
    let (_, outcome) = yard
        .world
        .request_train_from_pool("departure", Vec::new(), route, "yard")
        .unwrap();
    assert_eq!(outcome, ExtractOutcome::Formed);
    let track = &pool(&yard.world).core().tracks[0];
    assert!(track.is_empty());
    assert_eq!(track.remaining_length, track.capacity_length);
}

#[test]
fn test_extract_delayed_while_claim_outstanding() {
    let mut yard = yard_with_pool(false, false);
    let incoming = spawn_arrival(&mut yard, "incoming", 20.0);
    yard.world.send_train_to_pool(incoming, "yard").unwrap();

    let route = outbound_route(&yard);
    let (id, outcome) = yard
        .world
        .request_train_from_pool("departure", Vec::new(), route, "yard")
        .unwrap();
    assert_eq!(outcome, ExtractOutcome::Delayed);
    assert_eq!(yard.world.trains[&id].state, TrainState::Pending);

    // Once the incoming train is stored the request goes through
    assert!(tick_until(&mut yard.world, 2000, |world| {
        world.stats.trains_formed == 1
    }));
    assert!(!yard.world.trains.contains_key(&incoming));
    assert_eq!(yard.world.stats.requests_delayed, 1);
}

#[test]
fn test_delayed_takes_precedence_over_force_creation() {
    let mut yard = yard_with_pool(false, true);
    let incoming = spawn_arrival(&mut yard, "incoming", 20.0);
    yard.world.send_train_to_pool(incoming, "yard").unwrap();

    let route = outbound_route(&yard);
    let (_, outcome) = yard
        .world
        .request_train_from_pool("departure", Vec::new(), route, "yard")
        .unwrap();
    assert_eq!(outcome, ExtractOutcome::Delayed);
}

#[test]
fn test_extract_fails_without_linking_access_path() {
    let mut yard = yard_with_pool(false, false);
    let stored = store(&mut yard, "stored", 20.0);

    let wrong_way = inbound_route(&yard);
    let (id, outcome) = yard
        .world
        .request_train_from_pool("departure", Vec::new(), wrong_way, "yard")
        .unwrap();
    assert_eq!(outcome, ExtractOutcome::Failed);
    assert!(!yard.world.trains.contains_key(&id));
    assert_eq!(pool(&yard.world).core().tracks[0].occupants, vec![stored]);
}

#[test]
fn test_extract_delayed_by_train_entering_same_pool() {
    let mut yard = yard_with_pool(true, false);
    store(&mut yard, "stored", 30.0);

    // Too long for siding 1, so it claims siding 2 and crosses the exit route
    let incoming = spawn_arrival(&mut yard, "incoming", 25.0);
    let placement = yard.world.send_train_to_pool(incoming, "yard").unwrap();
    assert_eq!(placement.selection, TrackSelection::Track(1));

    let route = outbound_route(&yard);
    let (_, outcome) = yard
        .world
        .request_train_from_pool("departure", Vec::new(), route, "yard")
        .unwrap();
    assert_eq!(outcome, ExtractOutcome::Delayed);
}

#[test]
fn test_stale_occupant_is_dropped() {
    let mut yard = yard_with_pool(false, false);
    let stored = store(&mut yard, "stored", 20.0);
    yard.world.trains.remove(&stored);

    let route = outbound_route(&yard);
    let (_, outcome) = yard
        .world
        .request_train_from_pool("departure", Vec::new(), route, "yard")
        .unwrap();
    assert_eq!(outcome, ExtractOutcome::NotCreated);
    let track = &pool(&yard.world).core().tracks[0];
    assert!(track.occupants.is_empty());
    assert_eq!(track.remaining_length, track.capacity_length);
}

#[test]
fn test_stale_id_behind_extracted_train_is_dropped() {
    let mut yard = yard_with_pool(false, false);
    let first = store(&mut yard, "first", 10.0);
    let second = store(&mut yard, "second", 10.0);
    store(&mut yard, "third", 10.0);
    yard.world.trains.remove(&second);

    let route = outbound_route(&yard);
    let (_, outcome) = yard
        .world
        .request_train_from_pool("departure", Vec::new(), route, "yard")
        .unwrap();
    assert_eq!(outcome, ExtractOutcome::Formed);

    // The remaining length follows the first arrival, not an empty track
    let track = &pool(&yard.world).core().tracks[0];
    assert_eq!(track.occupants, vec![first]);
    assert!(
        (track.remaining_length - 40.0).abs() < 0.01,
        "remaining {}",
        track.remaining_length
    );
}

#[test]
fn test_length_correction_reduces_remaining_length() {
    let mut yard = build_yard();
    let mut definition = pool_definition(&yard, false, false);
    definition.length_correction = 5.0;
    assert!(yard.world.load_pool(&definition));

    // An empty track already holds the correction back
    let too_long = spawn_arrival(&mut yard, "too long", 46.0);
    let selection = pool(&yard.world).select_track_for_entry(&yard.world.trains[&too_long]);
    assert_eq!(selection, TrackSelection::Overflow);

    store(&mut yard, "first", 30.0);
    let track = &pool(&yard.world).core().tracks[0];
    assert!(
        (track.remaining_length - 15.0).abs() < 0.01,
        "remaining {}",
        track.remaining_length
    );

    let longer = spawn_arrival(&mut yard, "longer", 16.0);
    let selection = pool(&yard.world).select_track_for_entry(&yard.world.trains[&longer]);
    assert_eq!(selection, TrackSelection::Overflow);

    let second = store(&mut yard, "second", 14.0);
    let front = yard.world.trains[&second].front_position().unwrap();
    assert!((front.offset - 20.0).abs() < 0.01);
    let track = &pool(&yard.world).core().tracks[0];
    assert!((track.remaining_length - 1.0).abs() < 0.01);
}

#[test]
fn test_initial_placement() {
    let mut yard = yard_with_pool(false, false);
    let route = outbound_route(&yard);
    let id = yard
        .world
        .spawn_train("parked", consist("loco", 20.0), route, 20.0)
        .unwrap();
    let track = yard.world.place_train_in_pool(id, "yard").unwrap();
    assert_eq!(track, 0);

    let train = &yard.world.trains[&id];
    assert_eq!(train.state, TrainState::Stored);
    let front = train.front_position().unwrap();
    assert_eq!(front.section, yard.siding_1);
    assert!((front.offset - 50.0).abs() < 0.01);

    let track = &pool(&yard.world).core().tracks[0];
    assert_eq!(track.occupants, vec![id]);
    assert!(track.claims.is_empty());
    assert!((track.remaining_length - 30.0).abs() < 0.01);
}

#[test]
fn test_end_of_route_distance_leaves_room_for_occupants() {
    let mut yard = yard_with_pool(false, false);
    store(&mut yard, "first", 20.0);
    let second = spawn_arrival(&mut yard, "second", 10.0);
    yard.world.send_train_to_pool(second, "yard").unwrap();

    let train = &yard.world.trains[&second];
    let distance = pool(&yard.world).end_of_route_distance(train).unwrap();
    assert!((distance - 130.0).abs() < 0.01);
    assert_eq!(train.stop_distance(), Some(distance));
}

#[test]
fn test_disconnected_storage_path_drops_track() {
    let mut yard = build_yard();
    let mut definition = pool_definition(&yard, true, false);
    // Siding 1 does not lead onto siding 2
    definition.tracks[0].storage_path = vec![(yard.siding_1, Forward), (yard.siding_2, Forward)];
    assert!(yard.world.load_pool(&definition));
    let tracks = &pool(&yard.world).core().tracks;
    assert_eq!(tracks.len(), 1);
    assert_eq!(tracks[0].name, "siding 2");
}

#[test]
fn test_pool_without_usable_tracks_is_dropped() {
    let mut yard = build_yard();
    let mut definition = pool_definition(&yard, false, false);
    definition.tracks[0].access_paths.clear();
    assert!(!yard.world.load_pool(&definition));
    assert!(yard.world.pools.is_empty());
}

#[test]
fn test_duplicate_pool_is_ignored() {
    let mut yard = yard_with_pool(false, false);
    let definition = pool_definition(&yard, true, false);
    assert!(!yard.world.load_pool(&definition));
    assert_eq!(pool(&yard.world).core().tracks.len(), 1);
}

#[test]
fn test_stored_train_occupies_siding() {
    let mut yard = yard_with_pool(false, false);
    let id = store(&mut yard, "arrival", 30.0);
    assert_eq!(yard.world.network.trains_on_section(yard.siding_1), vec![id]);
    assert!(yard.world.network.trains_on_section(yard.line).is_empty());

    // A request waiting on the pool holds no track
    let route = outbound_route(&yard);
    let incoming = spawn_arrival(&mut yard, "incoming", 10.0);
    yard.world.send_train_to_pool(incoming, "yard").unwrap();
    let (pending, outcome) = yard
        .world
        .request_train_from_pool("departure", Vec::new(), route, "yard")
        .unwrap();
    assert_eq!(outcome, ExtractOutcome::Delayed);
    yard.world.tick(0.1);
    assert!(!yard.world.network.trains_on_section(yard.line).contains(&pending));
}

#[test]
fn test_route_search_into_siding() {
    let yard = build_yard();
    let route = yard
        .world
        .network
        .find_route((yard.line, Forward), (yard.siding_2, Forward))
        .unwrap();
    let sections: Vec<SectionId> = route.sections().collect();
    assert_eq!(sections, vec![yard.line, yard.siding_2]);
    assert!(yard
        .world
        .network
        .find_route((yard.siding_1, Forward), (yard.line, Forward))
        .is_none());
}
