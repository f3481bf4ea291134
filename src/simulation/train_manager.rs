//! Train spawning and per-tick updates
//!
//! Free functions over the train collection so the world only coordinates.

use anyhow::{Context, Result};
use std::collections::HashMap;

use super::path::TrackPath;
use super::track_network::TrackNetwork;
use super::train::{Car, SimTrain, TrainState, TrainUpdateResult};
use super::types::TrainId;

/// Build a train on a route and register it on the track
///
/// # Arguments
/// * `train_id` - The pre-generated train ID
/// * `name` - Timetable name of the service
/// * `cars` - Consist, front first
/// * `route` - Route the train follows
/// * `front_distance` - Distance of the train front from the route start
/// * `network` - The track network used for route validation and occupancy
///
/// Returns the new train if the route is valid
pub fn spawn_train(
    train_id: TrainId,
    name: &str,
    cars: Vec<Car>,
    route: TrackPath,
    front_distance: f32,
    network: &mut TrackNetwork,
) -> Result<SimTrain> {
    network
        .validate_path(&route)
        .with_context(|| format!("Route of {name} is not continuous"))?;
    if front_distance > route.total_length() {
        anyhow::bail!(
            "{name} starts {front_distance:.1} along a route only {:.1} long",
            route.total_length()
        );
    }

    let train = SimTrain::new(train_id, name, cars, route, front_distance);
    network.update_train_occupancy(train_id, &train.occupied_sections());
    Ok(train)
}

/// Remove a train and its occupancy entries
pub fn despawn_train(
    train_id: TrainId,
    trains: &mut HashMap<TrainId, SimTrain>,
    network: &mut TrackNetwork,
) -> Option<SimTrain> {
    network.remove_train_from_tracking(train_id);
    trains.remove(&train_id)
}

/// Update all trains in the simulation
///
/// Returns a list of (train_id, result) tuples for trains that stopped this tick
pub fn update_trains(
    delta_secs: f32,
    trains: &mut HashMap<TrainId, SimTrain>,
) -> Vec<(TrainId, TrainUpdateResult)> {
    let mut train_ids: Vec<TrainId> = trains.keys().copied().collect();
    train_ids.sort();

    let mut results = Vec::new();
    for train_id in train_ids {
        if let Some(train) = trains.get_mut(&train_id) {
            match train.update(delta_secs) {
                TrainUpdateResult::Continue => {}
                result => results.push((train_id, result)),
            }
        }
    }
    results
}

/// Refresh the occupancy index from the trains' current positions.
/// Trains waiting to be formed hold no track.
pub fn update_occupancy(trains: &HashMap<TrainId, SimTrain>, network: &mut TrackNetwork) {
    for train in trains.values() {
        if train.state == TrainState::Pending {
            continue;
        }
        network.update_train_occupancy(train.id, &train.occupied_sections());
    }
}
