use std::process::{Command, Output};

use train_pool::simulation::SimWorld;

fn run_simulation(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_train_pool"))
        .args(args)
        .env("RUST_LOG", "warn,train_pool=info")
        .output()
        .expect("Failed to execute simulation")
}

/// Test that the simulation runs to completion without crashing
#[test]
fn test_headless_simulation_runs() {
    let output = run_simulation(&["--ticks", "3000", "--seed", "42"]);

    assert!(
        output.status.success(),
        "Simulation failed to run. stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("SIMULATION COMPLETE"),
        "Simulation did not complete properly. stderr: {}",
        stderr
    );
}

/// Test that simulation statistics are logged
#[test]
fn test_simulation_statistics_logged() {
    let output = run_simulation(&["--ticks", "3000", "--seed", "42"]);
    assert!(output.status.success(), "Simulation failed to run");

    let stderr = String::from_utf8_lossy(&output.stderr);
    for line in [
        "Total trains spawned:",
        "Trains stored:",
        "Trains formed from storage:",
        "Trains completed:",
        "Turntable maneuvers completed:",
        "Active trains:",
        "Stored trains:",
    ] {
        assert!(stderr.contains(line), "Missing '{line}' statistic");
    }
}

/// Test that a non-positive time step is refused
#[test]
fn test_invalid_delta_fails() {
    let output = run_simulation(&["--ticks", "10", "--delta", "0"]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("--delta must be positive"));
}

/// Test that a snapshot file is written and can be restored
#[test]
fn test_snapshot_written() {
    let path = std::env::temp_dir().join(format!("train_pool_{}.snap", std::process::id()));
    let path_arg = path.to_string_lossy().to_string();
    let output = run_simulation(&["--ticks", "100", "--seed", "5", "--snapshot", &path_arg]);
    assert!(output.status.success(), "Simulation failed to run");

    let bytes = std::fs::read(&path).expect("Snapshot was not written");
    let _ = std::fs::remove_file(&path);
    let mut world = SimWorld::create_test_world_with_seed(5).unwrap();
    world.restore(&bytes).unwrap();
    assert_eq!(world.pools.len(), 2);
}

/// Test that every arrival and departure in the test world is served
#[test]
fn test_test_world_serves_all_moves() {
    let mut world = SimWorld::create_test_world_with_seed(42).unwrap();
    assert_eq!(world.stats.trains_stored, 2);
    assert_eq!(world.stats.requests_delayed, 2);

    for _ in 0..3000 {
        world.tick(0.1);
    }

    assert_eq!(world.stats.trains_stored, 4);
    assert_eq!(world.stats.trains_formed, 2);
    assert_eq!(world.stats.trains_completed, 2);
    assert_eq!(world.stats.maneuvers_completed, 2);
    assert_eq!(world.stats.requests_rejected, 0);
    assert!(world.controls.is_empty());
    assert!(world.turntables.values().all(|device| !device.in_use));
    // Stock that arrived replaced stock that left
    assert_eq!(world.stored_train_count(), 2);
}

/// Test that the same seed gives the same run
#[test]
fn test_seeded_runs_match() {
    let mut first = SimWorld::create_test_world_with_seed(9).unwrap();
    let mut second = SimWorld::create_test_world_with_seed(9).unwrap();
    for _ in 0..1000 {
        first.tick(0.1);
        second.tick(0.1);
    }
    assert_eq!(first.stats, second.stats);
    assert_eq!(first.pools, second.pools);
    assert_eq!(first.snapshot(), second.snapshot());
}
