//! Snapshot encode/restore tests

use train_pool::simulation::{
    unwrap_header, wrap_with_header, ControlState, SimWorld, WorldSnapshot, FORMAT_VERSION,
    HEADER_SIZE, MAGIC,
};

/// Run the test world until a turntable maneuver is under way
fn world_mid_maneuver() -> SimWorld {
    let mut world = SimWorld::create_test_world_with_seed(3).unwrap();
    for _ in 0..5000 {
        if world
            .controls
            .iter()
            .any(|control| control.state == ControlState::Approaching)
        {
            break;
        }
        world.tick(0.1);
    }
    assert!(!world.controls.is_empty());
    world
}

#[test]
fn test_snapshot_restores_pools_devices_and_controls() {
    let mut world = world_mid_maneuver();
    let bytes = world.snapshot();
    let pools = world.pools.clone();
    let controls = world.controls.clone();
    let devices = world.turntables.clone();

    world.pools.clear();
    world.controls.clear();
    for device in world.turntables.values_mut() {
        device.angle = 123.0;
        device.wait_queue.clear();
    }

    world.restore(&bytes).unwrap();
    assert_eq!(world.pools, pools);
    assert_eq!(world.controls, controls);
    assert_eq!(world.turntables.len(), devices.len());
    for (id, before) in &devices {
        let after = &world.turntables[id];
        assert_eq!(after.name, before.name);
        assert_eq!(after.angle, before.angle);
        assert_eq!(after.exits, before.exits);
        assert_eq!(after.target, before.target);
        assert_eq!(after.rotation, before.rotation);
        assert_eq!(after.in_use, before.in_use);
        assert_eq!(after.holder, before.holder);
        assert_eq!(after.wait_queue, before.wait_queue);
    }
}

#[test]
fn test_restored_world_keeps_running() {
    let mut world = world_mid_maneuver();
    let bytes = world.snapshot();
    world.restore(&bytes).unwrap();

    for _ in 0..3000 {
        world.tick(0.1);
    }
    assert!(world.controls.is_empty());
    assert_eq!(world.stats.trains_formed, 2);
}

#[test]
fn test_snapshot_starts_with_header() {
    let world = SimWorld::create_test_world_with_seed(1).unwrap();
    let bytes = world.snapshot();
    assert_eq!(&bytes[..4], &MAGIC);
    assert_eq!(
        u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
        FORMAT_VERSION
    );
    let payload = unwrap_header(&bytes).unwrap();
    assert_eq!(payload.len(), bytes.len() - HEADER_SIZE);

    let decoded = WorldSnapshot::decode(&bytes).unwrap();
    assert_eq!(decoded.pools.len(), 2);
    assert_eq!(decoded.devices.len(), 1);
}

#[test]
fn test_bad_magic_is_rejected() {
    let world = SimWorld::create_test_world_with_seed(1).unwrap();
    let mut bytes = world.snapshot();
    bytes[0] = b'X';
    assert!(unwrap_header(&bytes).is_err());
}

#[test]
fn test_newer_version_is_rejected() {
    let world = SimWorld::create_test_world_with_seed(1).unwrap();
    let mut bytes = world.snapshot();
    bytes[4..8].copy_from_slice(&(FORMAT_VERSION + 1).to_le_bytes());
    let err = unwrap_header(&bytes).unwrap_err();
    assert!(err.to_string().contains("newer"));
}

#[test]
fn test_truncated_snapshot_is_rejected() {
    let world = SimWorld::create_test_world_with_seed(1).unwrap();
    let bytes = world.snapshot();
    assert!(unwrap_header(&bytes[..HEADER_SIZE - 1]).is_err());
    assert!(unwrap_header(&bytes[..bytes.len() - 1]).is_err());
}

#[test]
fn test_corrupt_payload_is_rejected() {
    let bytes = wrap_with_header(&[0xff, 0x01, 0x02]);
    assert!(WorldSnapshot::decode(&bytes).is_err());
}

#[test]
fn test_failed_restore_leaves_world_untouched() {
    let mut world = world_mid_maneuver();
    let pools = world.pools.clone();
    let controls = world.controls.clone();

    let mut bytes = world.snapshot();
    bytes[0] = b'X';
    assert!(world.restore(&bytes).is_err());
    assert_eq!(world.pools, pools);
    assert_eq!(world.controls, controls);
}

/// Decode, edit and re-encode a snapshot of `world`
fn edited_snapshot(world: &SimWorld, edit: impl FnOnce(&mut WorldSnapshot)) -> Vec<u8> {
    let mut snapshot = WorldSnapshot::decode(&world.snapshot()).unwrap();
    edit(&mut snapshot);
    snapshot.encode()
}

#[test]
fn test_restore_rejects_target_past_last_exit() {
    let mut world = world_mid_maneuver();
    assert!(world.turntables.values().any(|device| device.target.is_some()));
    let pools = world.pools.clone();
    let controls = world.controls.clone();

    let bytes = edited_snapshot(&world, |snapshot| {
        assert!(snapshot.devices[0].target.is_some());
        snapshot.devices[0].exits.clear();
    });
    let err = world.restore(&bytes).unwrap_err();
    assert!(err.to_string().contains("exit"), "{err}");
    assert_eq!(world.pools, pools);
    assert_eq!(world.controls, controls);

    // The untouched world still finishes its work
    for _ in 0..3000 {
        world.tick(0.1);
    }
    assert!(world.controls.is_empty());
    assert_eq!(world.stats.trains_formed, 2);
}

#[test]
fn test_restore_rejects_pool_exit_past_last_exit() {
    let mut world = world_mid_maneuver();
    let bytes = edited_snapshot(&world, |snapshot| {
        snapshot.devices[0].target = None;
        snapshot.devices[0].exits.truncate(1);
    });
    assert!(world.restore(&bytes).is_err());
    world.tick(0.1);
}

#[test]
fn test_restore_rejects_control_indices_past_pool() {
    let mut world = world_mid_maneuver();
    let controls = world.controls.clone();

    let bytes = edited_snapshot(&world, |snapshot| {
        snapshot.controls[0].storage_track_index = 99;
    });
    let err = world.restore(&bytes).unwrap_err();
    assert!(err.to_string().contains("storage track"), "{err}");

    let bytes = edited_snapshot(&world, |snapshot| {
        snapshot.controls[0].access_path_index = 99;
    });
    let err = world.restore(&bytes).unwrap_err();
    assert!(err.to_string().contains("access path"), "{err}");

    let bytes = edited_snapshot(&world, |snapshot| {
        snapshot.controls[0].pool = "nowhere".to_string();
    });
    assert!(world.restore(&bytes).is_err());
    assert_eq!(world.controls, controls);
}
