//! Binary snapshots of pool, device and control state
//!
//! Layout: a 12-byte header followed by a bitcode payload.
//!   [0..4]   magic "TPSN"
//!   [4..8]   format version (u32, little-endian)
//!   [8..12]  payload length (u32, little-endian)
//!
//! Save types mirror the runtime types field for field, in order. Optional
//! fields are stored as presence flag then value.

use anyhow::{Context, Result};
use bitcode::{Decode, Encode};

use super::path::{PathElement, TrackPath};
use super::pool::{Pool, PoolKind};
use super::storage_track::{DeviceOffsets, StorageTrack};
use super::turntable::{DeckAlignment, Rotation, Turntable, TurntableExit};
use super::turntable_control::{BoardingFlags, ControlAction, ControlState, TurntableControl};
use super::turntable_pool::{AccessPathDetails, TurntablePool};
use super::types::{
    DeviceId, Direction, Position, SectionEnd, SectionId, SimId, TrackPosition, TrainId,
};

pub const MAGIC: [u8; 4] = *b"TPSN";
pub const HEADER_SIZE: usize = 12;
pub const FORMAT_VERSION: u32 = 1;

#[derive(Encode, Decode, Debug, Clone, PartialEq)]
pub struct SavePathElement {
    pub section: u64,
    pub forward: bool,
    pub length: f32,
}

#[derive(Encode, Decode, Debug, Clone, PartialEq)]
pub struct SaveTraveller {
    pub section: u64,
    pub offset: f32,
    pub forward: bool,
}

#[derive(Encode, Decode, Debug, Clone, Copy, PartialEq)]
pub struct SaveDeviceOffsets {
    pub exit_index: u32,
    pub approach_offset: f32,
    pub deck_center_entry_offset: f32,
    pub deck_center_exit_offset: f32,
}

#[derive(Encode, Decode, Debug, Clone, PartialEq)]
pub struct SaveStorageTrack {
    pub storage_path: Vec<SavePathElement>,
    pub start_traveller: Option<SaveTraveller>,
    pub reverse_traveller: Option<SaveTraveller>,
    pub name: String,
    pub access_paths: Vec<Vec<SavePathElement>>,
    pub occupants: Vec<u64>,
    pub claims: Vec<u64>,
    pub capacity_length: f32,
    pub length_correction: f32,
    pub device_offsets: Option<SaveDeviceOffsets>,
    pub remaining_length: f32,
    pub max_occupants: Option<u32>,
}

#[derive(Encode, Decode, Debug, Clone, PartialEq)]
pub struct SavePool {
    pub name: String,
    pub force_creation_on_underflow: bool,
    pub tracks: Vec<SaveStorageTrack>,
}

#[derive(Encode, Decode, Debug, Clone, PartialEq)]
pub struct SaveAccessPath {
    pub path: Vec<SavePathElement>,
    pub traveller: Option<SaveTraveller>,
    pub offsets: SaveDeviceOffsets,
}

#[derive(Encode, Decode, Debug, Clone, PartialEq)]
pub struct SaveTurntablePool {
    pub pool: SavePool,
    pub access_paths: Vec<SaveAccessPath>,
    pub device: u64,
    pub deck_section: u64,
    pub deck_length: f32,
    pub approach_clearance: f32,
    pub release_clearance: f32,
    pub deck_speed_limit: Option<f32>,
    pub frame_rate: Option<f32>,
}

#[derive(Encode, Decode, Debug, Clone, PartialEq)]
pub enum SavePoolEntry {
    Plain(SavePool),
    Turntable(SaveTurntablePool),
}

#[derive(Encode, Decode, Debug, Clone, Copy, PartialEq)]
pub struct SaveAlignment {
    pub exit: u32,
    pub at_end: bool,
}

#[derive(Encode, Decode, Debug, Clone, PartialEq)]
pub struct SaveTurntable {
    pub id: u64,
    pub name: String,
    pub center: [f32; 3],
    pub deck_section: u64,
    pub deck_length: f32,
    pub exits: Vec<(u64, f32)>,
    pub angle: f32,
    pub rotation_speed: f32,
    pub speed_limit: f32,
    pub frame_rate: Option<f32>,
    pub target: Option<SaveAlignment>,
    pub rotation: u8,
    pub in_use: bool,
    pub holder: Option<u64>,
    pub wait_queue: Vec<u64>,
}

#[derive(Encode, Decode, Debug, Clone, PartialEq)]
pub struct SaveControl {
    pub train: u64,
    pub pool: String,
    pub device: u64,
    pub state: u8,
    pub action: u8,
    pub access_path_index: u32,
    pub storage_track_index: u32,
    pub reverse_formation: bool,
    pub target_exit: Option<SaveAlignment>,
    pub saved_speed_cap: Option<f32>,
    pub stop_offset: Option<f32>,
    /// (front on board, rear on board)
    pub boarding: Option<(bool, bool)>,
}

/// Everything a snapshot carries
#[derive(Encode, Decode, Debug, Clone, PartialEq)]
pub struct WorldSnapshot {
    pub pools: Vec<SavePoolEntry>,
    pub devices: Vec<SaveTurntable>,
    pub controls: Vec<SaveControl>,
}

impl WorldSnapshot {
    pub fn encode(&self) -> Vec<u8> {
        wrap_with_header(&bitcode::encode(self))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let payload = unwrap_header(bytes)?;
        bitcode::decode(payload).context("Snapshot payload is corrupt")
    }
}

/// Prefix an encoded payload with the snapshot header
pub fn wrap_with_header(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_SIZE + payload.len());
    out.extend_from_slice(&MAGIC);
    out.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    out.extend_from_slice(payload);
    out
}

/// Check the header and return the payload
pub fn unwrap_header(bytes: &[u8]) -> Result<&[u8]> {
    if bytes.len() < HEADER_SIZE {
        anyhow::bail!(
            "Snapshot too short ({} bytes, need at least {HEADER_SIZE})",
            bytes.len()
        );
    }
    if bytes[..4] != MAGIC {
        anyhow::bail!("Not a pool snapshot (bad magic bytes)");
    }
    let version = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
    if version > FORMAT_VERSION {
        anyhow::bail!(
            "Snapshot format version {version} is newer than supported version {FORMAT_VERSION}"
        );
    }
    let length = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]) as usize;
    let payload = &bytes[HEADER_SIZE..];
    if payload.len() != length {
        anyhow::bail!(
            "Snapshot payload is {} bytes, header says {length}",
            payload.len()
        );
    }
    Ok(payload)
}

fn sim_id(raw: u64) -> SimId {
    SimId(raw as usize)
}

fn save_path(path: &TrackPath) -> Vec<SavePathElement> {
    path.elements()
        .iter()
        .map(|element| SavePathElement {
            section: element.section.0 .0 as u64,
            forward: element.direction.is_forward(),
            length: element.length,
        })
        .collect()
}

fn load_path(saved: &[SavePathElement]) -> TrackPath {
    TrackPath::new(
        saved
            .iter()
            .map(|element| {
                PathElement::new(
                    SectionId(sim_id(element.section)),
                    Direction::from_forward(element.forward),
                    element.length,
                )
            })
            .collect(),
    )
}

fn save_traveller(position: &TrackPosition) -> SaveTraveller {
    SaveTraveller {
        section: position.section.0 .0 as u64,
        offset: position.offset,
        forward: position.direction.is_forward(),
    }
}

fn load_traveller(saved: &SaveTraveller) -> TrackPosition {
    TrackPosition::new(
        SectionId(sim_id(saved.section)),
        saved.offset,
        Direction::from_forward(saved.forward),
    )
}

fn save_offsets(offsets: &DeviceOffsets) -> SaveDeviceOffsets {
    SaveDeviceOffsets {
        exit_index: offsets.exit_index as u32,
        approach_offset: offsets.approach_offset,
        deck_center_entry_offset: offsets.deck_center_entry_offset,
        deck_center_exit_offset: offsets.deck_center_exit_offset,
    }
}

fn load_offsets(saved: &SaveDeviceOffsets) -> DeviceOffsets {
    DeviceOffsets {
        exit_index: saved.exit_index as usize,
        approach_offset: saved.approach_offset,
        deck_center_entry_offset: saved.deck_center_entry_offset,
        deck_center_exit_offset: saved.deck_center_exit_offset,
    }
}

fn save_alignment(alignment: &DeckAlignment) -> SaveAlignment {
    SaveAlignment {
        exit: alignment.exit as u32,
        at_end: alignment.end == SectionEnd::End,
    }
}

fn load_alignment(saved: &SaveAlignment) -> DeckAlignment {
    DeckAlignment {
        exit: saved.exit as usize,
        end: if saved.at_end {
            SectionEnd::End
        } else {
            SectionEnd::Start
        },
    }
}

fn train_ids(raw: &[u64]) -> Vec<TrainId> {
    raw.iter().map(|id| TrainId(sim_id(*id))).collect()
}

fn raw_train_ids(ids: &[TrainId]) -> Vec<u64> {
    ids.iter().map(|id| id.0 .0 as u64).collect()
}

impl From<&StorageTrack> for SaveStorageTrack {
    fn from(track: &StorageTrack) -> Self {
        Self {
            storage_path: save_path(&track.storage_path),
            start_traveller: track.start_traveller.as_ref().map(save_traveller),
            reverse_traveller: track.reverse_traveller.as_ref().map(save_traveller),
            name: track.name.clone(),
            access_paths: track.access_paths.iter().map(save_path).collect(),
            occupants: raw_train_ids(&track.occupants),
            claims: raw_train_ids(&track.claims),
            capacity_length: track.capacity_length,
            length_correction: track.length_correction,
            device_offsets: track.device_offsets.as_ref().map(save_offsets),
            remaining_length: track.remaining_length,
            max_occupants: track.max_occupants.map(|max| max as u32),
        }
    }
}

impl From<&SaveStorageTrack> for StorageTrack {
    fn from(saved: &SaveStorageTrack) -> Self {
        let mut track = StorageTrack::new(
            saved.name.clone(),
            load_path(&saved.storage_path),
            saved.access_paths.iter().map(|path| load_path(path)).collect(),
            saved.capacity_length,
            saved.length_correction,
            saved.max_occupants.map(|max| max as usize),
        );
        track.start_traveller = saved.start_traveller.as_ref().map(load_traveller);
        track.reverse_traveller = saved.reverse_traveller.as_ref().map(load_traveller);
        track.occupants = train_ids(&saved.occupants);
        track.claims = train_ids(&saved.claims);
        track.device_offsets = saved.device_offsets.as_ref().map(load_offsets);
        track.remaining_length = saved.remaining_length;
        track
    }
}

impl From<&Pool> for SavePool {
    fn from(pool: &Pool) -> Self {
        Self {
            name: pool.name.clone(),
            force_creation_on_underflow: pool.force_creation_on_underflow,
            tracks: pool.tracks.iter().map(SaveStorageTrack::from).collect(),
        }
    }
}

impl From<&SavePool> for Pool {
    fn from(saved: &SavePool) -> Self {
        let mut pool = Pool::new(saved.name.clone(), saved.force_creation_on_underflow);
        pool.tracks = saved.tracks.iter().map(StorageTrack::from).collect();
        pool
    }
}

impl From<&TurntablePool> for SaveTurntablePool {
    fn from(pool: &TurntablePool) -> Self {
        Self {
            pool: SavePool::from(&pool.pool),
            access_paths: pool
                .access_paths
                .iter()
                .map(|access| SaveAccessPath {
                    path: save_path(&access.path),
                    traveller: access.traveller.as_ref().map(save_traveller),
                    offsets: save_offsets(&access.offsets),
                })
                .collect(),
            device: pool.device.0 .0 as u64,
            deck_section: pool.deck_section.0 .0 as u64,
            deck_length: pool.deck_length,
            approach_clearance: pool.approach_clearance,
            release_clearance: pool.release_clearance,
            deck_speed_limit: pool.deck_speed_limit,
            frame_rate: pool.frame_rate,
        }
    }
}

impl From<&SaveTurntablePool> for TurntablePool {
    fn from(saved: &SaveTurntablePool) -> Self {
        Self {
            pool: Pool::from(&saved.pool),
            access_paths: saved
                .access_paths
                .iter()
                .map(|access| AccessPathDetails {
                    path: load_path(&access.path),
                    traveller: access.traveller.as_ref().map(load_traveller),
                    offsets: load_offsets(&access.offsets),
                })
                .collect(),
            device: DeviceId(sim_id(saved.device)),
            deck_section: SectionId(sim_id(saved.deck_section)),
            deck_length: saved.deck_length,
            approach_clearance: saved.approach_clearance,
            release_clearance: saved.release_clearance,
            deck_speed_limit: saved.deck_speed_limit,
            frame_rate: saved.frame_rate,
        }
    }
}

impl From<&PoolKind> for SavePoolEntry {
    fn from(pool: &PoolKind) -> Self {
        match pool {
            PoolKind::Plain(pool) => SavePoolEntry::Plain(pool.into()),
            PoolKind::Turntable(pool) => SavePoolEntry::Turntable(pool.into()),
        }
    }
}

impl From<&SavePoolEntry> for PoolKind {
    fn from(saved: &SavePoolEntry) -> Self {
        match saved {
            SavePoolEntry::Plain(pool) => PoolKind::Plain(pool.into()),
            SavePoolEntry::Turntable(pool) => PoolKind::Turntable(pool.into()),
        }
    }
}

impl From<&Turntable> for SaveTurntable {
    fn from(device: &Turntable) -> Self {
        Self {
            id: device.id.0 .0 as u64,
            name: device.name.clone(),
            center: [device.center.x, device.center.y, device.center.z],
            deck_section: device.deck_section.0 .0 as u64,
            deck_length: device.deck_length,
            exits: device
                .exits
                .iter()
                .map(|exit| (exit.section.0 .0 as u64, exit.angle))
                .collect(),
            angle: device.angle,
            rotation_speed: device.rotation_speed,
            speed_limit: device.speed_limit,
            frame_rate: device.frame_rate,
            target: device.target.as_ref().map(save_alignment),
            rotation: match device.rotation {
                Rotation::Idle => 0,
                Rotation::Clockwise => 1,
                Rotation::CounterClockwise => 2,
            },
            in_use: device.in_use,
            holder: device.holder.map(|id| id.0 .0 as u64),
            wait_queue: device.wait_queue.iter().map(|id| id.0 .0 as u64).collect(),
        }
    }
}

impl TryFrom<&SaveTurntable> for Turntable {
    type Error = anyhow::Error;

    fn try_from(saved: &SaveTurntable) -> Result<Self> {
        let [x, y, z] = saved.center;
        let mut device = Turntable::new(
            DeviceId(sim_id(saved.id)),
            saved.name.clone(),
            Position::new(x, y, z),
            SectionId(sim_id(saved.deck_section)),
            saved.deck_length,
        );
        device.exits = saved
            .exits
            .iter()
            .map(|(section, angle)| TurntableExit {
                section: SectionId(sim_id(*section)),
                angle: *angle,
            })
            .collect();
        device.angle = saved.angle;
        device.rotation_speed = saved.rotation_speed;
        device.speed_limit = saved.speed_limit;
        device.frame_rate = saved.frame_rate;
        device.target = saved.target.as_ref().map(load_alignment);
        if let Some(target) = device.target {
            if target.exit >= device.exits.len() {
                anyhow::bail!(
                    "Turntable {} targets exit {} but has {} exits",
                    saved.name,
                    target.exit,
                    device.exits.len()
                );
            }
        }
        device.rotation = match saved.rotation {
            0 => Rotation::Idle,
            1 => Rotation::Clockwise,
            2 => Rotation::CounterClockwise,
            other => anyhow::bail!("Unknown rotation state {other} for {}", saved.name),
        };
        device.in_use = saved.in_use;
        device.holder = saved.holder.map(|id| TrainId(sim_id(id)));
        device.wait_queue = train_ids(&saved.wait_queue).into_iter().collect();
        Ok(device)
    }
}

fn state_code(state: ControlState) -> u8 {
    match state {
        ControlState::Inactive => 0,
        ControlState::WaitingForDevice => 1,
        ControlState::WaitingApproach => 2,
        ControlState::Approaching => 3,
        ControlState::OnDevice => 4,
        ControlState::WaitingDeparture => 5,
        ControlState::Departing => 6,
        ControlState::Completed => 7,
    }
}

fn state_from_code(code: u8) -> Result<ControlState> {
    Ok(match code {
        0 => ControlState::Inactive,
        1 => ControlState::WaitingForDevice,
        2 => ControlState::WaitingApproach,
        3 => ControlState::Approaching,
        4 => ControlState::OnDevice,
        5 => ControlState::WaitingDeparture,
        6 => ControlState::Departing,
        7 => ControlState::Completed,
        other => anyhow::bail!("Unknown turntable control state {other}"),
    })
}

impl From<&TurntableControl> for SaveControl {
    fn from(control: &TurntableControl) -> Self {
        Self {
            train: control.train.0 .0 as u64,
            pool: control.pool.clone(),
            device: control.device.0 .0 as u64,
            state: state_code(control.state),
            action: match control.action {
                ControlAction::FromAccess => 0,
                ControlAction::FromStorage => 1,
            },
            access_path_index: control.access_path_index as u32,
            storage_track_index: control.storage_track_index as u32,
            reverse_formation: control.reverse_formation,
            target_exit: control.target_exit.as_ref().map(save_alignment),
            saved_speed_cap: control.saved_speed_cap,
            stop_offset: control.stop_offset,
            boarding: control
                .boarding
                .map(|flags| (flags.front_on_board, flags.rear_on_board)),
        }
    }
}

impl TryFrom<&SaveControl> for TurntableControl {
    type Error = anyhow::Error;

    fn try_from(saved: &SaveControl) -> Result<Self> {
        let action = match saved.action {
            0 => ControlAction::FromAccess,
            1 => ControlAction::FromStorage,
            other => anyhow::bail!("Unknown turntable control action {other}"),
        };
        let mut control = TurntableControl::new(
            TrainId(sim_id(saved.train)),
            saved.pool.clone(),
            DeviceId(sim_id(saved.device)),
            action,
            saved.access_path_index as usize,
            saved.storage_track_index as usize,
        );
        control.state = state_from_code(saved.state)?;
        control.reverse_formation = saved.reverse_formation;
        control.target_exit = saved.target_exit.as_ref().map(load_alignment);
        control.saved_speed_cap = saved.saved_speed_cap;
        control.stop_offset = saved.stop_offset;
        control.boarding = saved
            .boarding
            .map(|(front_on_board, rear_on_board)| BoardingFlags {
                front_on_board,
                rear_on_board,
            });
        Ok(control)
    }
}
