//! Turntable device
//!
//! A rotating deck shared by every train that uses a turntable pool. The
//! device keeps a FIFO wait queue; the train at the head acquires it and
//! holds it until its maneuver completes. Only the holder may start a
//! rotation.

use log::{debug, trace, warn};
use std::collections::VecDeque;

use super::types::{
    normalize_angle, signed_angle_delta, DeviceId, Position, SectionEnd, SectionId, TrainId,
    ALIGNMENT_TOLERANCE, DEFAULT_DECK_SPEED, DEFAULT_ROTATION_SPEED,
};

/// A track end the deck can line up with
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TurntableExit {
    pub section: SectionId,
    /// Heading from the deck centre towards the exit, in degrees
    pub angle: f32,
}

/// Which end of the deck faces which exit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeckAlignment {
    pub exit: usize,
    pub end: SectionEnd,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rotation {
    Idle,
    Clockwise,
    CounterClockwise,
}

/// A turntable in the simulation
#[derive(Debug, Clone)]
pub struct Turntable {
    pub id: DeviceId,
    pub name: String,
    pub center: Position,
    pub deck_section: SectionId,
    pub deck_length: f32,
    pub exits: Vec<TurntableExit>,
    /// Heading of the deck's End, in degrees
    pub angle: f32,
    /// Degrees per second
    pub rotation_speed: f32,
    /// Speed limit for trains on and near the deck
    pub speed_limit: f32,
    /// Quantise rotation to whole frames at this rate
    pub frame_rate: Option<f32>,
    frame_timer: f32,
    pub target: Option<DeckAlignment>,
    pub rotation: Rotation,
    pub in_use: bool,
    pub holder: Option<TrainId>,
    pub wait_queue: VecDeque<TrainId>,
}

impl Turntable {
    pub fn new(
        id: DeviceId,
        name: impl Into<String>,
        center: Position,
        deck_section: SectionId,
        deck_length: f32,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            center,
            deck_section,
            deck_length,
            exits: Vec::new(),
            angle: 0.0,
            rotation_speed: DEFAULT_ROTATION_SPEED,
            speed_limit: DEFAULT_DECK_SPEED,
            frame_rate: None,
            frame_timer: 0.0,
            target: None,
            rotation: Rotation::Idle,
            in_use: false,
            holder: None,
            wait_queue: VecDeque::new(),
        }
    }

    /// Register an exit, returning its index
    pub fn add_exit(&mut self, section: SectionId, angle: f32) -> usize {
        if let Some(index) = self.exit_index_of(section) {
            return index;
        }
        self.exits.push(TurntableExit {
            section,
            angle: normalize_angle(angle),
        });
        self.exits.len() - 1
    }

    pub fn exit_index_of(&self, section: SectionId) -> Option<usize> {
        self.exits.iter().position(|exit| exit.section == section)
    }

    /// Ask for the device. Unknown trains join the back of the queue; the
    /// device is granted only when free and the train is at the head.
    /// Returns true if the train now holds the device.
    pub fn request(&mut self, train: TrainId) -> bool {
        if self.holder == Some(train) {
            return true;
        }
        if !self.wait_queue.contains(&train) {
            self.wait_queue.push_back(train);
        }
        if self.in_use || self.wait_queue.front() != Some(&train) {
            return false;
        }
        self.wait_queue.pop_front();
        self.in_use = true;
        self.holder = Some(train);
        debug!("{} acquired turntable {}", train, self.name);
        true
    }

    pub fn is_held_by(&self, train: TrainId) -> bool {
        self.in_use && self.holder == Some(train)
    }

    pub fn release(&mut self, train: TrainId) {
        if self.holder == Some(train) {
            self.in_use = false;
            self.holder = None;
            self.target = None;
            self.rotation = Rotation::Idle;
            debug!("{} released turntable {}", train, self.name);
        }
    }

    /// Drop a train from the wait queue
    pub fn dequeue(&mut self, train: TrainId) -> bool {
        let before = self.wait_queue.len();
        self.wait_queue.retain(|id| *id != train);
        self.wait_queue.len() != before
    }

    /// Deck heading at which `alignment.end` faces its exit, if the exit exists
    pub fn alignment_angle(&self, alignment: DeckAlignment) -> Option<f32> {
        let exit_angle = self.exits.get(alignment.exit)?.angle;
        Some(match alignment.end {
            SectionEnd::End => exit_angle,
            SectionEnd::Start => normalize_angle(exit_angle + 180.0),
        })
    }

    /// Alignment with the exit needing the least rotation, either deck end
    pub fn nearest_alignment(&self, exit: usize) -> Option<DeckAlignment> {
        let [end, start] = [SectionEnd::End, SectionEnd::Start].map(|end| DeckAlignment { exit, end });
        let to_end = signed_angle_delta(self.angle, self.alignment_angle(end)?).abs();
        let to_start = signed_angle_delta(self.angle, self.alignment_angle(start)?).abs();
        Some(if to_end <= to_start { end } else { start })
    }

    pub fn is_aligned(&self, alignment: DeckAlignment) -> bool {
        self.alignment_angle(alignment)
            .is_some_and(|angle| signed_angle_delta(self.angle, angle).abs() <= ALIGNMENT_TOLERANCE)
    }

    /// Deck end currently facing the exit, if any
    pub fn end_facing(&self, exit: usize) -> Option<SectionEnd> {
        [SectionEnd::End, SectionEnd::Start]
            .into_iter()
            .find(|end| self.is_aligned(DeckAlignment { exit, end: *end }))
    }

    /// Begin rotating towards an alignment, taking the shorter way round.
    /// Only the current holder may rotate the deck.
    pub fn start_rotation(&mut self, train: TrainId, alignment: DeckAlignment) -> bool {
        if !self.is_held_by(train) {
            return false;
        }
        let Some(angle) = self.alignment_angle(alignment) else {
            return false;
        };
        if self.target == Some(alignment) {
            return true;
        }
        let delta = signed_angle_delta(self.angle, angle);
        self.target = Some(alignment);
        self.rotation = if delta.abs() <= ALIGNMENT_TOLERANCE {
            Rotation::Idle
        } else if delta > 0.0 {
            Rotation::CounterClockwise
        } else {
            Rotation::Clockwise
        };
        debug!(
            "Turntable {} rotating {:?} by {:.1} degrees for {}",
            self.name,
            self.rotation,
            delta.abs(),
            train
        );
        true
    }

    /// Advance the rotation by one tick
    pub fn update(&mut self, delta_secs: f32) {
        let Some(target) = self.target else {
            return;
        };
        if self.rotation == Rotation::Idle {
            return;
        }

        let elapsed = match self.frame_rate {
            Some(rate) if rate > 0.0 => {
                self.frame_timer += delta_secs;
                let frame = 1.0 / rate;
                let frames = (self.frame_timer / frame).floor();
                self.frame_timer -= frames * frame;
                frames * frame
            }
            _ => delta_secs,
        };
        if elapsed <= 0.0 {
            return;
        }

        let Some(target_angle) = self.alignment_angle(target) else {
            warn!(
                "Turntable {} has no exit {}; stopping rotation",
                self.name, target.exit
            );
            self.target = None;
            self.rotation = Rotation::Idle;
            return;
        };
        let remaining = signed_angle_delta(self.angle, target_angle);
        let step = self.rotation_speed * elapsed;
        if remaining.abs() <= step {
            self.angle = target_angle;
            self.rotation = Rotation::Idle;
            self.frame_timer = 0.0;
            debug!("Turntable {} aligned with exit {}", self.name, target.exit);
        } else {
            let signed_step = match self.rotation {
                Rotation::CounterClockwise => step,
                _ => -step,
            };
            self.angle = normalize_angle(self.angle + signed_step);
        }
        trace!("Turntable {} at {:.2} degrees", self.name, self.angle);
    }

    /// World positions of the deck's Start and End
    pub fn deck_ends(&self) -> (Position, Position) {
        let half = self.deck_length / 2.0;
        (
            self.center.offset_by(self.angle + 180.0, half),
            self.center.offset_by(self.angle, half),
        )
    }
}
