//! Ordered track paths
//!
//! A path is a sequence of directed section traversals. Storage, access and
//! train routes are all paths; every element carries its section length so a
//! path can be measured without consulting the network.

use super::types::{Direction, SectionId, TrackPosition, POSITION_EPSILON};

/// One directed traversal of a track section
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PathElement {
    pub section: SectionId,
    pub direction: Direction,
    pub length: f32,
}

impl PathElement {
    pub fn new(section: SectionId, direction: Direction, length: f32) -> Self {
        Self {
            section,
            direction,
            length,
        }
    }

    pub fn reversed(&self) -> Self {
        Self {
            direction: self.direction.reverse(),
            ..*self
        }
    }

    /// Same section traversed the same way
    pub fn matches(&self, other: &PathElement) -> bool {
        self.section == other.section && self.direction == other.direction
    }

    /// Same section traversed the opposite way
    pub fn opposes(&self, other: &PathElement) -> bool {
        self.section == other.section && self.direction != other.direction
    }

    /// Offset within the section after travelling `distance` along this element
    fn offset_at(&self, distance: f32) -> f32 {
        match self.direction {
            Direction::Forward => distance,
            Direction::Backward => self.length - distance,
        }
    }

    /// Distance travelled along this element to reach section `offset`
    fn distance_to(&self, offset: f32) -> f32 {
        match self.direction {
            Direction::Forward => offset,
            Direction::Backward => self.length - offset,
        }
    }
}

/// An ordered sequence of path elements
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TrackPath {
    elements: Vec<PathElement>,
}

impl TrackPath {
    pub fn new(elements: Vec<PathElement>) -> Self {
        Self { elements }
    }

    pub fn elements(&self) -> &[PathElement] {
        &self.elements
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn first(&self) -> Option<&PathElement> {
        self.elements.first()
    }

    pub fn last(&self) -> Option<&PathElement> {
        self.elements.last()
    }

    pub fn total_length(&self) -> f32 {
        self.elements.iter().map(|element| element.length).sum()
    }

    /// Distance from the path start to the start of element `index`
    pub fn element_start_distance(&self, index: usize) -> f32 {
        self.elements
            .iter()
            .take(index)
            .map(|element| element.length)
            .sum()
    }

    /// The same track traversed end to start
    pub fn reversed(&self) -> TrackPath {
        TrackPath {
            elements: self
                .elements
                .iter()
                .rev()
                .map(PathElement::reversed)
                .collect(),
        }
    }

    /// Traveller at the start of the path, facing along it
    pub fn start_traveller(&self) -> Option<TrackPosition> {
        let first = self.elements.first()?;
        Some(TrackPosition::new(
            first.section,
            first.offset_at(0.0),
            first.direction,
        ))
    }

    /// Traveller at the end of the path, facing back along it
    pub fn reverse_traveller(&self) -> Option<TrackPosition> {
        let last = self.elements.last()?;
        Some(TrackPosition::new(
            last.section,
            last.offset_at(last.length),
            last.direction.reverse(),
        ))
    }

    /// Track position reached after travelling `distance` from the path start.
    /// The distance is clamped to the path.
    pub fn locate(&self, distance: f32) -> Option<TrackPosition> {
        let total = self.total_length();
        let distance = distance.clamp(0.0, total);
        let mut travelled = 0.0;
        for (index, element) in self.elements.iter().enumerate() {
            let is_last = index + 1 == self.elements.len();
            if distance <= travelled + element.length || is_last {
                let along = (distance - travelled).clamp(0.0, element.length);
                return Some(TrackPosition::new(
                    element.section,
                    element.offset_at(along),
                    element.direction,
                ));
            }
            travelled += element.length;
        }
        None
    }

    /// Project a track position onto this path.
    /// Returns the distance from the path start and whether the position's
    /// direction matches the path's direction at that point.
    pub fn project(&self, position: &TrackPosition) -> Option<(f32, bool)> {
        let mut travelled = 0.0;
        for element in &self.elements {
            if element.section == position.section {
                let along = element.distance_to(position.offset);
                return Some((travelled + along, element.direction == position.direction));
            }
            travelled += element.length;
        }
        None
    }

    pub fn contains_section(&self, section: SectionId) -> bool {
        self.elements.iter().any(|element| element.section == section)
    }

    pub fn sections(&self) -> impl Iterator<Item = SectionId> + '_ {
        self.elements.iter().map(|element| element.section)
    }

    /// Section ids covered by the stretch `[from, to]` of this path
    pub fn sections_between(&self, from: f32, to: f32) -> Vec<SectionId> {
        let mut sections = Vec::new();
        let mut travelled = 0.0;
        for element in &self.elements {
            let start = travelled;
            let end = travelled + element.length;
            if end >= from - POSITION_EPSILON && start <= to + POSITION_EPSILON {
                sections.push(element.section);
            }
            travelled = end;
        }
        sections
    }

    /// Append another path, merging a shared junction element
    pub fn append(&mut self, other: &TrackPath) {
        let skip = match (self.elements.last(), other.elements.first()) {
            (Some(last), Some(first)) if last.matches(first) => 1,
            _ => 0,
        };
        self.elements.extend(other.elements.iter().skip(skip).copied());
    }

    /// A copy of this path with `other` appended
    pub fn joined(&self, other: &TrackPath) -> TrackPath {
        let mut joined = self.clone();
        joined.append(other);
        joined
    }

    /// Keep only the first `len` elements
    pub fn truncate(&mut self, len: usize) {
        self.elements.truncate(len);
    }

    /// A copy without the last element
    pub fn without_last(&self) -> TrackPath {
        let keep = self.elements.len().saturating_sub(1);
        TrackPath::new(self.elements[..keep].to_vec())
    }

    /// A copy with the first element's direction replaced
    pub fn with_first_direction(&self, direction: Direction) -> TrackPath {
        let mut elements = self.elements.clone();
        if let Some(first) = elements.first_mut() {
            first.direction = direction;
        }
        TrackPath::new(elements)
    }

    /// Has the same section appear more than once (a reversing path)
    pub fn has_repeated_section(&self) -> bool {
        self.elements.iter().enumerate().any(|(index, element)| {
            self.elements[index + 1..]
                .iter()
                .any(|later| later.section == element.section)
        })
    }
}
