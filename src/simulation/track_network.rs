//! Track network graph for path validation and routing
//!
//! Every section contributes two nodes to the graph, one per direction of
//! travel. An edge joins two traversals when a train leaving the first
//! section can continue straight onto the second.

use anyhow::{Context, Result};
use ordered_float::OrderedFloat;
use petgraph::algo::astar;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::BTreeMap;
use std::collections::HashMap;

use super::path::{PathElement, TrackPath};
use super::types::{Direction, Position, SectionEnd, SectionId, TrackPosition, TrainId};

/// A straight track section
#[derive(Debug, Clone)]
pub struct TrackSection {
    pub id: SectionId,
    pub start: Position,
    pub end: Position,
    pub length: f32,
}

impl TrackSection {
    pub fn new(id: SectionId, start: Position, end: Position) -> Self {
        let length = start.distance(&end);
        Self {
            id,
            start,
            end,
            length,
        }
    }

    pub fn element(&self, direction: Direction) -> PathElement {
        PathElement::new(self.id, direction, self.length)
    }

    pub fn end_position(&self, end: SectionEnd) -> Position {
        match end {
            SectionEnd::Start => self.start,
            SectionEnd::End => self.end,
        }
    }

    /// World position at `offset` from the section start
    pub fn point_at(&self, offset: f32) -> Position {
        if self.length <= 0.0 {
            return self.start;
        }
        self.start
            .lerp(&self.end, (offset / self.length).clamp(0.0, 1.0))
    }
}

/// Edge data for the track graph
#[derive(Debug, Clone, Copy)]
pub struct TrackEdge {
    pub weight: u32, // Target section length scaled for integer weights
}

impl TrackEdge {
    pub fn into_section(section: &TrackSection) -> Self {
        // Convert section length to integer weight (scaled by 100 to preserve precision)
        let weight = (section.length * 100.0) as u32;
        Self {
            weight: weight.max(1),
        }
    }
}

/// Track network graph with a per-section train occupancy index
#[derive(Default)]
pub struct TrackNetwork {
    /// Directed traversal graph
    graph: DiGraph<(SectionId, Direction), TrackEdge>,

    /// Maps traversals to their node indices in the graph
    traversal_to_node: HashMap<(SectionId, Direction), NodeIndex>,

    /// Storage for section data
    sections: HashMap<SectionId, TrackSection>,

    /// Maps sections to (front offset, train) pairs for occupancy detection
    trains_on_sections: HashMap<SectionId, BTreeMap<OrderedFloat<f32>, TrainId>>,
}

impl TrackNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a section and both of its traversals to the graph
    pub fn add_section(&mut self, section: TrackSection) {
        if self.sections.contains_key(&section.id) {
            return;
        }
        for direction in [Direction::Forward, Direction::Backward] {
            let node = self.graph.add_node((section.id, direction));
            self.traversal_to_node.insert((section.id, direction), node);
        }
        self.sections.insert(section.id, section);
    }

    pub fn section(&self, id: SectionId) -> Option<&TrackSection> {
        self.sections.get(&id)
    }

    /// Path element for a section traversal
    pub fn element(&self, section: SectionId, direction: Direction) -> Option<PathElement> {
        self.sections
            .get(&section)
            .map(|section| section.element(direction))
    }

    /// Joins end `a_end` of section `a` to end `b_end` of section `b`
    pub fn connect(
        &mut self,
        a: SectionId,
        a_end: SectionEnd,
        b: SectionId,
        b_end: SectionEnd,
    ) -> Result<()> {
        let a_section = self
            .sections
            .get(&a)
            .with_context(|| format!("{a} not found"))?;
        let b_section = self
            .sections
            .get(&b)
            .with_context(|| format!("{b} not found"))?;
        let into_b = TrackEdge::into_section(b_section);
        let into_a = TrackEdge::into_section(a_section);

        let leave_a = (a, a_end.leaving_direction());
        let enter_b = (b, b_end.entering_direction());
        let leave_b = (b, b_end.leaving_direction());
        let enter_a = (a, a_end.entering_direction());

        self.add_edge(leave_a, enter_b, into_b);
        self.add_edge(leave_b, enter_a, into_a);
        Ok(())
    }

    fn add_edge(
        &mut self,
        from: (SectionId, Direction),
        to: (SectionId, Direction),
        edge: TrackEdge,
    ) {
        let from_node = self.traversal_to_node[&from];
        let to_node = self.traversal_to_node[&to];
        if self.graph.find_edge(from_node, to_node).is_none() {
            self.graph.add_edge(from_node, to_node, edge);
        }
    }

    /// Whether a train traversing `from` can continue onto `to`
    pub fn is_connected(&self, from: &PathElement, to: &PathElement) -> bool {
        let (Some(from_node), Some(to_node)) = (
            self.traversal_to_node.get(&(from.section, from.direction)),
            self.traversal_to_node.get(&(to.section, to.direction)),
        ) else {
            return false;
        };
        self.graph.find_edge(*from_node, *to_node).is_some()
    }

    /// Builds a path from (section, direction) pairs, checking that each
    /// section exists and that consecutive traversals are connected
    pub fn path_from(&self, traversals: &[(SectionId, Direction)]) -> Result<TrackPath> {
        if traversals.is_empty() {
            anyhow::bail!("Path has no sections");
        }
        let elements = traversals
            .iter()
            .map(|(section, direction)| {
                self.element(*section, *direction)
                    .with_context(|| format!("{section} not found"))
            })
            .collect::<Result<Vec<_>>>()?;
        let path = TrackPath::new(elements);
        self.validate_path(&path)?;
        Ok(path)
    }

    /// Checks that every consecutive pair of elements is connected
    pub fn validate_path(&self, path: &TrackPath) -> Result<()> {
        for pair in path.elements().windows(2) {
            if !self.is_connected(&pair[0], &pair[1]) {
                anyhow::bail!(
                    "{} ({:?}) does not connect to {} ({:?})",
                    pair[0].section,
                    pair[0].direction,
                    pair[1].section,
                    pair[1].direction
                );
            }
        }
        Ok(())
    }

    /// Finds the shortest route between two traversals using A* (Dijkstra with null heuristic)
    pub fn find_route(
        &self,
        from: (SectionId, Direction),
        to: (SectionId, Direction),
    ) -> Option<TrackPath> {
        let start_node = *self.traversal_to_node.get(&from)?;
        let end_node = *self.traversal_to_node.get(&to)?;

        let (_, node_path) = astar(
            &self.graph,
            start_node,
            |node| node == end_node,
            |edge| edge.weight().weight,
            |_| 0, // Null heuristic = Dijkstra
        )?;

        let elements = node_path
            .iter()
            .filter_map(|node| {
                let (section, direction) = self.graph[*node];
                self.element(section, direction)
            })
            .collect();
        Some(TrackPath::new(elements))
    }

    /// Moves a section's end points (used while a deck rotates)
    pub fn set_section_geometry(&mut self, id: SectionId, start: Position, end: Position) {
        if let Some(section) = self.sections.get_mut(&id) {
            section.start = start;
            section.end = end;
        }
    }

    /// World position of a track position
    pub fn world_position(&self, position: &TrackPosition) -> Option<Position> {
        self.sections
            .get(&position.section)
            .map(|section| section.point_at(position.offset))
    }

    /// Replace a train's entries in the occupancy index
    pub fn update_train_occupancy(&mut self, train: TrainId, occupied: &[(SectionId, f32)]) {
        self.remove_train_from_tracking(train);
        for (section, offset) in occupied {
            self.trains_on_sections
                .entry(*section)
                .or_default()
                .insert(OrderedFloat(*offset), train);
        }
    }

    /// Remove a train from occupancy tracking
    pub fn remove_train_from_tracking(&mut self, train: TrainId) {
        for train_map in self.trains_on_sections.values_mut() {
            train_map.retain(|_, id| *id != train);
        }
    }

    /// Trains occupying a section, ordered by offset
    pub fn trains_on_section(&self, section: SectionId) -> Vec<TrainId> {
        self.trains_on_sections
            .get(&section)
            .map(|train_map| train_map.values().copied().collect())
            .unwrap_or_default()
    }
}
