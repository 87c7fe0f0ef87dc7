//! Waypoint graphs for race tracks and battle arenas. Race graphs are a
//! path with optional branches whose ordinal indices come from a traversal
//! from the start node; battle graphs are a mesh whose edges are pruned by
//! a terrain walk at load time.

use crate::config::{TrackConfig, WaypointConfig};
use crate::gameplay::kart::next_unit_random;
use bevy::prelude::*;
use bevy_rapier3d::prelude::*;

const PRUNE_STEP_CEILING: u32 = 1000;
const PRUNE_SURFACE_LIFT_M: f32 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TrackKind {
    #[default]
    Race,
    Battle,
}

impl TrackKind {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "battle" => Self::Battle,
            _ => Self::Race,
        }
    }
}

#[derive(Debug, Clone)]
pub struct WaypointNode {
    pub position: Vec3,
    pub radius: f32,
    pub next: Option<usize>,
    pub alternates: Vec<usize>,
    /// Race ordinal along the lap; -1 for nodes unreachable from the start.
    pub index: i32,
    /// Battle-mesh connections, filled by pruning.
    pub connections: Vec<usize>,
}

impl WaypointNode {
    fn from_config(config: &WaypointConfig) -> Self {
        Self {
            position: Vec3::from_array(config.position),
            radius: config.radius,
            next: config.next,
            alternates: config.alternates.clone(),
            index: -1,
            connections: Vec::new(),
        }
    }

    /// Nodes that count for lap progression when this one is current.
    pub fn valid_successors(&self) -> impl Iterator<Item = usize> + '_ {
        self.next.into_iter().chain(self.alternates.iter().copied())
    }
}

#[derive(Resource, Debug, Clone, Default)]
pub struct WaypointGraph {
    pub kind: TrackKind,
    pub nodes: Vec<WaypointNode>,
    pub max_index: i32,
}

impl WaypointGraph {
    pub fn from_track(track: &TrackConfig) -> Self {
        let mut graph = Self {
            kind: TrackKind::parse(&track.kind),
            nodes: track.waypoints.iter().map(WaypointNode::from_config).collect(),
            max_index: 0,
        };
        if graph.kind == TrackKind::Race && !graph.nodes.is_empty() {
            graph.assign_race_indices(0);
        }
        graph
    }

    /// Walks the graph from the start node, assigning strictly increasing
    /// indices. Each node is numbered once, on first visit, so reruns over
    /// the same graph always produce the same assignment.
    pub fn assign_race_indices(&mut self, start: usize) {
        for node in &mut self.nodes {
            node.index = -1;
        }
        self.enumerate_from(start, 0);
        self.max_index = self.nodes.iter().map(|node| node.index).max().unwrap_or(0);
    }

    fn enumerate_from(&mut self, point: usize, index: i32) {
        let Some(node) = self.nodes.get_mut(point) else {
            return;
        };
        if node.index >= 0 {
            return;
        }
        node.index = index;
        let next = node.next;
        let alternates = node.alternates.clone();
        if let Some(next) = next {
            self.enumerate_from(next, index + 1);
        }
        for alternate in alternates {
            self.enumerate_from(alternate, index + 1);
        }
    }

    /// Picks the successor to drive toward. With `n` alternates, the main
    /// path keeps probability `1/(n+1)` and each alternate shares the rest.
    pub fn successor(&self, point: usize, seed: &mut u64) -> Option<usize> {
        let node = self.nodes.get(point)?;
        if node.alternates.is_empty() {
            return node.next.or_else(|| self.mesh_successor(point, seed));
        }
        let roll = next_unit_random(seed);
        if roll > 1.0 / (node.alternates.len() as f32 + 1.0) {
            let pick = (next_unit_random(seed) * node.alternates.len() as f32) as usize;
            Some(node.alternates[pick.min(node.alternates.len() - 1)])
        } else {
            node.next
        }
    }

    fn mesh_successor(&self, point: usize, seed: &mut u64) -> Option<usize> {
        let connections = &self.nodes.get(point)?.connections;
        if connections.is_empty() {
            return None;
        }
        let pick = (next_unit_random(seed) * connections.len() as f32) as usize;
        Some(connections[pick.min(connections.len() - 1)])
    }

    /// Progress from `point` toward its next waypoint as the clamped
    /// projection of the kart position onto the connecting segment, 0 to 1.
    pub fn point_progress(&self, point: usize, position: Vec3) -> f32 {
        let Some(node) = self.nodes.get(point) else {
            return 0.0;
        };
        let Some(next) = node.next.and_then(|next| self.nodes.get(next)) else {
            return 0.0;
        };
        let line = next.position - node.position;
        let length = line.length();
        if length < f32::EPSILON {
            return 0.0;
        }
        ((position - node.position).dot(line / length)).clamp(0.0, length) / length
    }

    pub fn lap_progress(&self, point: usize, position: Vec3) -> f32 {
        let Some(node) = self.nodes.get(point) else {
            return 0.0;
        };
        ((node.index.max(0) as f32 + self.point_progress(point, position))
            / (self.max_index as f32 + 1.0))
            .clamp(0.0, 1.0)
    }

    pub fn is_within(&self, point: usize, position: Vec3) -> bool {
        self.nodes
            .get(point)
            .is_some_and(|node| (position - node.position).length_squared() <= node.radius * node.radius)
    }

    /// Connects every node pair whose connecting walk over the terrain
    /// succeeds. Iteration order is fixed, so the resulting mesh is
    /// deterministic for a given probe.
    pub fn prune_battle_connections(
        &mut self,
        probe: &impl TerrainProbe,
        step_distance: f32,
        max_steepness: f32,
    ) {
        let step_distance = step_distance.max(0.01);
        for from in 0..self.nodes.len() {
            let mut connections = Vec::new();
            for to in 0..self.nodes.len() {
                if to == from {
                    continue;
                }
                let start = self.nodes[from].position;
                let end = self.nodes[to].position;
                let radius = self.nodes[to].radius;
                if walk_edge(probe, start, end, radius, step_distance, max_steepness) {
                    connections.push(to);
                }
            }
            self.nodes[from].connections = connections;
        }
    }

    pub fn nearest_node(&self, position: Vec3) -> Option<usize> {
        self.nodes
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| {
                let da = (a.position - position).length_squared();
                let db = (b.position - position).length_squared();
                da.total_cmp(&db)
            })
            .map(|(index, _)| index)
    }
}

/// Terrain queries the pruning walk needs; implemented over the physics
/// world in game, and by fixtures in tests.
pub trait TerrainProbe {
    /// First hit point and normal along the ray, if any within `max_dist`.
    fn raycast(&self, origin: Vec3, direction: Vec3, max_dist: f32) -> Option<(Vec3, Vec3)>;
    /// True when anything solid sits between the two points.
    fn line_blocked(&self, from: Vec3, to: Vec3) -> bool;
}

pub struct RapierTerrainProbe<'a> {
    context: &'a RapierContext<'a>,
}

impl<'a> RapierTerrainProbe<'a> {
    pub fn new(context: &'a RapierContext<'a>) -> Self {
        Self { context }
    }

    fn filter() -> QueryFilter<'static> {
        QueryFilter::only_fixed().exclude_sensors()
    }
}

impl TerrainProbe for RapierTerrainProbe<'_> {
    fn raycast(&self, origin: Vec3, direction: Vec3, max_dist: f32) -> Option<(Vec3, Vec3)> {
        self.context
            .cast_ray_and_get_normal(origin, direction, max_dist, false, Self::filter())
            .map(|(_, hit)| (hit.point, hit.normal))
    }

    fn line_blocked(&self, from: Vec3, to: Vec3) -> bool {
        let delta = to - from;
        let length = delta.length();
        if length < f32::EPSILON {
            return false;
        }
        self.context
            .cast_ray(from, delta / length, length, false, Self::filter())
            .is_some()
    }
}

fn flat(v: Vec3) -> Vec3 {
    Vec3::new(v.x, 0.0, v.z)
}

/// Advances from `start` toward `end` in fixed steps, bending along slopes
/// it can climb and rejecting the edge on steep obstructions, missing
/// ground, or running out of steps. A final line-of-sight check guards the
/// closing segment.
fn walk_edge(
    probe: &impl TerrainProbe,
    start: Vec3,
    end: Vec3,
    end_radius: f32,
    step_distance: f32,
    max_steepness: f32,
) -> bool {
    let direction = flat(end - start).normalize_or_zero();
    if direction == Vec3::ZERO {
        return !probe.line_blocked(start, end);
    }

    let mut current = start;
    let mut loops = 0;
    while flat(current - end).length() > end_radius * 0.5 {
        if (current - end).length() < end_radius && !probe.line_blocked(current, end) {
            break;
        }

        if let Some((_, normal)) = probe.raycast(current, direction, step_distance) {
            if normal.dot(Vec3::Y) < 1.0 - max_steepness {
                return false;
            }
            let bent = project_flat(direction, normal);
            current += bent * step_distance + normal * PRUNE_SURFACE_LIFT_M;
        } else if let Some((point, normal)) = probe.raycast(current, Vec3::NEG_Y, f32::MAX) {
            let bent = project_flat(direction, normal);
            if let Some((hit_point, hit_normal)) =
                probe.raycast(point + normal * PRUNE_SURFACE_LIFT_M, bent, step_distance)
            {
                current = hit_point + hit_normal * PRUNE_SURFACE_LIFT_M;
            } else {
                current = point + bent * step_distance + normal * PRUNE_SURFACE_LIFT_M;
            }
        } else {
            return false;
        }

        loops += 1;
        if loops > PRUNE_STEP_CEILING {
            return false;
        }
    }

    !probe.line_blocked(current, end)
}

fn project_flat(direction: Vec3, normal: Vec3) -> Vec3 {
    (direction - normal * direction.dot(normal)).normalize_or(direction)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TrackConfig;

    fn waypoint(position: [f32; 3], next: Option<usize>, alternates: Vec<usize>) -> WaypointConfig {
        WaypointConfig {
            position,
            radius: 2.0,
            next,
            alternates,
        }
    }

    fn branching_track() -> TrackConfig {
        // 0 -> 1 -> 2 -> 3 -> 0, with 1 also branching to 4 -> 3.
        TrackConfig {
            id: "loop".to_string(),
            kind: "race".to_string(),
            out_of_bounds_y: -50.0,
            waypoints: vec![
                waypoint([0.0, 0.0, 0.0], Some(1), vec![]),
                waypoint([10.0, 0.0, 0.0], Some(2), vec![4]),
                waypoint([20.0, 0.0, 0.0], Some(3), vec![]),
                waypoint([30.0, 0.0, 0.0], Some(0), vec![]),
                waypoint([10.0, 0.0, 10.0], Some(3), vec![]),
            ],
            boost_pads: vec![],
            hazards: vec![],
            item_givers: vec![],
        }
    }

    #[test]
    fn race_indices_increase_along_the_path_without_reuse() {
        let graph = WaypointGraph::from_track(&branching_track());

        let indices: Vec<i32> = graph.nodes.iter().map(|node| node.index).collect();
        assert_eq!(indices, vec![0, 1, 2, 3, 2]);
        assert_eq!(graph.max_index, 3);

        // Every reachable node is numbered exactly once per traversal.
        let rerun = WaypointGraph::from_track(&branching_track());
        assert_eq!(
            indices,
            rerun.nodes.iter().map(|node| node.index).collect::<Vec<_>>()
        );
    }

    #[test]
    fn successor_is_the_main_path_when_there_are_no_alternates() {
        let graph = WaypointGraph::from_track(&branching_track());
        let mut seed = 7;

        assert_eq!(graph.successor(0, &mut seed), Some(1));
        assert_eq!(graph.successor(2, &mut seed), Some(3));
    }

    #[test]
    fn successor_choices_at_a_branch_are_seed_deterministic() {
        let graph = WaypointGraph::from_track(&branching_track());

        let mut first = Vec::new();
        let mut seed = 42;
        for _ in 0..16 {
            first.push(graph.successor(1, &mut seed));
        }
        let mut seed = 42;
        let second: Vec<_> = (0..16).map(|_| graph.successor(1, &mut seed)).collect();

        assert_eq!(first, second);
        assert!(first.iter().any(|pick| *pick == Some(2)) || first.iter().any(|pick| *pick == Some(4)));
        assert!(first.iter().all(|pick| *pick == Some(2) || *pick == Some(4)));
    }

    #[test]
    fn point_progress_is_the_clamped_segment_projection() {
        let graph = WaypointGraph::from_track(&branching_track());

        assert_eq!(graph.point_progress(0, Vec3::new(5.0, 0.0, 3.0)), 0.5);
        assert_eq!(graph.point_progress(0, Vec3::new(-5.0, 0.0, 0.0)), 0.0);
        assert_eq!(graph.point_progress(0, Vec3::new(50.0, 0.0, 0.0)), 1.0);
    }

    #[test]
    fn lap_progress_combines_index_and_segment_progress() {
        let graph = WaypointGraph::from_track(&branching_track());

        // Node 2 has index 2 of max 3; halfway to node 3.
        let progress = graph.lap_progress(2, Vec3::new(25.0, 0.0, 0.0));
        assert!((progress - 2.5 / 4.0).abs() < 1e-6);
    }

    /// Flat ground at y = 0 with an optional axis-aligned vertical wall at
    /// a given x, spanning all z.
    struct FlatWorld {
        wall_x: Option<f32>,
    }

    impl TerrainProbe for FlatWorld {
        fn raycast(&self, origin: Vec3, direction: Vec3, max_dist: f32) -> Option<(Vec3, Vec3)> {
            if let Some(wall_x) = self.wall_x {
                if direction.x.abs() > 1e-6 {
                    let t = (wall_x - origin.x) / direction.x;
                    if t >= 0.0 && t <= max_dist {
                        let point = origin + direction * t;
                        if point.y <= 5.0 {
                            return Some((point, Vec3::new(-direction.x.signum(), 0.0, 0.0)));
                        }
                    }
                }
            }
            if direction.y < -1e-6 && origin.y > 0.0 {
                let t = origin.y / -direction.y;
                if t <= max_dist {
                    return Some((origin + direction * t, Vec3::Y));
                }
            }
            None
        }

        fn line_blocked(&self, from: Vec3, to: Vec3) -> bool {
            let delta = to - from;
            let length = delta.length();
            if length < f32::EPSILON {
                return false;
            }
            self.raycast(from, delta / length, length).is_some()
        }
    }

    fn battle_track() -> TrackConfig {
        TrackConfig {
            id: "arena".to_string(),
            kind: "battle".to_string(),
            out_of_bounds_y: -50.0,
            waypoints: vec![
                waypoint([0.0, 1.0, 0.0], None, vec![]),
                waypoint([20.0, 1.0, 0.0], None, vec![]),
                waypoint([0.0, 1.0, 20.0], None, vec![]),
            ],
            boost_pads: vec![],
            hazards: vec![],
            item_givers: vec![],
        }
    }

    #[test]
    fn open_arena_connects_every_node_pair() {
        let mut graph = WaypointGraph::from_track(&battle_track());
        graph.prune_battle_connections(&FlatWorld { wall_x: None }, 1.0, 0.5);

        assert_eq!(graph.nodes[0].connections, vec![1, 2]);
        assert_eq!(graph.nodes[1].connections, vec![0, 2]);
        assert_eq!(graph.nodes[2].connections, vec![0, 1]);
    }

    #[test]
    fn a_wall_prunes_edges_that_cross_it() {
        let mut graph = WaypointGraph::from_track(&battle_track());
        graph.prune_battle_connections(&FlatWorld { wall_x: Some(10.0) }, 1.0, 0.5);

        // Node 1 sits across the wall from 0 and 2.
        assert_eq!(graph.nodes[0].connections, vec![2]);
        assert!(graph.nodes[1].connections.is_empty());
        assert_eq!(graph.nodes[2].connections, vec![0]);
    }

    #[test]
    fn pruning_twice_yields_the_same_mesh() {
        let world = FlatWorld { wall_x: Some(10.0) };
        let mut first = WaypointGraph::from_track(&battle_track());
        first.prune_battle_connections(&world, 1.0, 0.5);
        let mut second = WaypointGraph::from_track(&battle_track());
        second.prune_battle_connections(&world, 1.0, 0.5);

        for (a, b) in first.nodes.iter().zip(second.nodes.iter()) {
            assert_eq!(a.connections, b.connections);
        }
    }

    #[test]
    fn nearest_node_breaks_ties_toward_the_lowest_index() {
        let graph = WaypointGraph::from_track(&battle_track());

        assert_eq!(graph.nearest_node(Vec3::new(15.0, 1.0, 12.0)), Some(1));
        // Equidistant between nodes 0 and 1; the lower index wins.
        assert_eq!(graph.nearest_node(Vec3::new(10.0, 1.0, 0.0)), Some(0));
    }
}
