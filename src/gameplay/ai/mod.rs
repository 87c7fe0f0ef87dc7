//! Waypoint-following driver for AI karts. Produces the same normalized
//! input signals a player would, so the kart body never knows who is
//! driving.

use crate::config::GameConfig;
use crate::gameplay::kart::{
    next_unit_random, AiKart, Kart, KartInputState, KartRotator, RotatorLink,
};
use crate::gameplay::waypoints::{RapierTerrainProbe, TerrainProbe, TrackKind, WaypointGraph};
use crate::states::GameState;
use bevy::prelude::*;
use bevy_rapier3d::prelude::*;

pub struct AiDriverPlugin;

impl Plugin for AiDriverPlugin {
    fn build(&self, app: &mut App) {
        app.init_resource::<FollowerTuning>().add_systems(
            Update,
            drive_ai_followers
                .in_set(super::SimSet::AiInput)
                .run_if(in_state(GameState::InMode))
                .run_if(resource_exists::<GameConfig>)
                .run_if(resource_exists::<WaypointGraph>),
        );
    }
}

#[derive(Resource, Debug, Clone)]
pub struct FollowerTuning {
    pub steer_amount: f32,
    pub max_brake: f32,
    pub min_accel: f32,
    pub reverse_speed_limit: f32,
    pub reverse_time_threshold: f32,
    pub reverse_duration: f32,
    pub drift_start_threshold: f32,
    pub drift_end_threshold: f32,
    pub drift_speed_multiplier: f32,
    pub drift_speed_multiplier_cap: f32,
    /// Pulls the aim point toward the next waypoint as the kart closes in,
    /// cutting a racing line across the segment boundary.
    pub distance_advance_factor: f32,
    pub search_radius_start: f32,
    pub search_radius_step: f32,
    pub search_ring_limit: u32,
}

impl Default for FollowerTuning {
    fn default() -> Self {
        Self {
            steer_amount: 10.0,
            max_brake: 0.2,
            min_accel: 0.5,
            reverse_speed_limit: 5.0,
            reverse_time_threshold: 3.0,
            reverse_duration: 1.0,
            drift_start_threshold: 1.0,
            drift_end_threshold: 0.2,
            drift_speed_multiplier: 0.02,
            drift_speed_multiplier_cap: 2.0,
            distance_advance_factor: 0.05,
            search_radius_start: 50.0,
            search_radius_step: 20.0,
            search_ring_limit: 100,
        }
    }
}

#[derive(Component, Debug, Clone)]
pub struct WaypointFollower {
    pub target: Option<usize>,
    pub next: Option<usize>,
    pub drifting: bool,
    pub reversing: bool,
    pub reverse_time: f32,
    pub reverse_steer: f32,
    pub rng_seed: u64,
}

impl WaypointFollower {
    pub fn new(target: Option<usize>, next: Option<usize>, rng_seed: u64) -> Self {
        Self {
            target,
            next,
            drifting: false,
            reversing: false,
            reverse_time: 0.0,
            reverse_steer: 1.0,
            rng_seed,
        }
    }

    /// Stuck detection: creeping below the speed limit for long enough
    /// starts a timed reverse maneuver steering away from the target side.
    /// Returns true while the maneuver runs.
    pub fn tick_reverse(
        &mut self,
        speed: f32,
        right_dot: f32,
        dt: f32,
        tuning: &FollowerTuning,
    ) -> bool {
        if self.reversing {
            self.reverse_time += dt;
            if self.reverse_time > tuning.reverse_duration {
                self.reversing = false;
                self.reverse_time = 0.0;
            }
        } else if speed < tuning.reverse_speed_limit {
            self.reverse_time += dt;
            if self.reverse_time > tuning.reverse_time_threshold {
                self.reversing = true;
                self.reverse_time = 0.0;
                self.reverse_steer = -right_dot.signum();
            }
        } else {
            self.reverse_time = 0.0;
        }
        self.reversing
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FollowerDecision {
    pub accel: f32,
    pub brake: f32,
    pub steer: f32,
    pub drift: bool,
}

/// Drive inputs from the aim-direction dot products. `next_turn_side` is
/// the upcoming segment direction measured along the steering axis and
/// feeds the drift charge.
pub fn follow_decision(
    forward_dot: f32,
    right_dot: f32,
    next_turn_side: f32,
    speed: f32,
    was_drifting: bool,
    tuning: &FollowerTuning,
) -> FollowerDecision {
    let accel = forward_dot.clamp(tuning.min_accel, 1.0);
    let brake = (-forward_dot * speed).clamp(0.0, tuning.max_brake);
    let steer = if forward_dot > 0.0 {
        right_dot * tuning.steer_amount
    } else {
        right_dot.signum()
    };

    let drift_charge = (right_dot + next_turn_side).abs()
        * (speed * tuning.drift_speed_multiplier).min(tuning.drift_speed_multiplier_cap);
    let drift = if !was_drifting {
        drift_charge > tuning.drift_start_threshold
    } else {
        drift_charge >= tuning.drift_end_threshold
    };

    FollowerDecision {
        accel,
        brake,
        steer,
        drift,
    }
}

#[allow(clippy::type_complexity)]
fn drive_ai_followers(
    time: Res<Time>,
    tuning: Res<FollowerTuning>,
    graph: Res<WaypointGraph>,
    rapier_context: ReadRapierContext,
    mut follower_query: Query<
        (
            &Kart,
            &Transform,
            &RotatorLink,
            &Velocity,
            &mut KartInputState,
            &mut WaypointFollower,
        ),
        With<AiKart>,
    >,
    rotator_query: Query<&Transform, (With<KartRotator>, Without<Kart>)>,
) {
    let Ok(rapier_context) = rapier_context.single() else {
        return;
    };
    let probe = RapierTerrainProbe::new(&rapier_context);
    let dt = time.delta_secs().max(0.000_1);

    for (kart, transform, rotator_link, velocity, mut input, mut follower) in &mut follower_query {
        if !kart.active {
            continue;
        }
        let Ok(rotator_transform) = rotator_query.get(rotator_link.rotator) else {
            continue;
        };
        let position = transform.translation;
        let rotation = rotator_transform.rotation;
        let forward = rotation * Vec3::Z;
        // Positive steer swings the nose toward local -X in the body step;
        // the target side is measured along that same axis.
        let right = rotation * Vec3::NEG_X;
        let speed = velocity.linvel.length();

        // Regain a target after a respawn or a lost graph reference.
        if follower
            .target
            .is_none_or(|target| target >= graph.nodes.len())
        {
            let found = search_reachable_node(&graph, &probe, position, &tuning);
            follower.target = found;
            follower.next = found.and_then(|node| graph.successor(node, &mut follower.rng_seed));
        }
        let Some(target) = follower.target else {
            continue;
        };

        // Advance on touch.
        if graph.is_within(target, position) {
            follower.target = graph.successor(target, &mut follower.rng_seed);
            follower.next = follower
                .target
                .and_then(|next| graph.successor(next, &mut follower.rng_seed));
        }
        let Some(target) = follower.target else {
            continue;
        };

        let target_position = graph.nodes[target].position;
        let next_position = follower
            .next
            .and_then(|next| graph.nodes.get(next))
            .map(|node| node.position);

        let aim = match next_position {
            Some(next_position) => target_position.lerp(
                next_position,
                1.0 - ((position - target_position).length() * tuning.distance_advance_factor)
                    .clamp(0.0, 1.0),
            ),
            None => target_position,
        };
        let aim_dir = (aim - position).normalize_or_zero();
        let forward_dot = aim_dir.dot(forward);
        let right_dot = aim_dir.dot(right);

        let was_reversing = follower.reversing;
        if follower.tick_reverse(speed, right_dot, dt, &tuning) {
            input.set_accel(0.0);
            input.set_brake(1.0);
            input.set_steer(follower.reverse_steer);
            input.set_drift(false);
            continue;
        }
        // Coming out of a reverse in an arena, re-anchor to the mesh.
        if was_reversing && graph.kind == TrackKind::Battle {
            if let Some(found) = search_reachable_node(&graph, &probe, position, &tuning) {
                follower.target = graph.successor(found, &mut follower.rng_seed);
                follower.next = follower
                    .target
                    .and_then(|next| graph.successor(next, &mut follower.rng_seed));
            }
        }

        let next_turn_side = match next_position {
            Some(next_position) => {
                right.dot((next_position - target_position).normalize_or_zero())
            }
            None => 0.0,
        };
        let decision = follow_decision(
            forward_dot,
            right_dot,
            next_turn_side,
            speed,
            follower.drifting,
            &tuning,
        );
        follower.drifting = decision.drift;

        input.set_accel(decision.accel);
        input.set_brake(decision.brake);
        input.set_steer(decision.steer);
        input.set_drift(decision.drift);
        input.set_boost(false);
    }
}

/// Expanding-ring search for the nearest waypoint with line of sight.
/// Gives up silently after the ring limit; the follower just keeps its
/// current (possibly stale) target.
fn search_reachable_node(
    graph: &WaypointGraph,
    probe: &impl TerrainProbe,
    position: Vec3,
    tuning: &FollowerTuning,
) -> Option<usize> {
    let mut radius = tuning.search_radius_start;
    for _ in 0..tuning.search_ring_limit {
        let mut best: Option<(usize, f32)> = None;
        for (index, node) in graph.nodes.iter().enumerate() {
            let distance = (node.position - position).length();
            if distance > radius {
                continue;
            }
            if probe.line_blocked(position, node.position) {
                continue;
            }
            if best.is_none_or(|(_, best_distance)| distance < best_distance) {
                best = Some((index, distance));
            }
        }
        if let Some((index, _)) = best {
            return Some(index);
        }
        radius += tuning.search_radius_step;
    }
    None
}

/// Seeds followers for freshly spawned AI karts from their grid position.
pub fn attach_follower(position: Vec3, graph: &WaypointGraph, rng_seed: u64) -> WaypointFollower {
    let mut follower = WaypointFollower::new(None, None, rng_seed);
    if let Some(nearest) = graph.nearest_node(position) {
        let mut seed = follower.rng_seed;
        follower.target = graph.successor(nearest, &mut seed).or(Some(nearest));
        follower.next = follower
            .target
            .and_then(|target| graph.successor(target, &mut seed));
        follower.rng_seed = seed;
    }
    let _ = next_unit_random(&mut follower.rng_seed);
    follower
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn steering_decision_turns_the_kart_toward_the_target() {
        let tuning = FollowerTuning::default();
        let rotation = Quat::IDENTITY;
        let forward = rotation * Vec3::Z;
        let right = rotation * Vec3::NEG_X;

        for aim_dir in [
            Vec3::new(-1.0, 0.0, 1.0).normalize(),
            Vec3::new(1.0, 0.0, 1.0).normalize(),
        ] {
            let decision = follow_decision(
                aim_dir.dot(forward),
                aim_dir.dot(right),
                0.0,
                10.0,
                false,
                &tuning,
            );
            let steer = decision.steer.clamp(-1.0, 1.0);
            // Same yaw application as the body step.
            let turned = rotation * Quat::from_rotation_y(-(steer * 5.0).to_radians());
            let new_forward = turned * Vec3::Z;
            assert!(
                new_forward.angle_between(aim_dir) < forward.angle_between(aim_dir),
                "steer {steer} opened the angle to {aim_dir}"
            );
        }
    }

    #[test]
    fn steers_toward_the_target_side() {
        let tuning = FollowerTuning::default();
        let decision = follow_decision(0.9, 0.3, 0.0, 20.0, false, &tuning);

        assert!(decision.steer > 0.0);
        assert_eq!(decision.accel, 0.9);
        assert_eq!(decision.brake, 0.0);
    }

    #[test]
    fn facing_away_falls_back_to_full_steer_and_braking() {
        let tuning = FollowerTuning::default();
        let decision = follow_decision(-0.8, -0.1, 0.0, 10.0, false, &tuning);

        assert_eq!(decision.steer, -1.0);
        // Throttle never drops below the floor so the kart keeps moving.
        assert_eq!(decision.accel, tuning.min_accel);
        assert_eq!(decision.brake, tuning.max_brake);
    }

    #[test]
    fn drift_engages_and_releases_with_hysteresis() {
        let tuning = FollowerTuning::default();

        // Sharp upcoming corner at speed charges past the start threshold.
        let engage = follow_decision(0.7, 0.8, 0.7, 40.0, false, &tuning);
        assert!(engage.drift);

        // The same geometry at lower charge keeps an ongoing drift alive.
        let hold = follow_decision(0.9, 0.4, 0.3, 30.0, true, &tuning);
        assert!(hold.drift);

        // Only dropping below the end threshold releases it.
        let release = follow_decision(1.0, 0.01, 0.0, 5.0, true, &tuning);
        assert!(!release.drift);

        // A fresh drift does not start from the hold-level charge.
        let no_start = follow_decision(0.9, 0.4, 0.3, 30.0, false, &tuning);
        assert!(!no_start.drift);
    }

    #[test]
    fn reverse_maneuver_triggers_after_stuck_timeout_and_times_out() {
        let tuning = FollowerTuning::default();
        let mut follower = WaypointFollower::new(Some(0), Some(1), 1);

        // Stuck below the speed limit, steering target off to the right.
        for _ in 0..30 {
            follower.tick_reverse(1.0, 0.5, 0.11, &tuning);
        }
        assert!(follower.reversing);
        assert_eq!(follower.reverse_steer, -1.0);

        // The maneuver runs for its duration, then clears.
        for _ in 0..11 {
            follower.tick_reverse(1.0, 0.5, 0.1, &tuning);
        }
        assert!(!follower.reversing);
    }

    #[test]
    fn fast_movement_resets_the_stuck_timer() {
        let tuning = FollowerTuning::default();
        let mut follower = WaypointFollower::new(Some(0), Some(1), 1);

        for _ in 0..20 {
            follower.tick_reverse(1.0, 0.5, 0.1, &tuning);
            follower.tick_reverse(10.0, 0.5, 0.1, &tuning);
        }
        assert!(!follower.reversing);
    }
}
