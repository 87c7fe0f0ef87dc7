//! Race bookkeeping: waypoint progress, lap counting, finish ordering, and
//! out-of-bounds respawns.

use crate::config::GameConfig;
use crate::gameplay::kart::{DriftState, Kart, KartBoost, KartInputState, KartMotion,
    RotatorLink, SpinOutState};
use crate::gameplay::waypoints::{TrackKind, WaypointGraph};
use crate::states::GameState;
use bevy::prelude::*;
use bevy_rapier3d::prelude::Velocity;
use std::cmp::Ordering;

use super::{LapCompletedEvent, ModeDirector, ModeEndedEvent, ModePhase};

/// Per-kart race state. Laps are 1-based; `lap > max_laps` means the kart
/// has crossed the finish line for good.
#[derive(Component, Debug, Clone)]
pub struct RaceAgent {
    pub current_point: usize,
    pub lap: u32,
    /// Progress through the current lap, 0..1 along the waypoint chain.
    pub lap_progress: f32,
    /// Highest progress seen this lap; guards against start-line shortcuts.
    pub best_progress: f32,
    pub finished: bool,
    pub finish_order: Option<u32>,
}

impl Default for RaceAgent {
    fn default() -> Self {
        Self {
            current_point: 0,
            lap: 1,
            lap_progress: 0.0,
            best_progress: 0.0,
            finished: false,
            finish_order: None,
        }
    }
}

/// Snapshot used for ranking, detached from ECS so ordering stays testable.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RaceRankEntry {
    pub finished: bool,
    pub finish_order: u32,
    pub lap: u32,
    pub lap_progress: f32,
}

/// Finished karts rank by finish order, everyone else by lap then progress.
pub fn compare_race_entries(a: &RaceRankEntry, b: &RaceRankEntry) -> Ordering {
    match (a.finished, b.finished) {
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        (true, true) => a.finish_order.cmp(&b.finish_order),
        (false, false) => b
            .lap
            .cmp(&a.lap)
            .then(b.lap_progress.total_cmp(&a.lap_progress)),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaypointTouch {
    Advanced,
    LapCompleted(u32),
    Finished(u32),
}

/// Applies one waypoint touch to an agent. Node 0 carries the start/finish
/// line; crossing it only counts as a lap when enough of the previous lap
/// was actually covered.
pub fn register_waypoint_touch(
    agent: &mut RaceAgent,
    reached: usize,
    max_laps: u32,
    min_lap_completion: f32,
) -> WaypointTouch {
    if reached == 0 {
        let completed = agent.best_progress >= min_lap_completion;
        agent.best_progress = 0.0;
        agent.current_point = reached;
        if !completed {
            return WaypointTouch::Advanced;
        }
        agent.lap += 1;
        if agent.lap > max_laps {
            agent.finished = true;
            return WaypointTouch::Finished(agent.lap - 1);
        }
        return WaypointTouch::LapCompleted(agent.lap - 1);
    }
    agent.current_point = reached;
    WaypointTouch::Advanced
}

fn race_active(director: Option<Res<ModeDirector>>) -> bool {
    director.is_some_and(|director| {
        director.kind == TrackKind::Race
            && matches!(director.phase, ModePhase::Active | ModePhase::Ended)
    })
}

pub struct RaceModePlugin;

impl Plugin for RaceModePlugin {
    fn build(&self, app: &mut App) {
        app.add_systems(
            Update,
            (
                track_race_progress,
                update_race_standings,
                respawn_fallen_karts,
                finish_when_all_done,
            )
                .chain()
                .in_set(crate::gameplay::SimSet::Modes)
                .after(super::tick_mode_clock)
                .run_if(in_state(GameState::InMode))
                .run_if(resource_exists::<GameConfig>)
                .run_if(resource_exists::<WaypointGraph>)
                .run_if(race_active),
        );
    }
}

fn track_race_progress(
    config: Res<GameConfig>,
    graph: Res<WaypointGraph>,
    mut director: ResMut<ModeDirector>,
    mut agent_query: Query<(Entity, &Transform, &mut RaceAgent), With<Kart>>,
    mut lap_events: MessageWriter<LapCompletedEvent>,
    mut ended_events: MessageWriter<ModeEndedEvent>,
) {
    let max_laps = config.game.race.max_laps;
    let min_lap_completion = config.game.race.min_lap_completion;

    for (entity, transform, mut agent) in &mut agent_query {
        if agent.finished {
            continue;
        }
        let position = transform.translation;
        agent.lap_progress = graph.lap_progress(agent.current_point, position);
        agent.best_progress = agent.best_progress.max(agent.lap_progress);

        let Some(node) = graph.nodes.get(agent.current_point) else {
            continue;
        };
        let Some(reached) = node
            .valid_successors()
            .find(|successor| graph.is_within(*successor, position))
        else {
            continue;
        };

        match register_waypoint_touch(&mut agent, reached, max_laps, min_lap_completion) {
            WaypointTouch::Advanced => {}
            WaypointTouch::LapCompleted(lap) => {
                lap_events.write(LapCompletedEvent { kart: entity, lap });
            }
            WaypointTouch::Finished(lap) => {
                lap_events.write(LapCompletedEvent { kart: entity, lap });
                agent.finish_order = Some(director.next_finish_order());
                info!("kart {entity} finished in position {:?}", agent.finish_order);
                // The first finisher starts the grace period for everyone.
                if director.phase == ModePhase::Active {
                    director.phase = ModePhase::Ended;
                    ended_events.write(ModeEndedEvent);
                }
            }
        }
    }
}

fn update_race_standings(
    mut director: ResMut<ModeDirector>,
    agent_query: Query<(Entity, &RaceAgent)>,
) {
    let mut entries: Vec<(Entity, RaceRankEntry)> = agent_query
        .iter()
        .map(|(entity, agent)| {
            (
                entity,
                RaceRankEntry {
                    finished: agent.finished,
                    finish_order: agent.finish_order.unwrap_or(u32::MAX),
                    lap: agent.lap,
                    lap_progress: agent.lap_progress,
                },
            )
        })
        .collect();
    entries.sort_by(|a, b| compare_race_entries(&a.1, &b.1));
    director.standings = entries.into_iter().map(|(entity, _)| entity).collect();
}

/// Drops a fallen kart back onto its current waypoint, facing down-track,
/// with all transient motion state cleared.
#[allow(clippy::type_complexity)]
fn respawn_fallen_karts(
    config: Res<GameConfig>,
    graph: Res<WaypointGraph>,
    mut kart_query: Query<(
        &RaceAgent,
        &RotatorLink,
        &mut Transform,
        &mut Velocity,
        &mut KartMotion,
        &mut DriftState,
        &mut SpinOutState,
        &mut KartBoost,
        &mut KartInputState,
    )>,
    mut rotator_query: Query<&mut Transform, (With<crate::gameplay::kart::KartRotator>, Without<RaceAgent>)>,
) {
    let Some(track) = config.tracks_by_id.get(&config.game.app.starting_track) else {
        return;
    };

    for (agent, link, mut transform, mut velocity, mut motion, mut drift, mut spin, mut boost, mut input) in
        &mut kart_query
    {
        if transform.translation.y > track.out_of_bounds_y {
            continue;
        }
        let Some(node) = graph.nodes.get(agent.current_point) else {
            continue;
        };

        transform.translation = node.position + Vec3::Y * config.game.race.respawn_height;
        velocity.linvel = Vec3::ZERO;
        velocity.angvel = Vec3::ZERO;

        if let Ok(mut rotator) = rotator_query.get_mut(link.rotator) {
            let ahead = node
                .valid_successors()
                .next()
                .and_then(|next| graph.nodes.get(next))
                .map(|next| next.position - node.position)
                .unwrap_or(Vec3::Z);
            let flat = Vec3::new(ahead.x, 0.0, ahead.z).normalize_or(Vec3::Z);
            rotator.rotation = Quat::from_rotation_arc(Vec3::Z, flat);
        }

        *motion = KartMotion::default();
        *drift = DriftState::default();
        *spin = SpinOutState::default();
        boost.state.cancel();
        boost.state.empty_reserve();
        *input = KartInputState::default();
    }
}

fn finish_when_all_done(
    director: Res<ModeDirector>,
    agent_query: Query<&RaceAgent>,
    mut next_state: ResMut<NextState<GameState>>,
) {
    if director.phase != ModePhase::Ended {
        return;
    }
    if !agent_query.is_empty() && agent_query.iter().all(|agent| agent.finished) {
        next_state.set(GameState::Results);
    }
}

/// Stamps a final placement on every agent still running when the clock
/// closes the race, in current standings order. Agents missing from the
/// standings go last.
pub(super) fn assign_final_placements<A: std::ops::DerefMut<Target = RaceAgent>>(
    director: &mut ModeDirector,
    agents: &mut [(Entity, A)],
) {
    agents.sort_by_key(|(entity, _)| director.rank_of(*entity).unwrap_or(usize::MAX));
    for (_, agent) in agents.iter_mut() {
        if agent.finished {
            continue;
        }
        agent.finished = true;
        agent.finish_order = Some(director.next_finish_order());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(finished: bool, order: u32, lap: u32, progress: f32) -> RaceRankEntry {
        RaceRankEntry {
            finished,
            finish_order: order,
            lap,
            lap_progress: progress,
        }
    }

    #[test]
    fn three_full_laps_finish_the_race() {
        let mut agent = RaceAgent::default();
        let max_laps = 3;
        let min_lap_completion = 0.9;

        for lap in 1..=max_laps {
            // Drive the loop: touch every waypoint, progress climbing to 1.
            for point in 1..=7 {
                agent.best_progress = agent.best_progress.max(point as f32 / 7.0);
                assert_eq!(
                    register_waypoint_touch(&mut agent, point, max_laps, min_lap_completion),
                    WaypointTouch::Advanced
                );
            }
            let touch = register_waypoint_touch(&mut agent, 0, max_laps, min_lap_completion);
            if lap < max_laps {
                assert_eq!(touch, WaypointTouch::LapCompleted(lap));
                assert!(!agent.finished);
            } else {
                assert_eq!(touch, WaypointTouch::Finished(max_laps));
                assert!(agent.finished);
            }
            assert_eq!(agent.best_progress, 0.0);
        }
    }

    #[test]
    fn short_cut_across_the_line_does_not_count_as_a_lap() {
        let mut agent = RaceAgent::default();
        agent.best_progress = 0.4;

        let touch = register_waypoint_touch(&mut agent, 0, 3, 0.9);
        assert_eq!(touch, WaypointTouch::Advanced);
        assert_eq!(agent.lap, 1);
        assert!(!agent.finished);
        // Progress resets so the next full loop starts clean.
        assert_eq!(agent.best_progress, 0.0);
    }

    #[test]
    fn clock_expiry_places_every_running_kart() {
        use crate::gameplay::modes::CountdownSequence;

        let mut world = World::new();
        let karts: Vec<Entity> = (0..4).map(|_| world.spawn_empty().id()).collect();

        let mut winner = RaceAgent {
            finished: true,
            finish_order: Some(1),
            ..Default::default()
        };
        let mut second = RaceAgent {
            lap: 3,
            lap_progress: 0.6,
            ..Default::default()
        };
        let mut third = RaceAgent {
            lap: 2,
            lap_progress: 0.9,
            ..Default::default()
        };
        let mut straggler = RaceAgent::default();

        let mut director = ModeDirector {
            phase: ModePhase::Ended,
            kind: TrackKind::Race,
            countdown: CountdownSequence::new(3),
            elapsed: 120.0,
            time_limit: 0.0,
            grace_timer: 0.0,
            finish_counter: 1,
            // The straggler never made it into the standings.
            standings: vec![karts[0], karts[1], karts[2]],
            rng_seed: 1,
        };

        let mut agents = vec![
            (karts[3], &mut straggler),
            (karts[2], &mut third),
            (karts[0], &mut winner),
            (karts[1], &mut second),
        ];
        assign_final_placements(&mut director, &mut agents);

        assert_eq!(winner.finish_order, Some(1));
        assert_eq!(second.finish_order, Some(2));
        assert_eq!(third.finish_order, Some(3));
        assert_eq!(straggler.finish_order, Some(4));
        assert!(second.finished && third.finished && straggler.finished);
    }

    #[test]
    fn finished_karts_outrank_running_karts() {
        let winner = entry(true, 1, 4, 0.0);
        let leader = entry(false, u32::MAX, 3, 0.95);
        assert_eq!(compare_race_entries(&winner, &leader), Ordering::Less);
        assert_eq!(compare_race_entries(&leader, &winner), Ordering::Greater);
    }

    #[test]
    fn running_karts_rank_by_lap_then_progress() {
        let ahead_lap = entry(false, u32::MAX, 3, 0.1);
        let behind_lap = entry(false, u32::MAX, 2, 0.9);
        assert_eq!(compare_race_entries(&ahead_lap, &behind_lap), Ordering::Less);

        let ahead_progress = entry(false, u32::MAX, 2, 0.6);
        let behind_progress = entry(false, u32::MAX, 2, 0.4);
        assert_eq!(
            compare_race_entries(&ahead_progress, &behind_progress),
            Ordering::Less
        );
    }

    #[test]
    fn ranking_is_a_total_order() {
        let entries = vec![
            entry(true, 2, 4, 0.0),
            entry(true, 1, 4, 0.0),
            entry(false, u32::MAX, 3, 0.5),
            entry(false, u32::MAX, 3, 0.5),
            entry(false, u32::MAX, 1, 0.0),
        ];

        let mut sorted = entries.clone();
        sorted.sort_by(compare_race_entries);
        assert!(sorted[0].finished && sorted[0].finish_order == 1);
        assert!(sorted[1].finished && sorted[1].finish_order == 2);
        assert_eq!(sorted[4].lap, 1);

        // Sorting an already sorted list must not reorder equal entries.
        let resorted = {
            let mut again = sorted.clone();
            again.sort_by(compare_race_entries);
            again
        };
        assert_eq!(sorted, resorted);

        // Antisymmetry over every pair.
        for a in &entries {
            for b in &entries {
                let forward = compare_race_entries(a, b);
                let backward = compare_race_entries(b, a);
                assert_eq!(forward, backward.reverse());
            }
        }
    }
}
