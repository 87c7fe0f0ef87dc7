//! Battle bookkeeping: health, points, eliminations, and arena respawns.

use crate::config::GameConfig;
use crate::gameplay::items::ProjectileHitEvent;
use crate::gameplay::kart::{next_unit_random, DriftState, Kart, KartBoost, KartInputState,
    KartMotion, SpinOutState};
use crate::gameplay::waypoints::{TrackKind, WaypointGraph};
use crate::states::GameState;
use bevy::prelude::*;
use bevy_rapier3d::prelude::Velocity;
use std::cmp::Ordering;

use super::{ModeDirector, ModeEndedEvent, ModePhase, PointScoredEvent};

#[derive(Component, Debug, Clone)]
pub struct BattleAgent {
    pub health: i32,
    pub points: i32,
    pub eliminated: bool,
}

impl BattleAgent {
    pub fn new(max_health: i32) -> Self {
        Self {
            health: max_health.max(1),
            points: 0,
            eliminated: false,
        }
    }

    /// Returns true when the hit eliminated the kart.
    pub fn take_hit(&mut self) -> bool {
        if self.eliminated {
            return false;
        }
        self.health -= 1;
        if self.health <= 0 {
            self.health = 0;
            self.eliminated = true;
        }
        self.eliminated
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BattleRankEntry {
    pub eliminated: bool,
    pub points: i32,
    pub health: i32,
}

/// Survivors rank by points then remaining health; eliminated karts sink to
/// the bottom but keep their point order among themselves.
pub fn compare_battle_entries(a: &BattleRankEntry, b: &BattleRankEntry) -> Ordering {
    match (a.eliminated, b.eliminated) {
        (false, true) => Ordering::Less,
        (true, false) => Ordering::Greater,
        _ => b.points.cmp(&a.points).then(b.health.cmp(&a.health)),
    }
}

fn battle_active(director: Option<Res<ModeDirector>>) -> bool {
    director.is_some_and(|director| {
        director.kind == TrackKind::Battle
            && matches!(director.phase, ModePhase::Active | ModePhase::Ended)
    })
}

pub struct BattleModePlugin;

impl Plugin for BattleModePlugin {
    fn build(&self, app: &mut App) {
        app.add_systems(
            Update,
            (
                score_projectile_hits,
                respawn_fallen_karts,
                update_battle_standings,
                check_battle_end,
            )
                .chain()
                .in_set(crate::gameplay::SimSet::Modes)
                .after(super::tick_mode_clock)
                .run_if(in_state(GameState::InMode))
                .run_if(resource_exists::<GameConfig>)
                .run_if(resource_exists::<WaypointGraph>)
                .run_if(battle_active),
        );
    }
}

fn score_projectile_hits(
    mut hit_events: MessageReader<ProjectileHitEvent>,
    mut agent_query: Query<(&mut BattleAgent, &mut Kart)>,
    mut point_events: MessageWriter<PointScoredEvent>,
) {
    for hit in hit_events.read() {
        if let Ok((mut victim, mut kart)) = agent_query.get_mut(hit.victim) {
            if victim.take_hit() {
                kart.active = false;
                info!("kart {} eliminated", hit.victim);
            }
        }
        if let Ok((mut caster, _)) = agent_query.get_mut(hit.caster) {
            if !caster.eliminated {
                caster.points += 1;
                point_events.write(PointScoredEvent {
                    kart: hit.caster,
                    points: caster.points,
                });
            }
        }
    }
}

/// Falling off the arena costs a health point and warps the kart to a
/// random waypoint.
#[allow(clippy::type_complexity)]
fn respawn_fallen_karts(
    config: Res<GameConfig>,
    graph: Res<WaypointGraph>,
    mut director: ResMut<ModeDirector>,
    mut kart_query: Query<(
        &mut BattleAgent,
        &mut Kart,
        &mut Transform,
        &mut Velocity,
        &mut KartMotion,
        &mut DriftState,
        &mut SpinOutState,
        &mut KartBoost,
        &mut KartInputState,
    )>,
) {
    let Some(track) = config.tracks_by_id.get(&config.game.app.starting_track) else {
        return;
    };
    if graph.nodes.is_empty() {
        return;
    }

    for (mut agent, mut kart, mut transform, mut velocity, mut motion, mut drift, mut spin, mut boost, mut input) in
        &mut kart_query
    {
        if transform.translation.y > track.out_of_bounds_y || agent.eliminated {
            continue;
        }

        let mut seed = director.rng_seed;
        let pick = (next_unit_random(&mut seed) * graph.nodes.len() as f32) as usize;
        director.rng_seed = seed;
        let node = &graph.nodes[pick.min(graph.nodes.len() - 1)];

        transform.translation = node.position + Vec3::Y * config.game.race.respawn_height;
        velocity.linvel = Vec3::ZERO;
        velocity.angvel = Vec3::ZERO;
        *motion = KartMotion::default();
        *drift = DriftState::default();
        *spin = SpinOutState::default();
        boost.state.cancel();
        boost.state.empty_reserve();
        *input = KartInputState::default();

        if agent.take_hit() {
            kart.active = false;
        }
    }
}

fn update_battle_standings(
    mut director: ResMut<ModeDirector>,
    agent_query: Query<(Entity, &BattleAgent)>,
) {
    let mut entries: Vec<(Entity, BattleRankEntry)> = agent_query
        .iter()
        .map(|(entity, agent)| {
            (
                entity,
                BattleRankEntry {
                    eliminated: agent.eliminated,
                    points: agent.points,
                    health: agent.health,
                },
            )
        })
        .collect();
    entries.sort_by(|a, b| compare_battle_entries(&a.1, &b.1));
    director.standings = entries.into_iter().map(|(entity, _)| entity).collect();
}

fn check_battle_end(
    config: Res<GameConfig>,
    mut director: ResMut<ModeDirector>,
    agent_query: Query<&BattleAgent>,
    mut ended_events: MessageWriter<ModeEndedEvent>,
) {
    if director.phase != ModePhase::Active {
        return;
    }

    let max_points = config.game.battle.max_points;
    let points_reached =
        max_points > 0 && agent_query.iter().any(|agent| agent.points >= max_points);
    let total = agent_query.iter().count();
    let standing = agent_query.iter().filter(|agent| !agent.eliminated).count();
    let last_kart = total > 1 && standing <= 1;

    if points_reached || last_kart {
        director.phase = ModePhase::Ended;
        ended_events.write(ModeEndedEvent);
        info!(
            "battle over: points_reached={points_reached} last_kart={last_kart} after {:.1}s",
            director.elapsed
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(eliminated: bool, points: i32, health: i32) -> BattleRankEntry {
        BattleRankEntry {
            eliminated,
            points,
            health,
        }
    }

    #[test]
    fn survivors_rank_by_points_then_health() {
        let high_points = entry(false, 5, 1);
        let low_points = entry(false, 3, 3);
        assert_eq!(
            compare_battle_entries(&high_points, &low_points),
            Ordering::Less
        );

        let healthy = entry(false, 3, 3);
        let hurt = entry(false, 3, 1);
        assert_eq!(compare_battle_entries(&healthy, &hurt), Ordering::Less);
    }

    #[test]
    fn eliminated_karts_sink_below_survivors() {
        let eliminated_ace = entry(true, 10, 0);
        let survivor = entry(false, 0, 1);
        assert_eq!(
            compare_battle_entries(&survivor, &eliminated_ace),
            Ordering::Less
        );

        // Among the eliminated, points still decide.
        let other_eliminated = entry(true, 2, 0);
        assert_eq!(
            compare_battle_entries(&eliminated_ace, &other_eliminated),
            Ordering::Less
        );
    }

    #[test]
    fn take_hit_eliminates_at_zero_health() {
        let mut agent = BattleAgent::new(2);
        assert!(!agent.take_hit());
        assert_eq!(agent.health, 1);
        assert!(agent.take_hit());
        assert!(agent.eliminated);
        assert_eq!(agent.health, 0);

        // Further hits are absorbed.
        assert!(!agent.take_hit());
        assert_eq!(agent.health, 0);
    }
}
