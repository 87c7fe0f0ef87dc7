//! Mode direction: spawn-grid setup, the countdown sequence, the shared
//! mode clock, and the HUD. Race- and battle-specific bookkeeping live in
//! their own modules.

pub mod battle;
pub mod race;

use crate::config::GameConfig;
use crate::gameplay::ai::attach_follower;
use crate::gameplay::items::{spawn_track_features, ItemCaster};
use crate::gameplay::kart::{next_unit_random, spawn_kart, Kart, PlayerKart};
use crate::gameplay::waypoints::{RapierTerrainProbe, TrackKind, WaypointGraph};
use crate::states::GameState;
use battle::BattleAgent;
use bevy::prelude::*;
use bevy_rapier3d::prelude::*;
use race::RaceAgent;

const COUNTDOWN_TICK_SPACING_S: f32 = 1.0;
const SPAWN_LIFT_M: f32 = 1.0;
// Physics colliders register the frame after they are spawned; the mesh
// pruning walk needs them queryable.
const SETUP_WARMUP_FRAMES: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ModePhase {
    #[default]
    Setup,
    Countdown,
    Active,
    Ended,
}

#[derive(Message, Debug, Clone)]
pub struct CountdownTickEvent {
    pub label: String,
}

#[derive(Message, Debug, Clone, Copy)]
pub struct ModeStartedEvent;

#[derive(Message, Debug, Clone, Copy)]
pub struct ModeEndedEvent;

#[derive(Message, Debug, Clone, Copy)]
pub struct LapCompletedEvent {
    pub kart: Entity,
    pub lap: u32,
}

#[derive(Message, Debug, Clone, Copy)]
pub struct PointScoredEvent {
    pub kart: Entity,
    pub points: i32,
}

/// One emitted countdown step.
#[derive(Debug, Clone, PartialEq)]
pub struct CountdownTick {
    pub label: String,
    /// True exactly at the "Go!" tick; inputs unlock on this step.
    pub starts_mode: bool,
}

/// Resumable countdown: "N".."1", "Go!", then an empty label one spacing
/// later to clear the display. Advanced once per frame by the scheduler.
#[derive(Debug, Clone, Default)]
pub struct CountdownSequence {
    from: u32,
    emitted: u32,
    timer: f32,
}

impl CountdownSequence {
    pub fn new(from: u32) -> Self {
        Self {
            from: from.max(1),
            emitted: 0,
            timer: 0.0,
        }
    }

    pub fn is_done(&self) -> bool {
        self.emitted > self.from + 1
    }

    pub fn tick(&mut self, dt: f32) -> Option<CountdownTick> {
        if self.is_done() {
            return None;
        }
        self.timer += dt;
        if self.timer < self.emitted as f32 * COUNTDOWN_TICK_SPACING_S {
            return None;
        }

        let step = self.emitted;
        self.emitted += 1;
        let label = match step.cmp(&self.from) {
            std::cmp::Ordering::Less => (self.from - step).to_string(),
            std::cmp::Ordering::Equal => "Go!".to_string(),
            std::cmp::Ordering::Greater => String::new(),
        };
        Some(CountdownTick {
            starts_mode: step == self.from,
            label,
        })
    }
}

#[derive(Resource, Debug, Clone)]
pub struct ModeDirector {
    pub phase: ModePhase,
    pub kind: TrackKind,
    pub countdown: CountdownSequence,
    pub elapsed: f32,
    /// Zero disables the global time limit.
    pub time_limit: f32,
    pub grace_timer: f32,
    pub finish_counter: u32,
    /// Rank order, best first; re-sorted every frame before queries.
    pub standings: Vec<Entity>,
    pub rng_seed: u64,
}

impl ModeDirector {
    pub fn next_finish_order(&mut self) -> u32 {
        self.finish_counter += 1;
        self.finish_counter
    }

    /// 1-based position of the kart in the current standings.
    pub fn rank_of(&self, kart: Entity) -> Option<usize> {
        self.standings
            .iter()
            .position(|entry| *entry == kart)
            .map(|index| index + 1)
    }
}

pub struct ModeDirectorPlugin;

impl Plugin for ModeDirectorPlugin {
    fn build(&self, app: &mut App) {
        app.add_message::<CountdownTickEvent>()
            .add_message::<ModeStartedEvent>()
            .add_message::<ModeEndedEvent>()
            .add_message::<LapCompletedEvent>()
            .add_message::<PointScoredEvent>()
            .add_plugins((race::RaceModePlugin, battle::BattleModePlugin))
            .add_systems(
                Update,
                setup_mode
                    .run_if(in_state(GameState::Setup))
                    .run_if(resource_exists::<GameConfig>),
            )
            .add_systems(OnEnter(GameState::InMode), spawn_mode_hud)
            .add_systems(OnExit(GameState::InMode), teardown_mode)
            .add_systems(
                Update,
                (run_countdown, tick_mode_clock, update_mode_hud)
                    .chain()
                    .in_set(super::SimSet::Modes)
                    .run_if(in_state(GameState::InMode))
                    .run_if(resource_exists::<GameConfig>)
                    .run_if(resource_exists::<ModeDirector>),
            );
    }
}

fn setup_mode(
    mut commands: Commands,
    config: Res<GameConfig>,
    rapier_context: ReadRapierContext,
    mut warmup: Local<u32>,
    mut next_state: ResMut<NextState<GameState>>,
) {
    *warmup += 1;
    if *warmup <= SETUP_WARMUP_FRAMES {
        return;
    }
    *warmup = 0;

    let Some(track) = config.tracks_by_id.get(&config.game.app.starting_track) else {
        error!(
            "starting track '{}' missing from tracks.toml",
            config.game.app.starting_track
        );
        return;
    };
    let kind = TrackKind::parse(&track.kind);

    let mut graph = WaypointGraph::from_track(track);
    if kind == TrackKind::Battle {
        if let Ok(context) = rapier_context.single() {
            let probe = RapierTerrainProbe::new(&context);
            graph.prune_battle_connections(
                &probe,
                config.game.battle.prune_step_distance,
                config.game.battle.prune_max_steepness,
            );
        }
    }

    spawn_track_features(&mut commands, track);

    let mut rng_seed = 0x0BAD_5EED_u64;
    let kart_ids: Vec<(String, bool)> = std::iter::once((config.game.app.player_kart.clone(), true))
        .chain(
            config
                .game
                .app
                .ai_kart_ids
                .iter()
                .map(|id| (id.clone(), false)),
        )
        .collect();

    for (slot, (kart_id, is_player)) in kart_ids.iter().enumerate() {
        let Some(kart_config) = config.karts_by_id.get(kart_id) else {
            continue;
        };
        let (position, facing) = match kind {
            TrackKind::Race => grid_slot(
                &graph,
                slot as u32,
                config.game.race.grid_columns,
                config.game.race.grid_spacing,
                config.game.race.grid_row_spacing,
            ),
            TrackKind::Battle => battle_slot(&graph, &mut rng_seed),
        };
        let entity = spawn_kart(&mut commands, kart_config, position, facing, *is_player);
        commands.entity(entity).insert(ItemCaster::default());
        match kind {
            TrackKind::Race => {
                commands.entity(entity).insert(RaceAgent::default());
            }
            TrackKind::Battle => {
                commands
                    .entity(entity)
                    .insert(BattleAgent::new(config.game.battle.max_health));
            }
        }
        if !is_player {
            commands
                .entity(entity)
                .insert(attach_follower(position, &graph, rng_seed ^ slot as u64));
        }
    }

    let (countdown_seconds, time_limit) = match kind {
        TrackKind::Race => (
            config.game.race.countdown_seconds,
            config.game.race.time_limit,
        ),
        TrackKind::Battle => (
            config.game.battle.countdown_seconds,
            config.game.battle.time_limit,
        ),
    };
    commands.insert_resource(graph);
    commands.insert_resource(ModeDirector {
        phase: ModePhase::Countdown,
        kind,
        countdown: CountdownSequence::new(countdown_seconds),
        elapsed: 0.0,
        time_limit,
        grace_timer: config.game.race.race_end_duration,
        finish_counter: 0,
        standings: Vec::new(),
        rng_seed,
    });

    info!(
        "mode setup complete: track '{}' ({:?}), {} karts",
        track.id,
        kind,
        kart_ids.len()
    );
    next_state.set(GameState::InMode);
}

/// Grid slot for a race start: rows behind the first waypoint, columns
/// across it.
fn grid_slot(
    graph: &WaypointGraph,
    slot: u32,
    columns: u32,
    spacing: f32,
    row_spacing: f32,
) -> (Vec3, Quat) {
    let start = graph.nodes.first().map(|node| node.position).unwrap_or(Vec3::ZERO);
    let ahead = graph
        .nodes
        .first()
        .and_then(|node| node.next)
        .and_then(|next| graph.nodes.get(next))
        .map(|node| (node.position - start).normalize_or(Vec3::Z))
        .unwrap_or(Vec3::Z);
    let flat_ahead = Vec3::new(ahead.x, 0.0, ahead.z).normalize_or(Vec3::Z);
    let right = flat_ahead.cross(Vec3::Y).normalize_or(Vec3::X);

    let columns = columns.max(1);
    let column = (slot % columns) as f32;
    let row = (slot / columns) as f32;
    let lateral = (column - (columns as f32 - 1.0) * 0.5) * spacing;
    let position = start + right * lateral - flat_ahead * (row + 1.0) * row_spacing
        + Vec3::Y * SPAWN_LIFT_M;
    let facing = Quat::from_rotation_arc(Vec3::Z, flat_ahead);
    (position, facing)
}

fn battle_slot(graph: &WaypointGraph, rng_seed: &mut u64) -> (Vec3, Quat) {
    if graph.nodes.is_empty() {
        return (Vec3::Y * SPAWN_LIFT_M, Quat::IDENTITY);
    }
    let pick = (next_unit_random(rng_seed) * graph.nodes.len() as f32) as usize;
    let node = &graph.nodes[pick.min(graph.nodes.len() - 1)];
    let yaw = next_unit_random(rng_seed) * std::f32::consts::TAU;
    (
        node.position + Vec3::Y * SPAWN_LIFT_M,
        Quat::from_rotation_y(yaw),
    )
}

fn run_countdown(
    time: Res<Time>,
    mut director: ResMut<ModeDirector>,
    mut kart_query: Query<&mut Kart>,
    mut tick_events: MessageWriter<CountdownTickEvent>,
    mut started_events: MessageWriter<ModeStartedEvent>,
) {
    if director.countdown.is_done() {
        return;
    }
    let Some(tick) = director.countdown.tick(time.delta_secs()) else {
        return;
    };
    if tick.starts_mode {
        director.phase = ModePhase::Active;
        for mut kart in &mut kart_query {
            kart.active = true;
        }
        started_events.write(ModeStartedEvent);
        info!("mode active");
    }
    tick_events.write(CountdownTickEvent { label: tick.label });
}

fn tick_mode_clock(
    time: Res<Time>,
    mut director: ResMut<ModeDirector>,
    mut race_agents: Query<(Entity, &mut RaceAgent)>,
    mut next_state: ResMut<NextState<GameState>>,
    mut ended_events: MessageWriter<ModeEndedEvent>,
) {
    let dt = time.delta_secs();
    match director.phase {
        ModePhase::Active => {
            director.elapsed += dt;
            if director.time_limit > 0.0 && director.elapsed >= director.time_limit {
                director.phase = ModePhase::Ended;
                close_out_race(&mut director, &mut race_agents);
                ended_events.write(ModeEndedEvent);
                info!("time limit reached after {:.1}s", director.elapsed);
            }
        }
        ModePhase::Ended => {
            director.elapsed += dt;
            // A negative grace period means stragglers get unlimited time.
            if director.grace_timer >= 0.0 {
                director.grace_timer -= dt;
                if director.grace_timer <= 0.0 {
                    close_out_race(&mut director, &mut race_agents);
                    next_state.set(GameState::Results);
                }
            }
        }
        _ => {}
    }
}

/// When the clock ends a race, every kart still on track gets its current
/// standing stamped as the final placement.
fn close_out_race(
    director: &mut ModeDirector,
    race_agents: &mut Query<(Entity, &mut RaceAgent)>,
) {
    if director.kind != TrackKind::Race {
        return;
    }
    let mut agents: Vec<_> = race_agents.iter_mut().collect();
    race::assign_final_placements(director, &mut agents);
}

#[derive(Component)]
struct ModeHudRoot;

#[derive(Component)]
struct CountdownText;

#[derive(Component)]
struct StatusText;

fn spawn_mode_hud(mut commands: Commands) {
    commands
        .spawn((
            Name::new("ModeHudRoot"),
            ModeHudRoot,
            Node {
                position_type: PositionType::Absolute,
                left: Val::Px(0.0),
                right: Val::Px(0.0),
                top: Val::Px(10.0),
                flex_direction: FlexDirection::Column,
                align_items: AlignItems::Center,
                row_gap: Val::Px(8.0),
                ..default()
            },
        ))
        .with_children(|root| {
            root.spawn((
                StatusText,
                Text::new(""),
                TextFont {
                    font_size: 20.0,
                    ..default()
                },
                TextColor(Color::srgb(0.92, 0.92, 0.88)),
            ));
            root.spawn((
                CountdownText,
                Text::new(""),
                TextFont {
                    font_size: 64.0,
                    ..default()
                },
                TextColor(Color::srgb(1.0, 0.85, 0.25)),
            ));
        });
}

fn teardown_mode(
    mut commands: Commands,
    hud_query: Query<Entity, With<ModeHudRoot>>,
) {
    for entity in &hud_query {
        commands.entity(entity).try_despawn();
    }
    commands.remove_resource::<WaypointGraph>();
}

#[allow(clippy::type_complexity)]
fn update_mode_hud(
    director: Res<ModeDirector>,
    config: Res<GameConfig>,
    mut tick_events: MessageReader<CountdownTickEvent>,
    mut countdown_query: Query<&mut Text, (With<CountdownText>, Without<StatusText>)>,
    mut status_query: Query<&mut Text, (With<StatusText>, Without<CountdownText>)>,
    player_query: Query<(Entity, Option<&RaceAgent>, Option<&BattleAgent>), With<PlayerKart>>,
) {
    for tick in tick_events.read() {
        for mut text in &mut countdown_query {
            *text = Text::new(tick.label.clone());
        }
    }

    let Ok(mut status) = status_query.single_mut() else {
        return;
    };
    let Ok((player, race_agent, battle_agent)) = player_query.single() else {
        return;
    };
    let rank = director.rank_of(player);
    let total = director.standings.len();

    let line = match (race_agent, battle_agent) {
        (Some(agent), _) => format!(
            "Pos {}/{}  Lap {}/{}  {:>6.1}s",
            rank.map(|r| r.to_string()).unwrap_or_else(|| "-".to_string()),
            total,
            agent.lap.min(config.game.race.max_laps),
            config.game.race.max_laps,
            director.elapsed
        ),
        (None, Some(agent)) => format!(
            "Pos {}/{}  Points {}  Health {}  {:>6.1}s",
            rank.map(|r| r.to_string()).unwrap_or_else(|| "-".to_string()),
            total,
            agent.points,
            agent.health,
            director.elapsed
        ),
        (None, None) => String::new(),
    };
    *status = Text::new(line);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn countdown_emits_labels_at_one_second_spacing() {
        let mut sequence = CountdownSequence::new(3);
        let mut emitted = Vec::new();
        let mut clock = 0.0;

        for _ in 0..24 {
            if let Some(tick) = sequence.tick(0.25) {
                emitted.push((clock, tick.label, tick.starts_mode));
            }
            clock += 0.25;
        }

        let labels: Vec<&str> = emitted.iter().map(|(_, label, _)| label.as_str()).collect();
        assert_eq!(labels, vec!["3", "2", "1", "Go!", ""]);

        // One second between consecutive ticks, starting immediately.
        for (step, (at, ..)) in emitted.iter().enumerate() {
            assert!((at - step as f32).abs() < 0.26);
        }

        // Inputs unlock exactly on the "Go!" tick, not before or after.
        let starters: Vec<bool> = emitted.iter().map(|(.., starts)| *starts).collect();
        assert_eq!(starters, vec![false, false, false, true, false]);
        assert!(sequence.is_done());
        assert_eq!(sequence.tick(1.0), None);
    }

    #[test]
    fn finish_orders_are_sequential() {
        let mut director = ModeDirector {
            phase: ModePhase::Active,
            kind: TrackKind::Race,
            countdown: CountdownSequence::new(3),
            elapsed: 0.0,
            time_limit: 0.0,
            grace_timer: 5.0,
            finish_counter: 0,
            standings: Vec::new(),
            rng_seed: 1,
        };

        assert_eq!(director.next_finish_order(), 1);
        assert_eq!(director.next_finish_order(), 2);
        assert_eq!(director.next_finish_order(), 3);
    }
}
