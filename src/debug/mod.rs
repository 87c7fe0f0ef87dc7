use crate::config::{self, GameConfig, KartConfig};
use crate::gameplay::kart::{
    DriftState, KartBoost, KartMotion, PlayerKart, SpinOutState, WallContactState,
};
use crate::gameplay::modes::ModeDirector;
use crate::gameplay::modes::race::RaceAgent;
use crate::gameplay::modes::battle::BattleAgent;
use crate::states::GameState;
use bevy::diagnostic::{DiagnosticsStore, FrameTimeDiagnosticsPlugin};
use bevy::prelude::*;
use bevy_egui::{egui, EguiContexts, EguiPrimaryContextPass};
use bevy_rapier3d::prelude::Velocity;
use std::path::Path;

pub struct DebugOverlayPlugin;

impl Plugin for DebugOverlayPlugin {
    fn build(&self, app: &mut App) {
        app.init_resource::<KeybindOverlayState>()
            .init_resource::<KartTuningPanelState>()
            .add_systems(Update, spawn_debug_overlay)
            .add_systems(Update, toggle_keybind_overlay)
            .add_systems(Update, toggle_kart_tuning_panel)
            .add_systems(Update, sync_keybind_overlay_visibility)
            .add_systems(
                Update,
                update_debug_overlay_text
                    .run_if(in_state(GameState::InMode))
                    .run_if(resource_exists::<GameConfig>),
            )
            .add_systems(
                EguiPrimaryContextPass,
                kart_tuning_panel_ui
                    .run_if(in_state(GameState::InMode))
                    .run_if(resource_exists::<GameConfig>),
            );
    }
}

#[derive(Component)]
struct DebugOverlayText;

#[derive(Component)]
struct KeybindOverlayText;

#[derive(Resource, Debug, Clone, Default)]
struct KeybindOverlayState {
    visible: bool,
}

/// Live-tuning panel working on a draft copy of the player's kart preset.
#[derive(Resource, Debug, Default)]
struct KartTuningPanelState {
    visible: bool,
    source_kart_id: String,
    draft: Option<KartConfig>,
    status: String,
}

fn spawn_debug_overlay(
    mut commands: Commands,
    keybind_overlay: Res<KeybindOverlayState>,
    config: Option<Res<GameConfig>>,
    existing_overlay: Query<Entity, With<DebugOverlayText>>,
) {
    if !existing_overlay.is_empty() {
        return;
    }

    let Some(config) = config else {
        return;
    };

    if !config.game.app.debug_overlay {
        return;
    }

    commands.spawn((
        DebugOverlayText,
        Text::new("debug overlay initializing..."),
        TextFont {
            font_size: 16.0,
            ..default()
        },
        TextColor(Color::srgb(0.92, 0.95, 0.97)),
        Node {
            position_type: PositionType::Absolute,
            left: Val::Px(12.0),
            top: Val::Px(12.0),
            ..default()
        },
        ZIndex(100),
    ));

    commands.spawn((
        KeybindOverlayText,
        Text::new(keybind_overlay_text()),
        TextFont {
            font_size: 15.0,
            ..default()
        },
        TextColor(Color::srgb(0.90, 0.94, 0.97)),
        BackgroundColor(Color::srgba(0.06, 0.08, 0.10, 0.82)),
        BorderColor::all(Color::srgba(0.60, 0.68, 0.74, 0.9)),
        Node {
            position_type: PositionType::Absolute,
            left: Val::Px(12.0),
            top: Val::Px(222.0),
            padding: UiRect::axes(Val::Px(10.0), Val::Px(8.0)),
            border: UiRect::all(Val::Px(1.0)),
            ..default()
        },
        if keybind_overlay.visible {
            Visibility::Inherited
        } else {
            Visibility::Hidden
        },
        ZIndex(100),
    ));
}

#[allow(clippy::type_complexity)]
fn update_debug_overlay_text(
    diagnostics: Res<DiagnosticsStore>,
    director: Option<Res<ModeDirector>>,
    player_query: Query<
        (
            Entity,
            &Velocity,
            &KartMotion,
            &DriftState,
            &KartBoost,
            &WallContactState,
            &SpinOutState,
            Option<&RaceAgent>,
            Option<&BattleAgent>,
        ),
        With<PlayerKart>,
    >,
    mut overlay_query: Query<&mut Text, With<DebugOverlayText>>,
) {
    let Ok(mut text) = overlay_query.single_mut() else {
        return;
    };
    let Ok((entity, velocity, motion, drift, boost, wall, spin, race_agent, battle_agent)) =
        player_query.single()
    else {
        return;
    };

    let fps = diagnostics
        .get(&FrameTimeDiagnosticsPlugin::FPS)
        .and_then(|value| value.smoothed())
        .unwrap_or(0.0);

    let (phase, rank, total) = match director {
        Some(director) => (
            format!("{:?}", director.phase),
            director
                .rank_of(entity)
                .map(|rank| rank.to_string())
                .unwrap_or_else(|| "-".to_string()),
            director.standings.len(),
        ),
        None => ("n/a".to_string(), "-".to_string(), 0),
    };
    let mode_line = match (race_agent, battle_agent) {
        (Some(agent), _) => format!(
            "Lap: {} | Point: {} | Progress: {:.2}",
            agent.lap, agent.current_point, agent.lap_progress
        ),
        (None, Some(agent)) => format!(
            "Health: {} | Points: {} | Eliminated: {}",
            agent.health, agent.points, agent.eliminated
        ),
        (None, None) => "no mode agent".to_string(),
    };

    *text = Text::new(format!(
        "FPS: {fps:>5.1}\nSpeed: {speed:>6.1} m/s (fwd {forward:>6.1})\nGrounded: {grounded} | AirGrounded: {air_grounded} | AirTime: {air_time:>4.2}s\nDrift: {drifting} (dir {drift_dir:+.0}) | SpinOut: {spinning}\nBoost: amount {amount:>5.2} reserve {reserve:>5.2} boosting {boosting}\nWall: touching {wall_touch} bounce {bounce:+.2}\nPhase: {phase} | Rank: {rank}/{total}\n{mode_line}\nHotkeys: H help | T kart tune | Esc end mode",
        speed = velocity.linvel.length(),
        forward = motion.local_vel.z,
        grounded = if motion.grounded { "yes" } else { "no" },
        air_grounded = if motion.air_grounded { "yes" } else { "no" },
        air_time = motion.air_time,
        drifting = if drift.drifting { "yes" } else { "no" },
        drift_dir = drift.drift_dir,
        spinning = if spin.active { "yes" } else { "no" },
        amount = boost.state.amount,
        reserve = boost.state.reserve,
        boosting = if boost.state.is_boosting() { "yes" } else { "no" },
        wall_touch = if wall.touching { "yes" } else { "no" },
        bounce = wall.bounce_turn,
    ));
}

fn toggle_keybind_overlay(
    keyboard: Res<ButtonInput<KeyCode>>,
    mut state: ResMut<KeybindOverlayState>,
    config: Option<Res<GameConfig>>,
) {
    let Some(config) = config else {
        return;
    };

    if !config.game.app.debug_overlay {
        return;
    }

    if keyboard.just_pressed(KeyCode::KeyH) {
        state.visible = !state.visible;
        info!(
            "Debug keybind panel {}.",
            if state.visible { "shown" } else { "hidden" }
        );
    }
}

fn sync_keybind_overlay_visibility(
    state: Res<KeybindOverlayState>,
    mut query: Query<&mut Visibility, With<KeybindOverlayText>>,
) {
    if !state.is_changed() {
        return;
    }

    let next_visibility = if state.visible {
        Visibility::Inherited
    } else {
        Visibility::Hidden
    };

    for mut visibility in &mut query {
        *visibility = next_visibility;
    }
}

fn toggle_kart_tuning_panel(
    keyboard: Res<ButtonInput<KeyCode>>,
    mut panel_state: ResMut<KartTuningPanelState>,
    config: Option<Res<GameConfig>>,
) {
    if !keyboard.just_pressed(KeyCode::KeyT) {
        return;
    }

    panel_state.visible = !panel_state.visible;
    if panel_state.visible {
        if let Some(config) = config {
            if let Err(error) = sync_panel_state_from_config(&mut panel_state, &config) {
                panel_state.status = error;
            }
        }
        info!("Kart tuning panel shown.");
    } else {
        info!("Kart tuning panel hidden.");
    }
}

fn kart_tuning_panel_ui(
    mut egui_contexts: EguiContexts,
    mut panel_state: ResMut<KartTuningPanelState>,
    mut config: ResMut<GameConfig>,
) {
    if !panel_state.visible {
        return;
    }

    if panel_state.draft.is_none() || panel_state.source_kart_id != config.game.app.player_kart {
        if let Err(error) = sync_panel_state_from_config(&mut panel_state, &config) {
            panel_state.status = error;
            return;
        }
    }

    let Some(mut draft) = panel_state.draft.clone() else {
        return;
    };

    let mut window_open = panel_state.visible;
    let mut draft_changed = false;
    let mut reload_clicked = false;
    let mut save_clicked = false;
    let status = panel_state.status.clone();
    let kart_id = panel_state.source_kart_id.clone();

    let Ok(ctx) = egui_contexts.ctx_mut() else {
        return;
    };
    egui::Window::new("Kart Tuning")
        .open(&mut window_open)
        .resizable(true)
        .default_width(620.0)
        .show(ctx, |ui| {
            ui.label(format!("Active kart: {kart_id}"));
            ui.label("Each row has a slider plus a free-form float value.");
            ui.separator();

            ui.collapsing("Speed", |ui| {
                draft_changed |= tuning_slider_row(
                    ui,
                    "max_speed",
                    &mut draft.speed.max_speed,
                    0.1..=120.0,
                    0.1,
                );
                draft_changed |= tuning_slider_row(
                    ui,
                    "max_reverse_speed",
                    &mut draft.speed.max_reverse_speed,
                    0.1..=60.0,
                    0.1,
                );
                draft_changed |= tuning_slider_row(
                    ui,
                    "acceleration",
                    &mut draft.speed.acceleration,
                    0.0..=20.0,
                    0.05,
                );
                draft_changed |= tuning_slider_row(
                    ui,
                    "brake_force",
                    &mut draft.speed.brake_force,
                    0.0..=20.0,
                    0.05,
                );
                draft_changed |= tuning_slider_row(
                    ui,
                    "coasting_friction",
                    &mut draft.speed.coasting_friction,
                    0.0..=10.0,
                    0.01,
                );
                draft_changed |= tuning_slider_row(
                    ui,
                    "slope_friction",
                    &mut draft.speed.slope_friction,
                    0.0..=5.0,
                    0.01,
                );
                draft_changed |= tuning_slider_row(
                    ui,
                    "max_fall_speed",
                    &mut draft.speed.max_fall_speed,
                    1.0..=200.0,
                    0.5,
                );
            });

            ui.collapsing("Steering", |ui| {
                draft_changed |= tuning_slider_row(
                    ui,
                    "max_steer",
                    &mut draft.steer.max_steer,
                    0.0..=10.0,
                    0.02,
                );
                draft_changed |= tuning_slider_row(
                    ui,
                    "min_steer",
                    &mut draft.steer.min_steer,
                    0.0..=10.0,
                    0.02,
                );
                draft_changed |= tuning_slider_row(
                    ui,
                    "steer_rate",
                    &mut draft.steer.steer_rate,
                    0.0..=1.0,
                    0.005,
                );
                draft_changed |= tuning_slider_row(
                    ui,
                    "steer_speed_limit",
                    &mut draft.steer.steer_speed_limit,
                    0.1..=120.0,
                    0.1,
                );
                draft_changed |= tuning_slider_row(
                    ui,
                    "air_steer",
                    &mut draft.steer.air_steer,
                    0.0..=2.0,
                    0.01,
                );
            });

            ui.collapsing("Suspension + Wheels", |ui| {
                draft_changed |= tuning_slider_row(
                    ui,
                    "spring_force",
                    &mut draft.suspension.spring_force,
                    0.0..=200.0,
                    0.5,
                );
                draft_changed |= tuning_slider_row(
                    ui,
                    "spring_dampening",
                    &mut draft.suspension.spring_dampening,
                    0.0..=20.0,
                    0.05,
                );
                draft_changed |= tuning_slider_row(
                    ui,
                    "ground_stick_force",
                    &mut draft.suspension.ground_stick_force,
                    0.0..=100.0,
                    0.5,
                );
                draft_changed |= tuning_slider_row(
                    ui,
                    "suspension_distance",
                    &mut draft.wheels.suspension_distance,
                    0.05..=3.0,
                    0.01,
                );
                draft_changed |= tuning_slider_row(
                    ui,
                    "side_friction",
                    &mut draft.wheels.side_friction,
                    0.0..=20.0,
                    0.05,
                );
                draft_changed |= tuning_slider_row(
                    ui,
                    "air_side_friction",
                    &mut draft.wheels.air_side_friction,
                    0.0..=20.0,
                    0.05,
                );
            });

            ui.collapsing("Drift + Boost", |ui| {
                draft_changed |= tuning_slider_row(
                    ui,
                    "min_drift_angle",
                    &mut draft.drift.min_drift_angle,
                    0.0..=10.0,
                    0.02,
                );
                draft_changed |= tuning_slider_row(
                    ui,
                    "max_drift_angle",
                    &mut draft.drift.max_drift_angle,
                    0.0..=10.0,
                    0.02,
                );
                draft_changed |= tuning_slider_row(
                    ui,
                    "drift_swing_force",
                    &mut draft.drift.drift_swing_force,
                    0.0..=5.0,
                    0.01,
                );
                draft_changed |= tuning_slider_row(
                    ui,
                    "boost.power",
                    &mut draft.boost.power,
                    0.0..=10.0,
                    0.02,
                );
                draft_changed |= tuning_slider_row(
                    ui,
                    "boost.ground_push",
                    &mut draft.boost.ground_push,
                    0.0..=50.0,
                    0.1,
                );
                draft_changed |= tuning_slider_row(
                    ui,
                    "boost.reserve_limit",
                    &mut draft.boost.reserve_limit,
                    0.0..=20.0,
                    0.05,
                );
            });

            ui.collapsing("Jump + Gravity", |ui| {
                draft_changed |= tuning_slider_row(
                    ui,
                    "jump_force",
                    &mut draft.jump.jump_force,
                    0.0..=100.0,
                    0.2,
                );
                draft_changed |= tuning_slider_row(
                    ui,
                    "jump_duration",
                    &mut draft.jump.jump_duration,
                    0.0..=2.0,
                    0.01,
                );
                draft_changed |= tuning_slider_row(
                    ui,
                    "air_land_boost",
                    &mut draft.jump.air_land_boost,
                    0.0..=5.0,
                    0.01,
                );
                draft_changed |= tuning_slider_row(
                    ui,
                    "gravity_add",
                    &mut draft.gravity.gravity_add,
                    -100.0..=0.0,
                    0.2,
                );
            });

            ui.separator();
            ui.horizontal(|ui| {
                if ui.button("Reload From Config").clicked() {
                    reload_clicked = true;
                }
                if ui.button("Save Preset").clicked() {
                    save_clicked = true;
                }
            });

            if !status.is_empty() {
                ui.separator();
                ui.label(status);
            }
        });

    panel_state.visible = window_open;

    if reload_clicked {
        match sync_panel_state_from_config(&mut panel_state, &config) {
            Ok(()) => panel_state.status = "Reloaded values from current config.".to_string(),
            Err(error) => panel_state.status = error,
        }
        return;
    }

    panel_state.draft = Some(draft.clone());

    if draft_changed {
        apply_kart_tuning_to_runtime_config(&mut config, &draft);
        panel_state.status = "Live-tuning active (in-memory config updated).".to_string();
    }

    if save_clicked {
        let path = Path::new("config")
            .join("presets")
            .join(format!("{}.json", draft.id));
        match config::save_kart_preset(&path, &draft) {
            Ok(()) => {
                panel_state.status = format!("Saved preset to {}.", path.to_string_lossy());
            }
            Err(error) => panel_state.status = format!("Preset save failed: {error}"),
        }
    }
}

fn tuning_slider_row(
    ui: &mut egui::Ui,
    label: &str,
    value: &mut f32,
    slider_range: std::ops::RangeInclusive<f32>,
    drag_speed: f32,
) -> bool {
    let mut changed = false;
    ui.horizontal(|ui| {
        ui.label(label);
        changed |= ui
            .add(egui::Slider::new(value, slider_range).show_value(false))
            .changed();
        changed |= ui
            .add(egui::DragValue::new(value).speed(drag_speed as f64))
            .changed();
    });
    changed
}

fn sync_panel_state_from_config(
    panel_state: &mut KartTuningPanelState,
    config: &GameConfig,
) -> Result<(), String> {
    let kart_id = config.game.app.player_kart.clone();
    let Some(kart) = config.karts_by_id.get(&kart_id) else {
        return Err(format!(
            "Kart tuning panel: player kart `{kart_id}` not found in config."
        ));
    };

    panel_state.source_kart_id = kart_id;
    panel_state.draft = Some(kart.clone());
    Ok(())
}

/// Updates both the id index and the raw list so a later reload starts
/// from the tuned values.
fn apply_kart_tuning_to_runtime_config(config: &mut GameConfig, draft: &KartConfig) {
    config
        .karts_by_id
        .insert(draft.id.clone(), draft.clone());
    if let Some(kart) = config.karts.karts.iter_mut().find(|k| k.id == draft.id) {
        *kart = draft.clone();
    }
}

fn keybind_overlay_text() -> &'static str {
    "Keybinds\n\
H - Toggle this panel\n\
T - Toggle kart tuning panel\n\
F5 - Hot-reload config\n\
W / Up - Accelerate\n\
S / Down - Brake / reverse\n\
A D / Left Right - Steer\n\
Space - Drift / hop\n\
Left Shift - Boost\n\
E - Use item\n\
Esc - End mode early\n\
R - Results -> restart\n\
Q - Quit from results"
}
