use crate::config::GameConfig;
use crate::gameplay::items::{BoostPad, Hazard, ItemGiver, Projectile};
use crate::gameplay::kart::walls::{WallSurface, WALL_COLLISION_GROUP};
use crate::gameplay::kart::{Kart, KartRotator, PlayerKart, RotatorLink};
use crate::gameplay::modes::ModeDirector;
use crate::gameplay::surfaces::GroundSurfaceId;
use bevy::app::AppExit;
use bevy::prelude::*;
use bevy_rapier3d::prelude::*;

const ARENA_HALF_EXTENT_M: f32 = 120.0;
const ARENA_WALL_HEIGHT_M: f32 = 4.0;
const ARENA_WALL_THICKNESS_M: f32 = 1.0;
const CAMERA_BACK_M: f32 = 9.0;
const CAMERA_UP_M: f32 = 4.5;
const CAMERA_FOLLOW_RATE: f32 = 5.0;

#[derive(States, Debug, Clone, Copy, Eq, PartialEq, Hash, Default)]
pub enum GameState {
    #[default]
    Boot,
    Setup,
    InMode,
    Results,
}

pub struct GameStatePlugin;

impl Plugin for GameStatePlugin {
    fn build(&self, app: &mut App) {
        app.add_systems(Startup, setup_camera_and_light)
            .add_systems(OnEnter(GameState::Boot), enter_boot)
            .add_systems(Update, boot_to_setup.run_if(in_state(GameState::Boot)))
            .add_systems(OnEnter(GameState::Setup), spawn_arena)
            .add_systems(Update, (dress_karts, dress_track_features))
            .add_systems(
                Update,
                (follow_player_camera, in_mode_controls).run_if(in_state(GameState::InMode)),
            )
            .add_systems(OnEnter(GameState::Results), enter_results)
            .add_systems(OnExit(GameState::Results), cleanup_results_screen)
            .add_systems(
                Update,
                results_controls.run_if(in_state(GameState::Results)),
            );
    }
}

#[derive(Component)]
struct FollowCamera;

#[derive(Component)]
struct ArenaRoot;

#[derive(Component)]
struct ResultsScreenRoot;

fn setup_camera_and_light(mut commands: Commands) {
    commands.spawn((
        Name::new("FollowCamera"),
        FollowCamera,
        Camera3d::default(),
        Transform::from_xyz(0.0, 12.0, -18.0).looking_at(Vec3::ZERO, Vec3::Y),
    ));
    commands.spawn((
        Name::new("Sun"),
        DirectionalLight {
            illuminance: 9_000.0,
            shadows_enabled: true,
            ..default()
        },
        Transform::from_rotation(Quat::from_euler(EulerRot::XYZ, -0.9, 0.5, 0.0)),
    ));
}

fn enter_boot() {
    info!("Entered state: Boot");
}

fn boot_to_setup(
    config: Option<Res<GameConfig>>,
    mut next_state: ResMut<NextState<GameState>>,
) {
    if config.is_some() {
        next_state.set(GameState::Setup);
    }
}

/// Flat arena: a ground slab, a slow off-track ring, and perimeter barrier
/// walls. Spawned once; restarts reuse it.
fn spawn_arena(
    mut commands: Commands,
    config: Res<GameConfig>,
    mut meshes: ResMut<Assets<Mesh>>,
    mut materials: ResMut<Assets<StandardMaterial>>,
    arena_query: Query<(), With<ArenaRoot>>,
) {
    if !arena_query.is_empty() {
        return;
    }
    info!("Entered state: Setup");

    let ground_material = materials.add(StandardMaterial {
        base_color: Color::srgb(0.25, 0.28, 0.24),
        perceptual_roughness: 0.95,
        ..default()
    });
    let wall_material = materials.add(StandardMaterial {
        base_color: Color::srgb(0.55, 0.35, 0.25),
        perceptual_roughness: 0.8,
        ..default()
    });

    let span = ARENA_HALF_EXTENT_M;
    commands.spawn((
        Name::new("ArenaGround"),
        ArenaRoot,
        GroundSurfaceId(config.surfaces.default_surface.clone()),
        RigidBody::Fixed,
        Collider::cuboid(span, 0.5, span),
        Mesh3d(meshes.add(Cuboid::new(span * 2.0, 1.0, span * 2.0))),
        MeshMaterial3d(ground_material),
        Transform::from_xyz(0.0, -0.5, 0.0),
    ));

    let wall_mesh = meshes.add(Cuboid::new(
        span * 2.0,
        ARENA_WALL_HEIGHT_M,
        ARENA_WALL_THICKNESS_M * 2.0,
    ));
    let placements = [
        (Vec3::new(0.0, ARENA_WALL_HEIGHT_M * 0.5, span), 0.0_f32),
        (Vec3::new(0.0, ARENA_WALL_HEIGHT_M * 0.5, -span), 0.0),
        (
            Vec3::new(span, ARENA_WALL_HEIGHT_M * 0.5, 0.0),
            std::f32::consts::FRAC_PI_2,
        ),
        (
            Vec3::new(-span, ARENA_WALL_HEIGHT_M * 0.5, 0.0),
            std::f32::consts::FRAC_PI_2,
        ),
    ];
    for (translation, yaw) in placements {
        commands.spawn((
            Name::new("Barrier"),
            ArenaRoot,
            WallSurface,
            RigidBody::Fixed,
            Collider::cuboid(span, ARENA_WALL_HEIGHT_M * 0.5, ARENA_WALL_THICKNESS_M),
            CollisionGroups::new(WALL_COLLISION_GROUP, Group::ALL),
            Mesh3d(wall_mesh.clone()),
            MeshMaterial3d(wall_material.clone()),
            Transform::from_translation(translation).with_rotation(Quat::from_rotation_y(yaw)),
        ));
    }
}

/// Gives freshly spawned karts a body mesh under their rotator so the
/// visual follows the facing, not the rotation-locked rigid body.
fn dress_karts(
    mut commands: Commands,
    mut meshes: ResMut<Assets<Mesh>>,
    mut materials: ResMut<Assets<StandardMaterial>>,
    kart_query: Query<(&RotatorLink, Has<PlayerKart>), Added<Kart>>,
) {
    for (link, is_player) in &kart_query {
        let base_color = if is_player {
            Color::srgb(0.85, 0.25, 0.2)
        } else {
            Color::srgb(0.25, 0.45, 0.8)
        };
        let body = materials.add(StandardMaterial {
            base_color,
            perceptual_roughness: 0.6,
            ..default()
        });
        commands.entity(link.rotator).with_children(|rotator| {
            rotator.spawn((
                Name::new("KartBody"),
                Mesh3d(meshes.add(Cuboid::new(1.4, 0.5, 2.0))),
                MeshMaterial3d(body.clone()),
                Transform::from_xyz(0.0, 0.1, 0.0),
            ));
            rotator.spawn((
                Name::new("KartCanopy"),
                Mesh3d(meshes.add(Cuboid::new(0.8, 0.35, 0.9))),
                MeshMaterial3d(body),
                Transform::from_xyz(0.0, 0.5, -0.3),
            ));
        });
    }
}

#[allow(clippy::type_complexity)]
fn dress_track_features(
    mut commands: Commands,
    mut meshes: ResMut<Assets<Mesh>>,
    mut materials: ResMut<Assets<StandardMaterial>>,
    pad_query: Query<(Entity, &BoostPad), Added<BoostPad>>,
    hazard_query: Query<(Entity, &Hazard), Added<Hazard>>,
    giver_query: Query<(Entity, &ItemGiver), Added<ItemGiver>>,
    projectile_query: Query<Entity, Added<Projectile>>,
) {
    for (entity, pad) in &pad_query {
        commands.entity(entity).insert((
            Mesh3d(meshes.add(Cylinder::new(pad.radius, 0.1))),
            MeshMaterial3d(materials.add(StandardMaterial {
                base_color: Color::srgb(0.95, 0.6, 0.1),
                emissive: LinearRgba::rgb(0.6, 0.3, 0.0),
                ..default()
            })),
        ));
    }
    for (entity, hazard) in &hazard_query {
        commands.entity(entity).insert((
            Mesh3d(meshes.add(Cylinder::new(hazard.radius, 0.6))),
            MeshMaterial3d(materials.add(Color::srgb(0.7, 0.12, 0.12))),
        ));
    }
    for (entity, giver) in &giver_query {
        commands.entity(entity).insert((
            Mesh3d(meshes.add(Cuboid::new(giver.radius, giver.radius, giver.radius))),
            MeshMaterial3d(materials.add(Color::srgb(0.2, 0.8, 0.75))),
        ));
    }
    for entity in &projectile_query {
        commands.entity(entity).insert((
            Mesh3d(meshes.add(Sphere::new(0.35))),
            MeshMaterial3d(materials.add(Color::srgb(0.15, 0.55, 0.2))),
        ));
    }
}

/// Chase camera: hangs behind the rotator's facing, eased toward the target
/// so wall bounces read without snapping.
fn follow_player_camera(
    time: Res<Time>,
    player_query: Query<(&Transform, &RotatorLink), (With<PlayerKart>, Without<FollowCamera>)>,
    rotator_query: Query<&Transform, (With<KartRotator>, Without<FollowCamera>, Without<PlayerKart>)>,
    mut camera_query: Query<&mut Transform, With<FollowCamera>>,
) {
    let Ok((kart_transform, link)) = player_query.single() else {
        return;
    };
    let Ok(rotator) = rotator_query.get(link.rotator) else {
        return;
    };
    let Ok(mut camera) = camera_query.single_mut() else {
        return;
    };

    let forward = rotator.rotation * Vec3::Z;
    let flat_forward = Vec3::new(forward.x, 0.0, forward.z).normalize_or(Vec3::Z);
    let anchor = kart_transform.translation - flat_forward * CAMERA_BACK_M + Vec3::Y * CAMERA_UP_M;

    let blend = (CAMERA_FOLLOW_RATE * time.delta_secs()).clamp(0.0, 1.0);
    camera.translation = camera.translation.lerp(anchor, blend);
    camera.look_at(kart_transform.translation + Vec3::Y, Vec3::Y);
}

fn in_mode_controls(
    keyboard: Res<ButtonInput<KeyCode>>,
    mut next_state: ResMut<NextState<GameState>>,
) {
    if keyboard.just_pressed(KeyCode::Escape) {
        next_state.set(GameState::Results);
    }
}

fn enter_results(
    mut commands: Commands,
    director: Option<Res<ModeDirector>>,
    kart_query: Query<(&Kart, Has<PlayerKart>)>,
) {
    let mut lines = String::new();
    let mut player_rank: Option<usize> = None;
    if let Some(director) = director.as_ref() {
        for (rank, entity) in director.standings.iter().enumerate() {
            let Ok((kart, is_player)) = kart_query.get(*entity) else {
                continue;
            };
            if is_player {
                player_rank = Some(rank + 1);
            }
            lines.push_str(&format!(
                "{}. {}{}\n",
                rank + 1,
                kart.kart_id,
                if is_player { "  (you)" } else { "" }
            ));
        }
    }
    let title = match player_rank {
        Some(1) => "VICTORY".to_string(),
        Some(rank) => format!("FINISHED #{rank}"),
        None => "RESULTS".to_string(),
    };
    let summary_text = format!("{lines}\nR - Restart\nQ - Quit");

    commands
        .spawn((
            Name::new("ResultsOverlay"),
            ResultsScreenRoot,
            Node {
                width: Val::Percent(100.0),
                height: Val::Percent(100.0),
                justify_content: JustifyContent::Center,
                align_items: AlignItems::Center,
                ..default()
            },
            BackgroundColor(Color::srgba(0.01, 0.02, 0.03, 0.94)),
            ZIndex(300),
        ))
        .with_children(|parent| {
            parent
                .spawn((
                    Node {
                        width: Val::Percent(50.0),
                        max_width: Val::Px(720.0),
                        min_width: Val::Px(380.0),
                        flex_direction: FlexDirection::Column,
                        row_gap: Val::Px(10.0),
                        padding: UiRect::all(Val::Px(16.0)),
                        border: UiRect::all(Val::Px(1.0)),
                        ..default()
                    },
                    BackgroundColor(Color::srgba(0.08, 0.10, 0.13, 0.96)),
                    BorderColor::all(Color::srgba(0.56, 0.62, 0.68, 0.92)),
                ))
                .with_children(|panel| {
                    panel.spawn((
                        Text::new(title),
                        TextFont {
                            font_size: 52.0,
                            ..default()
                        },
                        TextColor(Color::srgb(0.94, 0.97, 1.00)),
                    ));
                    panel.spawn((
                        Text::new(summary_text),
                        TextFont {
                            font_size: 22.0,
                            ..default()
                        },
                        TextColor(Color::srgb(0.90, 0.94, 0.98)),
                    ));
                });
        });

    info!("Entered state: Results");
}

fn cleanup_results_screen(
    mut commands: Commands,
    results_screen_query: Query<Entity, With<ResultsScreenRoot>>,
) {
    for entity in &results_screen_query {
        commands.entity(entity).try_despawn();
    }
    commands.remove_resource::<ModeDirector>();
}

fn results_controls(
    keyboard: Res<ButtonInput<KeyCode>>,
    mut next_state: ResMut<NextState<GameState>>,
    mut exit: MessageWriter<AppExit>,
) {
    if keyboard.just_pressed(KeyCode::KeyR) {
        next_state.set(GameState::Setup);
    }

    if keyboard.just_pressed(KeyCode::KeyQ) {
        exit.write(AppExit::Success);
    }
}
