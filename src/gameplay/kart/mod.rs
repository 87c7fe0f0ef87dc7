pub mod body;
pub mod boost;
pub mod suspension;
pub mod walls;

use crate::config::{GameConfig, KartConfig};
use crate::gameplay::surfaces::SurfaceProperties;
use crate::states::GameState;
use bevy::prelude::*;
use bevy_rapier3d::prelude::*;
use boost::BoostState;

const KART_BODY_DENSITY: f32 = 80.0;
const KART_COLLIDER_HEIGHT_M: f32 = 0.6;
const LAND_EVENT_MIN_GAP_S: f32 = 0.2;
const LAND_EVENT_MIN_DOWN_SPEED_MPS: f32 = 1.0;
const TURN_RATE_SCALE: f32 = 100.0;

pub struct KartGameplayPlugin;

impl Plugin for KartGameplayPlugin {
    fn build(&self, app: &mut App) {
        app.init_resource::<KartInputBindings>()
            .add_message::<KartJumpEvent>()
            .add_message::<KartLandEvent>()
            .add_message::<BoostStartEvent>()
            .add_message::<BoostFailEvent>()
            .add_message::<WallHitEvent>()
            .add_message::<SpinOutEvent>()
            .add_systems(OnExit(GameState::InMode), cleanup_karts)
            .add_systems(
                Update,
                (
                    read_player_kart_input,
                    suspension::sample_kart_suspension,
                    walls::probe_wall_contacts,
                    body::step_kart_bodies,
                    body::drive_rotator_visuals,
                )
                    .chain()
                    .in_set(super::SimSet::KartPhysics)
                    .run_if(in_state(GameState::InMode))
                    .run_if(resource_exists::<GameConfig>),
            );
    }
}

/// Core kart entity marker; `kart_id` selects the preset in `karts.toml`.
#[derive(Component, Debug, Clone)]
pub struct Kart {
    pub kart_id: String,
    /// Inputs are ignored while false (pre-countdown, eliminated, ...).
    pub active: bool,
}

#[derive(Component, Debug, Clone, Copy)]
pub struct PlayerKart;

#[derive(Component, Debug, Clone, Copy)]
pub struct AiKart;

/// Child transform that owns the kart's facing. The rigid body itself has
/// rotation locked; all steering rotates this entity.
#[derive(Component, Debug, Clone, Copy)]
pub struct KartRotator;

#[derive(Component, Debug, Clone, Copy)]
pub struct RotatorLink {
    pub rotator: Entity,
}

#[derive(Component, Debug, Clone, Default)]
pub struct KartInputState {
    pub accel: f32,
    pub brake: f32,
    pub steer: f32,
    pub drift: bool,
    pub drift_just_pressed: bool,
    pub drift_just_released: bool,
    pub boost: bool,
    pub boost_just_pressed: bool,
    pub item_just_pressed: bool,
}

impl KartInputState {
    pub fn set_accel(&mut self, value: f32) {
        self.accel = value.clamp(0.0, 1.0);
    }

    pub fn set_brake(&mut self, value: f32) {
        self.brake = value.clamp(0.0, 1.0);
    }

    pub fn set_steer(&mut self, value: f32) {
        self.steer = value.clamp(-1.0, 1.0);
    }

    pub fn set_drift(&mut self, pressed: bool) {
        self.drift_just_pressed = pressed && !self.drift;
        self.drift_just_released = !pressed && self.drift;
        self.drift = pressed;
    }

    pub fn set_boost(&mut self, pressed: bool) {
        self.boost_just_pressed = pressed && !self.boost;
        self.boost = pressed;
    }
}

#[derive(Component, Debug, Clone)]
pub struct KartMotion {
    pub grounded: bool,
    pub air_grounded: bool,
    pub was_grounded: bool,
    /// Smoothed contact normal the kart aligns to while grounded.
    pub ground_normal: Vec3,
    pub up_dir: Vec3,
    pub local_vel: Vec3,
    pub burnout: bool,
    pub target_turn_speed: f32,
    pub air_time: f32,
    pub jump_time: f32,
    pub jumped: bool,
    pub time_since_land: f32,
    pub boost_pad_timer: f32,
}

impl Default for KartMotion {
    fn default() -> Self {
        Self {
            grounded: false,
            air_grounded: false,
            was_grounded: false,
            ground_normal: Vec3::Y,
            up_dir: Vec3::Y,
            local_vel: Vec3::ZERO,
            burnout: false,
            target_turn_speed: 0.0,
            air_time: 0.0,
            jump_time: 0.0,
            jumped: false,
            time_since_land: LAND_EVENT_MIN_GAP_S,
            boost_pad_timer: 0.0,
        }
    }
}

#[derive(Component, Debug, Clone)]
pub struct DriftState {
    pub drifting: bool,
    pub drift_dir: f32,
    pub drift_swing_time: f32,
    /// The drift button must be seen released before a new drift can start.
    pub release_gate_open: bool,
}

impl Default for DriftState {
    fn default() -> Self {
        Self {
            drifting: false,
            drift_dir: 0.0,
            drift_swing_time: 0.0,
            release_gate_open: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SpinAxis {
    #[default]
    Yaw,
    Pitch,
    Roll,
}

impl SpinAxis {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "pitch" => Self::Pitch,
            "roll" => Self::Roll,
            _ => Self::Yaw,
        }
    }
}

#[derive(Component, Debug, Clone, Default)]
pub struct SpinOutState {
    pub active: bool,
    pub axis: SpinAxis,
    pub current_angle_rad: f32,
    pub target_angle_rad: f32,
    pub direction: f32,
}

impl SpinOutState {
    pub fn begin(&mut self, axis: SpinAxis, spin_count: u32, direction: f32) {
        self.active = true;
        self.axis = axis;
        self.current_angle_rad = 0.0;
        self.target_angle_rad = spin_count.max(1) as f32 * std::f32::consts::TAU;
        self.direction = if direction < 0.0 { -1.0 } else { 1.0 };
    }
}

#[derive(Component, Debug, Clone, Default)]
pub struct WallContactState {
    pub touching: bool,
    pub contact_normal: Vec3,
    pub hit_cooldown: f32,
    pub bounce_turn: f32,
}

#[derive(Debug, Clone, Default)]
pub struct WheelState {
    pub hardpoint: Vec3,
    pub grounded: bool,
    pub contact_point: Vec3,
    pub contact_normal: Vec3,
    pub contact_distance: f32,
    pub surface: SurfaceProperties,
    pub sliding: bool,
}

#[derive(Component, Debug, Clone, Default)]
pub struct KartWheels {
    pub wheels: Vec<WheelState>,
    pub cast_cursor: usize,
    pub corner_cursor: usize,
    pub aggregate: suspension::SuspensionAggregate,
}

#[derive(Component, Debug, Clone, Default)]
pub struct KartBoost {
    pub state: BoostState,
}

#[derive(Message, Debug, Clone, Copy)]
pub struct KartJumpEvent {
    pub kart: Entity,
}

#[derive(Message, Debug, Clone, Copy)]
pub struct KartLandEvent {
    pub kart: Entity,
    pub impact_speed_mps: f32,
}

#[derive(Message, Debug, Clone, Copy)]
pub struct BoostStartEvent {
    pub kart: Entity,
}

#[derive(Message, Debug, Clone, Copy)]
pub struct BoostFailEvent {
    pub kart: Entity,
}

#[derive(Message, Debug, Clone, Copy)]
pub struct WallHitEvent {
    pub kart: Entity,
    pub contact_point: Vec3,
    pub contact_normal: Vec3,
    pub relative_speed_mps: f32,
}

#[derive(Message, Debug, Clone, Copy)]
pub struct SpinOutEvent {
    pub kart: Entity,
}

#[derive(Resource, Debug, Clone)]
pub struct KartInputBindings {
    pub accelerate: Vec<KeyCode>,
    pub brake: Vec<KeyCode>,
    pub steer_left: Vec<KeyCode>,
    pub steer_right: Vec<KeyCode>,
    pub drift: Vec<KeyCode>,
    pub boost: Vec<KeyCode>,
    pub item: Vec<KeyCode>,
}

impl Default for KartInputBindings {
    fn default() -> Self {
        Self {
            accelerate: vec![KeyCode::KeyW, KeyCode::ArrowUp],
            brake: vec![KeyCode::KeyS, KeyCode::ArrowDown],
            steer_left: vec![KeyCode::KeyA, KeyCode::ArrowLeft],
            steer_right: vec![KeyCode::KeyD, KeyCode::ArrowRight],
            drift: vec![KeyCode::Space],
            boost: vec![KeyCode::ShiftLeft],
            item: vec![KeyCode::KeyE],
        }
    }
}

fn read_player_kart_input(
    keyboard: Res<ButtonInput<KeyCode>>,
    bindings: Res<KartInputBindings>,
    mut player_query: Query<(&Kart, &mut KartInputState), With<PlayerKart>>,
) {
    let Ok((kart, mut input)) = player_query.single_mut() else {
        return;
    };
    if !kart.active {
        return;
    }

    let pressed = |keys: &Vec<KeyCode>| keys.iter().any(|key| keyboard.pressed(*key));

    input.set_accel(if pressed(&bindings.accelerate) { 1.0 } else { 0.0 });
    input.set_brake(if pressed(&bindings.brake) { 1.0 } else { 0.0 });
    let steer = (pressed(&bindings.steer_right) as i32 - pressed(&bindings.steer_left) as i32)
        as f32;
    input.set_steer(steer);
    input.set_drift(pressed(&bindings.drift));
    input.set_boost(pressed(&bindings.boost));
    input.item_just_pressed = bindings.item.iter().any(|key| keyboard.just_pressed(*key));
}

fn cleanup_karts(mut commands: Commands, kart_query: Query<Entity, With<Kart>>) {
    for entity in &kart_query {
        commands.entity(entity).try_despawn();
    }
}

/// Spawns one kart with its rotator child and wheel rig from the preset.
pub fn spawn_kart(
    commands: &mut Commands,
    kart_config: &KartConfig,
    position: Vec3,
    facing: Quat,
    is_player: bool,
) -> Entity {
    let wheels = kart_config
        .wheels
        .hardpoints
        .iter()
        .map(|hardpoint| WheelState {
            hardpoint: Vec3::from_array(*hardpoint),
            contact_normal: Vec3::Y,
            surface: SurfaceProperties::default(),
            ..default()
        })
        .collect();

    let half_extents = Vec3::new(
        kart_config.dimensions.side_width.max(0.1),
        KART_COLLIDER_HEIGHT_M * 0.5,
        (kart_config.dimensions.front_length + kart_config.dimensions.back_length).max(0.2) * 0.5,
    );

    let rotator = commands
        .spawn((
            Name::new("KartRotator"),
            KartRotator,
            Transform::from_rotation(facing),
            Visibility::Inherited,
        ))
        .id();

    let mut kart = commands.spawn((
        Name::new(format!("Kart:{}", kart_config.id)),
        Kart {
            kart_id: kart_config.id.clone(),
            active: false,
        },
        RotatorLink { rotator },
        KartInputState::default(),
        KartMotion::default(),
        DriftState::default(),
        SpinOutState::default(),
        WallContactState::default(),
        KartWheels {
            wheels,
            ..default()
        },
        KartBoost::default(),
        (
            RigidBody::Dynamic,
            Collider::cuboid(half_extents.x, half_extents.y, half_extents.z),
            ColliderMassProperties::Density(KART_BODY_DENSITY),
            LockedAxes::ROTATION_LOCKED,
            Velocity::default(),
            ExternalForce::default(),
            Damping::default(),
            GravityScale(0.0),
            ReadMassProperties::default(),
        ),
        Transform::from_translation(position),
    ));
    kart.add_child(rotator);

    if is_player {
        kart.insert(PlayerKart);
    } else {
        kart.insert(AiKart);
    }

    kart.id()
}

pub fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a + ((b - a) * t.clamp(0.0, 1.0))
}

pub fn move_towards(current: f32, target: f32, max_delta: f32) -> f32 {
    if (target - current).abs() <= max_delta {
        target
    } else {
        current + (target - current).signum() * max_delta
    }
}

/// Keeps whichever value has the larger magnitude, preserving its sign.
pub fn max_abs(a: f32, b: f32) -> f32 {
    if a.abs() >= b.abs() {
        a
    } else {
        b
    }
}

pub fn next_unit_random(seed: &mut u64) -> f32 {
    *seed = seed
        .wrapping_mul(6_364_136_223_846_793_005)
        .wrapping_add(1_442_695_040_888_963_407);
    ((*seed >> 32) as u32) as f32 / u32::MAX as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn input_setters_clamp_ranges() {
        let mut input = KartInputState::default();
        input.set_accel(2.5);
        input.set_brake(-1.0);
        input.set_steer(-7.0);

        assert_eq!(input.accel, 1.0);
        assert_eq!(input.brake, 0.0);
        assert_eq!(input.steer, -1.0);
    }

    #[test]
    fn drift_edge_detection_tracks_press_and_release() {
        let mut input = KartInputState::default();

        input.set_drift(true);
        assert!(input.drift_just_pressed);
        assert!(!input.drift_just_released);

        input.set_drift(true);
        assert!(!input.drift_just_pressed);

        input.set_drift(false);
        assert!(input.drift_just_released);
    }

    #[test]
    fn max_abs_keeps_the_larger_magnitude_with_sign() {
        assert_eq!(max_abs(-3.0, 2.0), -3.0);
        assert_eq!(max_abs(1.0, -4.0), -4.0);
        assert_eq!(max_abs(2.0, 2.0), 2.0);
    }
}
