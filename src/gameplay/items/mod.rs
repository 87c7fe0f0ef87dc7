//! Items and track features: equip/cast bookkeeping, boost pads, spin-out
//! hazards, item givers, and simulated projectiles.

use crate::config::{GameConfig, ItemConfig, TrackConfig};
use crate::gameplay::kart::{
    boost::BoostParams, next_unit_random, BoostStartEvent, DriftState, Kart, KartBoost,
    KartInputState, KartMotion, KartRotator, RotatorLink, SpinAxis, SpinOutEvent, SpinOutState,
};
use crate::gameplay::waypoints::{RapierTerrainProbe, TerrainProbe};
use crate::states::GameState;
use bevy::prelude::*;
use bevy_rapier3d::prelude::*;

const PROJECTILE_HIT_RADIUS_M: f32 = 1.2;
const PROJECTILE_HOVER_HEIGHT_M: f32 = 0.5;
const PROJECTILE_GROUND_PROBE_M: f32 = 5.0;
const PROJECTILE_APPROACH_RATE: f32 = 2.0;

pub struct ItemSystemPlugin;

impl Plugin for ItemSystemPlugin {
    fn build(&self, app: &mut App) {
        app.insert_resource(ItemRng(0x51_AB_71))
            .add_message::<ItemCastEvent>()
            .add_message::<ItemGivenEvent>()
            .add_message::<ProjectileHitEvent>()
            .add_systems(OnExit(GameState::InMode), cleanup_track_features)
            .add_systems(
                Update,
                (
                    cast_equipped_items,
                    refresh_item_givers,
                    apply_boost_pads,
                    trigger_hazards,
                    simulate_projectiles,
                )
                    .chain()
                    .in_set(super::SimSet::Agents)
                    .run_if(in_state(GameState::InMode))
                    .run_if(resource_exists::<GameConfig>),
            );
    }
}

#[derive(Resource, Debug, Clone, Copy)]
pub struct ItemRng(pub u64);

#[derive(Message, Debug, Clone)]
pub struct ItemCastEvent {
    pub kart: Entity,
    pub item_id: String,
}

#[derive(Message, Debug, Clone)]
pub struct ItemGivenEvent {
    pub kart: Entity,
    pub item_id: String,
}

#[derive(Message, Debug, Clone, Copy)]
pub struct ProjectileHitEvent {
    pub caster: Entity,
    pub victim: Entity,
}

/// Per-kart equipped item and ammo.
#[derive(Component, Debug, Clone, Default)]
pub struct ItemCaster {
    pub equipped: Option<String>,
    pub ammo: u32,
    pub cast_timer: f32,
}

impl ItemCaster {
    pub fn equip(&mut self, item_id: String, ammo: u32) {
        self.equipped = Some(item_id);
        self.ammo = ammo;
    }

    /// Consumes one shot when an item is equipped, ammo remains, and the
    /// cast interval has elapsed. Returns the cast item id.
    pub fn try_cast(&mut self, min_cast_interval: f32) -> Option<String> {
        if self.cast_timer > 0.0 || self.ammo == 0 {
            return None;
        }
        let item_id = self.equipped.clone()?;
        self.ammo -= 1;
        self.cast_timer = min_cast_interval.max(0.0);
        if self.ammo == 0 {
            self.equipped = None;
        }
        Some(item_id)
    }
}

#[derive(Component, Debug, Clone)]
pub struct BoostPad {
    pub radius: f32,
    pub boost_amount: f32,
    pub boost_force: f32,
    pub continuous: bool,
    pub delay_interval: f32,
}

#[derive(Component, Debug, Clone)]
pub struct Hazard {
    pub radius: f32,
    pub spin_axis: SpinAxis,
    pub spin_count: u32,
}

#[derive(Component, Debug, Clone)]
pub struct ItemGiver {
    pub radius: f32,
    /// Fixed item id, or a random pick from the catalog when absent.
    pub item: Option<String>,
    pub ammo: u32,
    pub cooldown: f32,
    pub cooldown_timer: f32,
}

impl ItemGiver {
    /// The trigger disables itself for the cooldown after each grant.
    pub fn try_give(&mut self) -> bool {
        if self.cooldown_timer > 0.0 {
            return false;
        }
        self.cooldown_timer = self.cooldown.max(0.0);
        true
    }
}

/// A cast projectile in flight; integrated manually against raycasts.
#[derive(Component, Debug, Clone)]
pub struct Projectile {
    pub item_id: String,
    pub caster: Entity,
    pub caster_ignore_timer: f32,
    pub lifetime: f32,
    pub bounces_left: u32,
    pub velocity: Vec3,
}

/// Marker for everything spawned from a track definition, for teardown.
#[derive(Component, Debug, Clone, Copy)]
pub struct TrackFeature;

/// Spawns the pads, hazards, and givers a track definition declares.
pub fn spawn_track_features(commands: &mut Commands, track: &TrackConfig) {
    for pad in &track.boost_pads {
        commands.spawn((
            Name::new("BoostPad"),
            TrackFeature,
            BoostPad {
                radius: pad.radius,
                boost_amount: pad.boost_amount,
                boost_force: pad.boost_force,
                continuous: pad.continuous,
                delay_interval: pad.delay_interval,
            },
            Transform::from_translation(Vec3::from_array(pad.position)),
        ));
    }
    for hazard in &track.hazards {
        commands.spawn((
            Name::new("Hazard"),
            TrackFeature,
            Hazard {
                radius: hazard.radius,
                spin_axis: SpinAxis::parse(&hazard.spin_axis),
                spin_count: hazard.spin_count,
            },
            Transform::from_translation(Vec3::from_array(hazard.position)),
        ));
    }
    for giver in &track.item_givers {
        commands.spawn((
            Name::new("ItemGiver"),
            TrackFeature,
            ItemGiver {
                radius: giver.radius,
                item: giver.item.clone(),
                ammo: giver.ammo,
                cooldown: giver.cooldown,
                cooldown_timer: 0.0,
            },
            Transform::from_translation(Vec3::from_array(giver.position)),
        ));
    }
}

fn cleanup_track_features(
    mut commands: Commands,
    feature_query: Query<Entity, Or<(With<TrackFeature>, With<Projectile>)>>,
) {
    for entity in &feature_query {
        commands.entity(entity).try_despawn();
    }
}

#[allow(clippy::type_complexity)]
fn cast_equipped_items(
    mut commands: Commands,
    time: Res<Time>,
    config: Res<GameConfig>,
    mut kart_query: Query<(
        Entity,
        &Kart,
        &Transform,
        &RotatorLink,
        &Velocity,
        &KartInputState,
        &SpinOutState,
        &mut ItemCaster,
        &mut KartBoost,
    )>,
    rotator_query: Query<&Transform, (With<KartRotator>, Without<Kart>)>,
    mut cast_events: MessageWriter<ItemCastEvent>,
    mut boost_start_events: MessageWriter<BoostStartEvent>,
) {
    let dt = time.delta_secs().max(0.000_1);

    for (entity, kart, transform, rotator_link, velocity, input, spin, mut caster, mut boost) in
        &mut kart_query
    {
        caster.cast_timer = (caster.cast_timer - dt).max(0.0);
        if !kart.active || spin.active || !input.item_just_pressed {
            continue;
        }
        let Some(item_id) = caster.try_cast(config.game.items.min_cast_interval) else {
            continue;
        };
        let Some(item) = config.items_by_id.get(&item_id) else {
            warn!("cast item '{item_id}' is not in the catalog");
            continue;
        };
        let Ok(rotator_transform) = rotator_query.get(rotator_link.rotator) else {
            continue;
        };
        let Some(kart_config) = config.karts_by_id.get(&kart.kart_id) else {
            continue;
        };

        match item.kind.as_str() {
            "boost" => {
                let params = BoostParams::from_config(&kart_config.boost);
                boost.state.add_boost(item.boost_amount, item.boost_force, &params);
                boost_start_events.write(BoostStartEvent { kart: entity });
            }
            _ => {
                let forward = rotator_transform.rotation * Vec3::Z;
                let inherited = velocity.linvel.dot(forward).max(0.0);
                commands.spawn((
                    Name::new(format!("Projectile:{item_id}")),
                    Projectile {
                        item_id: item_id.clone(),
                        caster: entity,
                        caster_ignore_timer: item.caster_ignore_time,
                        lifetime: item.lifetime,
                        bounces_left: item.max_bounces,
                        velocity: forward * (item.start_speed + inherited),
                    },
                    Transform::from_translation(
                        transform.translation
                            + forward * (kart_config.dimensions.front_length + 0.5)
                            + Vec3::Y * PROJECTILE_HOVER_HEIGHT_M,
                    ),
                ));
            }
        }
        cast_events.write(ItemCastEvent {
            kart: entity,
            item_id,
        });
    }
}

fn refresh_item_givers(
    time: Res<Time>,
    config: Res<GameConfig>,
    mut rng: ResMut<ItemRng>,
    mut giver_query: Query<(&Transform, &mut ItemGiver)>,
    mut kart_query: Query<(Entity, &Kart, &Transform, &mut ItemCaster)>,
    mut given_events: MessageWriter<ItemGivenEvent>,
) {
    let dt = time.delta_secs().max(0.000_1);

    for (giver_transform, mut giver) in &mut giver_query {
        giver.cooldown_timer = (giver.cooldown_timer - dt).max(0.0);

        for (entity, kart, kart_transform, mut caster) in &mut kart_query {
            if !kart.active {
                continue;
            }
            let distance_sq =
                (kart_transform.translation - giver_transform.translation).length_squared();
            if distance_sq > giver.radius * giver.radius {
                continue;
            }
            if !giver.try_give() {
                continue;
            }
            let item_id = match &giver.item {
                Some(item_id) => item_id.clone(),
                None => {
                    let catalog = &config.items.items;
                    if catalog.is_empty() {
                        continue;
                    }
                    let pick = (next_unit_random(&mut rng.0) * catalog.len() as f32) as usize;
                    catalog[pick.min(catalog.len() - 1)].id.clone()
                }
            };
            caster.equip(item_id.clone(), giver.ammo);
            given_events.write(ItemGivenEvent {
                kart: entity,
                item_id,
            });
        }
    }
}

fn apply_boost_pads(
    config: Res<GameConfig>,
    pad_query: Query<(&Transform, &BoostPad)>,
    mut kart_query: Query<(Entity, &Kart, &Transform, &mut KartMotion, &mut KartBoost)>,
    mut boost_start_events: MessageWriter<BoostStartEvent>,
) {
    for (pad_transform, pad) in &pad_query {
        for (entity, kart, kart_transform, mut motion, mut boost) in &mut kart_query {
            let distance_sq =
                (kart_transform.translation - pad_transform.translation).length_squared();
            if distance_sq > pad.radius * pad.radius {
                continue;
            }
            if !pad.continuous && motion.boost_pad_timer > 0.0 {
                continue;
            }
            let Some(kart_config) = config.karts_by_id.get(&kart.kart_id) else {
                continue;
            };
            let params = BoostParams::from_config(&kart_config.boost);
            boost.state.add_boost(pad.boost_amount, pad.boost_force, &params);
            motion.boost_pad_timer = pad.delay_interval;
            boost_start_events.write(BoostStartEvent { kart: entity });
        }
    }
}

#[allow(clippy::type_complexity)]
fn trigger_hazards(
    hazard_query: Query<(&Transform, &Hazard)>,
    mut kart_query: Query<(
        Entity,
        &Transform,
        &mut SpinOutState,
        &mut DriftState,
        &mut KartBoost,
        &KartInputState,
    )>,
    mut spin_events: MessageWriter<SpinOutEvent>,
) {
    for (hazard_transform, hazard) in &hazard_query {
        for (entity, kart_transform, mut spin, mut drift, mut boost, input) in &mut kart_query {
            if spin.active {
                continue;
            }
            let distance_sq =
                (kart_transform.translation - hazard_transform.translation).length_squared();
            if distance_sq > hazard.radius * hazard.radius {
                continue;
            }
            begin_spin_out(
                &mut spin,
                &mut drift,
                &mut boost,
                hazard.spin_axis,
                hazard.spin_count,
                if input.steer < 0.0 { -1.0 } else { 1.0 },
            );
            spin_events.write(SpinOutEvent { kart: entity });
        }
    }
}

/// Spin-outs cancel the drift and everything the boost machine had in
/// flight, then run the timed rotation in the body step.
pub fn begin_spin_out(
    spin: &mut SpinOutState,
    drift: &mut DriftState,
    boost: &mut KartBoost,
    axis: SpinAxis,
    spin_count: u32,
    direction: f32,
) {
    spin.begin(axis, spin_count, direction);
    drift.drifting = false;
    drift.drift_dir = 0.0;
    boost.state.cancel();
}

#[allow(clippy::type_complexity)]
fn simulate_projectiles(
    mut commands: Commands,
    time: Res<Time>,
    config: Res<GameConfig>,
    rapier_context: ReadRapierContext,
    mut projectile_query: Query<(Entity, &mut Transform, &mut Projectile)>,
    mut kart_query: Query<
        (
            Entity,
            &Transform,
            &mut SpinOutState,
            &mut DriftState,
            &mut KartBoost,
        ),
        (With<Kart>, Without<Projectile>),
    >,
    mut spin_events: MessageWriter<SpinOutEvent>,
    mut hit_events: MessageWriter<ProjectileHitEvent>,
) {
    let Ok(rapier_context) = rapier_context.single() else {
        return;
    };
    let probe = RapierTerrainProbe::new(&rapier_context);
    let dt = time.delta_secs().max(0.000_1);
    let ray_filter = QueryFilter::only_fixed().exclude_sensors();

    for (entity, mut transform, mut projectile) in &mut projectile_query {
        let Some(item) = config.items_by_id.get(&projectile.item_id) else {
            commands.entity(entity).try_despawn();
            continue;
        };

        projectile.lifetime -= dt;
        projectile.caster_ignore_timer = (projectile.caster_ignore_timer - dt).max(0.0);
        if projectile.lifetime <= 0.0 {
            commands.entity(entity).try_despawn();
            continue;
        }

        // Homing bends the heading toward the chosen kart.
        let heading = projectile.velocity.normalize_or(Vec3::Z);
        let candidates: Vec<Vec3> = kart_query
            .iter()
            .filter(|(kart_entity, ..)| {
                *kart_entity != projectile.caster || projectile.caster_ignore_timer <= 0.0
            })
            .map(|(_, kart_transform, ..)| kart_transform.translation)
            .collect();
        let target = select_homing_target(
            transform.translation,
            heading,
            &candidates,
            item.max_homing_dist,
            item.min_homing_angle,
            item.prioritize_in_front,
            |from, to| probe.line_blocked(from, to),
        );

        let mut direction = heading;
        if let Some(target_position) = target {
            let desired = (target_position - transform.translation).normalize_or(heading);
            direction = direction
                .lerp(desired, (item.homing_accuracy * dt).clamp(0.0, 1.0))
                .normalize_or(heading);
        }
        let mut speed = projectile.velocity.length();
        speed += (item.target_speed - speed) * (PROJECTILE_APPROACH_RATE * dt).clamp(0.0, 1.0);
        projectile.velocity = direction * speed;

        // Ground hug: ride a fixed height over terrain, otherwise fall.
        let probe_origin = transform.translation + Vec3::Y * PROJECTILE_HOVER_HEIGHT_M;
        match rapier_context.cast_ray_and_get_normal(
            probe_origin,
            Vec3::NEG_Y,
            PROJECTILE_GROUND_PROBE_M,
            false,
            ray_filter,
        ) {
            Some((_, hit)) => {
                let target_y = hit.point.y + PROJECTILE_HOVER_HEIGHT_M;
                transform.translation.y = transform.translation.y
                    + (target_y - transform.translation.y) * (10.0 * dt).clamp(0.0, 1.0);
                projectile.velocity.y = 0.0;
            }
            None => {
                projectile.velocity.y += item.gravity_add * dt;
            }
        }

        // Wall bounce along the travel ray.
        let travel = projectile.velocity * dt;
        let travel_len = travel.length();
        if travel_len > f32::EPSILON {
            if let Some((_, hit)) = rapier_context.cast_ray_and_get_normal(
                transform.translation,
                travel / travel_len,
                travel_len + 0.2,
                false,
                ray_filter,
            ) {
                if hit.normal.dot(Vec3::Y).abs() < 0.5 {
                    if projectile.bounces_left == 0 {
                        if item.destroy_on_wall_hit {
                            commands.entity(entity).try_despawn();
                        }
                        continue;
                    }
                    projectile.bounces_left -= 1;
                    projectile.velocity =
                        reflect_velocity(projectile.velocity, hit.normal, item.bounce_reflect_force);
                }
            }
        }

        transform.translation += projectile.velocity * dt;

        // Kart impact.
        let mut hit_kart = None;
        for (kart_entity, kart_transform, spin, ..) in &kart_query {
            if kart_entity == projectile.caster && projectile.caster_ignore_timer > 0.0 {
                continue;
            }
            if spin.active {
                continue;
            }
            let distance_sq =
                (kart_transform.translation - transform.translation).length_squared();
            if distance_sq <= PROJECTILE_HIT_RADIUS_M * PROJECTILE_HIT_RADIUS_M {
                hit_kart = Some(kart_entity);
                break;
            }
        }
        if let Some(kart_entity) = hit_kart {
            if let Ok((_, _, mut spin, mut drift, mut boost)) = kart_query.get_mut(kart_entity) {
                begin_spin_out(
                    &mut spin,
                    &mut drift,
                    &mut boost,
                    SpinAxis::parse(&item.spin_axis),
                    item.spin_count,
                    1.0,
                );
                spin_events.write(SpinOutEvent { kart: kart_entity });
                hit_events.write(ProjectileHitEvent {
                    caster: projectile.caster,
                    victim: kart_entity,
                });
            }
            commands.entity(entity).try_despawn();
        }
    }
}

/// Reflects off a wall, scaling the outgoing speed.
pub fn reflect_velocity(velocity: Vec3, normal: Vec3, reflect_force: f32) -> Vec3 {
    (velocity - 2.0 * velocity.dot(normal) * normal) * reflect_force.max(0.0)
}

/// Picks the homing target: nearest eligible kart within range, inside the
/// seek cone, and with a clear line of sight, with in-front karts preferred
/// when configured.
pub fn select_homing_target(
    origin: Vec3,
    forward: Vec3,
    candidates: &[Vec3],
    max_dist: f32,
    min_homing_angle_deg: f32,
    prioritize_in_front: bool,
    line_blocked: impl Fn(Vec3, Vec3) -> bool,
) -> Option<Vec3> {
    let cone_cos = min_homing_angle_deg.to_radians().cos();
    let mut best: Option<(Vec3, f32, bool)> = None;

    for position in candidates {
        let offset = *position - origin;
        let distance = offset.length();
        if distance > max_dist || distance < f32::EPSILON {
            continue;
        }
        let toward = offset / distance;
        let facing_dot = forward.dot(toward);
        if facing_dot < cone_cos {
            continue;
        }
        if line_blocked(origin, *position) {
            continue;
        }
        let in_front = facing_dot > 0.0;
        let better = match best {
            None => true,
            Some((_, best_distance, best_in_front)) => {
                if prioritize_in_front && in_front != best_in_front {
                    in_front
                } else {
                    distance < best_distance
                }
            }
        };
        if better {
            best = Some((*position, distance, in_front));
        }
    }

    best.map(|(position, ..)| position)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caster_respects_ammo_and_interval() {
        let mut caster = ItemCaster::default();
        caster.equip("rocket".to_string(), 2);

        assert_eq!(caster.try_cast(1.0), Some("rocket".to_string()));
        // Interval not elapsed.
        assert_eq!(caster.try_cast(1.0), None);

        caster.cast_timer = 0.0;
        assert_eq!(caster.try_cast(1.0), Some("rocket".to_string()));
        assert_eq!(caster.ammo, 0);
        assert_eq!(caster.equipped, None);

        caster.cast_timer = 0.0;
        assert_eq!(caster.try_cast(1.0), None);
    }

    #[test]
    fn giver_disables_itself_for_the_cooldown() {
        let mut giver = ItemGiver {
            radius: 2.0,
            item: None,
            ammo: 1,
            cooldown: 1.5,
            cooldown_timer: 0.0,
        };

        assert!(giver.try_give());
        assert_eq!(giver.cooldown_timer, 1.5);
        assert!(!giver.try_give());

        giver.cooldown_timer = 0.0;
        assert!(giver.try_give());
    }

    #[test]
    fn homing_prefers_the_nearest_kart_in_front() {
        let near_front = Vec3::new(0.0, 0.0, 10.0);
        let far_front = Vec3::new(0.0, 0.0, 20.0);
        let candidates = vec![far_front, near_front];

        let target =
            select_homing_target(Vec3::ZERO, Vec3::Z, &candidates, 30.0, 90.0, true, |_, _| false);
        assert_eq!(target, Some(near_front));
    }

    #[test]
    fn homing_ignores_karts_outside_range_or_cone() {
        let too_far = Vec3::new(0.0, 0.0, 50.0);
        let behind = Vec3::new(0.0, 0.0, -5.0);
        let candidates = vec![too_far, behind];

        let target =
            select_homing_target(Vec3::ZERO, Vec3::Z, &candidates, 30.0, 90.0, true, |_, _| false);
        assert_eq!(target, None);
    }

    #[test]
    fn homing_skips_karts_behind_walls() {
        let hidden = Vec3::new(0.0, 0.0, 10.0);
        let clear = Vec3::new(3.0, 0.0, 18.0);
        let candidates = vec![hidden, clear];

        let target = select_homing_target(Vec3::ZERO, Vec3::Z, &candidates, 30.0, 90.0, true, |_, to| {
            to == hidden
        });
        assert_eq!(target, Some(clear));

        // With nothing in the way the nearer kart wins again.
        let open =
            select_homing_target(Vec3::ZERO, Vec3::Z, &candidates, 30.0, 90.0, true, |_, _| false);
        assert_eq!(open, Some(hidden));
    }

    #[test]
    fn wall_reflection_mirrors_and_scales_velocity() {
        let reflected = reflect_velocity(Vec3::new(3.0, 0.0, 4.0), Vec3::X, 1.0);
        assert!((reflected - Vec3::new(-3.0, 0.0, 4.0)).length() < 1e-5);

        let damped = reflect_velocity(Vec3::new(3.0, 0.0, 4.0), Vec3::X, 0.5);
        assert!((damped.length() - 2.5).abs() < 1e-5);
    }
}
