//! Per-wheel raycast grounding. Wheels cast down the kart's local up axis;
//! the aggregate feeds the body step, which must run after this in the same
//! frame.

use super::*;
use crate::gameplay::surfaces::{BlendedTerrain, GroundSurfaceId, GroundSurfaceRegistry};

#[derive(Debug, Clone, Copy)]
pub struct SuspensionAggregate {
    pub grounded: bool,
    pub friction: f32,
    pub speed: f32,
    pub compression: f32,
    pub always_slide: bool,
}

impl Default for SuspensionAggregate {
    fn default() -> Self {
        Self {
            grounded: false,
            friction: 1.0,
            speed: 1.0,
            compression: 1.0,
            always_slide: false,
        }
    }
}

/// Best-contact-wins aggregation: any grounded wheel grounds the kart,
/// friction/speed take the maximum across grounded wheels, compression is
/// the mean normalized hit distance (0 = fully compressed, 1 = at full
/// suspension travel).
pub fn aggregate_wheels(wheels: &[WheelState], suspension_distance: f32) -> SuspensionAggregate {
    let suspension_distance = suspension_distance.max(f32::EPSILON);
    let mut aggregate = SuspensionAggregate::default();
    let mut grounded_count = 0;
    let mut compression_sum = 0.0;

    for wheel in wheels {
        if !wheel.grounded {
            continue;
        }
        if grounded_count == 0 {
            aggregate.friction = 0.0;
            aggregate.speed = 0.0;
        }
        grounded_count += 1;
        aggregate.friction = aggregate.friction.max(wheel.surface.friction);
        aggregate.speed = aggregate.speed.max(wheel.surface.speed);
        aggregate.always_slide |= wheel.surface.always_slide;
        compression_sum += (wheel.contact_distance / suspension_distance).clamp(0.0, 1.0);
    }

    if grounded_count > 0 {
        aggregate.grounded = true;
        aggregate.compression = compression_sum / grounded_count as f32;
    }

    aggregate
}

pub fn staggered_next(cursor: usize, wheel_count: usize) -> usize {
    if wheel_count == 0 {
        0
    } else {
        (cursor + 1) % wheel_count
    }
}

#[allow(clippy::type_complexity)]
pub(super) fn sample_kart_suspension(
    time: Res<Time>,
    config: Res<GameConfig>,
    registry: Res<GroundSurfaceRegistry>,
    rapier_context: ReadRapierContext,
    mut kart_query: Query<(
        Entity,
        &Kart,
        &Transform,
        &RotatorLink,
        &mut KartWheels,
        &mut KartMotion,
    )>,
    rotator_query: Query<&Transform, (With<KartRotator>, Without<Kart>)>,
    surface_query: Query<(Option<&GroundSurfaceId>, Option<&BlendedTerrain>)>,
) {
    let Ok(rapier_context) = rapier_context.single() else {
        return;
    };
    let dt = time.delta_secs().max(0.000_1);

    for (entity, kart, transform, rotator_link, mut wheels, mut motion) in &mut kart_query {
        let Some(kart_config) = config.karts_by_id.get(&kart.kart_id) else {
            continue;
        };
        let Ok(rotator_transform) = rotator_query.get(rotator_link.rotator) else {
            continue;
        };
        if wheels.wheels.is_empty() {
            continue;
        }

        let rotation = rotator_transform.rotation;
        let down = rotation * Vec3::NEG_Y;
        let suspension_distance = kart_config.wheels.suspension_distance.max(f32::EPSILON);
        let ray_length = suspension_distance + kart_config.wheels.wheel_radius.max(0.0);
        let ray_filter = QueryFilter::only_fixed()
            .exclude_sensors()
            .exclude_rigid_body(entity);

        let wheel_count = wheels.wheels.len();
        let cast_range = if kart_config.wheels.one_wheel_cast_per_frame {
            let cursor = staggered_next(wheels.cast_cursor, wheel_count);
            wheels.cast_cursor = cursor;
            cursor..cursor + 1
        } else {
            0..wheel_count
        };

        for wheel_index in cast_range {
            let wheel = &mut wheels.wheels[wheel_index];
            let origin = transform.translation + rotation * wheel.hardpoint;
            let hit = rapier_context.cast_ray_and_get_normal(
                origin,
                down,
                ray_length,
                false,
                ray_filter,
            );

            match hit {
                Some((hit_entity, intersection)) => {
                    wheel.grounded = true;
                    wheel.contact_point = intersection.point;
                    wheel.contact_normal = intersection.normal.normalize_or_zero();
                    wheel.contact_distance = (intersection.time_of_impact
                        - kart_config.wheels.wheel_radius)
                        .max(0.0);
                    wheel.surface = match surface_query.get(hit_entity) {
                        Ok((_, Some(_))) => registry.properties_at(intersection.point),
                        Ok((Some(surface_id), None)) => registry.properties(&surface_id.0),
                        _ => registry.default_properties(),
                    };
                }
                None => {
                    wheel.grounded = false;
                    wheel.contact_normal = Vec3::Y;
                    wheel.contact_distance = suspension_distance;
                    wheel.surface = SurfaceProperties::default();
                }
            }
        }

        wheels.aggregate = aggregate_wheels(&wheels.wheels, suspension_distance);

        // Corner casts cover small gaps (ramp lips) without full suspension.
        let dimensions = &kart_config.dimensions;
        let corner_offsets = [
            Vec3::new(dimensions.side_width, dimensions.corner_cast_offset, dimensions.front_length),
            Vec3::new(-dimensions.side_width, dimensions.corner_cast_offset, dimensions.front_length),
            Vec3::new(dimensions.side_width, dimensions.corner_cast_offset, -dimensions.back_length),
            Vec3::new(-dimensions.side_width, dimensions.corner_cast_offset, -dimensions.back_length),
        ];
        let corner_hit = |corner: Vec3| {
            rapier_context
                .cast_ray_and_get_normal(
                    transform.translation + rotation * corner,
                    down,
                    dimensions.corner_cast_distance.max(0.0),
                    false,
                    ray_filter,
                )
                .is_some()
        };
        let air_grounded = if dimensions.one_corner_cast_per_frame {
            let cursor = staggered_next(wheels.corner_cursor, corner_offsets.len());
            wheels.corner_cursor = cursor;
            corner_hit(corner_offsets[cursor])
        } else {
            corner_offsets.iter().copied().any(corner_hit)
        };

        motion.was_grounded = motion.grounded;
        motion.grounded = wheels.aggregate.grounded;
        motion.air_grounded = !wheels.aggregate.grounded && air_grounded;

        if wheels.aggregate.grounded {
            let mut raw_normal = Vec3::ZERO;
            for wheel in &wheels.wheels {
                if wheel.grounded {
                    raw_normal += wheel.contact_normal;
                }
            }
            let raw_normal = raw_normal.normalize_or(Vec3::Y);
            let blend =
                (kart_config.suspension.ground_normal_smooth_rate * dt).clamp(0.0, 1.0);
            motion.ground_normal = motion
                .ground_normal
                .lerp(raw_normal, blend)
                .normalize_or(Vec3::Y);
        } else {
            motion.ground_normal = motion
                .ground_normal
                .lerp(motion.up_dir, (dt * 4.0).clamp(0.0, 1.0))
                .normalize_or(Vec3::Y);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wheel(grounded: bool, distance: f32, friction: f32, speed: f32) -> WheelState {
        WheelState {
            grounded,
            contact_distance: distance,
            surface: SurfaceProperties {
                friction,
                speed,
                always_slide: false,
            },
            ..default()
        }
    }

    #[test]
    fn grounded_iff_any_wheel_hits() {
        let airborne = vec![wheel(false, 0.5, 1.0, 1.0); 4];
        assert!(!aggregate_wheels(&airborne, 0.5).grounded);

        let mut one_down = airborne.clone();
        one_down[2].grounded = true;
        one_down[2].contact_distance = 0.3;
        assert!(aggregate_wheels(&one_down, 0.5).grounded);
    }

    #[test]
    fn single_wheel_at_half_travel_compresses_to_exactly_half() {
        let wheels = vec![wheel(true, 0.25, 1.0, 1.0)];
        let aggregate = aggregate_wheels(&wheels, 0.5);

        assert_eq!(aggregate.compression, 0.5);
    }

    #[test]
    fn compression_stays_within_unit_range() {
        let wheels = vec![
            wheel(true, -0.2, 1.0, 1.0),
            wheel(true, 0.9, 1.0, 1.0),
            wheel(true, 0.1, 1.0, 1.0),
        ];
        let aggregate = aggregate_wheels(&wheels, 0.5);

        assert!(aggregate.compression >= 0.0 && aggregate.compression <= 1.0);
    }

    #[test]
    fn friction_and_speed_take_the_best_grounded_contact() {
        let wheels = vec![
            wheel(true, 0.2, 0.4, 0.7),
            wheel(true, 0.2, 1.3, 0.9),
            wheel(false, 0.5, 9.0, 9.0),
        ];
        let aggregate = aggregate_wheels(&wheels, 0.5);

        assert_eq!(aggregate.friction, 1.3);
        assert_eq!(aggregate.speed, 0.9);
    }

    #[test]
    fn airborne_aggregate_keeps_neutral_multipliers() {
        let wheels = vec![wheel(false, 0.5, 0.2, 0.2); 4];
        let aggregate = aggregate_wheels(&wheels, 0.5);

        assert_eq!(aggregate.friction, 1.0);
        assert_eq!(aggregate.speed, 1.0);
        assert_eq!(aggregate.compression, 1.0);
    }

    #[test]
    fn staggered_cursor_round_robins_deterministically() {
        let mut cursor = 0;
        let mut visits = Vec::new();
        for _ in 0..8 {
            cursor = staggered_next(cursor, 4);
            visits.push(cursor);
        }

        assert_eq!(visits, vec![1, 2, 3, 0, 1, 2, 3, 0]);
        assert_eq!(staggered_next(5, 0), 0);
    }
}
