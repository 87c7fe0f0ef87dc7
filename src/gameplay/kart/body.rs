//! Per-step force integration for karts. Runs after suspension sampling and
//! wall probing in the same frame; the step order inside is load-bearing
//! because later terms read grounded/drift state computed by earlier ones.

use super::*;
use boost::{BoostInputs, BoostParams};

/// World up reference; gravity is applied along this with a negative add.
const GRAVITY_UP: Vec3 = Vec3::Y;

fn sign0(value: f32) -> f32 {
    if value.abs() < 0.001 {
        0.0
    } else {
        value.signum()
    }
}

fn project_on_plane(vector: Vec3, normal: Vec3) -> Vec3 {
    vector - normal * vector.dot(normal)
}

/// Quaternion with local +Z along `forward` and +Y along `up`.
fn facing(forward: Vec3, up: Vec3) -> Quat {
    let z = forward.normalize_or(Vec3::Z);
    let x = up.cross(z).normalize_or(Vec3::X);
    let y = z.cross(x);
    Quat::from_mat3(&Mat3::from_cols(x, y, z))
}

/// Target forward speed for the current inputs. Positive is forward.
pub fn target_forward_speed(
    target_input: f32,
    max_speed: f32,
    max_reverse_speed: f32,
    surface_speed: f32,
) -> f32 {
    let base = if target_input >= 0.0 {
        max_speed
    } else {
        -max_reverse_speed
    };
    base * target_input.abs() * surface_speed
}

/// Burnout turns on when the kart is held at full throttle and full brake
/// while nearly stationary, and off when any condition lapses. The two
/// thresholds differ slightly so the flag cannot flicker at the boundary.
pub fn resolve_burnout(
    burnout: bool,
    grounded: bool,
    forward_speed: f32,
    accel: f32,
    brake: f32,
    speed_limit: f32,
) -> bool {
    let held = accel > 0.9 && brake > 0.9;
    if !burnout {
        grounded && forward_speed.abs() < speed_limit - 0.1 && held
    } else {
        grounded && forward_speed.abs() < speed_limit + 0.1 && held
    }
}

#[allow(clippy::type_complexity, clippy::too_many_arguments)]
pub(super) fn step_kart_bodies(
    time: Res<Time>,
    config: Res<GameConfig>,
    mut kart_query: Query<(
        Entity,
        &Kart,
        &RotatorLink,
        &mut Velocity,
        &mut ExternalForce,
        &KartInputState,
        &mut KartMotion,
        &mut DriftState,
        &mut SpinOutState,
        &WallContactState,
        &mut KartWheels,
        &mut KartBoost,
        &ReadMassProperties,
    )>,
    mut rotator_query: Query<&mut Transform, (With<KartRotator>, Without<Kart>)>,
    mut jump_events: MessageWriter<KartJumpEvent>,
    mut land_events: MessageWriter<KartLandEvent>,
    mut boost_start_events: MessageWriter<BoostStartEvent>,
    mut boost_fail_events: MessageWriter<BoostFailEvent>,
) {
    let dt = time.delta_secs().max(0.000_1);

    for (
        entity,
        kart,
        rotator_link,
        mut velocity,
        mut force,
        input,
        mut motion,
        mut drift,
        mut spin,
        wall_contact,
        mut wheels,
        mut boost,
        mass_props,
    ) in &mut kart_query
    {
        // Missing rotator or an empty wheel rig turns the whole update off.
        let Some(kart_config) = config.karts_by_id.get(&kart.kart_id) else {
            continue;
        };
        let Ok(mut rotator) = rotator_query.get_mut(rotator_link.rotator) else {
            continue;
        };
        if wheels.wheels.is_empty() {
            continue;
        }

        let speed_cfg = &kart_config.speed;
        let steer_cfg = &kart_config.steer;
        let suspension_cfg = &kart_config.suspension;
        let drift_cfg = &kart_config.drift;
        let jump_cfg = &kart_config.jump;
        let gravity_cfg = &kart_config.gravity;
        let dims = &kart_config.dimensions;
        let params = BoostParams::from_config(&kart_config.boost);

        // Inputs are frozen at neutral while the kart is inactive.
        let (accel, brake, steer) = if kart.active && !spin.active {
            (input.accel, input.brake, input.steer)
        } else {
            (0.0, 0.0, 0.0)
        };
        let drift_held = kart.active && !spin.active && input.drift;
        let drift_pressed = kart.active && !spin.active && input.drift_just_pressed;
        let boost_held = kart.active && !spin.active && input.boost;
        let boost_pressed = kart.active && !spin.active && input.boost_just_pressed;

        let mut accel_force = Vec3::ZERO;

        // 1. Gravity and local-frame velocity.
        accel_force += GRAVITY_UP * gravity_cfg.gravity_add;
        let rotation = rotator.rotation;
        let forward = rotation * Vec3::Z;
        let right = rotation * Vec3::X;
        let up = rotation * Vec3::Y;
        motion.up_dir = up;
        motion.local_vel = rotation.inverse() * velocity.linvel;
        let local_vel = motion.local_vel;
        let speed_mag = velocity.linvel.length();

        // 2. Timers.
        motion.jump_time = (motion.jump_time - dt).max(0.0);
        motion.time_since_land += dt;
        motion.boost_pad_timer = (motion.boost_pad_timer - dt).max(0.0);
        drift.drift_swing_time = (drift.drift_swing_time - dt).max(0.0);

        // 3. Grounding was sampled earlier this frame; align the rotator to
        // the smoothed ground normal while any contact holds.
        if motion.grounded || motion.air_grounded {
            let target = facing(
                project_on_plane(forward, motion.ground_normal),
                motion.ground_normal,
            );
            let blend = (suspension_cfg.ground_normal_smooth_rate * dt).clamp(0.0, 1.0);
            rotator.rotation = rotator.rotation.slerp(target, blend);
        }

        if drift.drifting && !motion.grounded {
            drift.drifting = false;
            drift.drift_dir = 0.0;
            boost.state.boost_time = 0.0;
            boost.state.boost_count = 0;
            boost.state.failed = false;
        }

        // 4. Burnout hysteresis.
        motion.burnout = resolve_burnout(
            motion.burnout,
            motion.grounded,
            local_vel.z,
            accel,
            brake,
            steer_cfg.burnout_speed_limit,
        );
        if motion.burnout && drift.drifting {
            drift.drifting = false;
            drift.drift_dir = 0.0;
            boost.state.boost_time = 0.0;
            boost.state.boost_count = 0;
            boost.state.failed = false;
        }

        // 5. Target forward speed.
        let target_input = (accel + boost.state.reserve * params.drive).clamp(0.0, 1.0) - brake;
        let target_speed = if motion.burnout {
            0.0
        } else {
            target_forward_speed(
                target_input,
                speed_cfg.max_speed,
                speed_cfg.max_reverse_speed,
                wheels.aggregate.speed,
            )
        };

        // 6. Target turn rate; three mutually exclusive formulas.
        let speed_steer = lerp(
            steer_cfg.max_steer,
            steer_cfg.min_steer,
            local_vel.z.abs() / steer_cfg.steer_speed_limit.max(0.01),
        );
        let brake_mismatch =
            if sign0(target_input) != sign0(local_vel.z) && target_input.abs() > 0.001 {
                1.0 + steer_cfg.brake_steer_increase
            } else {
                1.0
            };
        let target_turn = if spin.active {
            0.0
        } else if motion.burnout {
            steer
        } else if drift.drifting && drift.drift_dir != 0.0 {
            speed_steer
                * lerp(
                    drift_cfg.min_drift_angle,
                    drift_cfg.max_drift_angle,
                    ((steer + drift.drift_dir) * 0.5).abs(),
                )
                * drift.drift_dir
                * brake_mismatch
        } else {
            let slow_scale = if steer_cfg.steer_slow_limit > 0.0 {
                (local_vel.z.abs() / steer_cfg.steer_slow_limit.max(0.01)).clamp(0.0, 1.0)
            } else {
                1.0
            };
            // Steering inverts in reverse unless the throttle is down.
            let ground_scale = if motion.grounded {
                (if accel > 0.0 { 1.0 } else { sign0(local_vel.z) }) * slow_scale
            } else {
                steer_cfg.air_steer
            };
            speed_steer * steer * ground_scale * brake_mismatch
        };
        motion.target_turn_speed = lerp(
            motion.target_turn_speed,
            target_turn,
            steer_cfg.steer_rate * TURN_RATE_SCALE * dt,
        );

        // 7. Lateral friction with brake slip and the drift swing kick.
        let brake_slip = (1.0
            - (if local_vel.z > 0.0 { brake } else { accel })
                * (speed_mag * 0.1).clamp(0.0, 1.0)
                * kart_config.wheels.brake_slip_amount)
            .clamp(0.0, 0.9);
        let swing_kick = drift.drift_swing_time.clamp(0.0, 1.0)
            * drift.drift_dir
            * TURN_RATE_SCALE
            * drift_cfg.drift_swing_force;
        if motion.grounded {
            accel_force += right
                * (-local_vel.x
                    * kart_config.wheels.side_friction
                    * wheels.aggregate.friction
                    * brake_slip
                    - swing_kick);
        } else {
            accel_force += right
                * (-local_vel.x
                    * kart_config.wheels.air_side_friction
                    * (1.0 - right.dot(GRAVITY_UP).abs())
                    * brake_slip
                    - swing_kick);
        }

        // 8. Grounded forces.
        if motion.grounded {
            let travel_vel = local_vel.y.clamp(
                suspension_cfg.spring_damp_vel_min,
                suspension_cfg.spring_damp_vel_max
                    * if motion.jump_time == 0.0 { 1.0 } else { 0.0 },
            );
            accel_force += motion.ground_normal
                * suspension_cfg.spring_force
                * ((1.0
                    - wheels.aggregate.compression
                        * suspension_cfg.compression_spring_factor.clamp(0.0, 1.0))
                    - suspension_cfg.spring_dampening * travel_vel);

            if motion.jump_time == 0.0 {
                if motion.jumped && jump_cfg.air_land_boost > 0.0 && !spin.active {
                    let reserve_boost =
                        boost.state.reserve.clamp(0.0, 1.0) * jump_cfg.air_land_boost;
                    boost.state.add_boost(
                        params.power * jump_cfg.air_land_boost.min(motion.air_time),
                        reserve_boost,
                        &params,
                    );
                }
                motion.jumped = false;

                accel_force += -motion.ground_normal
                    * suspension_cfg.ground_stick_force
                    * (wheels.aggregate.compression - suspension_cfg.ground_stick_compression)
                        .clamp(0.0, 1.0)
                    * motion.ground_normal.dot(GRAVITY_UP).clamp(0.0, 1.0);
            }

            if !spin.active {
                accel_force += drive_force(
                    forward,
                    target_speed,
                    target_input,
                    local_vel.z,
                    speed_cfg,
                    wheels.aggregate.friction,
                );

                // Parked: damp residual motion and cancel slope slide.
                if target_input.abs() < 0.001
                    && speed_mag < speed_cfg.auto_stop_speed
                    && motion.ground_normal.dot(GRAVITY_UP) > speed_cfg.auto_stop_normal_dot_limit
                {
                    accel_force += -velocity.linvel * speed_cfg.auto_stop_force;
                    accel_force -= project_on_plane(
                        GRAVITY_UP * gravity_cfg.gravity_add,
                        motion.ground_normal,
                    );
                }
            }

            if !motion.was_grounded
                && motion.time_since_land >= LAND_EVENT_MIN_GAP_S
                && local_vel.y < -LAND_EVENT_MIN_DOWN_SPEED_MPS
            {
                motion.time_since_land = 0.0;
                land_events.write(KartLandEvent {
                    kart: entity,
                    impact_speed_mps: -local_vel.y,
                });
            }

            motion.air_time = 0.0;
        } else if !motion.air_grounded {
            // 9. Fully airborne: re-orient upright, no position change.
            let target = facing(project_on_plane(forward, GRAVITY_UP), GRAVITY_UP);
            let blend = (dims.air_flatten_rate * TURN_RATE_SCALE * dt).clamp(0.0, 1.0);
            rotator.rotation = rotator.rotation.slerp(target, blend);
        } else if motion.jumped && motion.jump_time == 0.0 {
            accel_force += -motion.ground_normal
                * jump_cfg.jump_stick_force
                * motion.ground_normal.dot(GRAVITY_UP).clamp(0.0, 1.0);
        }

        if !motion.grounded {
            motion.air_time += dt;
            if speed_cfg.air_drive_friction > 0.0 && !spin.active {
                accel_force += drive_force(
                    forward,
                    target_speed,
                    target_input,
                    local_vel.z,
                    speed_cfg,
                    1.0,
                ) * speed_cfg.air_drive_friction;
            }
        }

        // 10. Boost machine.
        if !drift_held {
            drift.release_gate_open = true;
            if drift.drifting {
                drift.drifting = false;
                drift.drift_dir = 0.0;
                boost.state.end_drift(&params);
            }
        }
        boost.state.step(
            &params,
            BoostInputs {
                drifting: drift.drifting,
                drift_dir: drift.drift_dir,
                boost_held,
                boost_just_pressed: boost_pressed,
            },
            dt,
        );
        if boost.state.failed && params.manual_fail_cancel && drift.drifting {
            drift.drifting = false;
            drift.drift_dir = 0.0;
        }

        // 11. Boost push.
        let push = boost.state.take_push();
        if push > 0.0 {
            velocity.linvel += forward * push;
        }
        accel_force += forward
            * boost.state.reserve.clamp(0.0, 1.0)
            * if motion.grounded {
                params.ground_push
            } else {
                params.air_push
            };
        if boost.state.take_start_event() {
            boost_start_events.write(BoostStartEvent { kart: entity });
        }
        if boost.state.take_fail_event() {
            boost_fail_events.write(BoostFailEvent { kart: entity });
        }

        // Drift and jump starting.
        if drift_pressed
            && !motion.jumped
            && (motion.grounded || motion.air_grounded || motion.air_time <= jump_cfg.air_jump_time_limit)
        {
            motion.jumped = true;
            motion.jump_time = jump_cfg.jump_duration;
            jump_events.write(KartJumpEvent { kart: entity });
        }
        if drift_held && drift.release_gate_open && motion.grounded && !motion.burnout {
            drift.drifting = true;
            if motion.jump_time == 0.0 && drift.drift_dir == 0.0 {
                if sign0(steer) != 0.0 {
                    drift.drift_dir = sign0(steer);
                    drift.drift_swing_time = drift_cfg.drift_swing_duration;
                }
                drift.release_gate_open = false;
            }
        }

        // Spin-out: undrivable, decelerating, rotating a fixed total angle
        // at a rate that eases out near completion.
        if spin.active {
            accel_force +=
                Vec3::new(-velocity.linvel.x, 0.0, -velocity.linvel.z) * speed_cfg.spin_decel;
            let remaining = (spin.target_angle_rad - spin.current_angle_rad).max(0.0);
            let step = dims.spin_rate * remaining.clamp(0.1, 1.0) * dt;
            spin.current_angle_rad += step;
            let axis = match spin.axis {
                SpinAxis::Yaw => Vec3::Y,
                SpinAxis::Pitch => Vec3::X,
                SpinAxis::Roll => Vec3::Z,
            };
            rotator.rotation *= Quat::from_axis_angle(axis, spin.direction * step);
            if spin.current_angle_rad >= spin.target_angle_rad {
                spin.active = false;
                spin.current_angle_rad = 0.0;
                spin.target_angle_rad = 0.0;
            }
        }

        // Steady wall contact drags the whole body.
        if wall_contact.touching {
            accel_force += -velocity.linvel * kart_config.walls.friction;
        }

        // Per-wheel sliding flag, for effects and tire audio.
        let sliding = drift.drifting || motion.burnout || spin.active;
        for wheel in &mut wheels.wheels {
            wheel.sliding = wheel.grounded && (sliding || wheel.surface.always_slide);
        }

        // 13. Steering rotation, fall clamp, jump force.
        if !spin.active {
            let yaw_deg =
                (motion.target_turn_speed + wall_contact.bounce_turn) * TURN_RATE_SCALE * dt;
            rotator.rotation *= Quat::from_rotation_y(-yaw_deg.to_radians());
        }
        if !motion.grounded && local_vel.y < -speed_cfg.max_fall_speed {
            accel_force += GRAVITY_UP
                * -(speed_cfg.max_fall_speed + local_vel.y)
                * gravity_cfg.fall_speed_decel;
        }
        if motion.jump_time > 0.0 {
            accel_force += up * jump_cfg.jump_force * motion.jump_time;
        }

        let mass = mass_props.get().mass.max(f32::EPSILON);
        force.force = accel_force * mass;
        force.torque = Vec3::ZERO;
    }
}

fn drive_force(
    forward: Vec3,
    target_speed: f32,
    target_input: f32,
    forward_vel: f32,
    speed_cfg: &crate::config::KartSpeedConfig,
    ground_friction: f32,
) -> Vec3 {
    let accelerating =
        target_speed.abs() > forward_vel.abs() && sign0(target_speed) == sign0(forward_vel);
    let accel_mult = if accelerating || sign0(forward_vel) == 0.0 {
        speed_cfg.acceleration
    } else {
        1.0
    };
    let brake_mult = if sign0(target_input) != sign0(forward_vel) && target_input.abs() > 0.001 {
        speed_cfg.brake_force
    } else {
        1.0
    };
    let coast_mult = if target_input.abs() < 0.001
        && !(forward_vel.abs() > target_speed.abs() && sign0(target_speed) == sign0(forward_vel))
    {
        speed_cfg.coasting_friction
    } else {
        1.0
    };
    let slope_mult = (1.0 + speed_cfg.slope_friction
        - (forward * sign0(target_speed)).dot(-GRAVITY_UP))
    .clamp(0.0, 1.0);

    forward * (target_speed - forward_vel) * accel_mult * ground_friction * brake_mult * coast_mult
        * slope_mult
}

/// Cosmetic spin-out bob on the rotator; never feeds back into the body.
pub(super) fn drive_rotator_visuals(
    config: Res<GameConfig>,
    kart_query: Query<(&Kart, &RotatorLink, &SpinOutState)>,
    mut rotator_query: Query<&mut Transform, (With<KartRotator>, Without<Kart>)>,
) {
    for (kart, rotator_link, spin) in &kart_query {
        let Some(kart_config) = config.karts_by_id.get(&kart.kart_id) else {
            continue;
        };
        let Ok(mut rotator) = rotator_query.get_mut(rotator_link.rotator) else {
            continue;
        };
        let height = if spin.active && spin.target_angle_rad > 0.0 {
            let progress = (spin.current_angle_rad / spin.target_angle_rad).clamp(0.0, 1.0);
            (progress * std::f32::consts::PI).sin() * kart_config.dimensions.spin_height
        } else {
            0.0
        };
        rotator.translation = Vec3::Y * height;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn burnout_needs_both_pedals_floored_at_low_speed() {
        assert!(resolve_burnout(false, true, 0.0, 1.0, 1.0, 3.0));
        assert!(!resolve_burnout(false, true, 5.0, 1.0, 1.0, 3.0));
        assert!(!resolve_burnout(false, true, 0.0, 1.0, 0.5, 3.0));
        assert!(!resolve_burnout(false, false, 0.0, 1.0, 1.0, 3.0));
    }

    #[test]
    fn burnout_hysteresis_band_prevents_flicker_at_the_limit() {
        // Just under the entry threshold turns it on; the same speed keeps
        // it on because the exit threshold sits higher.
        assert!(resolve_burnout(false, true, 2.85, 1.0, 1.0, 3.0));
        assert!(resolve_burnout(true, true, 3.05, 1.0, 1.0, 3.0));
        // Between the bands it neither enters nor exits.
        assert!(!resolve_burnout(false, true, 2.95, 1.0, 1.0, 3.0));
        assert!(!resolve_burnout(true, true, 3.15, 1.0, 1.0, 3.0));
    }

    #[test]
    fn target_speed_uses_reverse_limit_for_negative_input() {
        assert_eq!(target_forward_speed(1.0, 30.0, 10.0, 1.0), 30.0);
        assert_eq!(target_forward_speed(-0.5, 30.0, 10.0, 1.0), -5.0);
        assert_eq!(target_forward_speed(1.0, 30.0, 10.0, 0.5), 15.0);
    }

    #[test]
    fn facing_builds_an_orthonormal_frame() {
        let rotation = facing(Vec3::X, Vec3::Y);
        assert!((rotation * Vec3::Z - Vec3::X).length() < 1e-5);
        assert!((rotation * Vec3::Y - Vec3::Y).length() < 1e-5);
    }

    #[test]
    fn sign0_treats_near_zero_as_zero() {
        assert_eq!(sign0(0.0), 0.0);
        assert_eq!(sign0(0.0005), 0.0);
        assert_eq!(sign0(-2.0), -1.0);
        assert_eq!(sign0(0.5), 1.0);
    }
}
