//! Wall contact sensing. Horizontal probe rays around the hull classify
//! hits as walls, feed the bounce-turn impulse, and raise hit events for
//! the rest of the game.

use super::*;

const WALL_PROBE_MARGIN_M: f32 = 0.15;

/// Collision group reserved for wall colliders when `detection = "groups"`.
pub const WALL_COLLISION_GROUP: Group = Group::GROUP_2;

/// Marks a collider as a wall regardless of its slope, for
/// `detection = "flagged"`.
#[derive(Component, Debug, Clone, Copy)]
pub struct WallSurface;

/// Everything the classifier may look at about one probe hit.
#[derive(Debug, Clone, Copy)]
pub struct WallProbe<'a> {
    pub normal: Vec3,
    pub up: Vec3,
    pub name: Option<&'a str>,
    pub groups: Option<CollisionGroups>,
    pub flagged: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum WallClassifier {
    /// Steepness test: a hit is a wall when its normal leans further from
    /// the kart's up than `dot_limit` allows.
    Normal { dot_limit: f32 },
    Groups,
    Named { tag: String },
    Flagged,
}

impl WallClassifier {
    pub fn from_config(walls: &crate::config::KartWallsConfig) -> Self {
        match walls.detection.as_str() {
            "groups" => Self::Groups,
            "named" => {
                if walls.tag.is_empty() {
                    warn!("wall detection is 'named' but the tag is empty; nothing will classify as a wall");
                }
                Self::Named {
                    tag: walls.tag.clone(),
                }
            }
            "flagged" => Self::Flagged,
            _ => Self::Normal {
                dot_limit: walls.dot_limit,
            },
        }
    }

    pub fn test(&self, probe: &WallProbe) -> bool {
        match self {
            Self::Normal { dot_limit } => probe.normal.dot(probe.up).abs() < *dot_limit,
            Self::Groups => probe
                .groups
                .is_some_and(|groups| groups.memberships.intersects(WALL_COLLISION_GROUP)),
            Self::Named { tag } => {
                !tag.is_empty() && probe.name.is_some_and(|name| name == tag.as_str())
            }
            Self::Flagged => probe.flagged,
        }
    }
}

#[allow(clippy::type_complexity)]
pub(super) fn probe_wall_contacts(
    time: Res<Time>,
    config: Res<GameConfig>,
    rapier_context: ReadRapierContext,
    mut kart_query: Query<(
        Entity,
        &Kart,
        &Transform,
        &RotatorLink,
        &Velocity,
        &mut WallContactState,
        &mut DriftState,
        &mut KartBoost,
        &KartMotion,
    )>,
    rotator_query: Query<&Transform, (With<KartRotator>, Without<Kart>)>,
    hit_query: Query<(Option<&Name>, Option<&CollisionGroups>, Has<WallSurface>)>,
    mut wall_hit_events: MessageWriter<WallHitEvent>,
) {
    let Ok(rapier_context) = rapier_context.single() else {
        return;
    };
    let dt = time.delta_secs().max(0.000_1);

    for (
        entity,
        kart,
        transform,
        rotator_link,
        velocity,
        mut wall_contact,
        mut drift,
        mut boost,
        motion,
    ) in &mut kart_query
    {
        let Some(kart_config) = config.karts_by_id.get(&kart.kart_id) else {
            continue;
        };
        let Ok(rotator_transform) = rotator_query.get(rotator_link.rotator) else {
            continue;
        };
        let walls = &kart_config.walls;
        let classifier = WallClassifier::from_config(walls);

        let rotation = rotator_transform.rotation;
        let forward = rotation * Vec3::Z;
        let right = rotation * Vec3::X;
        let dimensions = &kart_config.dimensions;
        let probes = [
            (forward, dimensions.front_length + WALL_PROBE_MARGIN_M),
            (-forward, dimensions.back_length + WALL_PROBE_MARGIN_M),
            (right, dimensions.side_width + WALL_PROBE_MARGIN_M),
            (-right, dimensions.side_width + WALL_PROBE_MARGIN_M),
        ];
        let ray_filter = QueryFilter::only_fixed()
            .exclude_sensors()
            .exclude_rigid_body(entity);

        wall_contact.hit_cooldown = (wall_contact.hit_cooldown - dt).max(0.0);
        wall_contact.touching = false;

        for (direction, length) in probes {
            let Some((hit_entity, intersection)) = rapier_context.cast_ray_and_get_normal(
                transform.translation,
                direction,
                length,
                false,
                ray_filter,
            ) else {
                continue;
            };

            let (name, groups, flagged) = hit_query
                .get(hit_entity)
                .unwrap_or((None, None, false));
            let probe = WallProbe {
                normal: intersection.normal.normalize_or_zero(),
                up: motion.up_dir,
                name: name.map(|name| name.as_str()),
                groups: groups.copied(),
                flagged,
            };
            if !classifier.test(&probe) {
                continue;
            }

            wall_contact.touching = true;
            wall_contact.contact_normal = probe.normal;

            let relative_speed = velocity.linvel.dot(-probe.normal);
            if relative_speed < walls.min_hit_speed || wall_contact.hit_cooldown > 0.0 {
                continue;
            }

            wall_contact.hit_cooldown = walls.hit_duration;
            let bounce = bounce_turn_impulse(
                relative_speed,
                rotation,
                probe.normal,
                walls.bounce_turn_amount,
            );
            wall_contact.bounce_turn = max_abs(wall_contact.bounce_turn, bounce);

            if walls.hit_cancels_drift && drift.drifting {
                drift.drifting = false;
                drift.drift_swing_time = 0.0;
            }
            if walls.hit_empties_boost {
                boost.state.empty_reserve();
            }

            wall_hit_events.write(WallHitEvent {
                kart: entity,
                contact_point: intersection.point,
                contact_normal: probe.normal,
                relative_speed_mps: relative_speed,
            });
        }

        wall_contact.bounce_turn = move_towards(
            wall_contact.bounce_turn,
            0.0,
            walls.bounce_turn_decay_rate * dt,
        );
    }
}

/// Signed yaw impulse for a wall hit, strongest on head-on contact. The
/// body step applies positive yaw as a swing toward local -X, so the sign
/// is measured along that axis to turn the nose away from the wall.
pub fn bounce_turn_impulse(relative_speed: f32, rotation: Quat, normal: Vec3, amount: f32) -> f32 {
    let forward = rotation * Vec3::Z;
    let steer_axis = rotation * Vec3::NEG_X;
    let side_sign = if steer_axis.dot(normal) >= 0.0 { 1.0 } else { -1.0 };
    relative_speed * (-forward).dot(normal).abs() * side_sign * amount
}

#[cfg(test)]
mod tests {
    use super::*;

    fn probe(normal: Vec3) -> WallProbe<'static> {
        WallProbe {
            normal,
            up: Vec3::Y,
            name: None,
            groups: None,
            flagged: false,
        }
    }

    #[test]
    fn normal_classifier_rejects_drivable_slopes() {
        let classifier = WallClassifier::Normal { dot_limit: 0.3 };

        assert!(classifier.test(&probe(Vec3::X)));
        assert!(classifier.test(&probe(Vec3::new(0.96, 0.28, 0.0).normalize())));
        assert!(!classifier.test(&probe(Vec3::Y)));
        assert!(!classifier.test(&probe(Vec3::new(0.3, 0.95, 0.0).normalize())));
        // Ceilings and overhang undersides are not walls either.
        assert!(!classifier.test(&probe(Vec3::NEG_Y)));
        assert!(!classifier.test(&probe(Vec3::new(0.3, -0.95, 0.0).normalize())));
    }

    #[test]
    fn bounce_turn_swings_the_nose_away_from_the_wall() {
        let rotation = Quat::IDENTITY;
        let forward = rotation * Vec3::Z;

        // Wall ahead and off to one side; the normal points back out of it.
        let normal = Vec3::new(-1.0, 0.0, -1.0).normalize();
        let bounce = bounce_turn_impulse(10.0, rotation, normal, 0.5);
        // Same yaw application as the body step.
        let turned = rotation * Quat::from_rotation_y(-bounce.to_radians());
        assert!((turned * Vec3::Z).dot(normal) > forward.dot(normal));

        // Mirrored wall bounces the other way.
        let mirrored = Vec3::new(1.0, 0.0, -1.0).normalize();
        let mirrored_bounce = bounce_turn_impulse(10.0, rotation, mirrored, 0.5);
        assert_eq!(mirrored_bounce, -bounce);
        let turned = rotation * Quat::from_rotation_y(-mirrored_bounce.to_radians());
        assert!((turned * Vec3::Z).dot(mirrored) > forward.dot(mirrored));
    }

    #[test]
    fn groups_classifier_requires_wall_membership() {
        let classifier = WallClassifier::Groups;

        let mut wall = probe(Vec3::X);
        wall.groups = Some(CollisionGroups::new(WALL_COLLISION_GROUP, Group::ALL));
        assert!(classifier.test(&wall));

        let mut floor = probe(Vec3::X);
        floor.groups = Some(CollisionGroups::new(Group::GROUP_1, Group::ALL));
        assert!(!classifier.test(&floor));
        assert!(!classifier.test(&probe(Vec3::X)));
    }

    #[test]
    fn named_classifier_matches_exact_names_only() {
        let classifier = WallClassifier::Named {
            tag: "Barrier".to_string(),
        };

        let mut named = probe(Vec3::X);
        named.name = Some("Barrier");
        assert!(classifier.test(&named));

        named.name = Some("barrier");
        assert!(!classifier.test(&named));
        assert!(!classifier.test(&probe(Vec3::X)));
    }

    #[test]
    fn named_classifier_with_empty_tag_never_matches() {
        let classifier = WallClassifier::Named { tag: String::new() };

        let mut unnamed = probe(Vec3::X);
        unnamed.name = Some("");
        assert!(!classifier.test(&unnamed));
    }

    #[test]
    fn flagged_classifier_only_checks_the_marker() {
        let classifier = WallClassifier::Flagged;

        let mut flagged = probe(Vec3::Y);
        flagged.flagged = true;
        assert!(classifier.test(&flagged));
        assert!(!classifier.test(&probe(Vec3::X)));
    }
}
