use crate::config::GameConfig;
use bevy::prelude::*;
use std::collections::HashMap;

pub struct SurfaceRegistryPlugin;

impl Plugin for SurfaceRegistryPlugin {
    fn build(&self, app: &mut App) {
        app.init_resource::<GroundSurfaceRegistry>().add_systems(
            Update,
            rebuild_surface_registry.run_if(resource_exists::<GameConfig>),
        );
    }
}

/// Surface id attached to a ground collider entity. Wheels that hit the
/// collider inherit this surface's friction/speed multipliers.
#[derive(Component, Debug, Clone)]
pub struct GroundSurfaceId(pub String);

/// Marks a ground collider whose surface varies across its area; contact
/// points resolve through the registry's blend maps instead of a flat id.
#[derive(Component, Debug, Clone, Copy)]
pub struct BlendedTerrain;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SurfaceProperties {
    pub friction: f32,
    pub speed: f32,
    pub always_slide: bool,
}

impl Default for SurfaceProperties {
    fn default() -> Self {
        Self {
            friction: 1.0,
            speed: 1.0,
            always_slide: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BlendMap {
    pub origin: Vec2,
    pub cell_size: f32,
    pub columns: u32,
    pub rows: u32,
    pub layers: Vec<String>,
    pub weights: Vec<f32>,
}

impl BlendMap {
    fn contains(&self, point: Vec2) -> bool {
        let extent = Vec2::new(
            self.columns as f32 * self.cell_size,
            self.rows as f32 * self.cell_size,
        );
        point.x >= self.origin.x
            && point.y >= self.origin.y
            && point.x < self.origin.x + extent.x
            && point.y < self.origin.y + extent.y
    }

    /// Dominant layer at the point: highest blend weight, ties broken by
    /// lowest layer index.
    fn dominant_layer_at(&self, point: Vec2) -> Option<&str> {
        if self.layers.is_empty() || !self.contains(point) {
            return None;
        }

        let column = (((point.x - self.origin.x) / self.cell_size) as usize)
            .min(self.columns.saturating_sub(1) as usize);
        let row = (((point.y - self.origin.y) / self.cell_size) as usize)
            .min(self.rows.saturating_sub(1) as usize);
        let cell_base = (row * self.columns as usize + column) * self.layers.len();

        let mut best_index = 0;
        let mut best_weight = f32::NEG_INFINITY;
        for (layer_index, layer_weight) in self
            .weights
            .get(cell_base..cell_base + self.layers.len())?
            .iter()
            .enumerate()
        {
            if *layer_weight > best_weight {
                best_weight = *layer_weight;
                best_index = layer_index;
            }
        }

        self.layers.get(best_index).map(String::as_str)
    }
}

#[derive(Resource, Debug, Clone, Default)]
pub struct GroundSurfaceRegistry {
    surfaces: HashMap<String, SurfaceProperties>,
    blend_maps: Vec<BlendMap>,
    default_surface: String,
}

impl GroundSurfaceRegistry {
    pub fn from_config(config: &GameConfig) -> Self {
        let surfaces = config
            .surfaces
            .surfaces
            .iter()
            .map(|surface| {
                (
                    surface.id.clone(),
                    SurfaceProperties {
                        friction: surface.friction,
                        speed: surface.speed,
                        always_slide: surface.always_slide,
                    },
                )
            })
            .collect();
        let blend_maps = config
            .surfaces
            .blend_maps
            .iter()
            .map(|map| BlendMap {
                origin: Vec2::new(map.origin[0], map.origin[1]),
                cell_size: map.cell_size,
                columns: map.columns,
                rows: map.rows,
                layers: map.layers.clone(),
                weights: map.weights.clone(),
            })
            .collect();

        Self {
            surfaces,
            blend_maps,
            default_surface: config.surfaces.default_surface.clone(),
        }
    }

    pub fn properties(&self, surface_id: &str) -> SurfaceProperties {
        self.surfaces
            .get(surface_id)
            .copied()
            .unwrap_or_default()
    }

    pub fn default_properties(&self) -> SurfaceProperties {
        self.properties(&self.default_surface)
    }

    /// Flat surfaces resolve by id; blended terrain samples the dominant
    /// layer at the contact's ground-plane position.
    pub fn properties_at(&self, world_point: Vec3) -> SurfaceProperties {
        let planar = Vec2::new(world_point.x, world_point.z);
        for map in &self.blend_maps {
            if let Some(layer) = map.dominant_layer_at(planar) {
                return self.properties(layer);
            }
        }
        self.default_properties()
    }
}

fn rebuild_surface_registry(
    config: Res<GameConfig>,
    mut registry: ResMut<GroundSurfaceRegistry>,
) {
    if !config.is_changed() {
        return;
    }
    *registry = GroundSurfaceRegistry::from_config(&config);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_layer_map(weights: Vec<f32>) -> BlendMap {
        BlendMap {
            origin: Vec2::ZERO,
            cell_size: 10.0,
            columns: 2,
            rows: 1,
            layers: vec!["tarmac".to_string(), "dirt".to_string()],
            weights,
        }
    }

    #[test]
    fn dominant_layer_is_highest_weight() {
        let map = two_layer_map(vec![0.2, 0.8, 0.9, 0.1]);

        assert_eq!(map.dominant_layer_at(Vec2::new(5.0, 5.0)), Some("dirt"));
        assert_eq!(map.dominant_layer_at(Vec2::new(15.0, 5.0)), Some("tarmac"));
    }

    #[test]
    fn dominant_layer_tie_breaks_to_lowest_index() {
        let map = two_layer_map(vec![0.5, 0.5, 0.5, 0.5]);

        assert_eq!(map.dominant_layer_at(Vec2::new(5.0, 5.0)), Some("tarmac"));
        assert_eq!(map.dominant_layer_at(Vec2::new(15.0, 5.0)), Some("tarmac"));
    }

    #[test]
    fn points_outside_map_resolve_to_none() {
        let map = two_layer_map(vec![0.2, 0.8, 0.9, 0.1]);

        assert_eq!(map.dominant_layer_at(Vec2::new(-1.0, 5.0)), None);
        assert_eq!(map.dominant_layer_at(Vec2::new(5.0, 11.0)), None);
    }

    #[test]
    fn unknown_surface_ids_fall_back_to_defaults() {
        let registry = GroundSurfaceRegistry::default();
        let properties = registry.properties("nonexistent");

        assert_eq!(properties.friction, 1.0);
        assert_eq!(properties.speed, 1.0);
        assert!(!properties.always_slide);
    }
}
