#![allow(dead_code)]

use bevy::prelude::*;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::fs;
use std::path::{Path, PathBuf};

const CONFIG_DIR: &str = "config";

pub struct ConfigPlugin;

impl Plugin for ConfigPlugin {
    fn build(&self, app: &mut App) {
        app.add_systems(Startup, load_game_config)
            .add_systems(Update, reload_game_config_hotkey);
    }
}

fn load_game_config(mut commands: Commands) {
    let config = GameConfig::load_from_dir(Path::new(CONFIG_DIR)).unwrap_or_else(|error| {
        panic!("failed to load configuration from `{CONFIG_DIR}`: {error}");
    });

    log_config_summary("Loaded", &config);
    info!("Press F5 to hot-reload config files from `{CONFIG_DIR}`.");

    commands.insert_resource(config);
}

fn reload_game_config_hotkey(
    keyboard: Res<ButtonInput<KeyCode>>,
    game_config: Option<ResMut<GameConfig>>,
) {
    if !keyboard.just_pressed(KeyCode::F5) {
        return;
    }

    let Some(mut current_config) = game_config else {
        warn!("Config hot-reload requested, but `GameConfig` resource is not initialized yet.");
        return;
    };

    match GameConfig::load_from_dir(Path::new(CONFIG_DIR)) {
        Ok(new_config) => {
            *current_config = new_config;
            log_config_summary("Hot-reloaded", &current_config);
        }
        Err(error) => {
            error!("Config hot-reload failed; keeping previous config: {error}");
        }
    }
}

fn log_config_summary(prefix: &str, config: &GameConfig) {
    info!(
        "{prefix} config: {} karts, {} surfaces, {} items, {} tracks.",
        config.karts_by_id.len(),
        config.surfaces_by_id.len(),
        config.items_by_id.len(),
        config.tracks_by_id.len()
    );
}

#[derive(Resource, Debug, Clone)]
pub struct GameConfig {
    pub game: GameFile,
    pub karts: KartsFile,
    pub surfaces: SurfacesFile,
    pub items: ItemsFile,
    pub tracks: TracksFile,
    pub karts_by_id: HashMap<String, KartConfig>,
    pub surfaces_by_id: HashMap<String, SurfaceConfig>,
    pub items_by_id: HashMap<String, ItemConfig>,
    pub tracks_by_id: HashMap<String, TrackConfig>,
}

impl GameConfig {
    pub fn load_from_dir(config_dir: &Path) -> Result<Self, ConfigError> {
        let game: GameFile = read_toml(&config_dir.join("game.toml"))?;
        let karts: KartsFile = read_toml(&config_dir.join("karts.toml"))?;
        let surfaces: SurfacesFile = read_toml(&config_dir.join("surfaces.toml"))?;
        let items: ItemsFile = read_toml(&config_dir.join("items.toml"))?;
        let tracks: TracksFile = read_toml(&config_dir.join("tracks.toml"))?;

        let config = Self {
            karts_by_id: to_index("karts.toml::karts", &karts.karts)?,
            surfaces_by_id: to_index("surfaces.toml::surfaces", &surfaces.surfaces)?,
            items_by_id: to_index("items.toml::items", &items.items)?,
            tracks_by_id: to_index("tracks.toml::tracks", &tracks.tracks)?,
            game,
            karts,
            surfaces,
            items,
            tracks,
        };

        config.validate_references()?;
        Ok(config)
    }

    fn validate_references(&self) -> Result<(), ConfigError> {
        if !self.tracks_by_id.contains_key(&self.game.app.starting_track) {
            return Err(ConfigError::Validation(format!(
                "game.toml::app.starting_track references unknown track id `{}`",
                self.game.app.starting_track
            )));
        }

        if !self.karts_by_id.contains_key(&self.game.app.player_kart) {
            return Err(ConfigError::Validation(format!(
                "game.toml::app.player_kart references unknown kart id `{}`",
                self.game.app.player_kart
            )));
        }

        for (index, kart_id) in self.game.app.ai_kart_ids.iter().enumerate() {
            if !self.karts_by_id.contains_key(kart_id) {
                return Err(ConfigError::Validation(format!(
                    "game.toml::app.ai_kart_ids[{index}] references unknown kart id `{kart_id}`"
                )));
            }
        }

        if !self
            .surfaces_by_id
            .contains_key(&self.surfaces.default_surface)
        {
            return Err(ConfigError::Validation(format!(
                "surfaces.toml::default_surface references unknown surface id `{}`",
                self.surfaces.default_surface
            )));
        }

        if self.game.race.max_laps == 0 {
            return Err(ConfigError::Validation(
                "game.toml::race.max_laps must be >= 1".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.game.race.min_lap_completion) {
            return Err(ConfigError::Validation(
                "game.toml::race.min_lap_completion must be in [0, 1]".to_string(),
            ));
        }
        if self.game.race.grid_columns == 0 {
            return Err(ConfigError::Validation(
                "game.toml::race.grid_columns must be >= 1".to_string(),
            ));
        }

        for (index, kart) in self.karts.karts.iter().enumerate() {
            if !matches!(
                kart.boost.mode.as_str(),
                "drift_auto" | "drift_manual" | "manual"
            ) {
                return Err(ConfigError::Validation(format!(
                    "karts.toml::karts[{index}].boost.mode `{}` is unsupported (expected drift_auto/drift_manual/manual)",
                    kart.boost.mode
                )));
            }
            if !matches!(
                kart.walls.detection.as_str(),
                "normal" | "groups" | "named" | "flagged"
            ) {
                return Err(ConfigError::Validation(format!(
                    "karts.toml::karts[{index}].walls.detection `{}` is unsupported (expected normal/groups/named/flagged)",
                    kart.walls.detection
                )));
            }
            if kart.walls.detection == "named" && kart.walls.tag.trim().is_empty() {
                return Err(ConfigError::Validation(format!(
                    "karts.toml::karts[{index}].walls.tag cannot be empty when detection is `named`"
                )));
            }
            if kart.boost.max_boosts == 0 {
                return Err(ConfigError::Validation(format!(
                    "karts.toml::karts[{index}].boost.max_boosts must be >= 1"
                )));
            }
            if kart.boost.reserve_limit <= 0.0 {
                return Err(ConfigError::Validation(format!(
                    "karts.toml::karts[{index}].boost.reserve_limit must be > 0"
                )));
            }
            if kart.wheels.suspension_distance <= 0.0 {
                return Err(ConfigError::Validation(format!(
                    "karts.toml::karts[{index}].wheels.suspension_distance must be > 0"
                )));
            }
        }

        for (index, item) in self.items.items.iter().enumerate() {
            if !matches!(item.kind.as_str(), "boost" | "projectile") {
                return Err(ConfigError::Validation(format!(
                    "items.toml::items[{index}].kind `{}` is unsupported (expected boost/projectile)",
                    item.kind
                )));
            }
            if !matches!(item.spin_axis.as_str(), "yaw" | "pitch" | "roll") {
                return Err(ConfigError::Validation(format!(
                    "items.toml::items[{index}].spin_axis `{}` is unsupported (expected yaw/pitch/roll)",
                    item.spin_axis
                )));
            }
        }

        for (track_index, track) in self.tracks.tracks.iter().enumerate() {
            if !matches!(track.kind.as_str(), "race" | "battle") {
                return Err(ConfigError::Validation(format!(
                    "tracks.toml::tracks[{track_index}].kind `{}` is unsupported (expected race/battle)",
                    track.kind
                )));
            }
            if track.waypoints.is_empty() {
                return Err(ConfigError::Validation(format!(
                    "tracks.toml::tracks[{track_index}].waypoints cannot be empty"
                )));
            }

            let waypoint_count = track.waypoints.len();
            for (point_index, waypoint) in track.waypoints.iter().enumerate() {
                if let Some(next) = waypoint.next {
                    if next >= waypoint_count {
                        return Err(ConfigError::Validation(format!(
                            "tracks.toml::tracks[{track_index}].waypoints[{point_index}].next {next} is out of range (track has {waypoint_count} waypoints)"
                        )));
                    }
                }
                for (alt_index, alternate) in waypoint.alternates.iter().enumerate() {
                    if *alternate >= waypoint_count {
                        return Err(ConfigError::Validation(format!(
                            "tracks.toml::tracks[{track_index}].waypoints[{point_index}].alternates[{alt_index}] {alternate} is out of range"
                        )));
                    }
                }
                if waypoint.radius <= 0.0 {
                    return Err(ConfigError::Validation(format!(
                        "tracks.toml::tracks[{track_index}].waypoints[{point_index}].radius must be > 0"
                    )));
                }
                if track.kind == "race" && waypoint.next.is_none() {
                    return Err(ConfigError::Validation(format!(
                        "tracks.toml::tracks[{track_index}].waypoints[{point_index}] race waypoints require `next`"
                    )));
                }
            }

            for (giver_index, giver) in track.item_givers.iter().enumerate() {
                if let Some(item_id) = giver.item.as_deref() {
                    if !self.items_by_id.contains_key(item_id) {
                        return Err(ConfigError::Validation(format!(
                            "tracks.toml::tracks[{track_index}].item_givers[{giver_index}].item references unknown item id `{item_id}`"
                        )));
                    }
                }
            }

            for (hazard_index, hazard) in track.hazards.iter().enumerate() {
                if !matches!(hazard.spin_axis.as_str(), "yaw" | "pitch" | "roll") {
                    return Err(ConfigError::Validation(format!(
                        "tracks.toml::tracks[{track_index}].hazards[{hazard_index}].spin_axis `{}` is unsupported",
                        hazard.spin_axis
                    )));
                }
            }
        }

        for (index, blend_map) in self.surfaces.blend_maps.iter().enumerate() {
            for (layer_index, layer) in blend_map.layers.iter().enumerate() {
                if !self.surfaces_by_id.contains_key(layer) {
                    return Err(ConfigError::Validation(format!(
                        "surfaces.toml::blend_maps[{index}].layers[{layer_index}] references unknown surface id `{layer}`"
                    )));
                }
            }
            let expected = blend_map.columns as usize
                * blend_map.rows as usize
                * blend_map.layers.len().max(1);
            if blend_map.weights.len() != expected {
                return Err(ConfigError::Validation(format!(
                    "surfaces.toml::blend_maps[{index}].weights has {} entries, expected columns*rows*layers = {expected}",
                    blend_map.weights.len()
                )));
            }
            if blend_map.cell_size <= 0.0 {
                return Err(ConfigError::Validation(format!(
                    "surfaces.toml::blend_maps[{index}].cell_size must be > 0"
                )));
            }
        }

        Ok(())
    }
}

/// Saves a single kart's tunables as a standalone preset document.
pub fn save_kart_preset(path: &Path, kart: &KartConfig) -> Result<(), ConfigError> {
    let raw = serde_json::to_string_pretty(kart).map_err(|source| ConfigError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    fs::write(path, raw).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

pub fn load_kart_preset(path: &Path) -> Result<KartConfig, ConfigError> {
    let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&raw).map_err(|source| ConfigError::Json {
        path: path.to_path_buf(),
        source,
    })
}

#[derive(Debug)]
pub enum ConfigError {
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse {
        path: PathBuf,
        source: Box<toml::de::Error>,
    },
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },
    Validation(String),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io { path, source } => {
                write!(f, "failed to read `{}`: {source}", path.display())
            }
            Self::Parse { path, source } => {
                write!(f, "failed to parse `{}`: {source}", path.display())
            }
            Self::Json { path, source } => {
                write!(f, "failed to convert `{}`: {source}", path.display())
            }
            Self::Validation(message) => write!(f, "{message}"),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Parse { source, .. } => Some(source),
            Self::Json { source, .. } => Some(source),
            Self::Validation(_) => None,
        }
    }
}

fn read_toml<T: DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&raw).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source: Box::new(source),
    })
}

fn to_index<T>(label: &str, rows: &[T]) -> Result<HashMap<String, T>, ConfigError>
where
    T: HasId + Clone,
{
    let mut map = HashMap::new();

    for row in rows {
        let id = row.id();
        if id.trim().is_empty() {
            return Err(ConfigError::Validation(format!(
                "{label} contains an empty id"
            )));
        }

        if map.insert(id.to_string(), row.clone()).is_some() {
            return Err(ConfigError::Validation(format!(
                "{label} contains duplicate id `{id}`"
            )));
        }
    }

    Ok(map)
}

trait HasId {
    fn id(&self) -> &str;
}

#[derive(Debug, Clone, Deserialize)]
pub struct GameFile {
    pub app: AppConfig,
    pub race: RaceRulesConfig,
    pub battle: BattleRulesConfig,
    pub items: ItemRulesConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub starting_track: String,
    pub player_kart: String,
    #[serde(default)]
    pub ai_kart_ids: Vec<String>,
    pub debug_overlay: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RaceRulesConfig {
    pub max_laps: u32,
    pub countdown_seconds: u32,
    pub min_lap_completion: f32,
    /// Grace period granted to stragglers after the leader finishes or the
    /// time limit lapses. Negative disables the timeout entirely.
    pub race_end_duration: f32,
    pub time_limit: f32,
    pub grid_columns: u32,
    pub grid_spacing: f32,
    pub grid_row_spacing: f32,
    #[serde(default = "default_respawn_height")]
    pub respawn_height: f32,
}

fn default_respawn_height() -> f32 {
    2.0
}

#[derive(Debug, Clone, Deserialize)]
pub struct BattleRulesConfig {
    pub max_health: i32,
    pub max_points: i32,
    pub time_limit: f32,
    pub countdown_seconds: u32,
    #[serde(default = "default_prune_step_distance")]
    pub prune_step_distance: f32,
    #[serde(default = "default_prune_max_steepness")]
    pub prune_max_steepness: f32,
}

fn default_prune_step_distance() -> f32 {
    1.0
}

fn default_prune_max_steepness() -> f32 {
    0.5
}

#[derive(Debug, Clone, Deserialize)]
pub struct ItemRulesConfig {
    pub min_cast_interval: f32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct KartsFile {
    pub karts: Vec<KartConfig>,
}

/// A full set of tunables for one kart. The groups double as the preset
/// document format, so every field must survive a serialize/deserialize
/// round trip unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KartConfig {
    pub id: String,
    pub dimensions: KartDimensionsConfig,
    pub speed: KartSpeedConfig,
    pub steer: KartSteerConfig,
    pub suspension: KartSuspensionConfig,
    pub wheels: KartWheelsConfig,
    pub jump: KartJumpConfig,
    pub gravity: KartGravityConfig,
    pub drift: KartDriftConfig,
    pub boost: KartBoostConfig,
    pub walls: KartWallsConfig,
}

impl HasId for KartConfig {
    fn id(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KartDimensionsConfig {
    pub front_length: f32,
    pub back_length: f32,
    pub side_width: f32,
    pub corner_cast_size: f32,
    pub corner_cast_offset: f32,
    pub corner_cast_distance: f32,
    pub one_corner_cast_per_frame: bool,
    pub spin_rate: f32,
    pub spin_height: f32,
    pub air_flatten_rate: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KartSpeedConfig {
    pub max_speed: f32,
    pub max_reverse_speed: f32,
    pub acceleration: f32,
    pub brake_force: f32,
    pub coasting_friction: f32,
    pub slope_friction: f32,
    pub air_drive_friction: f32,
    pub auto_stop_speed: f32,
    pub auto_stop_force: f32,
    pub auto_stop_normal_dot_limit: f32,
    pub max_fall_speed: f32,
    pub spin_decel: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KartSteerConfig {
    pub max_steer: f32,
    pub min_steer: f32,
    pub steer_rate: f32,
    pub steer_speed_limit: f32,
    pub steer_slow_limit: f32,
    pub air_steer: f32,
    pub brake_steer_increase: f32,
    pub burnout_speed_limit: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KartSuspensionConfig {
    pub spring_force: f32,
    pub spring_dampening: f32,
    pub compression_spring_factor: f32,
    pub spring_damp_vel_min: f32,
    pub spring_damp_vel_max: f32,
    pub ground_stick_force: f32,
    pub ground_stick_compression: f32,
    pub ground_normal_smooth_rate: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KartWheelsConfig {
    pub suspension_distance: f32,
    pub wheel_radius: f32,
    pub one_wheel_cast_per_frame: bool,
    pub side_friction: f32,
    pub air_side_friction: f32,
    pub brake_slip_amount: f32,
    pub hardpoints: Vec<[f32; 3]>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KartJumpConfig {
    pub jump_force: f32,
    pub jump_duration: f32,
    pub air_jump_time_limit: f32,
    pub jump_stick_force: f32,
    pub air_land_boost: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KartGravityConfig {
    pub gravity_add: f32,
    pub fall_speed_decel: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KartDriftConfig {
    pub min_drift_angle: f32,
    pub max_drift_angle: f32,
    pub drift_swing_duration: f32,
    pub drift_swing_force: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KartBoostConfig {
    pub mode: String,
    pub rate: f32,
    pub interval: f32,
    pub max_boosts: u32,
    pub power: f32,
    pub ground_push: f32,
    pub air_push: f32,
    pub drive: f32,
    pub reserve_limit: f32,
    pub burn_rate: f32,
    pub amount_limit: f32,
    pub fill_rate: f32,
    pub manual_commit_limit: f32,
    pub manual_fail_cancel: bool,
    #[serde(default)]
    pub drift_trickle_rate: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KartWallsConfig {
    pub detection: String,
    pub dot_limit: f32,
    #[serde(default)]
    pub tag: String,
    pub friction: f32,
    pub min_hit_speed: f32,
    pub hit_duration: f32,
    pub bounce_turn_amount: f32,
    pub bounce_turn_decay_rate: f32,
    pub hit_cancels_drift: bool,
    pub hit_empties_boost: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SurfacesFile {
    pub default_surface: String,
    pub surfaces: Vec<SurfaceConfig>,
    #[serde(default)]
    pub blend_maps: Vec<BlendMapConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SurfaceConfig {
    pub id: String,
    pub friction: f32,
    pub speed: f32,
    #[serde(default)]
    pub always_slide: bool,
}

impl HasId for SurfaceConfig {
    fn id(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BlendMapConfig {
    pub origin: [f32; 2],
    pub cell_size: f32,
    pub columns: u32,
    pub rows: u32,
    pub layers: Vec<String>,
    /// Row-major, `layers.len()` weights per cell.
    pub weights: Vec<f32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ItemsFile {
    pub items: Vec<ItemConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ItemConfig {
    pub id: String,
    pub kind: String,
    #[serde(default)]
    pub boost_amount: f32,
    #[serde(default)]
    pub boost_force: f32,
    #[serde(default)]
    pub start_speed: f32,
    #[serde(default)]
    pub target_speed: f32,
    #[serde(default)]
    pub homing_accuracy: f32,
    #[serde(default = "default_max_homing_dist")]
    pub max_homing_dist: f32,
    #[serde(default)]
    pub min_homing_angle: f32,
    #[serde(default = "default_true")]
    pub prioritize_in_front: bool,
    #[serde(default = "default_max_bounces")]
    pub max_bounces: u32,
    #[serde(default = "default_bounce_reflect_force")]
    pub bounce_reflect_force: f32,
    #[serde(default)]
    pub destroy_on_wall_hit: bool,
    #[serde(default = "default_spin_axis")]
    pub spin_axis: String,
    #[serde(default = "default_spin_count")]
    pub spin_count: u32,
    #[serde(default = "default_projectile_lifetime")]
    pub lifetime: f32,
    #[serde(default = "default_projectile_gravity")]
    pub gravity_add: f32,
    #[serde(default = "default_caster_ignore_time")]
    pub caster_ignore_time: f32,
}

fn default_true() -> bool {
    true
}

fn default_max_homing_dist() -> f32 {
    30.0
}

fn default_max_bounces() -> u32 {
    3
}

fn default_bounce_reflect_force() -> f32 {
    1.0
}

fn default_spin_axis() -> String {
    "yaw".to_string()
}

fn default_spin_count() -> u32 {
    1
}

fn default_projectile_lifetime() -> f32 {
    8.0
}

fn default_projectile_gravity() -> f32 {
    -10.0
}

fn default_caster_ignore_time() -> f32 {
    0.5
}

impl HasId for ItemConfig {
    fn id(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TracksFile {
    pub tracks: Vec<TrackConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TrackConfig {
    pub id: String,
    pub kind: String,
    #[serde(default = "default_out_of_bounds_y")]
    pub out_of_bounds_y: f32,
    pub waypoints: Vec<WaypointConfig>,
    #[serde(default)]
    pub boost_pads: Vec<BoostPadConfig>,
    #[serde(default)]
    pub hazards: Vec<HazardConfig>,
    #[serde(default)]
    pub item_givers: Vec<ItemGiverConfig>,
}

fn default_out_of_bounds_y() -> f32 {
    -50.0
}

impl HasId for TrackConfig {
    fn id(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WaypointConfig {
    pub position: [f32; 3],
    pub radius: f32,
    #[serde(default)]
    pub next: Option<usize>,
    #[serde(default)]
    pub alternates: Vec<usize>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BoostPadConfig {
    pub position: [f32; 3],
    pub radius: f32,
    pub boost_amount: f32,
    pub boost_force: f32,
    #[serde(default)]
    pub continuous: bool,
    #[serde(default = "default_boost_pad_interval")]
    pub delay_interval: f32,
}

fn default_boost_pad_interval() -> f32 {
    0.5
}

#[derive(Debug, Clone, Deserialize)]
pub struct HazardConfig {
    pub position: [f32; 3],
    pub radius: f32,
    pub spin_axis: String,
    pub spin_count: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ItemGiverConfig {
    pub position: [f32; 3],
    pub radius: f32,
    #[serde(default)]
    pub item: Option<String>,
    #[serde(default = "default_giver_ammo")]
    pub ammo: u32,
    #[serde(default = "default_giver_cooldown")]
    pub cooldown: f32,
}

fn default_giver_ammo() -> u32 {
    1
}

fn default_giver_cooldown() -> f32 {
    1.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_kart(id: &str) -> KartConfig {
        KartConfig {
            id: id.to_string(),
            dimensions: KartDimensionsConfig {
                front_length: 0.9,
                back_length: 1.1,
                side_width: 0.8,
                corner_cast_size: 0.3,
                corner_cast_offset: 0.2,
                corner_cast_distance: 1.2,
                one_corner_cast_per_frame: false,
                spin_rate: 10.0,
                spin_height: 0.4,
                air_flatten_rate: 0.02,
            },
            speed: KartSpeedConfig {
                max_speed: 30.0,
                max_reverse_speed: 10.0,
                acceleration: 5.0,
                brake_force: 8.0,
                coasting_friction: 1.0,
                slope_friction: 1.0,
                air_drive_friction: 0.0,
                auto_stop_speed: 1.0,
                auto_stop_force: 10.0,
                auto_stop_normal_dot_limit: 0.9,
                max_fall_speed: 30.0,
                spin_decel: 4.0,
            },
            steer: KartSteerConfig {
                max_steer: 1.0,
                min_steer: 0.3,
                steer_rate: 0.1,
                steer_speed_limit: 30.0,
                steer_slow_limit: 2.0,
                air_steer: 0.5,
                brake_steer_increase: 1.2,
                burnout_speed_limit: 3.0,
            },
            suspension: KartSuspensionConfig {
                spring_force: 100.0,
                spring_dampening: 2.0,
                compression_spring_factor: 0.5,
                spring_damp_vel_min: -10.0,
                spring_damp_vel_max: 10.0,
                ground_stick_force: 20.0,
                ground_stick_compression: 0.7,
                ground_normal_smooth_rate: 10.0,
            },
            wheels: KartWheelsConfig {
                suspension_distance: 0.5,
                wheel_radius: 0.25,
                one_wheel_cast_per_frame: false,
                side_friction: 8.0,
                air_side_friction: 0.5,
                brake_slip_amount: 0.6,
                hardpoints: vec![
                    [0.7, -0.1, 0.9],
                    [-0.7, -0.1, 0.9],
                    [0.7, -0.1, -0.9],
                    [-0.7, -0.1, -0.9],
                ],
            },
            jump: KartJumpConfig {
                jump_force: 12.0,
                jump_duration: 0.2,
                air_jump_time_limit: 0.1,
                jump_stick_force: 4.0,
                air_land_boost: 0.0,
            },
            gravity: KartGravityConfig {
                gravity_add: -30.0,
                fall_speed_decel: 10.0,
            },
            drift: KartDriftConfig {
                min_drift_angle: 0.5,
                max_drift_angle: 1.4,
                drift_swing_duration: 0.3,
                drift_swing_force: 6.0,
            },
            boost: KartBoostConfig {
                mode: "drift_auto".to_string(),
                rate: 1.0,
                interval: 1.0,
                max_boosts: 3,
                power: 0.5,
                ground_push: 20.0,
                air_push: 8.0,
                drive: 0.4,
                reserve_limit: 3.0,
                burn_rate: 1.0,
                amount_limit: 2.0,
                fill_rate: 1.5,
                manual_commit_limit: 0.4,
                manual_fail_cancel: true,
                drift_trickle_rate: 0.1,
            },
            walls: KartWallsConfig {
                detection: "normal".to_string(),
                dot_limit: 0.5,
                tag: String::new(),
                friction: 2.0,
                min_hit_speed: 6.0,
                hit_duration: 0.5,
                bounce_turn_amount: 0.4,
                bounce_turn_decay_rate: 6.0,
                hit_cancels_drift: true,
                hit_empties_boost: false,
            },
        }
    }

    fn sample_config() -> GameConfig {
        let kart = sample_kart("standard");
        let surface = SurfaceConfig {
            id: "tarmac".to_string(),
            friction: 1.0,
            speed: 1.0,
            always_slide: false,
        };
        let track = TrackConfig {
            id: "loop".to_string(),
            kind: "race".to_string(),
            out_of_bounds_y: -50.0,
            waypoints: vec![
                WaypointConfig {
                    position: [0.0, 0.0, 0.0],
                    radius: 5.0,
                    next: Some(1),
                    alternates: Vec::new(),
                },
                WaypointConfig {
                    position: [0.0, 0.0, 40.0],
                    radius: 5.0,
                    next: Some(0),
                    alternates: Vec::new(),
                },
            ],
            boost_pads: Vec::new(),
            hazards: Vec::new(),
            item_givers: Vec::new(),
        };

        GameConfig {
            game: GameFile {
                app: AppConfig {
                    starting_track: "loop".to_string(),
                    player_kart: "standard".to_string(),
                    ai_kart_ids: vec!["standard".to_string()],
                    debug_overlay: true,
                },
                race: RaceRulesConfig {
                    max_laps: 3,
                    countdown_seconds: 3,
                    min_lap_completion: 0.9,
                    race_end_duration: 30.0,
                    time_limit: -1.0,
                    grid_columns: 2,
                    grid_spacing: 3.0,
                    grid_row_spacing: 4.0,
                    respawn_height: 2.0,
                },
                battle: BattleRulesConfig {
                    max_health: 3,
                    max_points: -1,
                    time_limit: -1.0,
                    countdown_seconds: 3,
                    prune_step_distance: 1.0,
                    prune_max_steepness: 0.5,
                },
                items: ItemRulesConfig {
                    min_cast_interval: 0.1,
                },
            },
            karts_by_id: HashMap::from([("standard".to_string(), kart.clone())]),
            surfaces_by_id: HashMap::from([("tarmac".to_string(), surface.clone())]),
            items_by_id: HashMap::new(),
            tracks_by_id: HashMap::from([("loop".to_string(), track.clone())]),
            karts: KartsFile { karts: vec![kart] },
            surfaces: SurfacesFile {
                default_surface: "tarmac".to_string(),
                surfaces: vec![surface],
                blend_maps: Vec::new(),
            },
            items: ItemsFile { items: Vec::new() },
            tracks: TracksFile {
                tracks: vec![track],
            },
        }
    }

    #[test]
    fn validation_passes_for_consistent_config() {
        sample_config()
            .validate_references()
            .expect("sample config should validate");
    }

    #[test]
    fn validation_fails_for_missing_track_reference() {
        let mut config = sample_config();
        config.game.app.starting_track = "missing_track".to_string();

        let error = config
            .validate_references()
            .expect_err("validation should fail");
        let message = error.to_string();

        assert!(message.contains("starting_track"));
        assert!(message.contains("missing_track"));
    }

    #[test]
    fn validation_fails_for_unknown_boost_mode() {
        let mut config = sample_config();
        config.karts.karts[0].boost.mode = "turbo".to_string();

        let error = config
            .validate_references()
            .expect_err("validation should fail");
        assert!(error.to_string().contains("boost.mode"));
    }

    #[test]
    fn validation_fails_for_race_waypoint_without_next() {
        let mut config = sample_config();
        config.tracks.tracks[0].waypoints[1].next = None;

        let error = config
            .validate_references()
            .expect_err("validation should fail");
        assert!(error.to_string().contains("require `next`"));
    }

    #[test]
    fn kart_preset_round_trip_is_lossless() {
        let original = sample_kart("roundtrip");
        let raw = serde_json::to_string_pretty(&original).expect("preset should serialize");
        let reloaded: KartConfig = serde_json::from_str(&raw).expect("preset should deserialize");

        assert_eq!(original, reloaded);

        // A second trip through the document form must also be stable.
        let raw_again = serde_json::to_string_pretty(&reloaded).expect("preset should serialize");
        assert_eq!(raw, raw_again);
    }
}
