pub mod ai;
pub mod items;
pub mod kart;
pub mod modes;
pub mod surfaces;
pub mod waypoints;

use bevy::prelude::*;

/// Frame order for the simulation: AI decides inputs, kart physics
/// integrates, agents observe positions, modes re-rank and transition.
#[derive(SystemSet, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SimSet {
    AiInput,
    KartPhysics,
    Agents,
    Modes,
}

pub struct GameplayPlugin;

impl Plugin for GameplayPlugin {
    fn build(&self, app: &mut App) {
        app.configure_sets(
            Update,
            (
                SimSet::AiInput,
                SimSet::KartPhysics,
                SimSet::Agents,
                SimSet::Modes,
            )
                .chain(),
        )
        .add_plugins((
            surfaces::SurfaceRegistryPlugin,
            kart::KartGameplayPlugin,
            ai::AiDriverPlugin,
            items::ItemSystemPlugin,
            modes::ModeDirectorPlugin,
        ));
    }
}
