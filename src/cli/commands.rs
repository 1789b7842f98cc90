use clap::Subcommand;

use crate::core::EntityKind;

#[derive(Subcommand)]
pub enum PresetCommands {
    /// Save the current stats of an entity under a name
    Save {
        /// user or bot
        kind: EntityKind,
        name: String,
    },
    /// Replace an entity's stats with a saved preset
    Load {
        kind: EntityKind,
        name: String,
    },
    /// Delete a saved preset
    Delete {
        kind: EntityKind,
        name: String,
    },
    /// List saved presets
    List {
        /// Only list presets of this entity
        kind: Option<EntityKind>,
    },
}

#[derive(Subcommand)]
pub enum PanelCommands {
    /// Open the panel of an entity
    Show { kind: EntityKind },
    /// Close the panel of an entity
    Hide { kind: EntityKind },
    /// Collapse or expand an open panel
    Minimize { kind: EntityKind },
}
