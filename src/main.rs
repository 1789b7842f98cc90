use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use stats_tracker::cli::{self, PanelCommands, PresetCommands};
use stats_tracker::core::EntityKind;

#[derive(Parser)]
#[command(name = "stats-tracker")]
#[command(about = "Live character-sheet stats for roleplay chats")]
#[command(version)]
struct Cli {
    /// Data directory (defaults to the user config dir)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show both stat panels
    Show {
        /// Print the raw snapshot as JSON
        #[arg(long)]
        json: bool,
    },
    /// Apply a stats payload found in a message (file path or - for stdin)
    Import { source: String },
    /// Run one generation cycle now
    Update,
    /// Read JSON-line chat events from stdin and keep stats updated
    Run,
    /// Manually set one stat field
    Set {
        kind: EntityKind,
        field: String,
        value: String,
    },
    /// Reset an entity's stats to defaults
    Reset { kind: EntityKind },
    /// Manage saved presets
    Preset {
        #[command(subcommand)]
        command: PresetCommands,
    },
    /// Change panel visibility
    Panel {
        #[command(subcommand)]
        command: PanelCommands,
    },
    /// Show or change display names
    Names {
        #[arg(long)]
        user: Option<String>,
        #[arg(long)]
        bot: Option<String>,
    },
    /// Print the prompt the next update would send
    Prompt,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "stats_tracker=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let data_dir = cli.data_dir;

    match cli.command {
        Commands::Show { json } => cli::handle_show(data_dir, json).await,
        Commands::Import { source } => cli::handle_import(data_dir, source).await,
        Commands::Update => cli::handle_update(data_dir).await,
        Commands::Run => cli::handle_run(data_dir).await,
        Commands::Set { kind, field, value } => cli::handle_set(data_dir, kind, field, value).await,
        Commands::Reset { kind } => cli::handle_reset(data_dir, kind).await,
        Commands::Preset { command } => cli::handle_preset(data_dir, command).await,
        Commands::Panel { command } => cli::handle_panel(data_dir, command).await,
        Commands::Names { user, bot } => cli::handle_names(data_dir, user, bot).await,
        Commands::Prompt => cli::handle_prompt(data_dir).await,
    }
}
