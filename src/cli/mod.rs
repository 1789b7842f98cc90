use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use colored::*;
use serde_json::{Map, Value};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};

use crate::ai_provider::AIProviderClient;
use crate::chat::{ChatEvent, ChatHistory, Transcript};
use crate::config::Config;
use crate::core::{EntityKind, JsonFileStorage, PanelState, StatBlock, Store, TrackedEntity};
use crate::prompt::build_prompt_from_history;
use crate::scheduler::UpdateScheduler;
use crate::tracker::StatsTracker;

pub use commands::{PanelCommands, PresetCommands};

mod commands;

fn open_store(config: &Config) -> Store {
    Store::load(Arc::new(JsonFileStorage::new(config.snapshot_file())))
}

fn open_transcript(config: &Config) -> Result<Arc<Transcript>> {
    let transcript = Transcript::load(&config.transcript_file()).context("Failed to read transcript.json")?;
    Ok(Arc::new(transcript))
}

fn print_entity(entity: &TrackedEntity) {
    let panel = match entity.panel {
        PanelState::Shown => "shown".green(),
        PanelState::Minimized => "minimized".yellow(),
        PanelState::Hidden => "hidden".dimmed(),
    };
    println!("{} ({}) [{}]", entity.name.bold().cyan(), entity.kind, panel);
    print_stats(&entity.stats);
}

fn print_stats(stats: &StatBlock) {
    let bars = [
        ("Health", stats.health),
        ("Sustenance", stats.sustenance),
        ("Energy", stats.energy),
        ("Hygiene", stats.hygiene),
        ("Arousal", stats.arousal),
    ];
    for (label, value) in bars {
        println!("  {:<12} {:>3}%", label, value);
    }
    println!("  {:<12} {:.1} cm", "GenitalSize", stats.genital_size);
    println!("  {:<12} {}", "Mood", stats.mood);
    println!("  {:<12} {}", "Conditions", stats.conditions.join(", "));
    println!("  {}", "Appearance".bold());
    for line in stats.appearance.lines() {
        println!("    {}", line);
    }
}

pub async fn handle_show(data_dir: Option<PathBuf>, json: bool) -> Result<()> {
    let config = Config::new(data_dir)?;
    let store = open_store(&config);

    if json {
        println!("{}", serde_json::to_string_pretty(store.snapshot())?);
        return Ok(());
    }

    for kind in EntityKind::ALL {
        print_entity(store.entity(kind));
        println!();
    }
    Ok(())
}

/// Import a stats payload from a message file, or stdin with `-`.
pub async fn handle_import(data_dir: Option<PathBuf>, source: String) -> Result<()> {
    let config = Config::new(data_dir)?;

    let text = if source == "-" {
        let mut text = String::new();
        tokio::io::stdin()
            .read_to_string(&mut text)
            .await
            .context("Failed to read stdin")?;
        text
    } else {
        tokio::fs::read_to_string(&source)
            .await
            .with_context(|| format!("Failed to read {}", source))?
    };

    let tracker = StatsTracker::new(
        open_store(&config).into_shared(),
        open_transcript(&config)?,
        Arc::new(AIProviderClient::new(config.provider.clone())),
        config.settings.clone(),
    );

    let changed = tracker.import_from_message(&text).await;
    if changed.is_empty() {
        println!("{}", "No stats payload found.".yellow());
        return Ok(());
    }

    let store = tracker.store().lock().await;
    for kind in changed {
        println!("{} {}", "✓ Updated".green(), kind);
        print_entity(store.entity(kind));
    }
    Ok(())
}

/// Run one generation cycle against the stored transcript.
pub async fn handle_update(data_dir: Option<PathBuf>) -> Result<()> {
    let config = Config::new(data_dir)?;
    let store = open_store(&config).into_shared();

    let provider = AIProviderClient::new(config.provider.clone());
    println!("Asking {} ({})...", provider.get_provider(), provider.get_model());

    let scheduler = UpdateScheduler::new(
        store.clone(),
        open_transcript(&config)?,
        Arc::new(provider),
        config.settings.clone(),
    );

    let record = scheduler.run_now().await?;
    if !record.outcome.is_applied() {
        bail!("Stats update failed: {}", record.outcome);
    }

    println!("{} in {}ms", "✓ Stats updated".green(), record.duration_ms);
    let store = store.lock().await;
    for kind in EntityKind::ALL {
        print_entity(store.entity(kind));
    }
    Ok(())
}

/// Drive the tracker from JSON-line chat events on stdin.
///
/// Tracker events are written to stdout as JSON lines.
pub async fn handle_run(data_dir: Option<PathBuf>) -> Result<()> {
    let config = Config::new(data_dir)?;
    let transcript = open_transcript(&config)?;
    let store = open_store(&config).into_shared();

    let tracker = StatsTracker::new(
        store.clone(),
        transcript.clone(),
        Arc::new(AIProviderClient::new(config.provider.clone())),
        config.settings.clone(),
    );

    let mut events = store.lock().await.subscribe();
    let printer = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => match serde_json::to_string(&event) {
                    Ok(line) => println!("{}", line),
                    Err(e) => tracing::warn!("Failed to serialize tracker event: {}", e),
                },
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!("Dropped {} tracker events", skipped);
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("Failed to read stdin")? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let event: ChatEvent = match serde_json::from_str(line) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!("Skipping malformed chat event: {}", e);
                continue;
            }
        };

        if matches!(event, ChatEvent::MessageReceived { .. }) {
            let bot_name = store.lock().await.name(EntityKind::Bot).to_string();
            transcript.record(&event, &bot_name);
            if let Err(e) = transcript.save(&config.transcript_file()) {
                tracing::warn!("Failed to save transcript: {}", e);
            }
        }

        tracker.handle_event(&event).await;
    }

    // let a pending debounce fire before exiting
    tracker.scheduler().settle().await;

    let stats = tracker.scheduler().get_scheduler_stats();
    tracing::info!(
        "Finished: {} cycles, {} applied, {} triggers dropped",
        stats.total_cycles,
        stats.applied_cycles,
        stats.dropped_triggers
    );

    // the printer drains what is buffered once the last store handle is gone
    drop(tracker);
    drop(store);
    if tokio::time::timeout(Duration::from_secs(1), printer).await.is_err() {
        tracing::debug!("Tracker event printer still busy at exit");
    }
    Ok(())
}

/// Manually set one field; the value goes through the normalizer.
pub async fn handle_set(data_dir: Option<PathBuf>, kind: EntityKind, field: String, value: String) -> Result<()> {
    let config = Config::new(data_dir)?;
    let mut store = open_store(&config);

    // numbers and lists as JSON, everything else as plain text
    let value = serde_json::from_str::<Value>(&value).unwrap_or(Value::String(value));
    let mut raw = Map::new();
    raw.insert(field.clone(), value);

    let patch = store.edit(kind, &Value::Object(raw));
    if patch.is_empty() {
        bail!("'{}' is not a stat field, or the value is unusable", field);
    }

    println!("{} {}", "✓ Updated".green(), kind);
    print_entity(store.entity(kind));
    Ok(())
}

pub async fn handle_reset(data_dir: Option<PathBuf>, kind: EntityKind) -> Result<()> {
    let config = Config::new(data_dir)?;
    let mut store = open_store(&config);

    store.reset(kind);
    println!("{} {} stats reset to defaults", "✓".green(), kind);
    Ok(())
}

pub async fn handle_preset(data_dir: Option<PathBuf>, command: PresetCommands) -> Result<()> {
    let config = Config::new(data_dir)?;
    let mut store = open_store(&config);

    match command {
        PresetCommands::Save { kind, name } => {
            store.save_preset(kind, &name)?;
            println!("{} Saved {} preset '{}'", "✓".green(), kind, name.trim());
        }
        PresetCommands::Load { kind, name } => {
            store.load_preset(kind, &name)?;
            println!("{} Loaded {} preset '{}'", "✓".green(), kind, name.trim());
            print_entity(store.entity(kind));
        }
        PresetCommands::Delete { kind, name } => {
            store.delete_preset(kind, &name)?;
            println!("{} Deleted {} preset '{}'", "✓".green(), kind, name.trim());
        }
        PresetCommands::List { kind } => {
            let kinds = match kind {
                Some(kind) => vec![kind],
                None => EntityKind::ALL.to_vec(),
            };
            for kind in kinds {
                let names = store.preset_names(kind);
                println!("{} presets ({}):", kind.to_string().cyan(), names.len());
                for name in names {
                    println!("  {}", name);
                }
            }
        }
    }
    Ok(())
}

pub async fn handle_panel(data_dir: Option<PathBuf>, command: PanelCommands) -> Result<()> {
    let config = Config::new(data_dir)?;
    let mut store = open_store(&config);

    let (kind, changed) = match command {
        PanelCommands::Show { kind } => (kind, store.show(kind)),
        PanelCommands::Hide { kind } => (kind, store.hide(kind)),
        PanelCommands::Minimize { kind } => (kind, store.toggle_minimize(kind)),
    };

    if changed {
        println!("{} panel is now {}", kind, store.panel(kind));
    } else {
        println!("{} panel unchanged ({})", kind, store.panel(kind));
    }
    Ok(())
}

pub async fn handle_names(data_dir: Option<PathBuf>, user: Option<String>, bot: Option<String>) -> Result<()> {
    let config = Config::new(data_dir)?;
    let mut store = open_store(&config);

    if let Some(name) = user {
        store.set_name(EntityKind::User, &name);
    }
    if let Some(name) = bot {
        store.refresh_bot_name(Some(&name));
    }

    for kind in EntityKind::ALL {
        println!("{}: {}", kind, store.name(kind));
    }
    Ok(())
}

/// Print the prompt the next generation cycle would send.
pub async fn handle_prompt(data_dir: Option<PathBuf>) -> Result<()> {
    let config = Config::new(data_dir)?;
    let store = open_store(&config);
    let transcript = open_transcript(&config)?;

    let history: &dyn ChatHistory = &*transcript;
    let prompt = build_prompt_from_history(&config.settings, store.snapshot(), history)?;
    println!("{}", prompt);
    Ok(())
}
