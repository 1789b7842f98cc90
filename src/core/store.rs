use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Deserializer, Serialize};
use tokio::sync::broadcast;

use super::error::{Result, TrackerError};
use super::events::TrackerEvent;
use super::merge::merge;
use super::normalize::normalize;
use super::panel::PanelState;
use super::stats::{EntityKind, StatBlock, StatPatch};

pub const DEFAULT_USER_NAME: &str = "User";
pub const DEFAULT_BOT_NAME: &str = "Character";

const EVENT_CAPACITY: usize = 64;

/// Opaque snapshot persistence; the whole state is written as one unit.
pub trait SnapshotStorage: Send + Sync {
    fn load(&self) -> Result<Option<String>>;
    fn save(&self, blob: &str) -> Result<()>;
}

/// Snapshot kept in a JSON file under the data directory
pub struct JsonFileStorage {
    path: PathBuf,
}

impl JsonFileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        JsonFileStorage { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SnapshotStorage for JsonFileStorage {
    fn load(&self) -> Result<Option<String>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&self.path)?;
        if content.trim().is_empty() {
            return Ok(None);
        }
        Ok(Some(content))
    }

    fn save(&self, blob: &str) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        // write-then-rename so a crash never leaves half a snapshot
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, blob)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

/// In-process storage, used for ephemeral sessions and tests
#[derive(Default)]
pub struct MemoryStorage {
    blob: Mutex<Option<String>>,
    fail_writes: AtomicBool,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_blob(blob: impl Into<String>) -> Self {
        MemoryStorage {
            blob: Mutex::new(Some(blob.into())),
            fail_writes: AtomicBool::new(false),
        }
    }

    /// Make every following `save` fail.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn blob(&self) -> Option<String> {
        self.blob.lock().map(|b| b.clone()).unwrap_or_default()
    }
}

impl SnapshotStorage for MemoryStorage {
    fn load(&self) -> Result<Option<String>> {
        Ok(self.blob())
    }

    fn save(&self, blob: &str) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(TrackerError::Storage("memory storage is read-only".to_string()));
        }
        let mut slot = self
            .blob
            .lock()
            .map_err(|_| TrackerError::Storage("memory storage lock poisoned".to_string()))?;
        *slot = Some(blob.to_string());
        Ok(())
    }
}

pub type PresetBank = BTreeMap<String, StatBlock>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedEntity {
    #[serde(default = "default_kind")]
    pub kind: EntityKind,
    #[serde(default)]
    pub name: String,
    #[serde(default, deserialize_with = "lenient_block")]
    pub stats: StatBlock,
    #[serde(default)]
    pub panel: PanelState,
}

impl TrackedEntity {
    pub fn new(kind: EntityKind) -> Self {
        let name = match kind {
            EntityKind::User => DEFAULT_USER_NAME,
            EntityKind::Bot => DEFAULT_BOT_NAME,
        };
        TrackedEntity {
            kind,
            name: name.to_string(),
            stats: StatBlock::default(),
            panel: PanelState::Hidden,
        }
    }

    pub fn visible(&self) -> bool {
        self.panel.visible()
    }

    pub fn minimized(&self) -> bool {
        self.panel.minimized()
    }
}

fn default_kind() -> EntityKind {
    EntityKind::User
}

fn default_user() -> TrackedEntity {
    TrackedEntity::new(EntityKind::User)
}

fn default_bot() -> TrackedEntity {
    TrackedEntity::new(EntityKind::Bot)
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Presets {
    #[serde(default, deserialize_with = "lenient_bank")]
    pub user: PresetBank,
    #[serde(default, deserialize_with = "lenient_bank")]
    pub bot: PresetBank,
}

impl Presets {
    pub fn bank(&self, kind: EntityKind) -> &PresetBank {
        match kind {
            EntityKind::User => &self.user,
            EntityKind::Bot => &self.bot,
        }
    }

    pub fn bank_mut(&mut self, kind: EntityKind) -> &mut PresetBank {
        match kind {
            EntityKind::User => &mut self.user,
            EntityKind::Bot => &mut self.bot,
        }
    }
}

/// Everything that gets persisted, as one unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackerSnapshot {
    #[serde(default = "default_user")]
    pub user: TrackedEntity,
    #[serde(default = "default_bot")]
    pub bot: TrackedEntity,
    #[serde(default)]
    pub presets: Presets,
}

impl Default for TrackerSnapshot {
    fn default() -> Self {
        TrackerSnapshot {
            user: default_user(),
            bot: default_bot(),
            presets: Presets::default(),
        }
    }
}

impl TrackerSnapshot {
    pub fn entity(&self, kind: EntityKind) -> &TrackedEntity {
        match kind {
            EntityKind::User => &self.user,
            EntityKind::Bot => &self.bot,
        }
    }

    pub fn entity_mut(&mut self, kind: EntityKind) -> &mut TrackedEntity {
        match kind {
            EntityKind::User => &mut self.user,
            EntityKind::Bot => &mut self.bot,
        }
    }
}

fn lenient_block<'de, D>(deserializer: D) -> std::result::Result<StatBlock, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = serde_json::Value::deserialize(deserializer)?;
    Ok(StatBlock::from_raw(&raw))
}

fn lenient_bank<'de, D>(deserializer: D) -> std::result::Result<PresetBank, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = BTreeMap::<String, serde_json::Value>::deserialize(deserializer)?;
    Ok(raw
        .into_iter()
        .map(|(name, block)| (name, StatBlock::from_raw(&block)))
        .collect())
}

/// Owner of both entities, their presets and panel states.
pub struct Store {
    snapshot: TrackerSnapshot,
    storage: Arc<dyn SnapshotStorage>,
    events: broadcast::Sender<TrackerEvent>,
}

pub type SharedStore = Arc<tokio::sync::Mutex<Store>>;

impl Store {
    /// Load the persisted snapshot, or start from defaults.
    ///
    /// A missing, empty or unreadable snapshot is not an error; whatever
    /// does load is repaired field by field.
    pub fn load(storage: Arc<dyn SnapshotStorage>) -> Self {
        let snapshot = match storage.load() {
            Ok(Some(blob)) => match serde_json::from_str::<TrackerSnapshot>(&blob) {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    tracing::warn!("Stored snapshot is unreadable, starting from defaults: {}", e);
                    TrackerSnapshot::default()
                }
            },
            Ok(None) => {
                tracing::debug!("No stored snapshot, starting from defaults");
                TrackerSnapshot::default()
            }
            Err(e) => {
                tracing::warn!("Failed to load snapshot, starting from defaults: {}", e);
                TrackerSnapshot::default()
            }
        };

        let mut snapshot = snapshot;
        snapshot.user.kind = EntityKind::User;
        snapshot.bot.kind = EntityKind::Bot;
        for kind in EntityKind::ALL {
            let entity = snapshot.entity_mut(kind);
            if entity.name.trim().is_empty() {
                entity.name = TrackedEntity::new(kind).name;
            }
        }

        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Store { snapshot, storage, events }
    }

    pub fn into_shared(self) -> SharedStore {
        Arc::new(tokio::sync::Mutex::new(self))
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TrackerEvent> {
        self.events.subscribe()
    }

    pub fn notify(&self, event: TrackerEvent) {
        // no subscribers is fine
        let _ = self.events.send(event);
    }

    pub fn snapshot(&self) -> &TrackerSnapshot {
        &self.snapshot
    }

    pub fn entity(&self, kind: EntityKind) -> &TrackedEntity {
        self.snapshot.entity(kind)
    }

    pub fn stats(&self, kind: EntityKind) -> &StatBlock {
        &self.snapshot.entity(kind).stats
    }

    pub fn panel(&self, kind: EntityKind) -> PanelState {
        self.snapshot.entity(kind).panel
    }

    pub fn name(&self, kind: EntityKind) -> &str {
        &self.snapshot.entity(kind).name
    }

    /// Write the snapshot. Failures are logged and swallowed; the
    /// in-memory state stays authoritative.
    pub fn persist(&self) -> bool {
        let result = serde_json::to_string_pretty(&self.snapshot)
            .map_err(TrackerError::from)
            .and_then(|blob| self.storage.save(&blob));
        match result {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("Failed to persist stats snapshot: {}", e);
                false
            }
        }
    }

    /// Merge one normalized patch into an entity.
    pub fn apply_patch(&mut self, kind: EntityKind, patch: &StatPatch) {
        merge(&mut self.snapshot.entity_mut(kind).stats, patch);
        self.persist();
        self.notify_stats(kind);
    }

    /// Merge a scheduled update for both entities, persisted once.
    pub fn apply_update(&mut self, user: &StatPatch, bot: &StatPatch) {
        merge(&mut self.snapshot.user.stats, user);
        merge(&mut self.snapshot.bot.stats, bot);
        self.persist();
        for kind in EntityKind::ALL {
            self.notify_stats(kind);
        }
    }

    /// Manual edit; raw values go through the normalizer like any other input.
    pub fn edit(&mut self, kind: EntityKind, raw: &serde_json::Value) -> StatPatch {
        let patch = normalize(raw);
        if !patch.is_empty() {
            self.apply_patch(kind, &patch);
        }
        patch
    }

    pub fn reset(&mut self, kind: EntityKind) {
        self.snapshot.entity_mut(kind).stats = StatBlock::default();
        self.persist();
        self.notify_stats(kind);
    }

    /// Snapshot the current stats under `name`, replacing an older preset.
    pub fn save_preset(&mut self, kind: EntityKind, name: &str) -> Result<()> {
        let name = name.trim();
        if name.is_empty() {
            return Err(TrackerError::InvalidInput("preset name must not be empty".to_string()));
        }
        let stats = self.snapshot.entity(kind).stats.clone();
        self.snapshot.presets.bank_mut(kind).insert(name.to_string(), stats);
        self.persist();
        Ok(())
    }

    /// Replace the entity's stats with a stored preset.
    pub fn load_preset(&mut self, kind: EntityKind, name: &str) -> Result<()> {
        let preset = self
            .snapshot
            .presets
            .bank(kind)
            .get(name.trim())
            .cloned()
            .ok_or_else(|| TrackerError::NotFound(format!("{} preset '{}'", kind, name)))?;
        self.snapshot.entity_mut(kind).stats = preset;
        self.persist();
        self.notify_stats(kind);
        Ok(())
    }

    pub fn delete_preset(&mut self, kind: EntityKind, name: &str) -> Result<()> {
        if self.snapshot.presets.bank_mut(kind).remove(name.trim()).is_none() {
            return Err(TrackerError::NotFound(format!("{} preset '{}'", kind, name)));
        }
        self.persist();
        Ok(())
    }

    pub fn preset_names(&self, kind: EntityKind) -> Vec<String> {
        self.snapshot.presets.bank(kind).keys().cloned().collect()
    }

    pub fn show(&mut self, kind: EntityKind) -> bool {
        let changed = self.snapshot.entity_mut(kind).panel.show();
        self.panel_changed(kind, changed)
    }

    pub fn hide(&mut self, kind: EntityKind) -> bool {
        let changed = self.snapshot.entity_mut(kind).panel.hide();
        self.panel_changed(kind, changed)
    }

    pub fn toggle_minimize(&mut self, kind: EntityKind) -> bool {
        let changed = self.snapshot.entity_mut(kind).panel.toggle_minimize();
        self.panel_changed(kind, changed)
    }

    /// Track the host's active character name; never owned here.
    pub fn refresh_bot_name(&mut self, name: Option<&str>) {
        let name = name
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .unwrap_or(DEFAULT_BOT_NAME);
        self.set_name(EntityKind::Bot, name);
    }

    pub fn set_name(&mut self, kind: EntityKind, name: &str) {
        let name = name.trim();
        if name.is_empty() || self.snapshot.entity(kind).name == name {
            return;
        }
        self.snapshot.entity_mut(kind).name = name.to_string();
        self.persist();
        self.notify(TrackerEvent::NameChanged { kind, name: name.to_string() });
    }

    fn notify_stats(&self, kind: EntityKind) {
        self.notify(TrackerEvent::StatsChanged {
            kind,
            visible: self.snapshot.entity(kind).visible(),
        });
    }

    fn panel_changed(&mut self, kind: EntityKind, changed: bool) -> bool {
        if changed {
            self.persist();
            self.notify(TrackerEvent::PanelChanged { kind });
        }
        changed
    }
}
