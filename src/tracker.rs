use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::ai_provider::GenerationProvider;
use crate::chat::{ChatEvent, ChatHistory};
use crate::config::Settings;
use crate::core::{normalize, EntityKind, SharedStore};
use crate::parser::GrammarSet;
use crate::scheduler::UpdateScheduler;

/// Wires host chat events to the store and the update scheduler.
pub struct StatsTracker {
    store: SharedStore,
    scheduler: UpdateScheduler,
    ready: AtomicBool,
    /// Grammars built for the user name they were built with
    grammars: Mutex<Option<(String, Arc<GrammarSet>)>>,
}

impl StatsTracker {
    pub fn new(
        store: SharedStore,
        chat: Arc<dyn ChatHistory>,
        provider: Arc<dyn GenerationProvider>,
        settings: Settings,
    ) -> Self {
        let scheduler = UpdateScheduler::new(store.clone(), chat, provider, settings);
        StatsTracker {
            store,
            scheduler,
            ready: AtomicBool::new(false),
            grammars: Mutex::new(None),
        }
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    pub fn scheduler(&self) -> &UpdateScheduler {
        &self.scheduler
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    pub async fn handle_event(&self, event: &ChatEvent) {
        match event {
            ChatEvent::AppReady => {
                if !self.ready.swap(true, Ordering::SeqCst) {
                    tracing::info!("Host ready, processing new assistant messages");
                    self.auto_open().await;
                }
            }
            ChatEvent::MessageReceived { is_user: true, .. } => {}
            ChatEvent::MessageReceived { text, .. } => {
                if !self.is_ready() {
                    tracing::debug!("Ignoring assistant message received before ready");
                    return;
                }
                self.import_from_message(text).await;
                self.scheduler.trigger();
            }
            ChatEvent::ChatChanged { character } | ChatEvent::CharacterChanged { character } => {
                self.store.lock().await.refresh_bot_name(character.as_deref());
            }
        }
    }

    /// Apply a stats payload carried by the message itself.
    ///
    /// Returns the entities that changed; a message without a payload is
    /// the normal case and changes nothing.
    pub async fn import_from_message(&self, text: &str) -> Vec<EntityKind> {
        let mut store = self.store.lock().await;
        let grammars = self.grammars_for(store.name(EntityKind::User));

        let Some(found) = grammars.extract(text) else {
            return Vec::new();
        };

        let mut changed = Vec::new();
        for kind in EntityKind::ALL {
            let patch = found.section(kind).map(normalize).unwrap_or_default();
            if !patch.is_empty() {
                store.apply_patch(kind, &patch);
                changed.push(kind);
            }
        }
        if !changed.is_empty() {
            tracing::info!("Imported inline stats for {:?}", changed);
        }
        changed
    }

    fn grammars_for(&self, user_name: &str) -> Arc<GrammarSet> {
        let mut cached = self.grammars.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        match cached.as_ref() {
            Some((name, grammars)) if name == user_name => Arc::clone(grammars),
            _ => {
                let grammars = Arc::new(GrammarSet::standard(user_name));
                *cached = Some((user_name.to_string(), Arc::clone(&grammars)));
                grammars
            }
        }
    }

    async fn auto_open(&self) {
        let settings = self.scheduler.settings();
        let mut store = self.store.lock().await;
        if settings.auto_open_user {
            store.show(EntityKind::User);
        }
        if settings.auto_open_bot {
            store.show(EntityKind::Bot);
        }
    }
}
