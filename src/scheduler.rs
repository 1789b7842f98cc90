//! Debounced, single-flight stats updates.
//!
//! ```text
//! Idle --trigger--> PendingDebounce --timer--> InFlight --done--> Idle
//!                     ^   |
//!                     +---+ trigger resets the timer
//! ```
//!
//! Triggers that arrive while a generation call is outstanding are dropped
//! and never replayed. The provider call itself has no timeout.

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::ai_provider::GenerationProvider;
use crate::chat::ChatHistory;
use crate::config::Settings;
use crate::core::{normalize, NoticeLevel, Result, SharedStore, TrackerError, TrackerEvent};
use crate::parser::parse_generation_output;
use crate::prompt::build_prompt;

const MAX_HISTORY: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerPhase {
    Idle,
    PendingDebounce,
    InFlight,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", content = "message", rename_all = "snake_case")]
pub enum CycleOutcome {
    Applied,
    ParseFailure(String),
    GenerationFailure(String),
}

impl CycleOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, CycleOutcome::Applied)
    }
}

impl std::fmt::Display for CycleOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CycleOutcome::Applied => write!(f, "applied"),
            CycleOutcome::ParseFailure(msg) => write!(f, "parse failure: {}", msg),
            CycleOutcome::GenerationFailure(msg) => write!(f, "generation failure: {}", msg),
        }
    }
}

/// One completed generation cycle
#[derive(Debug, Clone, Serialize)]
pub struct CycleRecord {
    pub id: String,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    #[serde(flatten)]
    pub outcome: CycleOutcome,
}

#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStats {
    pub total_cycles: usize,
    pub applied_cycles: usize,
    pub parse_failures: usize,
    pub generation_failures: usize,
    pub dropped_triggers: usize,
    pub success_rate: f64,
    pub avg_duration_ms: f64,
}

struct SchedulerState {
    phase: SchedulerPhase,
    settings: Settings,
    /// Bumped on every accepted trigger; a timer only fires for its own epoch
    epoch: u64,
    timer: Option<JoinHandle<()>>,
    history: Vec<CycleRecord>,
    dropped_triggers: usize,
}

struct Inner {
    store: SharedStore,
    chat: Arc<dyn ChatHistory>,
    provider: Arc<dyn GenerationProvider>,
    state: Mutex<SchedulerState>,
    idle: Notify,
}

/// Handle to the update state machine. Clones share the same machine.
#[derive(Clone)]
pub struct UpdateScheduler {
    inner: Arc<Inner>,
}

impl UpdateScheduler {
    pub fn new(
        store: SharedStore,
        chat: Arc<dyn ChatHistory>,
        provider: Arc<dyn GenerationProvider>,
        settings: Settings,
    ) -> Self {
        let state = SchedulerState {
            phase: SchedulerPhase::Idle,
            settings,
            epoch: 0,
            timer: None,
            history: Vec::new(),
            dropped_triggers: 0,
        };
        UpdateScheduler {
            inner: Arc::new(Inner {
                store,
                chat,
                provider,
                state: Mutex::new(state),
                idle: Notify::new(),
            }),
        }
    }

    /// Request an update. Returns whether the trigger was accepted.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn trigger(&self) -> bool {
        let mut state = self.inner.lock_state();

        if !state.settings.auto_update {
            tracing::debug!("Auto update disabled, ignoring trigger");
            return false;
        }

        match state.phase {
            SchedulerPhase::InFlight => {
                state.dropped_triggers += 1;
                tracing::debug!("Update in flight, dropping trigger");
                false
            }
            SchedulerPhase::Idle | SchedulerPhase::PendingDebounce => {
                if let Some(timer) = state.timer.take() {
                    timer.abort();
                }
                state.epoch += 1;
                state.phase = SchedulerPhase::PendingDebounce;

                let epoch = state.epoch;
                let delay = state.settings.debounce();
                let inner = Arc::clone(&self.inner);
                state.timer = Some(tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    inner.fire(epoch).await;
                }));
                true
            }
        }
    }

    /// Run one cycle right away, cancelling any pending debounce.
    ///
    /// Ignores `auto_update`; refuses to overlap an outstanding call. The
    /// cycle runs on its own task, so dropping the returned future does not
    /// cancel it.
    pub async fn run_now(&self) -> Result<CycleRecord> {
        let settings = {
            let mut state = self.inner.lock_state();
            if state.phase == SchedulerPhase::InFlight {
                return Err(TrackerError::InvalidInput("a stats update is already in flight".to_string()));
            }
            if let Some(timer) = state.timer.take() {
                timer.abort();
            }
            state.epoch += 1;
            state.phase = SchedulerPhase::InFlight;
            state.settings.clone()
        };

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move { inner.complete(settings).await })
            .await
            .map_err(|e| TrackerError::Generation(format!("update task failed: {}", e)))
    }

    /// Wait until the machine is back in `Idle`.
    pub async fn settle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.phase() == SchedulerPhase::Idle {
                return;
            }
            notified.await;
        }
    }

    /// Drop a pending debounce. An in-flight call still runs to completion.
    pub fn cancel_pending(&self) {
        let mut state = self.inner.lock_state();
        if state.phase == SchedulerPhase::PendingDebounce {
            if let Some(timer) = state.timer.take() {
                timer.abort();
            }
            state.epoch += 1;
            state.phase = SchedulerPhase::Idle;
            drop(state);
            self.inner.idle.notify_waiters();
        }
    }

    pub fn phase(&self) -> SchedulerPhase {
        self.inner.lock_state().phase
    }

    pub fn settings(&self) -> Settings {
        self.inner.lock_state().settings.clone()
    }

    /// New settings apply from the next cycle on. Turning `auto_update`
    /// off also stops a pending debounce from firing.
    pub fn set_settings(&self, settings: Settings) {
        self.inner.lock_state().settings = settings;
    }

    /// Most recent first.
    pub fn get_cycle_history(&self, limit: Option<usize>) -> Vec<CycleRecord> {
        let state = self.inner.lock_state();
        let limit = limit.unwrap_or(state.history.len());
        state.history.iter().rev().take(limit).cloned().collect()
    }

    pub fn get_scheduler_stats(&self) -> SchedulerStats {
        let state = self.inner.lock_state();
        let history = &state.history;

        let total_cycles = history.len();
        let applied_cycles = history.iter().filter(|c| c.outcome.is_applied()).count();
        let parse_failures = history
            .iter()
            .filter(|c| matches!(c.outcome, CycleOutcome::ParseFailure(_)))
            .count();

        SchedulerStats {
            total_cycles,
            applied_cycles,
            parse_failures,
            generation_failures: total_cycles - applied_cycles - parse_failures,
            dropped_triggers: state.dropped_triggers,
            success_rate: if total_cycles > 0 {
                applied_cycles as f64 / total_cycles as f64
            } else {
                0.0
            },
            avg_duration_ms: if total_cycles > 0 {
                history.iter().map(|c| c.duration_ms as f64).sum::<f64>() / total_cycles as f64
            } else {
                0.0
            },
        }
    }
}

impl Inner {
    fn lock_state(&self) -> MutexGuard<'_, SchedulerState> {
        // state is plain data, a panic elsewhere cannot leave it half-written
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn fire(&self, epoch: u64) {
        let settings = {
            let mut state = self.lock_state();
            if state.epoch != epoch || state.phase != SchedulerPhase::PendingDebounce {
                return;
            }
            state.timer = None;
            if !state.settings.auto_update {
                tracing::debug!("Auto update disabled while pending, skipping cycle");
                state.phase = SchedulerPhase::Idle;
                drop(state);
                self.idle.notify_waiters();
                return;
            }
            state.phase = SchedulerPhase::InFlight;
            state.settings.clone()
        };

        self.complete(settings).await;
    }

    async fn complete(&self, settings: Settings) -> CycleRecord {
        // back to Idle on every exit, a panicking provider included
        let _idle = IdleOnDrop { inner: self };
        let record = self.run_cycle(&settings).await;

        {
            let mut state = self.lock_state();
            state.history.push(record.clone());
            if state.history.len() > MAX_HISTORY {
                let excess = state.history.len() - MAX_HISTORY;
                state.history.drain(..excess);
            }
        }

        record
    }

    async fn run_cycle(&self, settings: &Settings) -> CycleRecord {
        let id = Uuid::new_v4().to_string();
        let started_at = Utc::now();
        let start = tokio::time::Instant::now();

        let outcome = match self.generate_update(settings).await {
            Ok(()) => {
                tracing::info!("Stats updated from generation");
                CycleOutcome::Applied
            }
            Err(e) if e.is_parse_failure() => {
                tracing::warn!("Stats update failed (bad JSON): {}", e);
                self.report(settings, NoticeLevel::Warning, "Stats update failed (bad JSON).").await;
                CycleOutcome::ParseFailure(e.to_string())
            }
            Err(e) => {
                tracing::error!("Stats update failed: {}", e);
                self.report(settings, NoticeLevel::Error, "Stats update failed. Check the log for details.")
                    .await;
                CycleOutcome::GenerationFailure(e.to_string())
            }
        };

        CycleRecord {
            id,
            started_at,
            duration_ms: start.elapsed().as_millis() as u64,
            outcome,
        }
    }

    async fn generate_update(&self, settings: &Settings) -> Result<()> {
        let prompt = {
            let store = self.store.lock().await;
            let turns = self.chat.recent_turns(settings.recent_message_count());
            build_prompt(settings, store.snapshot(), &turns).map_err(TrackerError::into_generation)?
        };

        let raw = self
            .provider
            .generate(&prompt)
            .await
            .map_err(TrackerError::into_generation)?;
        if raw.trim().is_empty() {
            return Err(TrackerError::Generation("provider returned no text".to_string()));
        }

        let parsed = parse_generation_output(&raw)
            .ok_or_else(|| TrackerError::Parse(format!("not a JSON object: {}", preview(&raw))))?;

        let user = normalize(parsed.get("user").unwrap_or(&Value::Null));
        let bot = normalize(parsed.get("bot").unwrap_or(&Value::Null));

        self.store.lock().await.apply_update(&user, &bot);
        Ok(())
    }

    async fn report(&self, settings: &Settings, level: NoticeLevel, message: &str) {
        if settings.enable_sys_messages {
            self.store.lock().await.notify(TrackerEvent::Notice {
                level,
                message: message.to_string(),
            });
        }
    }
}

struct IdleOnDrop<'a> {
    inner: &'a Inner,
}

impl Drop for IdleOnDrop<'_> {
    fn drop(&mut self) {
        self.inner.lock_state().phase = SchedulerPhase::Idle;
        self.inner.idle.notify_waiters();
    }
}

fn preview(raw: &str) -> String {
    let raw = raw.trim();
    match raw.char_indices().nth(80) {
        Some((cut, _)) => format!("{}…", &raw[..cut]),
        None => raw.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai_provider::MockGenerationProvider;
    use crate::chat::{ChatTurn, Transcript};
    use crate::core::{EntityKind, MemoryStorage, PanelState, StatPatch, Store};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Counts calls, tracks concurrency, optionally blocks until released.
    struct RecordingProvider {
        response: String,
        gate: Option<Arc<Notify>>,
        calls: AtomicUsize,
        active: AtomicUsize,
        max_active: AtomicUsize,
        prompts: Mutex<Vec<String>>,
    }

    impl RecordingProvider {
        fn new(response: &str) -> Self {
            RecordingProvider {
                response: response.to_string(),
                gate: None,
                calls: AtomicUsize::new(0),
                active: AtomicUsize::new(0),
                max_active: AtomicUsize::new(0),
                prompts: Mutex::new(Vec::new()),
            }
        }

        fn gated(response: &str, gate: Arc<Notify>) -> Self {
            RecordingProvider { gate: Some(gate), ..Self::new(response) }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn prompts(&self) -> Vec<String> {
            self.prompts.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl GenerationProvider for RecordingProvider {
        async fn generate(&self, prompt: &str) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(active, Ordering::SeqCst);
            self.prompts.lock().unwrap().push(prompt.to_string());

            if let Some(gate) = &self.gate {
                gate.notified().await;
            }

            self.active.fetch_sub(1, Ordering::SeqCst);
            Ok(self.response.clone())
        }
    }

    const UPDATE: &str = r#"{"user": {"Health": 150, "Mood": "Happy"}, "bot": {"Arousal": -5}}"#;

    fn setup(provider: Arc<dyn GenerationProvider>, settings: Settings) -> (SharedStore, UpdateScheduler) {
        let store = Store::load(Arc::new(MemoryStorage::new())).into_shared();
        let chat = Arc::new(Transcript::from_turns(vec![ChatTurn::new("User", "I trip and fall.")]));
        let scheduler = UpdateScheduler::new(store.clone(), chat, provider, settings);
        (store, scheduler)
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_coalesces_into_one_call() {
        let provider = Arc::new(RecordingProvider::new(UPDATE));
        let (_store, scheduler) = setup(provider.clone(), Settings::default());

        for _ in 0..5 {
            assert!(scheduler.trigger());
            assert_eq!(scheduler.phase(), SchedulerPhase::PendingDebounce);
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
        scheduler.settle().await;

        assert_eq!(provider.calls(), 1);
        assert_eq!(scheduler.phase(), SchedulerPhase::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fires_with_state_as_of_last_trigger() {
        let provider = Arc::new(RecordingProvider::new("{}"));
        let (store, scheduler) = setup(provider.clone(), Settings::default());

        scheduler.trigger();
        tokio::time::sleep(Duration::from_millis(500)).await;

        store.lock().await.apply_patch(
            EntityKind::User,
            &StatPatch { mood: Some("Furious".to_string()), ..Default::default() },
        );
        scheduler.trigger();

        // first timer would have fired at 1100ms, the reset one fires at 1600ms
        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert_eq!(provider.calls(), 0);

        scheduler.settle().await;
        assert_eq!(provider.calls(), 1);
        assert!(provider.prompts()[0].contains("\"Mood\": \"Furious\""));
        assert!(provider.prompts()[0].ends_with("Recent messages:\nUser: I trip and fall."));
    }

    #[tokio::test(start_paused = true)]
    async fn test_trigger_in_flight_is_dropped_not_replayed() {
        let gate = Arc::new(Notify::new());
        let provider = Arc::new(RecordingProvider::gated(UPDATE, gate.clone()));
        let (_store, scheduler) = setup(provider.clone(), Settings::default());

        scheduler.trigger();
        tokio::time::sleep(Duration::from_millis(1200)).await;
        assert_eq!(scheduler.phase(), SchedulerPhase::InFlight);
        assert_eq!(provider.calls(), 1);

        assert!(!scheduler.trigger());
        assert_eq!(scheduler.phase(), SchedulerPhase::InFlight);

        gate.notify_one();
        scheduler.settle().await;
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert_eq!(provider.calls(), 1);
        assert_eq!(provider.max_active.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.phase(), SchedulerPhase::Idle);
        assert_eq!(scheduler.get_scheduler_stats().dropped_triggers, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_now_refuses_to_overlap() {
        let gate = Arc::new(Notify::new());
        let provider = Arc::new(RecordingProvider::gated(UPDATE, gate.clone()));
        let (_store, scheduler) = setup(provider.clone(), Settings::default());

        scheduler.trigger();
        tokio::time::sleep(Duration::from_millis(1200)).await;

        let err = scheduler.run_now().await.unwrap_err();
        assert!(matches!(err, TrackerError::InvalidInput(_)));

        gate.notify_one();
        scheduler.settle().await;
        assert_eq!(provider.max_active.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_auto_update_off_ignores_triggers() {
        let provider = Arc::new(RecordingProvider::new(UPDATE));
        let settings = Settings { auto_update: false, ..Default::default() };
        let (_store, scheduler) = setup(provider.clone(), settings);

        assert!(!scheduler.trigger());
        assert_eq!(scheduler.phase(), SchedulerPhase::Idle);
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(provider.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabling_auto_update_stops_pending_cycle() {
        let provider = Arc::new(RecordingProvider::new(UPDATE));
        let (_store, scheduler) = setup(provider.clone(), Settings::default());

        assert!(scheduler.trigger());
        tokio::time::sleep(Duration::from_millis(300)).await;
        scheduler.set_settings(Settings { auto_update: false, ..Default::default() });

        scheduler.settle().await;
        tokio::time::sleep(Duration::from_secs(3)).await;

        assert_eq!(provider.calls(), 0);
        assert_eq!(scheduler.phase(), SchedulerPhase::Idle);
        assert!(scheduler.get_cycle_history(None).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_run_now_still_completes() {
        let gate = Arc::new(Notify::new());
        let provider = Arc::new(RecordingProvider::gated(UPDATE, gate.clone()));
        let (store, scheduler) = setup(provider.clone(), Settings::default());

        let abandoned = tokio::time::timeout(Duration::from_millis(50), scheduler.run_now()).await;
        assert!(abandoned.is_err());
        assert_eq!(scheduler.phase(), SchedulerPhase::InFlight);

        gate.notify_one();
        scheduler.settle().await;

        assert_eq!(scheduler.phase(), SchedulerPhase::Idle);
        assert_eq!(store.lock().await.stats(EntityKind::User).health, 100);
        assert_eq!(scheduler.get_cycle_history(None).len(), 1);
        assert!(scheduler.trigger());
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_provider_returns_to_idle() {
        struct PanickingProvider;

        #[async_trait]
        impl GenerationProvider for PanickingProvider {
            async fn generate(&self, _prompt: &str) -> Result<String> {
                panic!("provider blew up");
            }
        }

        let (_store, scheduler) = setup(Arc::new(PanickingProvider), Settings::default());

        let err = scheduler.run_now().await.unwrap_err();
        assert!(err.is_generation_failure());
        assert_eq!(scheduler.phase(), SchedulerPhase::Idle);

        // the debounced path recovers the same way
        assert!(scheduler.trigger());
        scheduler.settle().await;
        assert_eq!(scheduler.phase(), SchedulerPhase::Idle);
        assert!(scheduler.trigger());
    }

    #[tokio::test(start_paused = true)]
    async fn test_applied_update_is_normalized_and_merged() {
        let provider = Arc::new(RecordingProvider::new(&format!("```json\n{}\n```", UPDATE)));
        let (store, scheduler) = setup(provider.clone(), Settings::default());
        let mut events = store.lock().await.subscribe();

        scheduler.trigger();
        scheduler.settle().await;

        let store = store.lock().await;
        let user = store.stats(EntityKind::User);
        assert_eq!(user.health, 100);
        assert_eq!(user.mood, "Happy");
        assert_eq!(user.energy, 80);
        assert_eq!(store.stats(EntityKind::Bot).arousal, 0);
        assert_eq!(store.stats(EntityKind::Bot).mood, "Neutral");
        assert_eq!(store.panel(EntityKind::User), PanelState::Hidden);

        assert_eq!(
            events.try_recv().unwrap(),
            TrackerEvent::StatsChanged { kind: EntityKind::User, visible: false }
        );
        assert_eq!(
            events.try_recv().unwrap(),
            TrackerEvent::StatsChanged { kind: EntityKind::Bot, visible: false }
        );

        let history = scheduler.get_cycle_history(None);
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].outcome, CycleOutcome::Applied);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bad_json_is_a_parse_failure() {
        let provider = Arc::new(RecordingProvider::new("Sorry, I can't help with that."));
        let (store, scheduler) = setup(provider.clone(), Settings::default());
        let before = store.lock().await.snapshot().clone();
        let mut events = store.lock().await.subscribe();

        let record = scheduler.run_now().await.unwrap();

        assert!(matches!(record.outcome, CycleOutcome::ParseFailure(_)));
        assert_eq!(*store.lock().await.snapshot(), before);
        assert_eq!(
            events.try_recv().unwrap(),
            TrackerEvent::Notice {
                level: NoticeLevel::Warning,
                message: "Stats update failed (bad JSON).".to_string()
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_provider_error_is_a_generation_failure() {
        let mut provider = MockGenerationProvider::new();
        provider
            .expect_generate()
            .times(1)
            .returning(|_| Err(TrackerError::Config("connection refused".to_string())));
        let settings = Settings { enable_sys_messages: false, ..Default::default() };
        let (store, scheduler) = setup(Arc::new(provider), settings);
        let mut events = store.lock().await.subscribe();

        let record = scheduler.run_now().await.unwrap();

        match record.outcome {
            CycleOutcome::GenerationFailure(msg) => assert!(msg.contains("connection refused")),
            other => panic!("unexpected outcome: {:?}", other),
        }
        // notices are off
        assert!(events.try_recv().is_err());
        assert_eq!(scheduler.phase(), SchedulerPhase::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_response_is_a_generation_failure() {
        let provider = Arc::new(RecordingProvider::new("   "));
        let (_store, scheduler) = setup(provider, Settings::default());

        let record = scheduler.run_now().await.unwrap();
        assert!(matches!(record.outcome, CycleOutcome::GenerationFailure(_)));

        let stats = scheduler.get_scheduler_stats();
        assert_eq!(stats.total_cycles, 1);
        assert_eq!(stats.generation_failures, 1);
        assert_eq!(stats.success_rate, 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_pending() {
        let provider = Arc::new(RecordingProvider::new(UPDATE));
        let (_store, scheduler) = setup(provider.clone(), Settings::default());

        scheduler.trigger();
        scheduler.cancel_pending();
        assert_eq!(scheduler.phase(), SchedulerPhase::Idle);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(provider.calls(), 0);
    }
}
