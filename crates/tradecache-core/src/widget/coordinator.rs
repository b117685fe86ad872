//! Owner of the live chart embed and its persisted session.
//!
//! One `WidgetCoordinator` per tab. Pages never build the embed themselves;
//! they `acquire` it into their viewport, `change_symbol` on it and
//! `release` it when they leave. The session behind it is written through
//! the offline store on every change, mirrored from other tabs through
//! storage events, and reconciled with the server's preferences on a fixed
//! interval.
//!
//! Conflicts are last-write-wins on `lastUpdated`. Two tabs editing within
//! one reconciliation interval can lose one of the edits.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use tokio::sync::OnceCell;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::error::WidgetError;
use super::host::{EmbedConfig, EmbedHandle, Placement, WidgetHost};
use super::phase::WidgetPhase;
use crate::api::PreferencesApi;
use crate::clock::duration_ms;
use crate::config::Config;
use crate::models::WidgetSession;
use crate::store::{OfflineStore, StorageEvent, StoredRecord, TabEvents, TabStorage};

/// Storage key of the persisted session.
pub const SESSION_KEY: &str = "tradecache.widget-session";

/// Floor for the reconciliation period; `tokio::time::interval` rejects zero.
const MIN_SYNC_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    pub sync_interval: Duration,
    pub push_debounce: Duration,
    pub symbol_debounce: Duration,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl CoordinatorSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            sync_interval: config.sync_interval(),
            push_debounce: config.push_debounce(),
            symbol_debounce: config.symbol_debounce(),
        }
    }
}

/// Result of one reconciliation cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The server was newer and its state replaced the local one.
    Applied,
    /// The server was not newer; nothing changed.
    Unchanged,
    /// The server was newer but the local session changed during the pull.
    Superseded,
    /// Another cycle or a push was still running, or the session is cleared.
    Skipped,
    /// The pull failed; local state stays authoritative.
    Failed,
}

type Callback = Arc<dyn Fn(&WidgetSession) + Send + Sync>;

#[derive(Default)]
struct Subscribers {
    next_id: AtomicU64,
    callbacks: Mutex<Vec<(u64, Callback)>>,
}

impl Subscribers {
    fn callbacks(&self) -> MutexGuard<'_, Vec<(u64, Callback)>> {
        self.callbacks.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Keeps a session callback registered until dropped or unsubscribed.
#[must_use = "dropping a Subscription unsubscribes it"]
pub struct Subscription {
    id: u64,
    subscribers: Weak<Subscribers>,
}

impl Subscription {
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(subscribers) = self.subscribers.upgrade() {
            subscribers.callbacks().retain(|(id, _)| *id != self.id);
        }
    }
}

struct State {
    phase: WidgetPhase,
    session: WidgetSession,
    handle: Option<Box<dyn EmbedHandle>>,
    /// Where the most recent acquire wanted the embed; `None` after release.
    requested: Option<String>,
    init_count: usize,
    /// Bumped on every change to the durable fields.
    revision: u64,
    last_local_change: Option<i64>,
}

#[derive(Default)]
struct Tasks {
    listener: Option<JoinHandle<()>>,
    sync_loop: Option<JoinHandle<()>>,
    push: Option<JoinHandle<()>>,
}

struct Inner {
    store: OfflineStore,
    host: Arc<dyn WidgetHost>,
    preferences: Arc<dyn PreferencesApi>,
    settings: CoordinatorSettings,
    state: Mutex<State>,
    /// Serializes acquire and clear so the embed is built at most once.
    gate: tokio::sync::Mutex<()>,
    bootstrap: OnceCell<()>,
    subscribers: Arc<Subscribers>,
    sync_in_flight: AtomicBool,
    /// Set while a push is on the wire. Pushes are never aborted once sent.
    push_in_flight: AtomicBool,
    /// Serializes pushes so they reach the server in order.
    push_gate: tokio::sync::Mutex<()>,
    events: Mutex<Option<TabEvents>>,
    tasks: Mutex<Tasks>,
}

/// Clears an in-flight flag even if the owning future is dropped midway.
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Clone is cheap; clones drive the same embed and session.
#[derive(Clone)]
pub struct WidgetCoordinator {
    inner: Arc<Inner>,
}

impl WidgetCoordinator {
    /// Build the coordinator for one tab. `store` must write through
    /// `storage` so other tabs hear about changes.
    pub fn new(
        store: OfflineStore,
        storage: &TabStorage,
        host: Arc<dyn WidgetHost>,
        preferences: Arc<dyn PreferencesApi>,
        settings: CoordinatorSettings,
    ) -> Self {
        let mut session = store
            .get::<WidgetSession>(SESSION_KEY)
            .unwrap_or_default();
        // Mount flags describe an embed in whichever tab wrote them
        session.is_mounted = false;
        session.is_visible = false;
        debug!(symbol = %session.symbol, "Hydrated chart session");

        Self {
            inner: Arc::new(Inner {
                store,
                host,
                preferences,
                settings,
                state: Mutex::new(State {
                    phase: WidgetPhase::Uninitialized,
                    session,
                    handle: None,
                    requested: None,
                    init_count: 0,
                    revision: 0,
                    last_local_change: None,
                }),
                gate: tokio::sync::Mutex::new(()),
                bootstrap: OnceCell::new(),
                subscribers: Arc::new(Subscribers::default()),
                sync_in_flight: AtomicBool::new(false),
                push_in_flight: AtomicBool::new(false),
                push_gate: tokio::sync::Mutex::new(()),
                events: Mutex::new(Some(storage.subscribe())),
                tasks: Mutex::new(Tasks::default()),
            }),
        }
    }

    // ===== Queries =====

    pub fn get_state(&self) -> WidgetSession {
        self.state().session.clone()
    }

    pub fn phase(&self) -> WidgetPhase {
        self.state().phase.clone()
    }

    /// How many times an embed has been constructed in this tab.
    pub fn init_count(&self) -> usize {
        self.state().init_count
    }

    pub fn placement(&self) -> Option<Placement> {
        self.state().handle.as_ref().map(|handle| handle.placement())
    }

    /// Call `callback` with the session after every change seen by this tab.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&WidgetSession) + Send + Sync + 'static,
    {
        let id = self.inner.subscribers.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .subscribers
            .callbacks()
            .push((id, Arc::new(callback)));
        Subscription {
            id,
            subscribers: Arc::downgrade(&self.inner.subscribers),
        }
    }

    // ===== Embed ownership =====

    /// Show the embed in `viewport`, building it on first use.
    ///
    /// With a live embed this is a reparent, and a no-op if it already sits
    /// in `viewport`.
    pub async fn acquire(&self, viewport: &str) -> Result<(), WidgetError> {
        {
            let mut state = self.state();
            if state.phase == WidgetPhase::Destroyed {
                return Err(WidgetError::Destroyed);
            }
            state.requested = Some(viewport.to_string());
        }

        let _gate = self.inner.gate.lock().await;

        let config = {
            let mut state = self.state();
            if state.phase == WidgetPhase::Destroyed {
                return Err(WidgetError::Destroyed);
            }
            if state.handle.is_some() {
                let target = state.requested.clone();
                return match target {
                    Some(target) => self.hand_off(state, &target),
                    // Released while waiting for the gate
                    None => Ok(()),
                };
            }
            state.phase = WidgetPhase::Initializing;
            EmbedConfig::from_session(&state.session)
        };

        info!(viewport = viewport, symbol = %config.display_symbol, "Initializing chart embed");
        let built = self.build_embed(&config).await;

        let mut state = self.state();
        let mut handle = match built {
            Ok(handle) => handle,
            Err(reason) => {
                warn!(error = %reason, "Chart embed failed to initialize");
                state.phase = WidgetPhase::Failed(reason.clone());
                return Err(WidgetError::InitFailed(reason));
            }
        };

        // The session may have moved on while the embed was loading
        let latest = EmbedConfig::from_session(&state.session);
        if latest != config {
            if let Err(e) = handle.apply(&latest) {
                warn!(error = %e, "Failed to apply session to new embed");
            }
        }

        state.init_count += 1;
        state.session.is_mounted = true;
        state.session.is_visible = false;
        state.phase = WidgetPhase::Hidden;
        let target = state.requested.clone();
        let attached = match target {
            Some(ref target) => handle.attach(target).map(|()| true),
            None => Ok(false),
        };
        state.handle = Some(handle);

        let result = match attached {
            Ok(true) => {
                state.phase = WidgetPhase::Visible;
                state.session.is_visible = true;
                Ok(())
            }
            Ok(false) => Ok(()),
            Err(e) => Err(WidgetError::from(e)),
        };
        drop(state);

        self.persist_flags();
        result
    }

    /// Park the embed offscreen, keeping it alive.
    pub fn release(&self) {
        {
            let mut state = self.state();
            state.requested = None;
            let Some(handle) = state.handle.as_mut() else {
                return;
            };
            if handle.placement() == Placement::Parked {
                return;
            }
            if let Err(e) = handle.park() {
                warn!(error = %e, "Failed to park chart embed");
                return;
            }
            state.phase = WidgetPhase::Hidden;
            state.session.is_visible = false;
        }
        debug!("Chart embed parked");
        self.persist_flags();
    }

    /// Dispose the embed and forget the session, e.g. on logout. The
    /// coordinator is unusable afterwards.
    pub async fn clear(&self) {
        let _gate = self.inner.gate.lock().await;
        self.shutdown();

        let (handle, snapshot) = {
            let mut state = self.state();
            state.phase = WidgetPhase::Destroyed;
            state.requested = None;
            state.session = WidgetSession::default();
            state.revision += 1;
            (state.handle.take(), state.session.clone())
        };
        if let Some(handle) = handle {
            handle.dispose();
        }
        self.inner.store.remove(SESSION_KEY);
        self.notify(&snapshot);
        info!("Chart session cleared");
    }

    // ===== Local changes =====

    /// Switch the chart to `symbol` in place. Returns false when ignored as
    /// a repeat of the current symbol within the debounce window.
    pub fn change_symbol(&self, symbol: &str, display_symbol: &str) -> bool {
        let debounce = duration_ms(self.inner.settings.symbol_debounce);
        self.commit_local(|state, now| {
            let same = state.session.symbol == symbol && state.session.display_symbol == display_symbol;
            let recent = state
                .last_local_change
                .is_some_and(|at| now - at < debounce);
            if same && recent {
                debug!(symbol = symbol, "Ignoring repeated symbol change");
                return false;
            }
            state.session.symbol = symbol.to_string();
            state.session.display_symbol = display_symbol.to_string();
            true
        })
    }

    /// Switch the chart timeframe in place.
    pub fn change_interval(&self, interval: &str) -> bool {
        self.commit_local(|state, _now| {
            if state.session.interval == interval {
                return false;
            }
            state.session.interval = interval.to_string();
            true
        })
    }

    fn commit_local(&self, mutate: impl FnOnce(&mut State, i64) -> bool) -> bool {
        let now = self.inner.store.now_ms();
        let snapshot = {
            let mut state = self.state();
            if state.phase == WidgetPhase::Destroyed {
                debug!("Ignoring change to a cleared chart session");
                return false;
            }
            if !mutate(&mut *state, now) {
                return false;
            }
            state.session.last_updated = now;
            state.revision += 1;
            state.last_local_change = Some(now);
            Self::apply_to_embed(&mut state);
            state.session.clone()
        };

        debug!(symbol = %snapshot.symbol, interval = %snapshot.interval, "Chart session changed");
        self.persist(&snapshot);
        self.notify(&snapshot);
        self.schedule_push();
        true
    }

    // ===== Cross-tab =====

    /// Fold another tab's write of the session into this tab's read-model.
    /// Never writes, pushes or moves the embed. Returns whether anything
    /// changed.
    pub fn handle_storage_event(&self, event: &StorageEvent) -> bool {
        if event.key != SESSION_KEY {
            return false;
        }
        let incoming = match event.new_value.as_deref() {
            // Cleared elsewhere, e.g. logout in another tab
            None => None,
            Some(raw) => match StoredRecord::<WidgetSession>::from_json(raw) {
                Ok(record) => Some(record.data),
                Err(e) => {
                    debug!(error = %e, "Ignoring unreadable session from another tab");
                    return false;
                }
            },
        };

        let snapshot = {
            let mut state = self.state();
            if state.phase == WidgetPhase::Destroyed {
                return false;
            }
            let incoming = match incoming {
                Some(session) => {
                    if session.last_updated < state.session.last_updated {
                        debug!("Ignoring older session from another tab");
                        return false;
                    }
                    session
                }
                None => WidgetSession::default(),
            };
            if state.session.same_durable_state(&incoming) {
                return false;
            }
            state.session.adopt_durable(&incoming);
            state.revision += 1;
            Self::apply_to_embed(&mut state);
            state.session.clone()
        };

        debug!(origin = event.origin, symbol = %snapshot.symbol, "Adopted session from another tab");
        self.notify(&snapshot);
        true
    }

    // ===== Server reconciliation =====

    /// Pull server preferences once. Local state wins unless the server's
    /// `lastUpdated` is strictly newer and nothing changed locally while the
    /// pull was in flight.
    pub async fn sync_once(&self) -> SyncOutcome {
        if self.inner.sync_in_flight.swap(true, Ordering::AcqRel) {
            debug!("Previous preference sync still running, skipping");
            return SyncOutcome::Skipped;
        }
        let _in_flight = InFlight(&self.inner.sync_in_flight);
        if self.inner.push_in_flight.load(Ordering::Acquire) {
            debug!("Preference push still unresolved, skipping sync");
            return SyncOutcome::Skipped;
        }

        let (revision, local_updated) = {
            let state = self.state();
            if state.phase == WidgetPhase::Destroyed {
                return SyncOutcome::Skipped;
            }
            (state.revision, state.session.last_updated)
        };

        let remote = match self.inner.preferences.fetch_preferences().await {
            Ok(remote) => remote,
            Err(e) => {
                debug!(error = %e, transient = e.is_transient(), "Preference pull failed, keeping local state");
                return SyncOutcome::Failed;
            }
        };
        if remote.chart_settings.last_updated <= local_updated {
            return SyncOutcome::Unchanged;
        }

        let snapshot = {
            let mut state = self.state();
            if state.phase == WidgetPhase::Destroyed
                || state.revision != revision
                || state.session.last_updated != local_updated
            {
                info!("Local chart change during preference pull, discarding server state");
                return SyncOutcome::Superseded;
            }
            state.session.adopt_remote(&remote);
            state.revision += 1;
            Self::apply_to_embed(&mut state);
            state.session.clone()
        };

        info!(pair = %snapshot.symbol, "Applied newer server chart preferences");
        self.persist(&snapshot);
        self.notify(&snapshot);
        SyncOutcome::Applied
    }

    // ===== Background tasks =====

    /// Start listening for other tabs and reconciling with the server.
    /// Must be called inside a tokio runtime.
    pub fn start(&self) {
        let listener = self.spawn_listener();
        let sync_loop = self.spawn_sync_loop();
        let mut tasks = self.tasks();
        if let Some(listener) = listener {
            tasks.listener = Some(listener);
        }
        if let Some(previous) = tasks.sync_loop.replace(sync_loop) {
            previous.abort();
        }
    }

    /// Stop the listener, the sync loop and any pending push.
    pub fn shutdown(&self) {
        let mut tasks = self.tasks();
        for task in [tasks.listener.take(), tasks.sync_loop.take(), tasks.push.take()]
            .into_iter()
            .flatten()
        {
            task.abort();
        }
    }

    fn spawn_listener(&self) -> Option<JoinHandle<()>> {
        let mut events = self
            .inner
            .events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()?;
        let weak = Arc::downgrade(&self.inner);
        Some(tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let Some(inner) = weak.upgrade() else { break };
                WidgetCoordinator { inner }.handle_storage_event(&event);
            }
        }))
    }

    fn spawn_sync_loop(&self) -> JoinHandle<()> {
        let weak = Arc::downgrade(&self.inner);
        let period = self.inner.settings.sync_interval.max(MIN_SYNC_INTERVAL);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else { break };
                let outcome = WidgetCoordinator { inner }.sync_once().await;
                debug!(outcome = ?outcome, "Preference sync tick");
            }
        })
    }

    /// Push the session once the debounce window passes without another
    /// local change. Only the wait is cancelled by a newer change; a push
    /// that has started runs to completion.
    fn schedule_push(&self) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            debug!("No runtime, preference push skipped");
            return;
        };
        let weak = Arc::downgrade(&self.inner);
        let delay = self.inner.settings.push_debounce;
        let task = runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(inner) = weak.upgrade() else { return };
            tokio::spawn(WidgetCoordinator { inner }.push_latest());
        });
        if let Some(previous) = self.tasks().push.replace(task) {
            previous.abort();
        }
    }

    async fn push_latest(self) {
        let _serial = self.inner.push_gate.lock().await;
        self.inner.push_in_flight.store(true, Ordering::Release);
        let _in_flight = InFlight(&self.inner.push_in_flight);

        let preferences = {
            let state = self.state();
            if state.phase == WidgetPhase::Destroyed {
                return;
            }
            state.session.to_remote()
        };
        match self.inner.preferences.push_preferences(&preferences).await {
            Ok(()) => debug!(pair = %preferences.last_selected_pair, "Pushed chart preferences"),
            Err(e) => debug!(error = %e, transient = e.is_transient(), "Preference push failed"),
        }
    }

    // ===== Internals =====

    async fn build_embed(&self, config: &EmbedConfig) -> Result<Box<dyn EmbedHandle>, String> {
        self.inner
            .bootstrap
            .get_or_try_init(|| self.inner.host.load_bootstrap())
            .await
            .map_err(|e| e.to_string())?;
        self.inner.host.create(config).await.map_err(|e| e.to_string())
    }

    /// Move the live embed to `viewport`, doing nothing if it's already there.
    fn hand_off(&self, mut state: MutexGuard<'_, State>, viewport: &str) -> Result<(), WidgetError> {
        let Some(handle) = state.handle.as_mut() else {
            return Ok(());
        };
        if handle.placement() == Placement::Viewport(viewport.to_string()) {
            return Ok(());
        }
        handle.attach(viewport)?;
        state.phase = WidgetPhase::Visible;
        state.session.is_visible = true;
        drop(state);

        debug!(viewport = viewport, "Chart embed handed off");
        self.persist_flags();
        Ok(())
    }

    fn apply_to_embed(state: &mut State) {
        let config = EmbedConfig::from_session(&state.session);
        if let Some(handle) = state.handle.as_mut() {
            if let Err(e) = handle.apply(&config) {
                warn!(error = %e, "Failed to update chart embed in place");
            }
        }
    }

    fn persist(&self, session: &WidgetSession) {
        self.inner.store.set(SESSION_KEY, session, None);
    }

    /// Write this tab's mount flags. A stored session newer than ours was
    /// written by a tab whose event hasn't reached us yet, so its durable
    /// fields are adopted first instead of being overwritten.
    fn persist_flags(&self) {
        let stored = self.inner.store.get::<WidgetSession>(SESSION_KEY);
        let (snapshot, adopted) = {
            let mut state = self.state();
            let adopted = match stored {
                Some(ref stored) if stored.last_updated > state.session.last_updated => {
                    state.session.adopt_durable(stored);
                    state.revision += 1;
                    Self::apply_to_embed(&mut state);
                    true
                }
                _ => false,
            };
            (state.session.clone(), adopted)
        };
        if adopted {
            debug!(symbol = %snapshot.symbol, "Adopted newer stored session before writing flags");
        }
        self.persist(&snapshot);
        if adopted {
            self.notify(&snapshot);
        }
    }

    fn notify(&self, session: &WidgetSession) {
        let callbacks: Vec<Callback> = self
            .inner
            .subscribers
            .callbacks()
            .iter()
            .map(|(_, callback)| Arc::clone(callback))
            .collect();
        for callback in callbacks {
            callback(session);
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.inner.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn tasks(&self) -> MutexGuard<'_, Tasks> {
        self.inner.tasks.lock().unwrap_or_else(|e| e.into_inner())
    }
}
