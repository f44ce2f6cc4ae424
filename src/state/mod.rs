/// Wall clock anchored to the runtime's timer.
pub mod clock;
/// Client-side projection of a session.
pub mod projection;
mod sse;
/// Pure session transition planning.
pub mod state_machine;
/// Per-session delayed actions.
pub mod timer;

use std::{future::Future, sync::Arc, time::Duration};

use dashmap::{DashMap, DashSet};
use tokio::{
    sync::{Mutex, Notify, RwLock},
    task::AbortHandle,
    time::timeout,
};
use tracing::warn;
use uuid::Uuid;

use crate::{
    config::{AppConfig, TimingConfig},
    dao::session_store::SessionStore,
    error::ServiceError,
};

pub use self::clock::Clock;
pub use self::sse::SseHub;
pub use self::state_machine::{InvalidTransition, Plan, PlanError, SessionEvent, SessionPhase};
pub use self::timer::{TimedPhase, TimerService};

/// Handle to the application state shared by routes and tasks.
pub type SharedState = Arc<AppState>;

const SESSION_HUB_CAPACITY: usize = 64;

/// Server-side sync feed of one session.
pub struct FeedHandle {
    /// Wakes the feed for an immediate poll.
    pub refresh: Arc<Notify>,
    /// Task feeding the hub.
    pub task: AbortHandle,
}

/// Central application state: storage handle, timers and per-session plumbing.
pub struct AppState {
    session_store: RwLock<Option<Arc<dyn SessionStore>>>,
    config: AppConfig,
    clock: Clock,
    timers: TimerService,
    transition_gates: DashMap<Uuid, Arc<Mutex<()>>>,
    hubs: DashMap<Uuid, Arc<SseHub>>,
    feeds: DashMap<Uuid, FeedHandle>,
    pending_team_cleanups: DashSet<Uuid>,
}

impl AppState {
    /// Construct a new [`AppState`] wrapped in an [`Arc`] so it can be cloned cheaply.
    ///
    /// The application starts in degraded mode until a storage backend is installed.
    pub fn new(config: AppConfig) -> SharedState {
        Self::with_clock(config, Clock::system())
    }

    /// Same as [`AppState::new`] with an explicit clock.
    pub fn with_clock(config: AppConfig, clock: Clock) -> SharedState {
        Arc::new(Self {
            session_store: RwLock::new(None),
            config,
            clock,
            timers: TimerService::new(),
            transition_gates: DashMap::new(),
            hubs: DashMap::new(),
            feeds: DashMap::new(),
            pending_team_cleanups: DashSet::new(),
        })
    }

    /// Obtain a handle to the current session store, if one is installed.
    pub async fn session_store(&self) -> Option<Arc<dyn SessionStore>> {
        let guard = self.session_store.read().await;
        guard.as_ref().cloned()
    }

    /// Current session store, or [`ServiceError::Degraded`] when none is installed.
    pub async fn require_store(&self) -> Result<Arc<dyn SessionStore>, ServiceError> {
        self.session_store().await.ok_or(ServiceError::Degraded)
    }

    /// Install a new session store implementation and leave degraded mode.
    pub async fn install_session_store(&self, store: Arc<dyn SessionStore>) {
        let mut guard = self.session_store.write().await;
        *guard = Some(store);
    }

    /// Remove the current session store and enter degraded mode.
    pub async fn clear_session_store(&self) {
        let mut guard = self.session_store.write().await;
        guard.take();
    }

    /// Current degraded flag.
    pub async fn is_degraded(&self) -> bool {
        let guard = self.session_store.read().await;
        guard.is_none()
    }

    /// Configuration the server was started with.
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Durations of the timed phases.
    pub fn timing(&self) -> &TimingConfig {
        &self.config.timing
    }

    /// Clock used for deadlines and timestamps.
    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    /// Pending timers of every session.
    pub fn timers(&self) -> &TimerService {
        &self.timers
    }

    /// SSE hub of a session, created on first use.
    pub fn session_hub(&self, session_id: Uuid) -> Arc<SseHub> {
        self.hubs
            .entry(session_id)
            .or_insert_with(|| Arc::new(SseHub::new(SESSION_HUB_CAPACITY)))
            .clone()
    }

    /// Registry of running sync feeds keyed by session.
    pub fn feeds(&self) -> &DashMap<Uuid, FeedHandle> {
        &self.feeds
    }

    /// Sessions whose team memberships still have to be cleared.
    pub fn pending_team_cleanups(&self) -> &DashSet<Uuid> {
        &self.pending_team_cleanups
    }

    /// Drop the per-session plumbing of a finished session.
    ///
    /// Holders of the hub keep delivering to already subscribed streams until they drop it.
    pub fn release_session(&self, session_id: Uuid) {
        self.hubs.remove(&session_id);
        self.transition_gates.remove(&session_id);
        if let Some((_, feed)) = self.feeds.remove(&session_id) {
            feed.task.abort();
        }
    }

    /// Run `work` while holding the session's transition gate, bounded by the transition timeout.
    pub async fn run_exclusive<F, Fut, T>(&self, session_id: Uuid, work: F) -> Result<T, ServiceError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ServiceError>>,
    {
        let gate = self
            .transition_gates
            .entry(session_id)
            .or_default()
            .clone();
        let _guard = gate.lock().await;

        let limit: Duration = self.config.timing.transition_timeout;
        match timeout(limit, work()).await {
            Ok(result) => result,
            Err(_) => {
                warn!(session_id = %session_id, ?limit, "session transition timed out");
                Err(ServiceError::Timeout)
            }
        }
    }
}
