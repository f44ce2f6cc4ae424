//! Push + poll synchronization of a session projection.
//!
//! [`SyncClient`] keeps a [`Projection`] reconciled against a [`SessionStore`]: store
//! notifications are applied as they arrive and a periodic snapshot poll recovers anything the
//! push channel dropped. The server runs one client per live session and republishes its view on
//! the session's SSE hub.

use std::{sync::Arc, time::Duration};

use futures::StreamExt;
use tokio::{
    sync::{Notify, watch},
    time::{MissedTickBehavior, interval},
};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{
    dao::{session_store::SessionStore, storage::StorageResult},
    dto::session::SessionSnapshot,
    error::ServiceError,
    services::{snapshot_service, sse_events},
    state::{
        FeedHandle, SharedState,
        projection::{Observation, Projection, RemoteSnapshot, reconcile},
    },
};

/// Local projection of one session fed by push notifications and polling.
pub struct SyncClient {
    store: Arc<dyn SessionStore>,
    session_id: Uuid,
    poll_interval: Duration,
    projection: watch::Sender<Option<Projection>>,
    refresh: Arc<Notify>,
}

impl SyncClient {
    /// Client for `session_id` polling every `poll_interval`.
    pub fn new(store: Arc<dyn SessionStore>, session_id: Uuid, poll_interval: Duration) -> Self {
        let (projection, _) = watch::channel(None);
        Self {
            store,
            session_id,
            poll_interval,
            projection,
            refresh: Arc::new(Notify::new()),
        }
    }

    /// Observe projection updates. [`SyncClient::run`] stops once every receiver is gone.
    pub fn watch(&self) -> watch::Receiver<Option<Projection>> {
        self.projection.subscribe()
    }

    /// Handle that triggers an immediate poll when notified.
    pub fn refresh_handle(&self) -> Arc<Notify> {
        Arc::clone(&self.refresh)
    }

    /// Latest projection, `None` before the first snapshot.
    pub fn projection(&self) -> Option<Projection> {
        self.projection.borrow().clone()
    }

    /// Merge an observation into the projection; returns whether anything changed.
    pub fn apply(&self, observation: &Observation) -> bool {
        self.projection
            .send_if_modified(|current| match reconcile(current.as_ref(), observation) {
                Some(next) => {
                    *current = Some(next);
                    true
                }
                None => false,
            })
    }

    /// Fetch authoritative state once and merge it.
    pub async fn poll_once(&self) -> StorageResult<bool> {
        match fetch_snapshot(self.store.as_ref(), self.session_id).await? {
            Some(snapshot) => Ok(self.apply(&Observation::Snapshot(snapshot))),
            None => Ok(false),
        }
    }

    /// Keep the projection reconciled until the session ends or nobody watches it anymore.
    pub async fn run(self) {
        let mut changes = self.store.subscribe(self.session_id);
        let mut push_open = true;
        let mut ticker = interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if self.is_finished() {
                break;
            }

            tokio::select! {
                change = changes.next(), if push_open => match change {
                    Some(change) => {
                        self.apply(&Observation::from(change));
                    }
                    None => {
                        debug!(session_id = %self.session_id, "push channel closed; polling only");
                        push_open = false;
                    }
                },
                _ = ticker.tick() => self.poll_logged().await,
                _ = self.refresh.notified() => self.poll_logged().await,
                _ = self.projection.closed() => break,
            }
        }
    }

    fn is_finished(&self) -> bool {
        self.projection
            .borrow()
            .as_ref()
            .is_some_and(|projection| projection.view.is_terminal())
    }

    async fn poll_logged(&self) {
        if let Err(err) = self.poll_once().await {
            warn!(session_id = %self.session_id, error = %err, "session poll failed");
        }
    }
}

/// Read everything a projection is built from.
pub async fn fetch_snapshot(
    store: &dyn SessionStore,
    session_id: Uuid,
) -> StorageResult<Option<RemoteSnapshot>> {
    let Some(session) = store.find_session(session_id).await? else {
        return Ok(None);
    };

    let (participants, teams) = futures::try_join!(
        store.list_participants(session_id),
        store.list_teams(session_id)
    )?;
    let answers = match session.current_question_id() {
        Some(question_id) => store.list_answers(session_id, question_id).await?,
        None => Vec::new(),
    };

    Ok(Some(RemoteSnapshot {
        session,
        participants,
        teams,
        answers,
    }))
}

/// Start the server-side feed of a session unless it already runs.
///
/// The feed republishes every projection change as a `session.view` event and releases the
/// session's plumbing once it observed a terminal status.
pub async fn ensure_feed(state: &SharedState, session_id: Uuid) -> Result<Arc<Notify>, ServiceError> {
    let store = state.require_store().await?;

    let entry = state.feeds().entry(session_id).or_insert_with(|| {
        let client = SyncClient::new(store, session_id, state.timing().poll_interval());
        let refresh = client.refresh_handle();
        let mut views = client.watch();
        let hub = state.session_hub(session_id);
        let task_state = Arc::clone(state);

        let task = tokio::spawn(async move {
            let forward = async {
                while views.changed().await.is_ok() {
                    let current = views.borrow_and_update().clone();
                    if let Some(projection) = current {
                        sse_events::broadcast_session_view(&hub, &projection);
                    }
                }
            };
            tokio::join!(client.run(), forward);

            debug!(session_id = %session_id, "session feed stopped");
            task_state.release_session(session_id);
        })
        .abort_handle();

        debug!(session_id = %session_id, "session feed started");
        FeedHandle { refresh, task }
    });

    Ok(Arc::clone(&entry.refresh))
}

/// `refreshNow`: poke the session feed and return freshly read state.
pub async fn refresh_session(
    state: &SharedState,
    session_id: Uuid,
) -> Result<SessionSnapshot, ServiceError> {
    let snapshot = snapshot_service::session_snapshot(state, session_id).await?;
    if !snapshot.view.is_terminal() {
        ensure_feed(state, session_id).await?.notify_one();
    }
    Ok(snapshot)
}
