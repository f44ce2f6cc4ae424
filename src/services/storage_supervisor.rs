use std::{future::Future, sync::Arc, time::Duration};

use tokio::time::sleep;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    dao::{session_store::SessionStore, storage::StorageError},
    state::SharedState,
};

const INITIAL_DELAY: Duration = Duration::from_millis(1_000);
const MAX_DELAY: Duration = Duration::from_secs(10);
const HEALTH_POLL_INTERVAL: Duration = Duration::from_secs(5);
const MAX_RECONNECT_ATTEMPTS: u32 = 3;

/// Keep a session store installed in the shared state, staying degraded while it is unreachable.
///
/// While the store is healthy, team cleanups deferred by finished sessions are retried.
pub async fn run<F, Fut>(state: SharedState, mut connect: F)
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<Arc<dyn SessionStore>, StorageError>> + Send,
{
    let mut delay = INITIAL_DELAY;

    loop {
        match connect().await {
            Ok(store) => {
                state.install_session_store(store.clone()).await;
                info!("storage connection established; leaving degraded mode");
                delay = INITIAL_DELAY;

                while supervise_once(&state, &store).await {
                    sleep(HEALTH_POLL_INTERVAL).await;
                }

                warn!("exhausted storage reconnect attempts; staying in degraded mode");
                sleep(delay).await;
                delay = (delay * 2).min(MAX_DELAY);
            }
            Err(err) => {
                warn!(error = %err, "storage connection attempt failed");
                sleep(delay).await;
                delay = (delay * 2).min(MAX_DELAY);
            }
        }
    }
}

/// One health round. Returns `false` once the store could not be recovered.
async fn supervise_once(state: &SharedState, store: &Arc<dyn SessionStore>) -> bool {
    let healthy = match store.health_check().await {
        Ok(()) => true,
        Err(err) => {
            warn!(error = %err, "storage health check failed");
            reconnect(state, store).await
        }
    };

    if healthy {
        retry_team_cleanups(state, store.as_ref()).await;
    }
    healthy
}

async fn reconnect(state: &SharedState, store: &Arc<dyn SessionStore>) -> bool {
    let mut reconnect_delay = INITIAL_DELAY;

    for attempt in 0..MAX_RECONNECT_ATTEMPTS {
        match store.try_reconnect().await {
            Ok(()) => {
                info!(attempt, "storage reconnection succeeded after health check failure");
                if state.is_degraded().await {
                    state.install_session_store(Arc::clone(store)).await;
                    info!("storage healthy again; leaving degraded mode");
                }
                return true;
            }
            Err(err) => {
                if attempt == 0 {
                    warn!(attempt, error = %err, "storage reconnect first attempt failed; entering degraded mode");
                    state.clear_session_store().await;
                } else {
                    warn!(attempt, error = %err, "storage reconnect attempt failed");
                }
                sleep(reconnect_delay).await;
                reconnect_delay = (reconnect_delay * 2).min(MAX_DELAY);
            }
        }
    }
    false
}

/// Clear the team memberships that finished sessions could not clear themselves.
pub async fn retry_team_cleanups(state: &SharedState, store: &dyn SessionStore) {
    let pending: Vec<Uuid> = state
        .pending_team_cleanups()
        .iter()
        .map(|session_id| *session_id)
        .collect();

    for session_id in pending {
        match store.clear_team_memberships(session_id).await {
            Ok(cleared) => {
                state.pending_team_cleanups().remove(&session_id);
                info!(session_id = %session_id, cleared = cleared.len(), "deferred team cleanup done");
            }
            Err(err) => {
                warn!(session_id = %session_id, error = %err, "deferred team cleanup failed");
            }
        }
    }
}
