use std::{convert::Infallible, time::Duration};

use axum::response::sse::{Event, KeepAlive, Sse};
use futures::Stream;
use tokio::sync::{
    broadcast::{self, error::RecvError},
    mpsc,
};
use tokio_stream::wrappers::ReceiverStream;
use tracing::info;
use uuid::Uuid;

use crate::{
    dto::sse::ServerEvent,
    error::ServiceError,
    services::{sse_events, sync_service},
    state::{
        SharedState,
        projection::{Observation, reconcile},
    },
};

/// A subscription to a session's event hub plus the events to write first.
pub struct SessionSubscription {
    /// Live events of the session.
    pub receiver: broadcast::Receiver<ServerEvent>,
    /// Handshake and current view, written before any broadcast event.
    pub initial: Vec<ServerEvent>,
}

/// Subscribe to the events of one session, starting its feed when needed.
pub async fn subscribe_session(
    state: &SharedState,
    session_id: Uuid,
) -> Result<SessionSubscription, ServiceError> {
    let store = state.require_store().await?;
    let snapshot = sync_service::fetch_snapshot(store.as_ref(), session_id)
        .await?
        .ok_or(ServiceError::SessionNotFound(session_id))?;

    let receiver = state.session_hub(session_id).subscribe();
    if !snapshot.session.status.is_terminal() {
        sync_service::ensure_feed(state, session_id).await?;
    }

    let mut initial = Vec::with_capacity(2);
    initial.extend(sse_events::handshake_event(
        session_id,
        state.is_degraded().await,
    ));
    if let Some(projection) = reconcile(None, &Observation::Snapshot(snapshot)) {
        initial.extend(sse_events::session_view_event(&projection));
    }

    Ok(SessionSubscription { receiver, initial })
}

/// Convert a subscription into an SSE response, forwarding events until the client disconnects.
pub fn to_sse_stream(
    subscription: SessionSubscription,
    session_id: Uuid,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let SessionSubscription {
        mut receiver,
        initial,
    } = subscription;
    let (tx, rx) = mpsc::channel::<Result<Event, Infallible>>(8);

    tokio::spawn(async move {
        for payload in initial {
            if tx.send(Ok(to_event(payload))).await.is_err() {
                return;
            }
        }

        loop {
            tokio::select! {
                _ = tx.closed() => break,
                recv_result = receiver.recv() => {
                    match recv_result {
                        Ok(payload) => {
                            if tx.send(Ok(to_event(payload))).await.is_err() {
                                break;
                            }
                        }
                        Err(RecvError::Closed) => break,
                        // Clients catch up with the next session.view.
                        Err(RecvError::Lagged(_)) => continue,
                    }
                }
            }
        }

        info!(session_id = %session_id, "session SSE stream disconnected");
    });

    let stream = ReceiverStream::new(rx);
    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}

fn to_event(payload: ServerEvent) -> Event {
    let event = Event::default().data(payload.data);
    match payload.event {
        Some(name) => event.event(name),
        None => event,
    }
}
