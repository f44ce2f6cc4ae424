use serde::Serialize;
use tracing::warn;
use uuid::Uuid;

use crate::{
    dao::models::SessionStatus,
    dto::{
        session::{LeaderboardResponse, QuestionResultsResponse},
        sse::{
            AnswerRecordedEvent, AnswersOpenEvent, Handshake, ServerEvent, SessionFinishedEvent,
            SessionViewEvent,
        },
    },
    state::{SseHub, projection::Projection},
};

const EVENT_HANDSHAKE: &str = "handshake";
const EVENT_SESSION_VIEW: &str = "session.view";
const EVENT_ANSWERS_OPEN: &str = "answers.open";
const EVENT_ANSWER_RECORDED: &str = "answer.recorded";
const EVENT_QUESTION_RESULTS: &str = "question.results";
const EVENT_SESSION_FINISHED: &str = "session.finished";

/// Broadcast the reconciled view of a session.
pub fn broadcast_session_view(hub: &SseHub, projection: &Projection) {
    send_event(hub, EVENT_SESSION_VIEW, &SessionViewEvent::from(projection));
}

/// Broadcast that question `index` now accepts answers.
pub fn broadcast_answers_open(hub: &SseHub, index: usize, question_id: Uuid, deadline_ms: u64) {
    let payload = AnswersOpenEvent {
        index,
        question_id,
        deadline_ms,
    };
    send_event(hub, EVENT_ANSWERS_OPEN, &payload);
}

/// Tell listeners an answer has been stored.
pub fn broadcast_answer_recorded(hub: &SseHub, payload: &AnswerRecordedEvent) {
    send_event(hub, EVENT_ANSWER_RECORDED, payload);
}

/// Broadcast the answer distribution of a closed question.
pub fn broadcast_question_results(hub: &SseHub, results: &QuestionResultsResponse) {
    send_event(hub, EVENT_QUESTION_RESULTS, results);
}

/// Broadcast the final leaderboards of a session that reached a terminal status.
pub fn broadcast_session_finished(
    hub: &SseHub,
    status: SessionStatus,
    leaderboard: LeaderboardResponse,
) {
    let payload = SessionFinishedEvent {
        status,
        leaderboard,
    };
    send_event(hub, EVENT_SESSION_FINISHED, &payload);
}

/// First event written to a freshly opened stream.
pub fn handshake_event(session_id: Uuid, degraded: bool) -> Option<ServerEvent> {
    let payload = Handshake {
        session_id,
        message: "session stream connected".into(),
        degraded,
    };
    to_event(EVENT_HANDSHAKE, &payload)
}

/// Current view written to a freshly opened stream.
pub fn session_view_event(projection: &Projection) -> Option<ServerEvent> {
    to_event(EVENT_SESSION_VIEW, &SessionViewEvent::from(projection))
}

fn send_event(hub: &SseHub, event: &str, payload: &impl Serialize) {
    if let Some(event) = to_event(event, payload) {
        hub.broadcast(event);
    }
}

fn to_event(event: &str, payload: &impl Serialize) -> Option<ServerEvent> {
    match ServerEvent::json(Some(event.to_string()), payload) {
        Ok(event) => Some(event),
        Err(err) => {
            warn!(event, error = %err, "failed to serialize session SSE payload");
            None
        }
    }
}
