use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    dao::models::SessionStatus,
    dto::session::LeaderboardResponse,
    state::projection::{Projection, SessionView},
};

#[derive(Clone, Debug)]
/// Dispatched payload carried across SSE channels.
pub struct ServerEvent {
    /// SSE event name; `None` for unnamed messages.
    pub event: Option<String>,
    /// JSON payload.
    pub data: String,
}

impl ServerEvent {
    /// Convenience wrapper that serialises `payload` into the SSE data field.
    pub fn json<E, T>(event: E, payload: &T) -> serde_json::Result<Self>
    where
        E: Into<Option<String>>,
        T: Serialize,
    {
        Ok(Self {
            event: event.into(),
            data: serde_json::to_string(payload)?,
        })
    }
}

#[derive(Debug, Serialize, ToSchema)]
/// Initial metadata sent to an SSE client when it connects.
pub struct Handshake {
    /// Session the stream belongs to.
    pub session_id: Uuid,
    /// Human-readable message confirming the subscription.
    pub message: String,
    /// Whether the backend is running without a storage backend connection.
    pub degraded: bool,
}

#[derive(Debug, Serialize, ToSchema)]
/// Broadcast whenever the reconciled view of the session changes.
pub struct SessionViewEvent {
    /// Session row version.
    pub version: u64,
    /// Current phase.
    pub view: SessionView,
    /// Joined participants.
    pub participants: usize,
    /// Answers stored for the current question.
    pub answered: usize,
}

impl From<&Projection> for SessionViewEvent {
    fn from(value: &Projection) -> Self {
        Self {
            version: value.version,
            view: value.view.clone(),
            participants: value.participants.len(),
            answered: value.answered.len(),
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
/// Broadcast when the scored answer window of a question opens.
pub struct AnswersOpenEvent {
    /// Position of the question.
    pub index: usize,
    /// Question identifier.
    pub question_id: Uuid,
    /// End of the answer window (epoch milliseconds).
    pub deadline_ms: u64,
}

#[derive(Debug, Serialize, ToSchema)]
/// Broadcast after an answer has been stored.
pub struct AnswerRecordedEvent {
    /// Answered question.
    pub question_id: Uuid,
    /// Author of the answer.
    pub participant_id: Uuid,
    /// Answers stored so far for the question.
    pub answered: usize,
    /// Joined participants.
    pub participants: usize,
}

#[derive(Debug, Serialize, ToSchema)]
/// Broadcast once the session reached a terminal status.
pub struct SessionFinishedEvent {
    /// Completed or cancelled.
    pub status: SessionStatus,
    /// Final rankings.
    pub leaderboard: LeaderboardResponse,
}
