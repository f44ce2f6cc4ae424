use axum::{Json, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;
use validator::ValidationErrors;

use crate::{
    dao::{models::AnswerEntity, storage::StorageError},
    state::{InvalidTransition, PlanError},
};

/// Errors that can occur in service layer operations.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Storage backend is unavailable.
    #[error("storage unavailable")]
    Unavailable(#[source] StorageError),
    /// Application is running in degraded mode without storage.
    #[error("storage unavailable (degraded mode)")]
    Degraded,
    /// The caller could not be identified.
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    /// The caller is identified but not allowed to perform the command.
    #[error("forbidden: {0}")]
    Forbidden(String),
    /// Invalid input provided by the client.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// Operation cannot be performed in the current state.
    #[error("invalid state: {0}")]
    InvalidState(String),
    /// Requested resource was not found.
    #[error("not found: {0}")]
    NotFound(String),
    /// No session with this identifier.
    #[error("session `{0}` not found")]
    SessionNotFound(Uuid),
    /// No participant with this identifier.
    #[error("participant `{0}` not found")]
    ParticipantNotFound(Uuid),
    /// The event does not apply to the session's current phase.
    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),
    /// The session kept changing under the transition.
    #[error("session `{session_id}` changed concurrently, retry with fresh state")]
    StaleWrite {
        /// Session whose row moved on.
        session_id: Uuid,
    },
    /// An answer already exists for the participant and question; it stands.
    #[error("an answer was already recorded for this question")]
    DuplicateAnswer {
        /// Answer recorded first.
        existing: Box<AnswerEntity>,
    },
    /// The question pointer left the question order; the session was completed.
    #[error("question index {index} is out of range ({len} question(s)); session completed")]
    InvalidQuestionIndex {
        /// Requested position.
        index: usize,
        /// Length of the question order.
        len: usize,
    },
    /// The session ended but its team memberships could not be cleared yet.
    #[error("session `{0}` ended but team memberships are still being cleared")]
    TeamCleanupPending(Uuid),
    /// Operation exceeded its timeout limit.
    #[error("operation timed out")]
    Timeout,
}

impl From<StorageError> for ServiceError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound { kind, id } => ServiceError::NotFound(format!("{kind} `{id}`")),
            other => ServiceError::Unavailable(other),
        }
    }
}

impl From<PlanError> for ServiceError {
    fn from(err: PlanError) -> Self {
        match err {
            PlanError::InvalidTransition(invalid) => ServiceError::InvalidTransition(invalid),
            PlanError::InvalidQuestionIndex { index, len } => {
                ServiceError::InvalidQuestionIndex { index, len }
            }
            guard => ServiceError::InvalidState(guard.to_string()),
        }
    }
}

impl From<ValidationErrors> for AppError {
    fn from(err: ValidationErrors) -> Self {
        AppError::BadRequest(format!("validation failed: {}", err))
    }
}

/// Application-level errors that are converted to HTTP responses.
#[derive(Debug, Error)]
pub enum AppError {
    /// Bad request with invalid input.
    #[error("bad request: {0}")]
    BadRequest(String),
    /// Unauthorized access attempt.
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    /// Authenticated caller lacking the required role.
    #[error("forbidden: {0}")]
    Forbidden(String),
    /// Requested resource not found.
    #[error("not found: {0}")]
    NotFound(String),
    /// Conflict with current state.
    #[error("conflict: {0}")]
    Conflict(String),
    /// Service unavailable or degraded.
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),
    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        let message = err.to_string();
        match err {
            ServiceError::Unavailable(source) => AppError::ServiceUnavailable(source.to_string()),
            ServiceError::Degraded => AppError::ServiceUnavailable("degraded mode".into()),
            ServiceError::Timeout => AppError::ServiceUnavailable(message),
            ServiceError::Unauthorized(message) => AppError::Unauthorized(message),
            ServiceError::Forbidden(message) => AppError::Forbidden(message),
            ServiceError::InvalidInput(message) => AppError::BadRequest(message),
            ServiceError::InvalidState(message) => AppError::Conflict(message),
            ServiceError::NotFound(message) => AppError::NotFound(message),
            ServiceError::SessionNotFound(_) | ServiceError::ParticipantNotFound(_) => {
                AppError::NotFound(message)
            }
            ServiceError::InvalidTransition(_)
            | ServiceError::StaleWrite { .. }
            | ServiceError::DuplicateAnswer { .. } => AppError::Conflict(message),
            ServiceError::InvalidQuestionIndex { .. } | ServiceError::TeamCleanupPending(_) => {
                AppError::Internal(message)
            }
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let payload = Json(ErrorBody {
            message: self.to_string(),
        });

        (status, payload).into_response()
    }
}

#[cfg(test)]
mod tests {
    use axum::response::IntoResponse;

    use super::*;
    use crate::state::{SessionEvent, SessionPhase};

    #[test]
    fn invalid_transition_is_a_conflict() {
        let err: ServiceError = PlanError::InvalidTransition(InvalidTransition {
            from: SessionPhase::Waiting,
            event: SessionEvent::NextQuestion,
        })
        .into();
        assert!(matches!(err, ServiceError::InvalidTransition(_)));

        let response = AppError::from(err).into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[test]
    fn guard_failures_become_invalid_state() {
        let err: ServiceError = PlanError::NoParticipants.into();
        assert!(matches!(err, ServiceError::InvalidState(_)));
    }

    #[test]
    fn missing_rows_are_not_found() {
        let err: ServiceError = StorageError::not_found("participant", Uuid::nil()).into();
        let response = AppError::from(err).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let forbidden = AppError::from(ServiceError::Forbidden("host only".into())).into_response();
        assert_eq!(forbidden.status(), StatusCode::FORBIDDEN);
    }
}
