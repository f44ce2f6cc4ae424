use axum::{
    Json, Router,
    extract::{Path, State},
    routing::{get, post},
};
use axum_valid::Valid;
use uuid::Uuid;

use crate::{
    dto::session::{
        CreateSessionRequest, JoinSessionRequest, JoinSessionResponse, LeaderboardResponse,
        QuestionResultsResponse, SessionSnapshot, SessionSummary,
    },
    error::AppError,
    routes::CallerId,
    services::{results_service, session_service, snapshot_service, sync_service},
    state::SharedState,
};

/// Session creation, joining and read-only views.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/sessions", post(create_session))
        .route("/sessions/join", post(join_session))
        .route("/sessions/{id}", get(get_session))
        .route("/sessions/{id}/refresh", post(refresh_session))
        .route(
            "/sessions/{id}/questions/{index}/results",
            get(question_results),
        )
        .route("/sessions/{id}/leaderboard", get(leaderboard))
}

/// Open a session on a quiz; the caller becomes its host.
#[utoipa::path(
    post,
    path = "/sessions",
    tag = "sessions",
    params(("X-User-Id" = String, Header, description = "Identity of the caller")),
    request_body = CreateSessionRequest,
    responses(
        (status = 200, description = "Session created", body = SessionSummary),
        (status = 404, description = "Unknown quiz")
    )
)]
pub async fn create_session(
    State(state): State<SharedState>,
    CallerId(caller): CallerId,
    Valid(Json(payload)): Valid<Json<CreateSessionRequest>>,
) -> Result<Json<SessionSummary>, AppError> {
    let summary = session_service::create_session(&state, caller, payload).await?;
    Ok(Json(summary))
}

/// Join a session with its access code. Joining twice returns the same participant.
#[utoipa::path(
    post,
    path = "/sessions/join",
    tag = "sessions",
    params(("X-User-Id" = String, Header, description = "Identity of the caller")),
    request_body = JoinSessionRequest,
    responses(
        (status = 200, description = "Participant joined", body = JoinSessionResponse),
        (status = 404, description = "Unknown access code"),
        (status = 409, description = "Session already started")
    )
)]
pub async fn join_session(
    State(state): State<SharedState>,
    CallerId(caller): CallerId,
    Valid(Json(payload)): Valid<Json<JoinSessionRequest>>,
) -> Result<Json<JoinSessionResponse>, AppError> {
    let joined = session_service::join_session(&state, caller, payload).await?;
    Ok(Json(joined))
}

/// Read-only snapshot of a session.
#[utoipa::path(
    get,
    path = "/sessions/{id}",
    tag = "sessions",
    params(("id" = String, Path, description = "Session identifier")),
    responses(
        (status = 200, description = "Session snapshot", body = SessionSnapshot),
        (status = 404, description = "Unknown session")
    )
)]
pub async fn get_session(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionSnapshot>, AppError> {
    Ok(Json(snapshot_service::session_snapshot(&state, id).await?))
}

/// Re-read the session now and wake its sync feed.
#[utoipa::path(
    post,
    path = "/sessions/{id}/refresh",
    tag = "sessions",
    params(("id" = String, Path, description = "Session identifier")),
    responses((status = 200, description = "Fresh session snapshot", body = SessionSnapshot))
)]
pub async fn refresh_session(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionSnapshot>, AppError> {
    Ok(Json(sync_service::refresh_session(&state, id).await?))
}

#[utoipa::path(
    get,
    path = "/sessions/{id}/questions/{index}/results",
    tag = "sessions",
    params(
        ("id" = String, Path, description = "Session identifier"),
        ("index" = usize, Path, description = "Position of the question in the session")
    ),
    responses(
        (status = 200, description = "Answer distribution", body = QuestionResultsResponse),
        (status = 409, description = "Question not closed yet")
    )
)]
pub async fn question_results(
    State(state): State<SharedState>,
    Path((id, index)): Path<(Uuid, usize)>,
) -> Result<Json<QuestionResultsResponse>, AppError> {
    Ok(Json(
        results_service::question_results_for(&state, id, index).await?,
    ))
}

/// Individual and team leaderboards with their podiums.
#[utoipa::path(
    get,
    path = "/sessions/{id}/leaderboard",
    tag = "sessions",
    params(("id" = String, Path, description = "Session identifier")),
    responses((status = 200, description = "Leaderboards", body = LeaderboardResponse))
)]
pub async fn leaderboard(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Json<LeaderboardResponse>, AppError> {
    Ok(Json(results_service::leaderboard_for(&state, id).await?))
}
