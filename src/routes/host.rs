use axum::{
    Json, Router,
    extract::{Path, State},
    routing::post,
};
use axum_valid::Valid;
use uuid::Uuid;

use crate::{
    dto::session::{CreateTeamRequest, SelectModeRequest, SessionSummary, TeamSummary},
    error::AppError,
    routes::CallerId,
    services::{session_service, team_service},
    state::SharedState,
};

/// Host-only commands driving a session.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/sessions/{id}/mode", post(select_mode))
        .route("/sessions/{id}/start", post(start_session))
        .route("/sessions/{id}/results", post(advance_to_results))
        .route("/sessions/{id}/next", post(advance_to_next_question))
        .route("/sessions/{id}/end", post(end_session))
        .route("/sessions/{id}/cancel", post(cancel_session))
        .route("/sessions/{id}/teams", post(create_team))
}

/// Pick the play mode once, while waiting.
#[utoipa::path(
    post,
    path = "/sessions/{id}/mode",
    tag = "host",
    params(
        ("X-User-Id" = String, Header, description = "Identity of the host"),
        ("id" = String, Path, description = "Session identifier")
    ),
    request_body = SelectModeRequest,
    responses(
        (status = 200, description = "Mode selected", body = SessionSummary),
        (status = 403, description = "Caller is not the host"),
        (status = 409, description = "Mode already selected or session started")
    )
)]
pub async fn select_mode(
    State(state): State<SharedState>,
    CallerId(caller): CallerId,
    Path(id): Path<Uuid>,
    Valid(Json(payload)): Valid<Json<SelectModeRequest>>,
) -> Result<Json<SessionSummary>, AppError> {
    Ok(Json(
        session_service::select_mode(&state, id, caller, payload.mode).await?,
    ))
}

/// Start the pre-quiz countdown.
#[utoipa::path(
    post,
    path = "/sessions/{id}/start",
    tag = "host",
    params(
        ("X-User-Id" = String, Header, description = "Identity of the host"),
        ("id" = String, Path, description = "Session identifier")
    ),
    responses(
        (status = 200, description = "Countdown started", body = SessionSummary),
        (status = 409, description = "Session cannot start")
    )
)]
pub async fn start_session(
    State(state): State<SharedState>,
    CallerId(caller): CallerId,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionSummary>, AppError> {
    Ok(Json(session_service::start_session(&state, id, caller).await?))
}

/// Close the current question now and show its results.
#[utoipa::path(
    post,
    path = "/sessions/{id}/results",
    tag = "host",
    params(
        ("X-User-Id" = String, Header, description = "Identity of the host"),
        ("id" = String, Path, description = "Session identifier")
    ),
    responses((status = 200, description = "Results shown", body = SessionSummary))
)]
pub async fn advance_to_results(
    State(state): State<SharedState>,
    CallerId(caller): CallerId,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionSummary>, AppError> {
    Ok(Json(
        session_service::advance_to_results(&state, id, caller).await?,
    ))
}

#[utoipa::path(
    post,
    path = "/sessions/{id}/next",
    tag = "host",
    params(
        ("X-User-Id" = String, Header, description = "Identity of the host"),
        ("id" = String, Path, description = "Session identifier")
    ),
    responses(
        (status = 200, description = "Next question opened", body = SessionSummary),
        (status = 409, description = "Not showing results, or no question left")
    )
)]
pub async fn advance_to_next_question(
    State(state): State<SharedState>,
    CallerId(caller): CallerId,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionSummary>, AppError> {
    Ok(Json(
        session_service::advance_to_next_question(&state, id, caller).await?,
    ))
}

/// Finish the quiz after the last question's results.
#[utoipa::path(
    post,
    path = "/sessions/{id}/end",
    tag = "host",
    params(
        ("X-User-Id" = String, Header, description = "Identity of the host"),
        ("id" = String, Path, description = "Session identifier")
    ),
    responses((status = 200, description = "Session completed", body = SessionSummary))
)]
pub async fn end_session(
    State(state): State<SharedState>,
    CallerId(caller): CallerId,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionSummary>, AppError> {
    Ok(Json(session_service::end_session(&state, id, caller).await?))
}

#[utoipa::path(
    post,
    path = "/sessions/{id}/cancel",
    tag = "host",
    params(
        ("X-User-Id" = String, Header, description = "Identity of the host"),
        ("id" = String, Path, description = "Session identifier")
    ),
    responses((status = 200, description = "Session cancelled", body = SessionSummary))
)]
pub async fn cancel_session(
    State(state): State<SharedState>,
    CallerId(caller): CallerId,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionSummary>, AppError> {
    Ok(Json(session_service::cancel_session(&state, id, caller).await?))
}

/// Create a team in a waiting team-mode session.
#[utoipa::path(
    post,
    path = "/sessions/{id}/teams",
    tag = "host",
    params(
        ("X-User-Id" = String, Header, description = "Identity of the host"),
        ("id" = String, Path, description = "Session identifier")
    ),
    request_body = CreateTeamRequest,
    responses((status = 200, description = "Team created", body = TeamSummary))
)]
pub async fn create_team(
    State(state): State<SharedState>,
    CallerId(caller): CallerId,
    Path(id): Path<Uuid>,
    Valid(Json(payload)): Valid<Json<CreateTeamRequest>>,
) -> Result<Json<TeamSummary>, AppError> {
    Ok(Json(
        team_service::create_team(&state, id, caller, payload).await?,
    ))
}
