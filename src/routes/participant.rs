use axum::{
    Json, Router,
    extract::{Path, State},
    routing::post,
};
use axum_valid::Valid;
use uuid::Uuid;

use crate::{
    dto::session::{AnswerReceipt, JoinTeamRequest, ParticipantSummary, SubmitAnswerRequest},
    error::AppError,
    routes::CallerId,
    services::{answer_service, team_service},
    state::SharedState,
};

/// Participant commands.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/sessions/{id}/answers", post(submit_answer))
        .route("/sessions/{id}/teams/{team_id}/join", post(join_team))
}

/// Answer the current question. A repeated submission returns the answer recorded first.
#[utoipa::path(
    post,
    path = "/sessions/{id}/answers",
    tag = "participant",
    params(
        ("X-User-Id" = String, Header, description = "Identity of the participant's user"),
        ("id" = String, Path, description = "Session identifier")
    ),
    request_body = SubmitAnswerRequest,
    responses(
        (status = 200, description = "Answer receipt", body = AnswerReceipt),
        (status = 409, description = "No question accepts answers")
    )
)]
pub async fn submit_answer(
    State(state): State<SharedState>,
    CallerId(caller): CallerId,
    Path(id): Path<Uuid>,
    Valid(Json(payload)): Valid<Json<SubmitAnswerRequest>>,
) -> Result<Json<AnswerReceipt>, AppError> {
    Ok(Json(
        answer_service::submit_answer(&state, id, caller, payload).await?,
    ))
}

#[utoipa::path(
    post,
    path = "/sessions/{id}/teams/{team_id}/join",
    tag = "participant",
    params(
        ("X-User-Id" = String, Header, description = "Identity of the participant's user"),
        ("id" = String, Path, description = "Session identifier"),
        ("team_id" = String, Path, description = "Team to join")
    ),
    request_body = JoinTeamRequest,
    responses((status = 200, description = "Membership updated", body = ParticipantSummary))
)]
pub async fn join_team(
    State(state): State<SharedState>,
    CallerId(caller): CallerId,
    Path((id, team_id)): Path<(Uuid, Uuid)>,
    Valid(Json(payload)): Valid<Json<JoinTeamRequest>>,
) -> Result<Json<ParticipantSummary>, AppError> {
    Ok(Json(
        team_service::join_team(&state, id, team_id, caller, payload).await?,
    ))
}
