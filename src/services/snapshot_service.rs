use uuid::Uuid;

use crate::{
    dao::models::SessionStatus,
    dto::session::{ParticipantSummary, QuestionSummary, SessionSnapshot, SessionSummary},
    error::ServiceError,
    services::{sync_service, team_service},
    state::{SharedState, projection::SessionView},
};

/// Read-only snapshot of a session as displayed by the UI.
pub async fn session_snapshot(
    state: &SharedState,
    session_id: Uuid,
) -> Result<SessionSnapshot, ServiceError> {
    let store = state.require_store().await?;
    let remote = sync_service::fetch_snapshot(store.as_ref(), session_id)
        .await?
        .ok_or(ServiceError::SessionNotFound(session_id))?;
    let session = &remote.session;
    let now_ms = state.clock().now_ms();

    let shows_question = matches!(
        session.status,
        SessionStatus::QuestionActive | SessionStatus::ShowingResults
    );
    let current_question = match (shows_question, session.current_question_index) {
        (true, Some(index)) => {
            let questions = store.list_questions(session.quiz_id).await?;
            session
                .current_question_id()
                .and_then(|id| questions.iter().find(|question| question.id == id))
                .map(|question| QuestionSummary::new(index, question))
        }
        _ => None,
    };

    let remaining_ms = match session.status {
        SessionStatus::QuestionActive => session
            .answer_window_deadline_ms
            .map(|deadline| deadline.saturating_sub(now_ms)),
        _ => None,
    };

    Ok(SessionSnapshot {
        session: SessionSummary::from(session),
        view: SessionView::of(session),
        server_time_ms: now_ms,
        remaining_ms,
        current_question,
        participants: remote.participants.iter().map(ParticipantSummary::from).collect(),
        teams: team_service::team_standings(
            store.as_ref(),
            session,
            &remote.teams,
            &remote.participants,
        )
        .await?,
        answered: remote
            .answers
            .iter()
            .map(|answer| answer.participant_id)
            .collect(),
    })
}
