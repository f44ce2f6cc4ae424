use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    dao::{
        models::{AnswerEntity, SessionStatus},
        session_store::{InsertOutcome, SessionStore},
    },
    dto::session::{AnswerReceipt, AnswerSummary, SubmitAnswerRequest},
    error::ServiceError,
    services::{scoring, session_service},
    state::SharedState,
};

/// Submit an answer on behalf of the caller.
///
/// A second submission for the same question is not an error for the participant: the receipt
/// carries the answer recorded first with `accepted = false`.
pub async fn submit_answer(
    state: &SharedState,
    session_id: Uuid,
    caller: Uuid,
    request: SubmitAnswerRequest,
) -> Result<AnswerReceipt, ServiceError> {
    match record_answer(state, session_id, caller, request).await {
        Ok(answer) => Ok(AnswerReceipt {
            accepted: true,
            answer: AnswerSummary::from(&answer),
        }),
        Err(ServiceError::DuplicateAnswer { existing }) => Ok(AnswerReceipt {
            accepted: false,
            answer: AnswerSummary::from(existing.as_ref()),
        }),
        Err(err) => Err(err),
    }
}

/// Validate, score and store one answer, then credit the participant.
///
/// Runs under the session's transition gate: an answer either commits while its question is
/// open or is rejected, never stored behind a close, finish or cancel. Answers received after the
/// deadline but before the question closed are stored as timeouts.
pub async fn record_answer(
    state: &SharedState,
    session_id: Uuid,
    caller: Uuid,
    request: SubmitAnswerRequest,
) -> Result<AnswerEntity, ServiceError> {
    let received_at_ms = state.clock().now_ms();
    let store = state.require_store().await?;
    state
        .run_exclusive(session_id, || {
            store_answer(
                state,
                store.as_ref(),
                session_id,
                caller,
                request,
                received_at_ms,
            )
        })
        .await
}

async fn store_answer(
    state: &SharedState,
    store: &dyn SessionStore,
    session_id: Uuid,
    caller: Uuid,
    request: SubmitAnswerRequest,
    received_at_ms: u64,
) -> Result<AnswerEntity, ServiceError> {
    let session = session_service::load_session(store, session_id).await?;
    let participant = session_service::load_owned_participant(
        store,
        session_id,
        request.participant_id,
        caller,
    )
    .await?;

    let current = session
        .current_question_index
        .filter(|_| session.status == SessionStatus::QuestionActive)
        .zip(session.current_question_id())
        .filter(|(_, question_id)| *question_id == request.question_id);
    let Some((index, question_id)) = current else {
        return Err(closed_question(
            store,
            session_id,
            participant.id,
            request.question_id,
        )
        .await);
    };

    if session
        .answers_open_at_ms
        .is_some_and(|open_at| received_at_ms < open_at)
    {
        return Err(ServiceError::InvalidState(
            "answers are not accepted during thinking time".into(),
        ));
    }

    let questions = store.list_questions(session.quiz_id).await?;
    let question = questions
        .iter()
        .find(|question| question.id == question_id)
        .ok_or_else(|| ServiceError::NotFound(format!("question `{question_id}`")))?;

    if let Some(option) = request
        .selected_option
        .filter(|option| *option >= question.options.len())
    {
        return Err(ServiceError::InvalidInput(format!(
            "option {option} does not exist ({} option(s))",
            question.options.len()
        )));
    }

    let deadline_ms = session.answer_window_deadline_ms.unwrap_or(received_at_ms);
    let selected_option = if received_at_ms > deadline_ms {
        debug!(session_id = %session_id, participant_id = %participant.id, "late answer stored as timeout");
        None
    } else {
        request.selected_option
    };

    let limit_ms = state.timing().units_ms(question.time_limit_secs);
    let score = scoring::score_answer(question, selected_option, limit_ms, deadline_ms, received_at_ms);

    let answer = AnswerEntity {
        id: Uuid::new_v4(),
        session_id,
        participant_id: participant.id,
        team_id: participant.team_id,
        question_id,
        question_index: index,
        selected_option,
        is_correct: score.is_correct,
        points: score.points,
        time_taken_ms: score.time_taken_ms,
        submitted_at_ms: received_at_ms,
    };

    let answer = match store.insert_answer_if_absent(answer).await? {
        InsertOutcome::Inserted(answer) => answer,
        InsertOutcome::Duplicate(existing) => {
            debug!(
                session_id = %session_id,
                participant_id = %participant.id,
                question_id = %question_id,
                "duplicate answer; the first one stands"
            );
            return Err(ServiceError::DuplicateAnswer {
                existing: Box::new(existing),
            });
        }
    };

    if answer.points > 0 {
        store
            .increment_participant_score(participant.id, answer.points)
            .await?;
    }
    info!(
        session_id = %session_id,
        participant_id = %participant.id,
        index,
        correct = answer.is_correct,
        points = answer.points,
        "answer recorded"
    );

    if let Err(err) =
        session_service::observe_answer_recorded(state, store, &session, &answer).await
    {
        warn!(session_id = %session_id, error = %err, "failed to evaluate early advance");
    }

    Ok(answer)
}

/// Error for a submission targeting a question that does not accept answers.
///
/// A participant that already answered gets its answer back instead.
async fn closed_question(
    store: &dyn SessionStore,
    session_id: Uuid,
    participant_id: Uuid,
    question_id: Uuid,
) -> ServiceError {
    let existing = match store.list_answers(session_id, question_id).await {
        Ok(answers) => answers
            .into_iter()
            .find(|answer| answer.participant_id == participant_id),
        Err(err) => return err.into(),
    };

    match existing {
        Some(existing) => ServiceError::DuplicateAnswer {
            existing: Box::new(existing),
        },
        None => ServiceError::InvalidState("the question is not accepting answers".into()),
    }
}
