//! Session lifecycle: creation, joining, host commands and the transition runner.
//!
//! Every status change goes through [`apply_event`]: plan against fresh state, write with the
//! version the plan was based on, retry on a stale write, then arm the timer of the phase entered.

use std::{sync::Arc, time::SystemTime};

use futures::future::BoxFuture;
use rand::{Rng, seq::SliceRandom};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    dao::{
        models::{
            AnswerEntity, ParticipantEntity, QuestionEntity, SessionEntity, SessionMode,
            SessionStatus,
        },
        session_store::{ConditionalWrite, SessionStore},
    },
    dto::{
        session::{
            CreateSessionRequest, JoinSessionRequest, JoinSessionResponse, ParticipantSummary,
            SessionSummary,
        },
        sse::AnswerRecordedEvent,
        validation::{ACCESS_CODE_ALPHABET, ACCESS_CODE_LEN},
    },
    error::ServiceError,
    services::{results_service, sse_events, sync_service, team_service},
    state::{
        SessionEvent, SessionPhase, SharedState, SseHub, TimedPhase,
        state_machine::{self, PlanError, TransitionContext},
    },
};

const MAX_TRANSITION_ATTEMPTS: u32 = 3;
const MAX_ACCESS_CODE_ATTEMPTS: u32 = 16;

/// A committed transition.
struct Applied {
    from: SessionPhase,
    to: SessionPhase,
    session: SessionEntity,
    /// Error to report once side effects ran.
    fatal: Option<ServiceError>,
}

/// Read a session or fail with [`ServiceError::SessionNotFound`].
pub async fn load_session(
    store: &dyn SessionStore,
    session_id: Uuid,
) -> Result<SessionEntity, ServiceError> {
    store
        .find_session(session_id)
        .await?
        .ok_or(ServiceError::SessionNotFound(session_id))
}

/// Reject callers other than the session's host.
pub fn ensure_host(session: &SessionEntity, caller: Uuid) -> Result<(), ServiceError> {
    if session.host_id == caller {
        Ok(())
    } else {
        Err(ServiceError::Forbidden(
            "only the session host can run this command".into(),
        ))
    }
}

/// Read a participant of `session_id` owned by `caller`.
pub async fn load_owned_participant(
    store: &dyn SessionStore,
    session_id: Uuid,
    participant_id: Uuid,
    caller: Uuid,
) -> Result<ParticipantEntity, ServiceError> {
    let participant = store
        .find_participant(participant_id)
        .await?
        .filter(|participant| participant.session_id == session_id)
        .ok_or(ServiceError::ParticipantNotFound(participant_id))?;

    if participant.user_id != caller {
        return Err(ServiceError::Forbidden(
            "participant belongs to another user".into(),
        ));
    }
    Ok(participant)
}

/// Open a new session on a quiz; the caller becomes its host.
pub async fn create_session(
    state: &SharedState,
    caller: Uuid,
    request: CreateSessionRequest,
) -> Result<SessionSummary, ServiceError> {
    let store = state.require_store().await?;
    let questions = store.list_questions(request.quiz_id).await?;
    if questions.is_empty() {
        return Err(ServiceError::NotFound(format!("quiz `{}`", request.quiz_id)));
    }

    let access_code = allocate_access_code(store.as_ref()).await?;
    let now = SystemTime::now();
    let session = SessionEntity {
        id: Uuid::new_v4(),
        quiz_id: request.quiz_id,
        host_id: caller,
        access_code,
        mode: None,
        status: SessionStatus::Waiting,
        current_question_index: None,
        question_order: Vec::new(),
        countdown_ends_at_ms: None,
        answers_open_at_ms: None,
        answer_window_deadline_ms: None,
        version: 0,
        created_at: now,
        updated_at: now,
    };
    store.create_session(session.clone()).await?;
    info!(
        session_id = %session.id,
        quiz_id = %session.quiz_id,
        host_id = %caller,
        access_code = %session.access_code,
        "session created"
    );

    sync_service::ensure_feed(state, session.id).await?;
    Ok(SessionSummary::from(&session))
}

async fn allocate_access_code(store: &dyn SessionStore) -> Result<String, ServiceError> {
    for _ in 0..MAX_ACCESS_CODE_ATTEMPTS {
        let code = random_access_code();
        if store.find_session_by_code(code.clone()).await?.is_none() {
            return Ok(code);
        }
        debug!(access_code = %code, "access code already taken; drawing another");
    }
    Err(ServiceError::InvalidState(
        "could not allocate a unique access code".into(),
    ))
}

fn random_access_code() -> String {
    let mut rng = rand::rng();
    (0..ACCESS_CODE_LEN)
        .map(|_| ACCESS_CODE_ALPHABET[rng.random_range(0..ACCESS_CODE_ALPHABET.len())] as char)
        .collect()
}

/// Join a session by access code.
///
/// A user that already joined gets its existing participant back, whatever the session status.
/// New participants are only admitted while the session is waiting.
pub async fn join_session(
    state: &SharedState,
    caller: Uuid,
    request: JoinSessionRequest,
) -> Result<JoinSessionResponse, ServiceError> {
    let store = state.require_store().await?;
    let session = store
        .find_session_by_code(request.access_code.clone())
        .await?
        .ok_or_else(|| {
            ServiceError::NotFound(format!("session with access code `{}`", request.access_code))
        })?;

    let existing = store
        .list_participants(session.id)
        .await?
        .into_iter()
        .find(|participant| participant.user_id == caller);

    let participant = match existing {
        Some(participant) => participant,
        None => {
            if session.status != SessionStatus::Waiting {
                return Err(ServiceError::InvalidState(
                    "the session no longer accepts new participants".into(),
                ));
            }
            let participant = store
                .join_participant(session.id, caller, request.display_name.trim().to_string())
                .await?;
            info!(
                session_id = %session.id,
                participant_id = %participant.id,
                user_id = %caller,
                "participant joined"
            );
            participant
        }
    };

    Ok(JoinSessionResponse {
        session: SessionSummary::from(&session),
        participant: ParticipantSummary::from(&participant),
    })
}

/// Choose individual or team play while waiting.
pub async fn select_mode(
    state: &SharedState,
    session_id: Uuid,
    caller: Uuid,
    mode: SessionMode,
) -> Result<SessionSummary, ServiceError> {
    host_command(state, session_id, caller, |_| SessionEvent::SelectMode(mode)).await
}

/// Start the pre-quiz countdown.
pub async fn start_session(
    state: &SharedState,
    session_id: Uuid,
    caller: Uuid,
) -> Result<SessionSummary, ServiceError> {
    host_command(state, session_id, caller, |_| SessionEvent::Start).await
}

/// Close the current question now instead of waiting for its deadline.
pub async fn advance_to_results(
    state: &SharedState,
    session_id: Uuid,
    caller: Uuid,
) -> Result<SessionSummary, ServiceError> {
    host_command(state, session_id, caller, |session| SessionEvent::CloseQuestion {
        index: session.current_question_index.unwrap_or_default(),
    })
    .await
}

/// Open the next question from the results of the current one.
pub async fn advance_to_next_question(
    state: &SharedState,
    session_id: Uuid,
    caller: Uuid,
) -> Result<SessionSummary, ServiceError> {
    host_command(state, session_id, caller, |_| SessionEvent::NextQuestion).await
}

/// Finish the quiz from the results of its last question.
pub async fn end_session(
    state: &SharedState,
    session_id: Uuid,
    caller: Uuid,
) -> Result<SessionSummary, ServiceError> {
    host_command(state, session_id, caller, |_| SessionEvent::Finish).await
}

/// Abort the session from any non-terminal status.
pub async fn cancel_session(
    state: &SharedState,
    session_id: Uuid,
    caller: Uuid,
) -> Result<SessionSummary, ServiceError> {
    host_command(state, session_id, caller, |_| SessionEvent::Cancel).await
}

async fn host_command<F>(
    state: &SharedState,
    session_id: Uuid,
    caller: Uuid,
    event: F,
) -> Result<SessionSummary, ServiceError>
where
    F: FnOnce(&SessionEntity) -> SessionEvent,
{
    let store = state.require_store().await?;
    let session = load_session(store.as_ref(), session_id).await?;
    ensure_host(&session, caller)?;

    let session = apply_event(state, session_id, event(&session)).await?;
    Ok(SessionSummary::from(&session))
}

/// Apply `event` to a session and run the side effects of the phase it enters.
pub async fn apply_event(
    state: &SharedState,
    session_id: Uuid,
    event: SessionEvent,
) -> Result<SessionEntity, ServiceError> {
    let store = state.require_store().await?;
    // Taken before the write: the feed releases the hub as soon as it sees a terminal status.
    let hub = state.session_hub(session_id);

    let applied = state
        .run_exclusive(session_id, || async {
            let applied = transition(state, store.as_ref(), session_id, event).await?;
            arm_timers(state, &applied);
            Ok(applied)
        })
        .await?;

    after_transition(state, store.as_ref(), &hub, applied).await
}

async fn transition(
    state: &SharedState,
    store: &dyn SessionStore,
    session_id: Uuid,
    event: SessionEvent,
) -> Result<Applied, ServiceError> {
    let mut attempt = 1;
    loop {
        let session = load_session(store, session_id).await?;
        let (participants, teams, questions) = futures::try_join!(
            store.list_participants(session_id),
            store.list_teams(session_id),
            store.list_questions(session.quiz_id)
        )?;
        let candidate_order = candidate_order(&questions, state.config().shuffle_questions);
        let ctx = TransitionContext {
            now_ms: state.clock().now_ms(),
            timing: state.timing(),
            participants: participants.len(),
            teams_with_members: team_service::teams_with_members(&teams, &participants),
            candidate_order: &candidate_order,
            questions: &questions,
        };

        let (plan, fatal) = match state_machine::plan(&session, event, &ctx) {
            Ok(plan) => (plan, None),
            Err(PlanError::InvalidQuestionIndex { index, len }) => {
                error!(
                    session_id = %session_id,
                    index,
                    len,
                    "question index out of range; forcing session completion"
                );
                let plan = state_machine::plan(&session, SessionEvent::ForceComplete, &ctx)?;
                (plan, Some(ServiceError::InvalidQuestionIndex { index, len }))
            }
            Err(err) => {
                info!(session_id = %session_id, ?event, error = %err, "session transition rejected");
                return Err(err.into());
            }
        };

        match store
            .update_session(plan.expected_version, plan.next.clone())
            .await?
        {
            ConditionalWrite::Applied(session) => {
                info!(
                    session_id = %session_id,
                    from = ?plan.from,
                    to = ?plan.to,
                    ?event,
                    version = session.version,
                    "session transitioned"
                );
                return Ok(Applied {
                    from: plan.from,
                    to: plan.to,
                    session,
                    fatal,
                });
            }
            ConditionalWrite::Stale { current_version } if attempt < MAX_TRANSITION_ATTEMPTS => {
                debug!(
                    session_id = %session_id,
                    attempt,
                    expected = plan.expected_version,
                    current_version,
                    "stale session write; retrying with fresh state"
                );
                attempt += 1;
            }
            ConditionalWrite::Stale { .. } => {
                warn!(session_id = %session_id, ?event, "session kept changing; giving up");
                return Err(ServiceError::StaleWrite { session_id });
            }
        }
    }
}

fn candidate_order(questions: &[QuestionEntity], shuffle: bool) -> Vec<Uuid> {
    let mut order: Vec<Uuid> = questions.iter().map(|question| question.id).collect();
    if shuffle {
        order.shuffle(&mut rand::rng());
    }
    order
}

/// Arm or cancel the timers of the phase just entered, still under the transition gate.
fn arm_timers(state: &SharedState, applied: &Applied) {
    let session = &applied.session;
    match applied.to {
        _ if applied.from == applied.to => {}
        SessionPhase::Waiting => {}
        SessionPhase::Active => arm_countdown(state, session),
        SessionPhase::QuestionActive(index) => arm_question(state, session, index),
        SessionPhase::ShowingResults(_) | SessionPhase::Completed | SessionPhase::Cancelled => {
            state.timers().cancel(session.id);
        }
    }
}

/// Broadcasts and cleanup of the phase just entered.
async fn after_transition(
    state: &SharedState,
    store: &dyn SessionStore,
    hub: &SseHub,
    applied: Applied,
) -> Result<SessionEntity, ServiceError> {
    let Applied {
        from,
        to,
        session,
        fatal,
    } = applied;

    let mut outcome = Ok(());
    match to {
        _ if from == to => {}
        SessionPhase::Waiting | SessionPhase::Active | SessionPhase::QuestionActive(_) => {}
        SessionPhase::ShowingResults(index) => {
            match results_service::question_results_for(state, session.id, index).await {
                Ok(results) => sse_events::broadcast_question_results(hub, &results),
                Err(err) => {
                    warn!(session_id = %session.id, index, error = %err, "failed to build question results")
                }
            }
        }
        SessionPhase::Completed | SessionPhase::Cancelled => {
            outcome = finish_session(state, store, hub, &session).await;
        }
    }

    if let Some(fatal) = fatal {
        return Err(fatal);
    }
    outcome.map(|()| session)
}

/// Side effects of entering `completed` or `cancelled`.
///
/// The final leaderboard is published, then team memberships are cleared. Final team standings
/// stay readable afterwards since every answer carries the team it was scored for.
async fn finish_session(
    state: &SharedState,
    store: &dyn SessionStore,
    hub: &SseHub,
    session: &SessionEntity,
) -> Result<(), ServiceError> {
    match results_service::session_leaderboard(state, session).await {
        Ok(leaderboard) => sse_events::broadcast_session_finished(hub, session.status, leaderboard),
        Err(err) => warn!(session_id = %session.id, error = %err, "failed to build final leaderboard"),
    }

    if session.mode != Some(SessionMode::Team) {
        return Ok(());
    }
    if let Err(err) = team_service::clear_memberships(store, session.id).await {
        error!(
            session_id = %session.id,
            error = %err,
            "failed to clear team memberships; queued for retry"
        );
        state.pending_team_cleanups().insert(session.id);
        return Err(ServiceError::TeamCleanupPending(session.id));
    }
    Ok(())
}

fn arm_countdown(state: &SharedState, session: &SessionEntity) {
    let delay = match session.countdown_ends_at_ms {
        Some(ends_at) => state.clock().until(ends_at),
        None => state.timing().countdown(),
    };
    schedule_event(
        state,
        session.id,
        TimedPhase::PreQuizCountdown,
        delay,
        SessionEvent::CountdownElapsed,
    );
}

/// Arm the thinking-time timer, or open the answer window right away when there is none.
fn arm_question(state: &SharedState, session: &SessionEntity, index: usize) {
    let Some(question_id) = session.current_question_id() else {
        return;
    };
    let session_id = session.id;
    let deadline_ms = session.answer_window_deadline_ms.unwrap_or_default();

    match session.answers_open_at_ms {
        Some(open_at) if open_at > state.clock().now_ms() => {
            let task_state = Arc::clone(state);
            state.timers().schedule(
                session_id,
                TimedPhase::ThinkingTime { index },
                state.clock().until(open_at),
                move || async move {
                    open_answers_if_current(&task_state, session_id, index, question_id, deadline_ms)
                        .await;
                },
            );
        }
        _ => open_answer_window(state, session_id, index, question_id, deadline_ms),
    }
}

/// Thinking time elapsed: open the answer window unless the session moved on meanwhile.
async fn open_answers_if_current(
    state: &SharedState,
    session_id: Uuid,
    index: usize,
    question_id: Uuid,
    deadline_ms: u64,
) {
    let result = state
        .run_exclusive(session_id, || async {
            let store = state.require_store().await?;
            let session = load_session(store.as_ref(), session_id).await?;
            if SessionPhase::of(&session) == SessionPhase::QuestionActive(index) {
                open_answer_window(state, session_id, index, question_id, deadline_ms);
            } else {
                debug!(session_id = %session_id, index, "session moved on; answer window stays closed");
            }
            Ok(())
        })
        .await;
    if let Err(err) = result {
        warn!(session_id = %session_id, index, error = %err, "failed to open answer window");
    }
}

fn open_answer_window(
    state: &SharedState,
    session_id: Uuid,
    index: usize,
    question_id: Uuid,
    deadline_ms: u64,
) {
    sse_events::broadcast_answers_open(
        &state.session_hub(session_id),
        index,
        question_id,
        deadline_ms,
    );
    schedule_event(
        state,
        session_id,
        TimedPhase::AnswerWindow { index },
        state.clock().until(deadline_ms),
        SessionEvent::CloseQuestion { index },
    );
}

fn schedule_event(
    state: &SharedState,
    session_id: Uuid,
    phase: TimedPhase,
    delay: std::time::Duration,
    event: SessionEvent,
) {
    let task_state = Arc::clone(state);
    debug!(session_id = %session_id, ?phase, ?delay, "timer armed");
    state
        .timers()
        .schedule(session_id, phase, delay, move || on_timer(task_state, session_id, event));
}

fn on_timer(state: SharedState, session_id: Uuid, event: SessionEvent) -> BoxFuture<'static, ()> {
    Box::pin(async move {
        match apply_event(&state, session_id, event).await {
            Ok(_) => {}
            Err(ServiceError::InvalidTransition(err)) => {
                debug!(session_id = %session_id, error = %err, "stale timer ignored");
            }
            Err(err) => {
                warn!(session_id = %session_id, ?event, error = %err, "timer transition failed");
            }
        }
    })
}

/// Publish a stored answer and arm the grace delay once every participant answered.
pub async fn observe_answer_recorded(
    state: &SharedState,
    store: &dyn SessionStore,
    session: &SessionEntity,
    answer: &AnswerEntity,
) -> Result<(), ServiceError> {
    let (participants, answers) = futures::try_join!(
        store.list_participants(session.id),
        store.list_answers(session.id, answer.question_id)
    )?;

    sse_events::broadcast_answer_recorded(
        &state.session_hub(session.id),
        &AnswerRecordedEvent {
            question_id: answer.question_id,
            participant_id: answer.participant_id,
            answered: answers.len(),
            participants: participants.len(),
        },
    );

    let everyone_answered = !participants.is_empty()
        && participants.iter().all(|participant| {
            answers
                .iter()
                .any(|answer| answer.participant_id == participant.id)
        });
    if !everyone_answered {
        return Ok(());
    }

    let index = answer.question_index;
    let deadline_ms = session.answer_window_deadline_ms.unwrap_or_default();
    let delay = state.timing().grace().min(state.clock().until(deadline_ms));
    let task_state = Arc::clone(state);
    let session_id = session.id;
    let armed = state.timers().schedule_once(
        session_id,
        TimedPhase::GraceDelay { index },
        delay,
        move || on_timer(task_state, session_id, SessionEvent::CloseQuestion { index }),
    );
    if armed {
        info!(session_id = %session_id, index, ?delay, "all participants answered; closing after grace delay");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn access_codes_use_the_alphabet() {
        for _ in 0..32 {
            let code = random_access_code();
            assert_eq!(code.len(), ACCESS_CODE_LEN);
            assert!(crate::dto::validation::validate_access_code(&code).is_ok());
        }
    }

    #[test]
    fn candidate_order_keeps_quiz_order_unless_shuffled() {
        let questions: Vec<QuestionEntity> = (0..5)
            .map(|position| QuestionEntity {
                id: Uuid::new_v4(),
                quiz_id: Uuid::nil(),
                position,
                text: String::new(),
                media_url: None,
                options: Vec::new(),
                time_limit_secs: 10,
                base_points: 100,
            })
            .collect();
        let ids: Vec<Uuid> = questions.iter().map(|question| question.id).collect();

        assert_eq!(candidate_order(&questions, false), ids);

        let mut shuffled = candidate_order(&questions, true);
        shuffled.sort();
        let mut sorted = ids;
        sorted.sort();
        assert_eq!(shuffled, sorted);
    }

    #[test]
    fn only_the_host_passes() {
        let host = Uuid::new_v4();
        let session = SessionEntity {
            id: Uuid::new_v4(),
            quiz_id: Uuid::new_v4(),
            host_id: host,
            access_code: "ABCDEF".into(),
            mode: None,
            status: SessionStatus::Waiting,
            current_question_index: None,
            question_order: Vec::new(),
            countdown_ends_at_ms: None,
            answers_open_at_ms: None,
            answer_window_deadline_ms: None,
            version: 0,
            created_at: SystemTime::UNIX_EPOCH,
            updated_at: SystemTime::UNIX_EPOCH,
        };

        assert!(ensure_host(&session, host).is_ok());
        assert!(matches!(
            ensure_host(&session, Uuid::new_v4()),
            Err(ServiceError::Forbidden(_))
        ));
    }
}
