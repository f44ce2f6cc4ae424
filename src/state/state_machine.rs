use std::time::SystemTime;

use thiserror::Error;
use uuid::Uuid;

use crate::{
    config::TimingConfig,
    dao::models::{QuestionEntity, SessionEntity, SessionMode, SessionStatus},
};

/// Lifecycle phase of a session, derived from its persisted row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// Lobby: participants join, the host picks a mode.
    Waiting,
    /// Pre-quiz countdown.
    Active,
    /// Question `i` is open (thinking time included).
    QuestionActive(usize),
    /// Results of question `i` are shown.
    ShowingResults(usize),
    /// Quiz finished.
    Completed,
    /// Host cancelled the session.
    Cancelled,
}

impl SessionPhase {
    /// Read the phase out of a session row.
    pub fn of(session: &SessionEntity) -> Self {
        let index = session.current_question_index.unwrap_or_default();
        match session.status {
            SessionStatus::Waiting => SessionPhase::Waiting,
            SessionStatus::Active => SessionPhase::Active,
            SessionStatus::QuestionActive => SessionPhase::QuestionActive(index),
            SessionStatus::ShowingResults => SessionPhase::ShowingResults(index),
            SessionStatus::Completed => SessionPhase::Completed,
            SessionStatus::Cancelled => SessionPhase::Cancelled,
        }
    }

    /// Whether no further transition is possible.
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionPhase::Completed | SessionPhase::Cancelled)
    }
}

/// Events that can be applied to a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// Host picks the play mode while waiting.
    SelectMode(SessionMode),
    /// Host starts the pre-quiz countdown.
    Start,
    /// The pre-quiz countdown elapsed; open the first question.
    CountdownElapsed,
    /// Close question `index`: deadline, grace delay after everyone answered, or host request.
    CloseQuestion {
        /// Question the trigger was armed for.
        index: usize,
    },
    /// Host opens the next question.
    NextQuestion,
    /// Host finishes the quiz after the last results.
    Finish,
    /// Host cancels the session.
    Cancel,
    /// The question pointer went out of range; end the session.
    ForceComplete,
}

/// Error returned when an event does not apply to the current phase.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid transition: {event:?} cannot be applied while in {from:?}")]
pub struct InvalidTransition {
    /// The phase the session was in when the event was received.
    pub from: SessionPhase,
    /// The rejected event.
    pub event: SessionEvent,
}

/// Errors that can occur when planning a transition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanError {
    /// The event is not valid from the current phase.
    #[error(transparent)]
    InvalidTransition(InvalidTransition),
    /// A mode was already chosen.
    #[error("session mode is already selected")]
    ModeAlreadySelected,
    /// Nobody joined yet.
    #[error("at least one participant must join before starting")]
    NoParticipants,
    /// Team mode without any populated team.
    #[error("team mode needs at least one team with members")]
    NoTeams,
    /// The quiz has no questions.
    #[error("the quiz has no questions")]
    NoQuestions,
    /// Next question requested on the last one.
    #[error("question {index} is the last question")]
    NoNextQuestion {
        /// Position of the last question.
        index: usize,
    },
    /// Finish requested while questions remain.
    #[error("{remaining} question(s) remain to be played")]
    QuestionsRemaining {
        /// Questions not played yet.
        remaining: usize,
    },
    /// The question pointer would leave the question order, or the question is gone.
    #[error("question index {index} is out of range ({len} question(s))")]
    InvalidQuestionIndex {
        /// Requested position.
        index: usize,
        /// Length of the question order.
        len: usize,
    },
}

/// Facts gathered by the caller before planning.
#[derive(Debug, Clone)]
pub struct TransitionContext<'a> {
    /// Current wall-clock time (epoch milliseconds).
    pub now_ms: u64,
    /// Durations of the timed phases.
    pub timing: &'a TimingConfig,
    /// Participants joined to the session.
    pub participants: usize,
    /// Teams owning at least one member.
    pub teams_with_members: usize,
    /// Order used when the session starts without a fixed order.
    pub candidate_order: &'a [Uuid],
    /// Quiz questions, looked up by identifier when a question opens.
    pub questions: &'a [QuestionEntity],
}

/// A validated transition and the row to write if nobody else wrote first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plan {
    /// Phase before the transition.
    pub from: SessionPhase,
    /// Phase after the transition.
    pub to: SessionPhase,
    /// Event that triggered it.
    pub event: SessionEvent,
    /// Version the row must still have for the write to apply.
    pub expected_version: u64,
    /// Row contents after the transition.
    pub next: SessionEntity,
}

/// Compute the phase an event leads to, ignoring guards.
pub fn compute_transition(
    from: SessionPhase,
    event: SessionEvent,
) -> Result<SessionPhase, InvalidTransition> {
    let next = match (from, event) {
        (SessionPhase::Waiting, SessionEvent::SelectMode(_)) => SessionPhase::Waiting,
        (SessionPhase::Waiting, SessionEvent::Start) => SessionPhase::Active,
        (SessionPhase::Active, SessionEvent::CountdownElapsed) => SessionPhase::QuestionActive(0),
        (SessionPhase::QuestionActive(current), SessionEvent::CloseQuestion { index })
            if current == index =>
        {
            SessionPhase::ShowingResults(current)
        }
        (SessionPhase::ShowingResults(index), SessionEvent::NextQuestion) => {
            SessionPhase::QuestionActive(index + 1)
        }
        (SessionPhase::ShowingResults(_), SessionEvent::Finish) => SessionPhase::Completed,
        (from, SessionEvent::Cancel) if !from.is_terminal() => SessionPhase::Cancelled,
        (from, SessionEvent::ForceComplete) if !from.is_terminal() => SessionPhase::Completed,
        (from, event) => return Err(InvalidTransition { from, event }),
    };

    Ok(next)
}

/// Validate `event` against `session` and compute the row to write.
pub fn plan(
    session: &SessionEntity,
    event: SessionEvent,
    ctx: &TransitionContext<'_>,
) -> Result<Plan, PlanError> {
    let from = SessionPhase::of(session);
    let to = compute_transition(from, event).map_err(PlanError::InvalidTransition)?;

    let mut next = session.clone();
    next.updated_at = SystemTime::now();

    match event {
        SessionEvent::SelectMode(mode) => {
            if session.mode.is_some() {
                return Err(PlanError::ModeAlreadySelected);
            }
            next.mode = Some(mode);
        }
        SessionEvent::Start => {
            if ctx.participants == 0 {
                return Err(PlanError::NoParticipants);
            }
            let mode = session.mode.unwrap_or(SessionMode::Classic);
            if mode == SessionMode::Team && ctx.teams_with_members == 0 {
                return Err(PlanError::NoTeams);
            }
            if next.question_order.is_empty() {
                next.question_order = ctx.candidate_order.to_vec();
            }
            if next.question_order.is_empty() {
                return Err(PlanError::NoQuestions);
            }
            next.mode = Some(mode);
            next.status = SessionStatus::Active;
            next.countdown_ends_at_ms = Some(ctx.now_ms + ctx.timing.units_ms(ctx.timing.countdown_units));
        }
        SessionEvent::CountdownElapsed => open_question(&mut next, 0, ctx)?,
        SessionEvent::NextQuestion => {
            let SessionPhase::ShowingResults(index) = from else {
                return Err(PlanError::InvalidTransition(InvalidTransition { from, event }));
            };
            if index + 1 >= session.question_order.len() {
                return Err(PlanError::NoNextQuestion { index });
            }
            open_question(&mut next, index + 1, ctx)?;
        }
        SessionEvent::CloseQuestion { .. } => {
            next.status = SessionStatus::ShowingResults;
        }
        SessionEvent::Finish => {
            let SessionPhase::ShowingResults(index) = from else {
                return Err(PlanError::InvalidTransition(InvalidTransition { from, event }));
            };
            let remaining = session.question_order.len().saturating_sub(index + 1);
            if remaining > 0 {
                return Err(PlanError::QuestionsRemaining { remaining });
            }
            next.status = SessionStatus::Completed;
        }
        SessionEvent::Cancel => finalize(&mut next, SessionStatus::Cancelled),
        SessionEvent::ForceComplete => finalize(&mut next, SessionStatus::Completed),
    }

    Ok(Plan {
        from,
        to,
        event,
        expected_version: session.version,
        next,
    })
}

/// Point the row at question `index` and stamp its absolute deadlines.
fn open_question(
    next: &mut SessionEntity,
    index: usize,
    ctx: &TransitionContext<'_>,
) -> Result<(), PlanError> {
    let len = next.question_order.len();
    let question = next
        .question_order
        .get(index)
        .and_then(|id| ctx.questions.iter().find(|question| question.id == *id))
        .ok_or(PlanError::InvalidQuestionIndex { index, len })?;

    let thinking_ms = match next.mode {
        Some(SessionMode::Team) => ctx.timing.units_ms(ctx.timing.thinking_units),
        _ => 0,
    };
    let answers_open_at_ms = ctx.now_ms + thinking_ms;

    next.status = SessionStatus::QuestionActive;
    next.current_question_index = Some(index);
    next.countdown_ends_at_ms = None;
    next.answers_open_at_ms = Some(answers_open_at_ms);
    next.answer_window_deadline_ms =
        Some(answers_open_at_ms + ctx.timing.units_ms(question.time_limit_secs));
    Ok(())
}

fn finalize(next: &mut SessionEntity, status: SessionStatus) {
    next.status = status;
    next.countdown_ends_at_ms = None;
}
