use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{
    dao::models::{
        AnswerEntity, ParticipantEntity, QuestionEntity, SessionEntity, SessionMode, SessionStatus,
    },
    dto::{
        format_system_time,
        validation::{validate_access_code, validate_not_blank},
    },
    state::projection::SessionView,
};

/// Payload used by a host to open a new session.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct CreateSessionRequest {
    /// Quiz whose questions will be played.
    pub quiz_id: Uuid,
}

/// Payload used by a participant to join with an access code.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct JoinSessionRequest {
    /// Code announced by the host.
    #[validate(custom(function = "validate_access_code"))]
    pub access_code: String,
    /// Name shown to the other players.
    #[validate(
        length(min = 1, max = 40),
        custom(function = "validate_not_blank")
    )]
    pub display_name: String,
}

/// Play mode chosen by the host.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct SelectModeRequest {
    /// Requested mode.
    pub mode: SessionMode,
}

/// Team created by the host before the quiz starts.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct CreateTeamRequest {
    /// Team name.
    #[validate(
        length(min = 1, max = 40),
        custom(function = "validate_not_blank")
    )]
    pub name: String,
}

/// Request to join a team.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct JoinTeamRequest {
    /// Participant row of the caller.
    pub participant_id: Uuid,
}

/// Answer submitted by a participant for the current question.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct SubmitAnswerRequest {
    /// Participant row of the caller.
    pub participant_id: Uuid,
    /// Question being answered; must be the current one.
    pub question_id: Uuid,
    /// Selected option, `null` when the participant ran out of time.
    #[serde(default)]
    pub selected_option: Option<usize>,
}

/// Session row as exposed to clients.
#[derive(Debug, Serialize, ToSchema, Clone)]
pub struct SessionSummary {
    /// Session identifier.
    pub id: Uuid,
    /// Quiz being played.
    pub quiz_id: Uuid,
    /// User hosting the session.
    pub host_id: Uuid,
    /// Code participants join with.
    pub access_code: String,
    /// Play mode, once selected.
    pub mode: Option<SessionMode>,
    /// Lifecycle status.
    pub status: SessionStatus,
    /// Index into the question order of the current question.
    pub current_question_index: Option<usize>,
    /// Questions in the order.
    pub question_count: usize,
    /// End of the pre-quiz countdown (epoch milliseconds).
    pub countdown_ends_at_ms: Option<u64>,
    /// When answers are accepted from (epoch milliseconds).
    pub answers_open_at_ms: Option<u64>,
    /// End of the answer window (epoch milliseconds).
    pub answer_window_deadline_ms: Option<u64>,
    /// Row version, bumped on every transition.
    pub version: u64,
    /// Creation time (RFC 3339).
    pub created_at: String,
}

impl From<&SessionEntity> for SessionSummary {
    fn from(value: &SessionEntity) -> Self {
        Self {
            id: value.id,
            quiz_id: value.quiz_id,
            host_id: value.host_id,
            access_code: value.access_code.clone(),
            mode: value.mode,
            status: value.status,
            current_question_index: value.current_question_index,
            question_count: value.question_order.len(),
            countdown_ends_at_ms: value.countdown_ends_at_ms,
            answers_open_at_ms: value.answers_open_at_ms,
            answer_window_deadline_ms: value.answer_window_deadline_ms,
            version: value.version,
            created_at: format_system_time(value.created_at),
        }
    }
}

/// Participant as returned by the REST routes.
#[derive(Debug, Serialize, ToSchema, Clone)]
pub struct ParticipantSummary {
    /// Participant identifier.
    pub id: Uuid,
    /// User behind the participant.
    pub user_id: Uuid,
    /// Name shown to the other players.
    pub display_name: String,
    /// Current team, if any.
    pub team_id: Option<Uuid>,
    /// Total points.
    pub score: i64,
    /// Join time (RFC 3339).
    pub joined_at: String,
}

impl From<&ParticipantEntity> for ParticipantSummary {
    fn from(value: &ParticipantEntity) -> Self {
        Self {
            id: value.id,
            user_id: value.user_id,
            display_name: value.display_name.clone(),
            team_id: value.team_id,
            score: value.score,
            joined_at: format_system_time(value.joined_at),
        }
    }
}

/// Team with its derived score.
#[derive(Debug, Serialize, ToSchema, Clone, PartialEq, Eq)]
pub struct TeamSummary {
    /// Team identifier.
    pub id: Uuid,
    /// Team name.
    pub name: String,
    /// Sum of the current members' scores.
    pub score: i64,
    /// Participants counted in the score.
    pub members: Vec<Uuid>,
}

/// Question as shown while it is played; correctness stays hidden.
#[derive(Debug, Serialize, ToSchema, Clone)]
pub struct QuestionSummary {
    /// Question identifier.
    pub id: Uuid,
    /// Position in the session's question order.
    pub index: usize,
    /// Question text.
    pub text: String,
    /// Optional image or audio.
    pub media_url: Option<String>,
    /// Option texts in display order.
    pub options: Vec<String>,
    /// Answer window in time units.
    pub time_limit: u32,
    /// Points for an instant correct answer.
    pub base_points: i64,
}

impl QuestionSummary {
    /// Public view of question `index`.
    pub fn new(index: usize, question: &QuestionEntity) -> Self {
        Self {
            id: question.id,
            index,
            text: question.text.clone(),
            media_url: question.media_url.clone(),
            options: question
                .options
                .iter()
                .map(|option| option.text.clone())
                .collect(),
            time_limit: question.time_limit_secs,
            base_points: question.base_points,
        }
    }
}

/// Read-only session snapshot served to the UI and used by the poll fallback.
#[derive(Debug, Serialize, ToSchema, Clone)]
pub struct SessionSnapshot {
    /// Session row.
    pub session: SessionSummary,
    /// Phase as rendered by clients.
    pub view: SessionView,
    /// Server time the snapshot was taken at (epoch milliseconds).
    pub server_time_ms: u64,
    /// Remaining answer time, while a question is open.
    pub remaining_ms: Option<u64>,
    /// Question on screen, correctness hidden.
    pub current_question: Option<QuestionSummary>,
    /// Participants in join order.
    pub participants: Vec<ParticipantSummary>,
    /// Team standings; final ones once the session ended.
    pub teams: Vec<TeamSummary>,
    /// Participants that answered the current question.
    pub answered: Vec<Uuid>,
}

/// Session joined and the caller's participant row.
#[derive(Debug, Serialize, ToSchema)]
pub struct JoinSessionResponse {
    /// Joined session.
    pub session: SessionSummary,
    /// Participant of the caller.
    pub participant: ParticipantSummary,
}

/// Stored answer as returned to its author.
#[derive(Debug, Serialize, ToSchema, Clone, PartialEq, Eq)]
pub struct AnswerSummary {
    /// Answer identifier.
    pub id: Uuid,
    /// Author of the answer.
    pub participant_id: Uuid,
    /// Answered question.
    pub question_id: Uuid,
    /// Position of the question in the order.
    pub question_index: usize,
    /// Chosen option, `null` for a timeout.
    pub selected_option: Option<usize>,
    /// Whether the chosen option is correct.
    pub is_correct: bool,
    /// Points awarded.
    pub points: i64,
    /// Time from the answer window opening to the submission.
    pub time_taken_ms: u64,
}

impl From<&AnswerEntity> for AnswerSummary {
    fn from(value: &AnswerEntity) -> Self {
        Self {
            id: value.id,
            participant_id: value.participant_id,
            question_id: value.question_id,
            question_index: value.question_index,
            selected_option: value.selected_option,
            is_correct: value.is_correct,
            points: value.points,
            time_taken_ms: value.time_taken_ms,
        }
    }
}

/// Outcome of a submission. A duplicate returns the answer recorded first.
#[derive(Debug, Serialize, ToSchema, Clone, PartialEq, Eq)]
pub struct AnswerReceipt {
    /// Whether this submission was recorded.
    pub accepted: bool,
    /// Answer stored for the participant.
    pub answer: AnswerSummary,
}

/// Selection count of one option.
#[derive(Debug, Serialize, ToSchema, Clone, PartialEq, Eq)]
pub struct OptionTally {
    /// Option position.
    pub index: usize,
    /// Option text.
    pub text: String,
    /// Whether this is the correct option.
    pub is_correct: bool,
    /// Participants that picked it.
    pub count: usize,
}

/// What one participant did on a question.
#[derive(Debug, Serialize, ToSchema, Clone, PartialEq, Eq)]
pub struct ParticipantOutcome {
    /// Participant identifier.
    pub participant_id: Uuid,
    /// Name of the participant.
    pub display_name: String,
    /// Chosen option, `null` when no answer counted.
    pub selected_option: Option<usize>,
    /// Whether the answer was correct.
    pub is_correct: bool,
    /// Points awarded for the question.
    pub points: i64,
}

/// Answer distribution of a finished question.
#[derive(Debug, Serialize, ToSchema, Clone, PartialEq, Eq)]
pub struct QuestionResultsResponse {
    /// Question identifier.
    pub question_id: Uuid,
    /// Position in the question order.
    pub index: usize,
    /// Position of the correct option.
    pub correct_option: Option<usize>,
    /// Selection counts per option.
    pub options: Vec<OptionTally>,
    /// Timeouts plus participants that never answered.
    pub no_answer: usize,
    /// Outcome of every participant.
    pub outcomes: Vec<ParticipantOutcome>,
}

/// Participant with its position in the ranking.
#[derive(Debug, Serialize, ToSchema, Clone, PartialEq, Eq)]
pub struct RankedParticipant {
    /// 1-based position.
    pub rank: usize,
    /// Participant identifier.
    pub participant_id: Uuid,
    /// Name of the participant.
    pub display_name: String,
    /// Total points.
    pub score: i64,
}

/// Team with its position in the ranking.
#[derive(Debug, Serialize, ToSchema, Clone, PartialEq, Eq)]
pub struct RankedTeam {
    /// 1-based position.
    pub rank: usize,
    /// Team identifier.
    pub team_id: Uuid,
    /// Team name.
    pub name: String,
    /// Team score.
    pub score: i64,
}

/// Individual and team rankings with their podiums.
#[derive(Debug, Serialize, ToSchema, Clone, PartialEq, Eq)]
pub struct LeaderboardResponse {
    /// Every participant by score.
    pub participants: Vec<RankedParticipant>,
    /// Top of the participant ranking.
    pub podium: Vec<RankedParticipant>,
    /// Empty outside team mode.
    pub teams: Vec<RankedTeam>,
    /// Top of the team ranking.
    pub team_podium: Vec<RankedTeam>,
}
