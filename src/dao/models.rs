use serde::{Deserialize, Serialize};
use std::time::SystemTime;
use utoipa::ToSchema;
use uuid::Uuid;

/// Lifecycle status persisted on the session row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Lobby: participants join, the host picks a mode.
    Waiting,
    /// Pre-quiz countdown before the first question.
    Active,
    /// A question is open (thinking time included in team mode).
    QuestionActive,
    /// Results of the current question are displayed.
    ShowingResults,
    /// The host finished the quiz.
    Completed,
    /// The host cancelled the session.
    Cancelled,
}

impl SessionStatus {
    /// Whether no further transition can leave this status.
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionStatus::Completed | SessionStatus::Cancelled)
    }
}

/// Play mode of a session, chosen once while waiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SessionMode {
    /// Every participant plays for themselves.
    Classic,
    /// Participants are grouped into teams whose score is the sum of their members.
    Team,
}

/// Session row as stored by the session store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionEntity {
    /// Primary key of the session.
    pub id: Uuid,
    /// Quiz whose questions are played.
    pub quiz_id: Uuid,
    /// User driving the session.
    pub host_id: Uuid,
    /// Short code participants type to join.
    pub access_code: String,
    /// Mode selected by the host, unset until chosen.
    pub mode: Option<SessionMode>,
    /// Current lifecycle status.
    pub status: SessionStatus,
    /// Index into `question_order` of the current question, unset before the first question.
    pub current_question_index: Option<usize>,
    /// Ordered question identifiers, fixed when the session starts.
    pub question_order: Vec<Uuid>,
    /// Absolute end of the pre-quiz countdown (epoch milliseconds).
    pub countdown_ends_at_ms: Option<u64>,
    /// Absolute instant the current question starts accepting answers (epoch milliseconds).
    pub answers_open_at_ms: Option<u64>,
    /// Absolute deadline of the current answer window (epoch milliseconds).
    pub answer_window_deadline_ms: Option<u64>,
    /// Optimistic concurrency version, bumped by every successful write.
    pub version: u64,
    /// Creation timestamp.
    pub created_at: SystemTime,
    /// Last write timestamp.
    pub updated_at: SystemTime,
}

impl SessionEntity {
    /// Identifier of the current question, if one is set and in range.
    pub fn current_question_id(&self) -> Option<Uuid> {
        self.current_question_index
            .and_then(|index| self.question_order.get(index).copied())
    }
}

/// Participant row: one joined identity within a session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ParticipantEntity {
    /// Primary key of the participant.
    pub id: Uuid,
    /// Owning session.
    pub session_id: Uuid,
    /// User that joined.
    pub user_id: Uuid,
    /// Name shown on leaderboards.
    pub display_name: String,
    /// Team membership (team mode only).
    pub team_id: Option<Uuid>,
    /// Running score, only ever incremented.
    pub score: i64,
    /// Bumped on every mutation of the row.
    pub revision: u64,
    /// Arrival order within the session, used to break ranking ties.
    pub joined_seq: u64,
    /// Join timestamp.
    pub joined_at: SystemTime,
}

/// Team row: a named grouping of participants within a session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TeamEntity {
    /// Primary key of the team.
    pub id: Uuid,
    /// Owning session.
    pub session_id: Uuid,
    /// Display name of the team.
    pub name: String,
    /// Creation timestamp, teams are listed in creation order.
    pub created_at: SystemTime,
}

/// Answer row: one participant's response to one question.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AnswerEntity {
    /// Primary key of the answer.
    pub id: Uuid,
    /// Session the question was played in.
    pub session_id: Uuid,
    /// Participant that answered.
    pub participant_id: Uuid,
    /// Team of the participant when the answer was recorded.
    #[serde(default)]
    pub team_id: Option<Uuid>,
    /// Question answered.
    pub question_id: Uuid,
    /// Position of the question in the session order.
    pub question_index: usize,
    /// Selected option, `None` when the participant timed out.
    pub selected_option: Option<usize>,
    /// Whether the selected option is correct.
    pub is_correct: bool,
    /// Points awarded for this answer.
    pub points: i64,
    /// Time the participant needed, in milliseconds.
    pub time_taken_ms: u64,
    /// Receipt timestamp (epoch milliseconds).
    pub submitted_at_ms: u64,
}

/// One selectable option of a question.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QuestionOptionEntity {
    /// Option label.
    pub text: String,
    /// Whether picking this option is correct.
    pub is_correct: bool,
}

/// Immutable question content supplied by the authoring side.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QuestionEntity {
    /// Primary key of the question.
    pub id: Uuid,
    /// Quiz the question belongs to.
    pub quiz_id: Uuid,
    /// Position inside the quiz.
    pub position: u32,
    /// Question text.
    pub text: String,
    /// Optional media shown with the question.
    pub media_url: Option<String>,
    /// Ordered answer options.
    pub options: Vec<QuestionOptionEntity>,
    /// Length of the answer window in seconds.
    pub time_limit_secs: u32,
    /// Points for a correct answer before the speed bonus.
    pub base_points: i64,
}

impl QuestionEntity {
    /// Index of the first correct option, if any.
    pub fn correct_option(&self) -> Option<usize> {
        self.options.iter().position(|option| option.is_correct)
    }
}
