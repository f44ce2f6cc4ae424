use mongodb::bson::{DateTime, Document, doc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::MongoDaoError;
use crate::dao::models::{
    AnswerEntity, ParticipantEntity, QuestionEntity, QuestionOptionEntity, SessionEntity,
    SessionMode, SessionStatus, TeamEntity,
};

pub const SESSION_COLLECTION: &str = "sessions";
pub const PARTICIPANT_COLLECTION: &str = "participants";
pub const TEAM_COLLECTION: &str = "teams";
pub const ANSWER_COLLECTION: &str = "answers";
pub const QUESTION_COLLECTION: &str = "questions";
pub const COUNTER_COLLECTION: &str = "counters";

// Identifiers are stored as hyphenated strings and counters as i64 so documents stay readable
// from the mongo shell.

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoSessionDocument {
    #[serde(rename = "_id")]
    pub id: String,
    pub quiz_id: String,
    pub host_id: String,
    pub access_code: String,
    pub mode: Option<SessionMode>,
    pub status: SessionStatus,
    pub current_question_index: Option<i64>,
    pub question_order: Vec<String>,
    pub countdown_ends_at_ms: Option<i64>,
    pub answers_open_at_ms: Option<i64>,
    pub answer_window_deadline_ms: Option<i64>,
    pub version: i64,
    pub created_at: DateTime,
    pub updated_at: DateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoParticipantDocument {
    #[serde(rename = "_id")]
    pub id: String,
    pub session_id: String,
    pub user_id: String,
    pub display_name: String,
    pub team_id: Option<String>,
    pub score: i64,
    pub revision: i64,
    pub joined_seq: i64,
    pub joined_at: DateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoTeamDocument {
    #[serde(rename = "_id")]
    pub id: String,
    pub session_id: String,
    pub name: String,
    pub created_at: DateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoAnswerDocument {
    #[serde(rename = "_id")]
    pub id: String,
    pub session_id: String,
    pub participant_id: String,
    #[serde(default)]
    pub team_id: Option<String>,
    pub question_id: String,
    pub question_index: i64,
    pub selected_option: Option<i64>,
    pub is_correct: bool,
    pub points: i64,
    pub time_taken_ms: i64,
    pub submitted_at_ms: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoQuestionDocument {
    #[serde(rename = "_id")]
    pub id: String,
    pub quiz_id: String,
    pub position: i64,
    pub text: String,
    pub media_url: Option<String>,
    pub options: Vec<QuestionOptionEntity>,
    pub time_limit_secs: i64,
    pub base_points: i64,
}

pub fn doc_id(id: Uuid) -> Document {
    doc! { "_id": id.to_string() }
}

fn parse_id(collection: &'static str, owner: &str, raw: &str) -> Result<Uuid, MongoDaoError> {
    Uuid::parse_str(raw).map_err(|err| MongoDaoError::MalformedDocument {
        collection,
        id: owner.to_owned(),
        reason: format!("invalid uuid `{raw}`: {err}"),
    })
}

fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn to_u64(value: i64) -> u64 {
    u64::try_from(value).unwrap_or_default()
}

impl From<SessionEntity> for MongoSessionDocument {
    fn from(value: SessionEntity) -> Self {
        Self {
            id: value.id.to_string(),
            quiz_id: value.quiz_id.to_string(),
            host_id: value.host_id.to_string(),
            access_code: value.access_code,
            mode: value.mode,
            status: value.status,
            current_question_index: value.current_question_index.map(|index| index as i64),
            question_order: value.question_order.iter().map(Uuid::to_string).collect(),
            countdown_ends_at_ms: value.countdown_ends_at_ms.map(to_i64),
            answers_open_at_ms: value.answers_open_at_ms.map(to_i64),
            answer_window_deadline_ms: value.answer_window_deadline_ms.map(to_i64),
            version: to_i64(value.version),
            created_at: DateTime::from_system_time(value.created_at),
            updated_at: DateTime::from_system_time(value.updated_at),
        }
    }
}

impl TryFrom<MongoSessionDocument> for SessionEntity {
    type Error = MongoDaoError;

    fn try_from(value: MongoSessionDocument) -> Result<Self, Self::Error> {
        let owner = value.id.as_str();
        let question_order = value
            .question_order
            .iter()
            .map(|raw| parse_id(SESSION_COLLECTION, owner, raw))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            id: parse_id(SESSION_COLLECTION, owner, &value.id)?,
            quiz_id: parse_id(SESSION_COLLECTION, owner, &value.quiz_id)?,
            host_id: parse_id(SESSION_COLLECTION, owner, &value.host_id)?,
            access_code: value.access_code,
            mode: value.mode,
            status: value.status,
            current_question_index: value
                .current_question_index
                .and_then(|index| usize::try_from(index).ok()),
            question_order,
            countdown_ends_at_ms: value.countdown_ends_at_ms.map(to_u64),
            answers_open_at_ms: value.answers_open_at_ms.map(to_u64),
            answer_window_deadline_ms: value.answer_window_deadline_ms.map(to_u64),
            version: to_u64(value.version),
            created_at: value.created_at.to_system_time(),
            updated_at: value.updated_at.to_system_time(),
        })
    }
}

impl From<ParticipantEntity> for MongoParticipantDocument {
    fn from(value: ParticipantEntity) -> Self {
        Self {
            id: value.id.to_string(),
            session_id: value.session_id.to_string(),
            user_id: value.user_id.to_string(),
            display_name: value.display_name,
            team_id: value.team_id.map(|id| id.to_string()),
            score: value.score,
            revision: to_i64(value.revision),
            joined_seq: to_i64(value.joined_seq),
            joined_at: DateTime::from_system_time(value.joined_at),
        }
    }
}

impl TryFrom<MongoParticipantDocument> for ParticipantEntity {
    type Error = MongoDaoError;

    fn try_from(value: MongoParticipantDocument) -> Result<Self, Self::Error> {
        let owner = value.id.as_str();
        let team_id = value
            .team_id
            .as_deref()
            .map(|raw| parse_id(PARTICIPANT_COLLECTION, owner, raw))
            .transpose()?;

        Ok(Self {
            id: parse_id(PARTICIPANT_COLLECTION, owner, &value.id)?,
            session_id: parse_id(PARTICIPANT_COLLECTION, owner, &value.session_id)?,
            user_id: parse_id(PARTICIPANT_COLLECTION, owner, &value.user_id)?,
            display_name: value.display_name,
            team_id,
            score: value.score,
            revision: to_u64(value.revision),
            joined_seq: to_u64(value.joined_seq),
            joined_at: value.joined_at.to_system_time(),
        })
    }
}

impl From<TeamEntity> for MongoTeamDocument {
    fn from(value: TeamEntity) -> Self {
        Self {
            id: value.id.to_string(),
            session_id: value.session_id.to_string(),
            name: value.name,
            created_at: DateTime::from_system_time(value.created_at),
        }
    }
}

impl TryFrom<MongoTeamDocument> for TeamEntity {
    type Error = MongoDaoError;

    fn try_from(value: MongoTeamDocument) -> Result<Self, Self::Error> {
        Ok(Self {
            id: parse_id(TEAM_COLLECTION, &value.id, &value.id)?,
            session_id: parse_id(TEAM_COLLECTION, &value.id, &value.session_id)?,
            name: value.name,
            created_at: value.created_at.to_system_time(),
        })
    }
}

impl From<AnswerEntity> for MongoAnswerDocument {
    fn from(value: AnswerEntity) -> Self {
        Self {
            id: value.id.to_string(),
            session_id: value.session_id.to_string(),
            participant_id: value.participant_id.to_string(),
            team_id: value.team_id.map(|id| id.to_string()),
            question_id: value.question_id.to_string(),
            question_index: value.question_index as i64,
            selected_option: value.selected_option.map(|option| option as i64),
            is_correct: value.is_correct,
            points: value.points,
            time_taken_ms: to_i64(value.time_taken_ms),
            submitted_at_ms: to_i64(value.submitted_at_ms),
        }
    }
}

impl TryFrom<MongoAnswerDocument> for AnswerEntity {
    type Error = MongoDaoError;

    fn try_from(value: MongoAnswerDocument) -> Result<Self, Self::Error> {
        let owner = value.id.as_str();
        Ok(Self {
            id: parse_id(ANSWER_COLLECTION, owner, &value.id)?,
            session_id: parse_id(ANSWER_COLLECTION, owner, &value.session_id)?,
            participant_id: parse_id(ANSWER_COLLECTION, owner, &value.participant_id)?,
            team_id: value
                .team_id
                .as_deref()
                .map(|raw| parse_id(ANSWER_COLLECTION, owner, raw))
                .transpose()?,
            question_id: parse_id(ANSWER_COLLECTION, owner, &value.question_id)?,
            question_index: usize::try_from(value.question_index).unwrap_or_default(),
            selected_option: value
                .selected_option
                .and_then(|option| usize::try_from(option).ok()),
            is_correct: value.is_correct,
            points: value.points,
            time_taken_ms: to_u64(value.time_taken_ms),
            submitted_at_ms: to_u64(value.submitted_at_ms),
        })
    }
}

impl From<QuestionEntity> for MongoQuestionDocument {
    fn from(value: QuestionEntity) -> Self {
        Self {
            id: value.id.to_string(),
            quiz_id: value.quiz_id.to_string(),
            position: i64::from(value.position),
            text: value.text,
            media_url: value.media_url,
            options: value.options,
            time_limit_secs: i64::from(value.time_limit_secs),
            base_points: value.base_points,
        }
    }
}

impl TryFrom<MongoQuestionDocument> for QuestionEntity {
    type Error = MongoDaoError;

    fn try_from(value: MongoQuestionDocument) -> Result<Self, Self::Error> {
        let owner = value.id.as_str();
        Ok(Self {
            id: parse_id(QUESTION_COLLECTION, owner, &value.id)?,
            quiz_id: parse_id(QUESTION_COLLECTION, owner, &value.quiz_id)?,
            position: u32::try_from(value.position).unwrap_or_default(),
            text: value.text,
            media_url: value.media_url,
            options: value.options,
            time_limit_secs: u32::try_from(value.time_limit_secs).unwrap_or_default(),
            base_points: value.base_points,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, UNIX_EPOCH};

    use super::*;

    #[test]
    fn session_document_keeps_every_field() {
        let created = UNIX_EPOCH + Duration::from_millis(1_700_000_000_000);
        let entity = SessionEntity {
            id: Uuid::new_v4(),
            quiz_id: Uuid::new_v4(),
            host_id: Uuid::new_v4(),
            access_code: "K7QX2M".into(),
            mode: Some(SessionMode::Team),
            status: SessionStatus::QuestionActive,
            current_question_index: Some(2),
            question_order: vec![Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4()],
            countdown_ends_at_ms: Some(1_700_000_005_000),
            answers_open_at_ms: Some(1_700_000_010_000),
            answer_window_deadline_ms: Some(1_700_000_030_000),
            version: 7,
            created_at: created,
            updated_at: created,
        };

        let document = MongoSessionDocument::from(entity.clone());
        assert_eq!(document.id, entity.id.to_string());
        let back = SessionEntity::try_from(document).unwrap();
        assert_eq!(back, entity);
    }

    #[test]
    fn malformed_identifier_is_reported() {
        let document = MongoTeamDocument {
            id: "not-a-uuid".into(),
            session_id: Uuid::new_v4().to_string(),
            name: "Owls".into(),
            created_at: DateTime::now(),
        };

        let err = TeamEntity::try_from(document).unwrap_err();
        assert!(matches!(
            err,
            MongoDaoError::MalformedDocument { collection: TEAM_COLLECTION, .. }
        ));
    }
}
