/// In-process store used by tests and single-node deployments.
pub mod memory;
/// MongoDB-backed store.
#[cfg(feature = "mongo-store")]
pub mod mongodb;

use std::sync::Arc;

use futures::{future::BoxFuture, stream::BoxStream};
use tokio::sync::broadcast::{self, error::RecvError};
use uuid::Uuid;

use crate::{
    config::StoreConfig,
    dao::{
        models::{AnswerEntity, ParticipantEntity, QuestionEntity, SessionEntity, TeamEntity},
        storage::StorageResult,
    },
};

/// Outcome of an optimistic (version-checked) write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConditionalWrite<T> {
    /// The write went through; carries the stored row.
    Applied(T),
    /// Another writer got there first.
    Stale {
        /// Version currently held by the store.
        current_version: u64,
    },
}

/// Outcome of an insert guarded by a uniqueness constraint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOutcome<T> {
    /// The row did not exist and has been stored.
    Inserted(T),
    /// A row already exists for the key; carries the existing row untouched.
    Duplicate(T),
}

/// Row change pushed to subscribers after it has been committed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreChange {
    /// Session row written.
    Session(SessionEntity),
    /// Participant row written.
    Participant(ParticipantEntity),
    /// Team row written.
    Team(TeamEntity),
    /// Answer row written.
    Answer(AnswerEntity),
}

impl StoreChange {
    /// Session the changed row belongs to.
    pub fn session_id(&self) -> Uuid {
        match self {
            StoreChange::Session(session) => session.id,
            StoreChange::Participant(participant) => participant.session_id,
            StoreChange::Team(team) => team.session_id,
            StoreChange::Answer(answer) => answer.session_id,
        }
    }
}

/// Persistence contract the live session engine relies on.
///
/// Notifications from [`SessionStore::subscribe`] may be dropped or arrive late; consumers must
/// reconcile against the read operations.
pub trait SessionStore: Send + Sync {
    /// Insert a new session row.
    fn create_session(&self, session: SessionEntity) -> BoxFuture<'static, StorageResult<()>>;
    /// Session by identifier.
    fn find_session(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<SessionEntity>>>;
    /// Session owning an access code.
    fn find_session_by_code(
        &self,
        access_code: String,
    ) -> BoxFuture<'static, StorageResult<Option<SessionEntity>>>;
    /// Replace the session row if its version still equals `expected_version`.
    fn update_session(
        &self,
        expected_version: u64,
        next: SessionEntity,
    ) -> BoxFuture<'static, StorageResult<ConditionalWrite<SessionEntity>>>;
    /// Committed changes of one session, best effort.
    fn subscribe(&self, session_id: Uuid) -> BoxStream<'static, StoreChange>;

    /// Return the participant of `user_id`, creating it on first join.
    fn join_participant(
        &self,
        session_id: Uuid,
        user_id: Uuid,
        display_name: String,
    ) -> BoxFuture<'static, StorageResult<ParticipantEntity>>;
    /// Participant by identifier.
    fn find_participant(
        &self,
        id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Option<ParticipantEntity>>>;
    /// Participants of a session in join order.
    fn list_participants(
        &self,
        session_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Vec<ParticipantEntity>>>;
    /// Atomically add `delta` to a participant score.
    fn increment_participant_score(
        &self,
        participant_id: Uuid,
        delta: i64,
    ) -> BoxFuture<'static, StorageResult<ParticipantEntity>>;

    /// Insert a new team row.
    fn create_team(&self, team: TeamEntity) -> BoxFuture<'static, StorageResult<()>>;
    /// Teams of a session in creation order.
    fn list_teams(&self, session_id: Uuid) -> BoxFuture<'static, StorageResult<Vec<TeamEntity>>>;
    /// Set or clear the team of a participant.
    fn assign_team(
        &self,
        participant_id: Uuid,
        team_id: Option<Uuid>,
    ) -> BoxFuture<'static, StorageResult<ParticipantEntity>>;
    /// Detach every participant of the session from its team, returning the updated rows.
    fn clear_team_memberships(
        &self,
        session_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Vec<ParticipantEntity>>>;

    /// Store the answer unless one exists for its (participant, question) pair.
    fn insert_answer_if_absent(
        &self,
        answer: AnswerEntity,
    ) -> BoxFuture<'static, StorageResult<InsertOutcome<AnswerEntity>>>;
    /// Answers recorded for one question of a session.
    fn list_answers(
        &self,
        session_id: Uuid,
        question_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Vec<AnswerEntity>>>;

    /// Replace the questions of a quiz.
    fn save_questions(
        &self,
        quiz_id: Uuid,
        questions: Vec<QuestionEntity>,
    ) -> BoxFuture<'static, StorageResult<()>>;
    /// Questions of a quiz ordered by position.
    fn list_questions(&self, quiz_id: Uuid)
    -> BoxFuture<'static, StorageResult<Vec<QuestionEntity>>>;

    /// Cheap round-trip telling whether the backend answers.
    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>>;
    /// Re-establish the backend connection after a failure.
    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>>;
}

/// Turn a store-wide change receiver into the stream of one session's changes.
pub(crate) fn session_changes(
    mut receiver: broadcast::Receiver<StoreChange>,
    session_id: Uuid,
) -> BoxStream<'static, StoreChange> {
    Box::pin(async_stream::stream! {
        loop {
            match receiver.recv().await {
                Ok(change) if change.session_id() == session_id => yield change,
                Ok(_) => continue,
                // Dropped notifications are recovered by the poll fallback.
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            }
        }
    })
}

/// Open the backend selected by the configuration.
pub async fn open_store(config: &StoreConfig) -> StorageResult<Arc<dyn SessionStore>> {
    match config {
        StoreConfig::Memory => Ok(Arc::new(memory::MemorySessionStore::new())),
        #[cfg(feature = "mongo-store")]
        StoreConfig::Mongo { uri, database } => {
            let config = mongodb::MongoConfig::from_uri(uri, database.as_deref()).await?;
            let store = mongodb::MongoSessionStore::connect(config).await?;
            Ok(Arc::new(store))
        }
        #[cfg(not(feature = "mongo-store"))]
        StoreConfig::Mongo { .. } => Err(crate::dao::storage::StorageError::unavailable(
            "MongoDB backend requested but the `mongo-store` feature is disabled".into(),
            std::io::Error::other("mongo-store feature disabled"),
        )),
    }
}
