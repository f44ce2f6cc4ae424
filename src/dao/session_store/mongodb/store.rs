use std::{sync::Arc, time::SystemTime};

use futures::{TryStreamExt, future::BoxFuture, stream::BoxStream};
use mongodb::{
    Client, Collection, Database, IndexModel,
    bson::{Bson, Document, doc},
    options::{IndexOptions, ReturnDocument},
};
use serde::{Serialize, de::DeserializeOwned};
use tokio::sync::{RwLock, broadcast};
use tracing::debug;
use uuid::Uuid;

use super::{
    config::MongoConfig,
    connection::open_database,
    error::{MongoDaoError, MongoResult, is_duplicate_key},
    models::{
        ANSWER_COLLECTION, COUNTER_COLLECTION, MongoAnswerDocument, MongoParticipantDocument,
        MongoQuestionDocument, MongoSessionDocument, MongoTeamDocument, PARTICIPANT_COLLECTION,
        QUESTION_COLLECTION, SESSION_COLLECTION, TEAM_COLLECTION, doc_id,
    },
};
use crate::dao::{
    models::{AnswerEntity, ParticipantEntity, QuestionEntity, SessionEntity, TeamEntity},
    session_store::{ConditionalWrite, InsertOutcome, SessionStore, StoreChange, session_changes},
    storage::StorageResult,
};

const CHANGE_BUFFER: usize = 1024;

/// Session store backed by MongoDB.
///
/// Change notifications are fanned out in-process after each committed write.
#[derive(Clone)]
pub struct MongoSessionStore {
    inner: Arc<MongoInner>,
}

struct MongoInner {
    state: RwLock<MongoState>,
    config: MongoConfig,
    changes: broadcast::Sender<StoreChange>,
}

struct MongoState {
    // Held so the driver pool lives as long as the database handle.
    _client: Client,
    database: Database,
}

impl MongoInner {
    async fn ping(&self) -> MongoResult<()> {
        let database = self.state.read().await.database.clone();
        database
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|source| MongoDaoError::HealthPing { source })?;
        Ok(())
    }

    async fn reconnect(&self) -> MongoResult<()> {
        let (client, database) = open_database(&self.config).await?;
        let mut guard = self.state.write().await;
        guard._client = client;
        guard.database = database;
        Ok(())
    }
}

impl MongoSessionStore {
    /// Connect to MongoDB and make sure the uniqueness indexes exist.
    pub async fn connect(config: MongoConfig) -> MongoResult<Self> {
        let (client, database) = open_database(&config).await?;
        let (changes, _) = broadcast::channel(CHANGE_BUFFER);

        let store = Self {
            inner: Arc::new(MongoInner {
                state: RwLock::new(MongoState {
                    _client: client,
                    database,
                }),
                config,
                changes,
            }),
        };
        store.ensure_indexes().await?;
        Ok(store)
    }

    async fn ensure_indexes(&self) -> MongoResult<()> {
        let indexes: [(&'static str, &'static str, Document, bool); 6] = [
            (SESSION_COLLECTION, "session_access_code_idx", doc! { "access_code": 1 }, true),
            (
                PARTICIPANT_COLLECTION,
                "participant_session_user_idx",
                doc! { "session_id": 1, "user_id": 1 },
                true,
            ),
            (
                PARTICIPANT_COLLECTION,
                "participant_join_order_idx",
                doc! { "session_id": 1, "joined_seq": 1 },
                false,
            ),
            (
                ANSWER_COLLECTION,
                "answer_participant_question_idx",
                doc! { "participant_id": 1, "question_id": 1 },
                true,
            ),
            (TEAM_COLLECTION, "team_session_idx", doc! { "session_id": 1 }, false),
            (
                QUESTION_COLLECTION,
                "question_quiz_position_idx",
                doc! { "quiz_id": 1, "position": 1 },
                false,
            ),
        ];

        let database = self.database().await;
        for (collection, index, keys, unique) in indexes {
            let model = IndexModel::builder()
                .keys(keys)
                .options(
                    IndexOptions::builder()
                        .name(Some(index.to_owned()))
                        .unique(Some(unique))
                        .build(),
                )
                .build();

            database
                .collection::<Document>(collection)
                .create_index(model)
                .await
                .map_err(|source| MongoDaoError::EnsureIndex {
                    collection,
                    index,
                    source,
                })?;
        }
        Ok(())
    }

    async fn database(&self) -> Database {
        self.inner.state.read().await.database.clone()
    }

    async fn collection<T>(&self, name: &'static str) -> Collection<T>
    where
        T: Serialize + DeserializeOwned + Send + Sync,
    {
        self.database().await.collection::<T>(name)
    }

    fn publish(&self, change: StoreChange) {
        // No subscriber is not an error.
        let _ = self.inner.changes.send(change);
    }

    async fn next_join_seq(&self, session_id: Uuid) -> MongoResult<u64> {
        let counters = self.collection::<Document>(COUNTER_COLLECTION).await;
        let counter = counters
            .find_one_and_update(
                doc! { "_id": format!("participants:{session_id}") },
                doc! { "$inc": { "seq": 1_i64 } },
            )
            .upsert(true)
            .return_document(ReturnDocument::After)
            .await
            .map_err(MongoDaoError::command("next_join_seq", COUNTER_COLLECTION))?;

        let seq = counter
            .and_then(|document| document.get_i64("seq").ok())
            .unwrap_or(1);
        Ok(u64::try_from(seq).unwrap_or_default())
    }

    async fn create_session(&self, session: SessionEntity) -> MongoResult<()> {
        let collection = self
            .collection::<MongoSessionDocument>(SESSION_COLLECTION)
            .await;
        collection
            .insert_one(MongoSessionDocument::from(session.clone()))
            .await
            .map_err(MongoDaoError::command("create_session", SESSION_COLLECTION))?;
        self.publish(StoreChange::Session(session));
        Ok(())
    }

    async fn find_session_where(&self, filter: Document) -> MongoResult<Option<SessionEntity>> {
        let collection = self
            .collection::<MongoSessionDocument>(SESSION_COLLECTION)
            .await;
        collection
            .find_one(filter)
            .await
            .map_err(MongoDaoError::command("find_session", SESSION_COLLECTION))?
            .map(SessionEntity::try_from)
            .transpose()
    }

    async fn update_session(
        &self,
        expected_version: u64,
        mut next: SessionEntity,
    ) -> MongoResult<ConditionalWrite<SessionEntity>> {
        let id = next.id;
        next.version = expected_version + 1;
        next.updated_at = SystemTime::now();

        let collection = self
            .collection::<MongoSessionDocument>(SESSION_COLLECTION)
            .await;
        let replaced = collection
            .find_one_and_replace(
                doc! { "_id": id.to_string(), "version": expected_version as i64 },
                MongoSessionDocument::from(next),
            )
            .return_document(ReturnDocument::After)
            .await
            .map_err(MongoDaoError::command("update_session", SESSION_COLLECTION))?;

        match replaced {
            Some(document) => {
                let stored = SessionEntity::try_from(document)?;
                self.publish(StoreChange::Session(stored.clone()));
                Ok(ConditionalWrite::Applied(stored))
            }
            None => match self.find_session_where(doc_id(id)).await? {
                Some(current) => {
                    debug!(session_id = %id, expected_version, current_version = current.version, "stale session write");
                    Ok(ConditionalWrite::Stale {
                        current_version: current.version,
                    })
                }
                None => Err(MongoDaoError::Missing { kind: "session", id }),
            },
        }
    }

    async fn find_participant_where(
        &self,
        filter: Document,
    ) -> MongoResult<Option<ParticipantEntity>> {
        let collection = self
            .collection::<MongoParticipantDocument>(PARTICIPANT_COLLECTION)
            .await;
        collection
            .find_one(filter)
            .await
            .map_err(MongoDaoError::command("find_participant", PARTICIPANT_COLLECTION))?
            .map(ParticipantEntity::try_from)
            .transpose()
    }

    async fn join_participant(
        &self,
        session_id: Uuid,
        user_id: Uuid,
        display_name: String,
    ) -> MongoResult<ParticipantEntity> {
        let identity = doc! {
            "session_id": session_id.to_string(),
            "user_id": user_id.to_string(),
        };
        if let Some(existing) = self.find_participant_where(identity.clone()).await? {
            return Ok(existing);
        }

        let participant = ParticipantEntity {
            id: Uuid::new_v4(),
            session_id,
            user_id,
            display_name,
            team_id: None,
            score: 0,
            revision: 0,
            joined_seq: self.next_join_seq(session_id).await?,
            joined_at: SystemTime::now(),
        };

        let collection = self
            .collection::<MongoParticipantDocument>(PARTICIPANT_COLLECTION)
            .await;
        match collection
            .insert_one(MongoParticipantDocument::from(participant.clone()))
            .await
        {
            Ok(_) => {
                self.publish(StoreChange::Participant(participant.clone()));
                Ok(participant)
            }
            // A concurrent join of the same user won the unique index.
            Err(err) if is_duplicate_key(&err) => self
                .find_participant_where(identity)
                .await?
                .ok_or(MongoDaoError::Missing {
                    kind: "participant",
                    id: user_id,
                }),
            Err(source) => Err(MongoDaoError::Command {
                operation: "join_participant",
                collection: PARTICIPANT_COLLECTION,
                source,
            }),
        }
    }

    async fn list_participants(&self, session_id: Uuid) -> MongoResult<Vec<ParticipantEntity>> {
        let collection = self
            .collection::<MongoParticipantDocument>(PARTICIPANT_COLLECTION)
            .await;
        let documents: Vec<MongoParticipantDocument> = collection
            .find(doc! { "session_id": session_id.to_string() })
            .sort(doc! { "joined_seq": 1 })
            .await
            .map_err(MongoDaoError::command("list_participants", PARTICIPANT_COLLECTION))?
            .try_collect()
            .await
            .map_err(MongoDaoError::command("list_participants", PARTICIPANT_COLLECTION))?;

        documents
            .into_iter()
            .map(ParticipantEntity::try_from)
            .collect()
    }

    async fn update_participant(
        &self,
        participant_id: Uuid,
        update: Document,
        operation: &'static str,
    ) -> MongoResult<ParticipantEntity> {
        let collection = self
            .collection::<MongoParticipantDocument>(PARTICIPANT_COLLECTION)
            .await;
        let document = collection
            .find_one_and_update(doc_id(participant_id), update)
            .return_document(ReturnDocument::After)
            .await
            .map_err(MongoDaoError::command(operation, PARTICIPANT_COLLECTION))?
            .ok_or(MongoDaoError::Missing {
                kind: "participant",
                id: participant_id,
            })?;

        let participant = ParticipantEntity::try_from(document)?;
        self.publish(StoreChange::Participant(participant.clone()));
        Ok(participant)
    }

    async fn clear_team_memberships(&self, session_id: Uuid) -> MongoResult<Vec<ParticipantEntity>> {
        let filter = doc! {
            "session_id": session_id.to_string(),
            "team_id": { "$ne": Bson::Null },
        };
        let collection = self
            .collection::<MongoParticipantDocument>(PARTICIPANT_COLLECTION)
            .await;
        let members: Vec<MongoParticipantDocument> = collection
            .find(filter.clone())
            .await
            .map_err(MongoDaoError::command("clear_team_memberships", PARTICIPANT_COLLECTION))?
            .try_collect()
            .await
            .map_err(MongoDaoError::command("clear_team_memberships", PARTICIPANT_COLLECTION))?;

        let mut cleared = Vec::with_capacity(members.len());
        for member in members {
            let id = ParticipantEntity::try_from(member)?.id;
            let participant = self
                .update_participant(
                    id,
                    doc! { "$set": { "team_id": Bson::Null }, "$inc": { "revision": 1_i64 } },
                    "clear_team_memberships",
                )
                .await?;
            cleared.push(participant);
        }
        Ok(cleared)
    }

    async fn list_teams(&self, session_id: Uuid) -> MongoResult<Vec<TeamEntity>> {
        let collection = self.collection::<MongoTeamDocument>(TEAM_COLLECTION).await;
        let documents: Vec<MongoTeamDocument> = collection
            .find(doc! { "session_id": session_id.to_string() })
            .sort(doc! { "created_at": 1 })
            .await
            .map_err(MongoDaoError::command("list_teams", TEAM_COLLECTION))?
            .try_collect()
            .await
            .map_err(MongoDaoError::command("list_teams", TEAM_COLLECTION))?;

        documents.into_iter().map(TeamEntity::try_from).collect()
    }

    async fn insert_answer_if_absent(
        &self,
        answer: AnswerEntity,
    ) -> MongoResult<InsertOutcome<AnswerEntity>> {
        let collection = self
            .collection::<MongoAnswerDocument>(ANSWER_COLLECTION)
            .await;
        match collection
            .insert_one(MongoAnswerDocument::from(answer.clone()))
            .await
        {
            Ok(_) => {
                self.publish(StoreChange::Answer(answer.clone()));
                Ok(InsertOutcome::Inserted(answer))
            }
            Err(err) if is_duplicate_key(&err) => {
                let existing = collection
                    .find_one(doc! {
                        "participant_id": answer.participant_id.to_string(),
                        "question_id": answer.question_id.to_string(),
                    })
                    .await
                    .map_err(MongoDaoError::command("insert_answer", ANSWER_COLLECTION))?
                    .ok_or(MongoDaoError::Missing {
                        kind: "answer",
                        id: answer.id,
                    })?;
                Ok(InsertOutcome::Duplicate(AnswerEntity::try_from(existing)?))
            }
            Err(source) => Err(MongoDaoError::Command {
                operation: "insert_answer",
                collection: ANSWER_COLLECTION,
                source,
            }),
        }
    }

    async fn list_answers(&self, session_id: Uuid, question_id: Uuid) -> MongoResult<Vec<AnswerEntity>> {
        let collection = self
            .collection::<MongoAnswerDocument>(ANSWER_COLLECTION)
            .await;
        let documents: Vec<MongoAnswerDocument> = collection
            .find(doc! {
                "session_id": session_id.to_string(),
                "question_id": question_id.to_string(),
            })
            .sort(doc! { "submitted_at_ms": 1 })
            .await
            .map_err(MongoDaoError::command("list_answers", ANSWER_COLLECTION))?
            .try_collect()
            .await
            .map_err(MongoDaoError::command("list_answers", ANSWER_COLLECTION))?;

        documents.into_iter().map(AnswerEntity::try_from).collect()
    }

    async fn save_questions(&self, questions: Vec<QuestionEntity>) -> MongoResult<()> {
        let collection = self
            .collection::<MongoQuestionDocument>(QUESTION_COLLECTION)
            .await;
        for question in questions {
            collection
                .replace_one(doc_id(question.id), MongoQuestionDocument::from(question))
                .upsert(true)
                .await
                .map_err(MongoDaoError::command("save_questions", QUESTION_COLLECTION))?;
        }
        Ok(())
    }

    async fn list_questions(&self, quiz_id: Uuid) -> MongoResult<Vec<QuestionEntity>> {
        let collection = self
            .collection::<MongoQuestionDocument>(QUESTION_COLLECTION)
            .await;
        let documents: Vec<MongoQuestionDocument> = collection
            .find(doc! { "quiz_id": quiz_id.to_string() })
            .sort(doc! { "position": 1 })
            .await
            .map_err(MongoDaoError::command("list_questions", QUESTION_COLLECTION))?
            .try_collect()
            .await
            .map_err(MongoDaoError::command("list_questions", QUESTION_COLLECTION))?;

        documents.into_iter().map(QuestionEntity::try_from).collect()
    }
}

impl SessionStore for MongoSessionStore {
    fn create_session(&self, session: SessionEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.create_session(session).await.map_err(Into::into) })
    }

    fn find_session(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<SessionEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.find_session_where(doc_id(id)).await.map_err(Into::into) })
    }

    fn find_session_by_code(
        &self,
        access_code: String,
    ) -> BoxFuture<'static, StorageResult<Option<SessionEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .find_session_where(doc! { "access_code": access_code })
                .await
                .map_err(Into::into)
        })
    }

    fn update_session(
        &self,
        expected_version: u64,
        next: SessionEntity,
    ) -> BoxFuture<'static, StorageResult<ConditionalWrite<SessionEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .update_session(expected_version, next)
                .await
                .map_err(Into::into)
        })
    }

    fn subscribe(&self, session_id: Uuid) -> BoxStream<'static, StoreChange> {
        session_changes(self.inner.changes.subscribe(), session_id)
    }

    fn join_participant(
        &self,
        session_id: Uuid,
        user_id: Uuid,
        display_name: String,
    ) -> BoxFuture<'static, StorageResult<ParticipantEntity>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .join_participant(session_id, user_id, display_name)
                .await
                .map_err(Into::into)
        })
    }

    fn find_participant(
        &self,
        id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Option<ParticipantEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .find_participant_where(doc_id(id))
                .await
                .map_err(Into::into)
        })
    }

    fn list_participants(
        &self,
        session_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Vec<ParticipantEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.list_participants(session_id).await.map_err(Into::into) })
    }

    fn increment_participant_score(
        &self,
        participant_id: Uuid,
        delta: i64,
    ) -> BoxFuture<'static, StorageResult<ParticipantEntity>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .update_participant(
                    participant_id,
                    doc! { "$inc": { "score": delta, "revision": 1_i64 } },
                    "increment_participant_score",
                )
                .await
                .map_err(Into::into)
        })
    }

    fn create_team(&self, team: TeamEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            let collection = store.collection::<MongoTeamDocument>(TEAM_COLLECTION).await;
            collection
                .insert_one(MongoTeamDocument::from(team.clone()))
                .await
                .map_err(MongoDaoError::command("create_team", TEAM_COLLECTION))?;
            store.publish(StoreChange::Team(team));
            Ok(())
        })
    }

    fn list_teams(&self, session_id: Uuid) -> BoxFuture<'static, StorageResult<Vec<TeamEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.list_teams(session_id).await.map_err(Into::into) })
    }

    fn assign_team(
        &self,
        participant_id: Uuid,
        team_id: Option<Uuid>,
    ) -> BoxFuture<'static, StorageResult<ParticipantEntity>> {
        let store = self.clone();
        Box::pin(async move {
            let team = team_id.map(|id| id.to_string());
            store
                .update_participant(
                    participant_id,
                    doc! { "$set": { "team_id": team }, "$inc": { "revision": 1_i64 } },
                    "assign_team",
                )
                .await
                .map_err(Into::into)
        })
    }

    fn clear_team_memberships(
        &self,
        session_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Vec<ParticipantEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .clear_team_memberships(session_id)
                .await
                .map_err(Into::into)
        })
    }

    fn insert_answer_if_absent(
        &self,
        answer: AnswerEntity,
    ) -> BoxFuture<'static, StorageResult<InsertOutcome<AnswerEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.insert_answer_if_absent(answer).await.map_err(Into::into) })
    }

    fn list_answers(
        &self,
        session_id: Uuid,
        question_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Vec<AnswerEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .list_answers(session_id, question_id)
                .await
                .map_err(Into::into)
        })
    }

    fn save_questions(
        &self,
        _quiz_id: Uuid,
        questions: Vec<QuestionEntity>,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.save_questions(questions).await.map_err(Into::into) })
    }

    fn list_questions(
        &self,
        quiz_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Vec<QuestionEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.list_questions(quiz_id).await.map_err(Into::into) })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.inner.ping().await.map_err(Into::into) })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.inner.reconnect().await.map_err(Into::into) })
    }
}
