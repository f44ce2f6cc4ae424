//! In-process session store used for single-node deployments and tests.

use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::SystemTime,
};

use dashmap::{DashMap, mapref::entry::Entry};
use futures::{
    FutureExt,
    future::{BoxFuture, ready},
    stream::BoxStream,
};
use tokio::sync::broadcast;
use uuid::Uuid;

use super::{ConditionalWrite, InsertOutcome, SessionStore, StoreChange, session_changes};
use crate::dao::{
    models::{AnswerEntity, ParticipantEntity, QuestionEntity, SessionEntity, TeamEntity},
    storage::{StorageError, StorageResult},
};

const CHANGE_CAPACITY: usize = 256;

/// [`SessionStore`] keeping every row in concurrent maps.
#[derive(Clone)]
pub struct MemorySessionStore {
    inner: Arc<MemoryInner>,
}

struct MemoryInner {
    sessions: DashMap<Uuid, SessionEntity>,
    participants: DashMap<Uuid, ParticipantEntity>,
    memberships: DashMap<(Uuid, Uuid), Uuid>,
    teams: DashMap<Uuid, TeamEntity>,
    answers: DashMap<(Uuid, Uuid), AnswerEntity>,
    questions: DashMap<Uuid, Vec<QuestionEntity>>,
    join_seq: AtomicU64,
    changes: broadcast::Sender<StoreChange>,
}

impl Default for MemorySessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySessionStore {
    /// Create an empty store.
    pub fn new() -> Self {
        let (changes, _rx) = broadcast::channel(CHANGE_CAPACITY);
        Self {
            inner: Arc::new(MemoryInner {
                sessions: DashMap::new(),
                participants: DashMap::new(),
                memberships: DashMap::new(),
                teams: DashMap::new(),
                answers: DashMap::new(),
                questions: DashMap::new(),
                join_seq: AtomicU64::new(0),
                changes,
            }),
        }
    }
}

impl MemoryInner {
    fn notify(&self, change: StoreChange) {
        let _ = self.changes.send(change);
    }

    fn update_session(
        &self,
        expected_version: u64,
        mut next: SessionEntity,
    ) -> StorageResult<ConditionalWrite<SessionEntity>> {
        let stored = {
            let Some(mut row) = self.sessions.get_mut(&next.id) else {
                return Err(StorageError::not_found("session", next.id));
            };
            if row.version != expected_version {
                return Ok(ConditionalWrite::Stale {
                    current_version: row.version,
                });
            }
            next.version = expected_version + 1;
            next.updated_at = SystemTime::now();
            *row = next;
            row.clone()
        };

        self.notify(StoreChange::Session(stored.clone()));
        Ok(ConditionalWrite::Applied(stored))
    }

    fn join_participant(
        &self,
        session_id: Uuid,
        user_id: Uuid,
        display_name: String,
    ) -> StorageResult<ParticipantEntity> {
        if !self.sessions.contains_key(&session_id) {
            return Err(StorageError::not_found("session", session_id));
        }

        let created = match self.memberships.entry((session_id, user_id)) {
            Entry::Occupied(existing) => {
                let id = *existing.get();
                return self
                    .participants
                    .get(&id)
                    .map(|row| row.clone())
                    .ok_or_else(|| StorageError::not_found("participant", id));
            }
            Entry::Vacant(slot) => {
                let participant = ParticipantEntity {
                    id: Uuid::new_v4(),
                    session_id,
                    user_id,
                    display_name,
                    team_id: None,
                    score: 0,
                    revision: 0,
                    joined_seq: self.join_seq.fetch_add(1, Ordering::SeqCst),
                    joined_at: SystemTime::now(),
                };
                self.participants
                    .insert(participant.id, participant.clone());
                slot.insert(participant.id);
                participant
            }
        };

        self.notify(StoreChange::Participant(created.clone()));
        Ok(created)
    }

    fn mutate_participant(
        &self,
        participant_id: Uuid,
        mutate: impl FnOnce(&mut ParticipantEntity),
    ) -> StorageResult<ParticipantEntity> {
        let updated = {
            let Some(mut row) = self.participants.get_mut(&participant_id) else {
                return Err(StorageError::not_found("participant", participant_id));
            };
            mutate(row.value_mut());
            row.revision += 1;
            row.clone()
        };

        self.notify(StoreChange::Participant(updated.clone()));
        Ok(updated)
    }

    fn list_participants(&self, session_id: Uuid) -> Vec<ParticipantEntity> {
        let mut participants: Vec<ParticipantEntity> = self
            .participants
            .iter()
            .filter(|row| row.session_id == session_id)
            .map(|row| row.clone())
            .collect();
        participants.sort_by_key(|participant| participant.joined_seq);
        participants
    }

    fn clear_team_memberships(&self, session_id: Uuid) -> Vec<ParticipantEntity> {
        let mut cleared = Vec::new();
        for mut row in self.participants.iter_mut() {
            if row.session_id == session_id && row.team_id.is_some() {
                row.team_id = None;
                row.revision += 1;
                cleared.push(row.clone());
            }
        }

        for participant in &cleared {
            self.notify(StoreChange::Participant(participant.clone()));
        }
        cleared
    }

    fn insert_answer_if_absent(&self, answer: AnswerEntity) -> InsertOutcome<AnswerEntity> {
        let outcome = match self
            .answers
            .entry((answer.participant_id, answer.question_id))
        {
            Entry::Occupied(existing) => InsertOutcome::Duplicate(existing.get().clone()),
            Entry::Vacant(slot) => {
                slot.insert(answer.clone());
                InsertOutcome::Inserted(answer)
            }
        };

        if let InsertOutcome::Inserted(stored) = &outcome {
            self.notify(StoreChange::Answer(stored.clone()));
        }
        outcome
    }

    fn list_answers(&self, session_id: Uuid, question_id: Uuid) -> Vec<AnswerEntity> {
        let mut answers: Vec<AnswerEntity> = self
            .answers
            .iter()
            .filter(|row| row.session_id == session_id && row.question_id == question_id)
            .map(|row| row.clone())
            .collect();
        answers.sort_by_key(|answer| answer.submitted_at_ms);
        answers
    }
}

impl SessionStore for MemorySessionStore {
    fn create_session(&self, session: SessionEntity) -> BoxFuture<'static, StorageResult<()>> {
        self.inner.sessions.insert(session.id, session.clone());
        self.inner.notify(StoreChange::Session(session));
        ready(Ok(())).boxed()
    }

    fn find_session(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<SessionEntity>>> {
        let found = self.inner.sessions.get(&id).map(|row| row.clone());
        ready(Ok(found)).boxed()
    }

    fn find_session_by_code(
        &self,
        access_code: String,
    ) -> BoxFuture<'static, StorageResult<Option<SessionEntity>>> {
        let found = self
            .inner
            .sessions
            .iter()
            .find(|row| row.access_code == access_code)
            .map(|row| row.clone());
        ready(Ok(found)).boxed()
    }

    fn update_session(
        &self,
        expected_version: u64,
        next: SessionEntity,
    ) -> BoxFuture<'static, StorageResult<ConditionalWrite<SessionEntity>>> {
        ready(self.inner.update_session(expected_version, next)).boxed()
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
        ready(
            self.inner
                .join_participant(session_id, user_id, display_name),
        )
        .boxed()
    }

    fn find_participant(
        &self,
        id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Option<ParticipantEntity>>> {
        let found = self.inner.participants.get(&id).map(|row| row.clone());
        ready(Ok(found)).boxed()
    }

    fn list_participants(
        &self,
        session_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Vec<ParticipantEntity>>> {
        ready(Ok(self.inner.list_participants(session_id))).boxed()
    }

    fn increment_participant_score(
        &self,
        participant_id: Uuid,
        delta: i64,
    ) -> BoxFuture<'static, StorageResult<ParticipantEntity>> {
        ready(
            self.inner
                .mutate_participant(participant_id, |row| row.score += delta),
        )
        .boxed()
    }

    fn create_team(&self, team: TeamEntity) -> BoxFuture<'static, StorageResult<()>> {
        self.inner.teams.insert(team.id, team.clone());
        self.inner.notify(StoreChange::Team(team));
        ready(Ok(())).boxed()
    }

    fn list_teams(&self, session_id: Uuid) -> BoxFuture<'static, StorageResult<Vec<TeamEntity>>> {
        let mut teams: Vec<TeamEntity> = self
            .inner
            .teams
            .iter()
            .filter(|row| row.session_id == session_id)
            .map(|row| row.clone())
            .collect();
        teams.sort_by_key(|team| team.created_at);
        ready(Ok(teams)).boxed()
    }

    fn assign_team(
        &self,
        participant_id: Uuid,
        team_id: Option<Uuid>,
    ) -> BoxFuture<'static, StorageResult<ParticipantEntity>> {
        ready(
            self.inner
                .mutate_participant(participant_id, |row| row.team_id = team_id),
        )
        .boxed()
    }

    fn clear_team_memberships(
        &self,
        session_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Vec<ParticipantEntity>>> {
        ready(Ok(self.inner.clear_team_memberships(session_id))).boxed()
    }

    fn insert_answer_if_absent(
        &self,
        answer: AnswerEntity,
    ) -> BoxFuture<'static, StorageResult<InsertOutcome<AnswerEntity>>> {
        ready(Ok(self.inner.insert_answer_if_absent(answer))).boxed()
    }

    fn list_answers(
        &self,
        session_id: Uuid,
        question_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Vec<AnswerEntity>>> {
        ready(Ok(self.inner.list_answers(session_id, question_id))).boxed()
    }

    fn save_questions(
        &self,
        quiz_id: Uuid,
        mut questions: Vec<QuestionEntity>,
    ) -> BoxFuture<'static, StorageResult<()>> {
        questions.sort_by_key(|question| question.position);
        self.inner.questions.insert(quiz_id, questions);
        ready(Ok(())).boxed()
    }

    fn list_questions(
        &self,
        quiz_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Vec<QuestionEntity>>> {
        let questions = self
            .inner
            .questions
            .get(&quiz_id)
            .map(|rows| rows.clone())
            .unwrap_or_default();
        ready(Ok(questions)).boxed()
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        ready(Ok(())).boxed()
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        ready(Ok(())).boxed()
    }
}

#[cfg(test)]
mod tests {
    use futures::StreamExt;

    use super::*;
    use crate::dao::models::{SessionMode, SessionStatus};

    fn session(id: Uuid) -> SessionEntity {
        SessionEntity {
            id,
            quiz_id: Uuid::new_v4(),
            host_id: Uuid::new_v4(),
            access_code: "ABC234".into(),
            mode: None,
            status: SessionStatus::Waiting,
            current_question_index: None,
            question_order: Vec::new(),
            countdown_ends_at_ms: None,
            answers_open_at_ms: None,
            answer_window_deadline_ms: None,
            version: 0,
            created_at: SystemTime::now(),
            updated_at: SystemTime::now(),
        }
    }

    fn answer(session_id: Uuid, participant_id: Uuid, question_id: Uuid) -> AnswerEntity {
        AnswerEntity {
            id: Uuid::new_v4(),
            session_id,
            participant_id,
            team_id: None,
            question_id,
            question_index: 0,
            selected_option: Some(1),
            is_correct: true,
            points: 150,
            time_taken_ms: 2_000,
            submitted_at_ms: 10,
        }
    }

    #[tokio::test]
    async fn join_is_idempotent_per_user() {
        let store = MemorySessionStore::new();
        let session_id = Uuid::new_v4();
        store.create_session(session(session_id)).await.unwrap();
        let user = Uuid::new_v4();

        let first = store
            .join_participant(session_id, user, "Ada".into())
            .await
            .unwrap();
        let second = store
            .join_participant(session_id, user, "Ada again".into())
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.display_name, "Ada");
        assert_eq!(store.list_participants(session_id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn stale_version_is_not_written() {
        let store = MemorySessionStore::new();
        let id = Uuid::new_v4();
        store.create_session(session(id)).await.unwrap();

        let mut next = session(id);
        next.mode = Some(SessionMode::Team);
        let applied = store.update_session(0, next.clone()).await.unwrap();
        let ConditionalWrite::Applied(row) = applied else {
            panic!("first write must apply");
        };
        assert_eq!(row.version, 1);

        next.mode = Some(SessionMode::Classic);
        let stale = store.update_session(0, next).await.unwrap();
        assert_eq!(stale, ConditionalWrite::Stale { current_version: 1 });
        let stored = store.find_session(id).await.unwrap().unwrap();
        assert_eq!(stored.mode, Some(SessionMode::Team));
    }

    #[tokio::test]
    async fn concurrent_inserts_for_same_pair_store_one_answer() {
        let store = MemorySessionStore::new();
        let (session_id, participant_id, question_id) =
            (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move {
                    store
                        .insert_answer_if_absent(answer(session_id, participant_id, question_id))
                        .await
                        .unwrap()
                })
            })
            .collect();

        let mut inserted = 0;
        for task in tasks {
            if let InsertOutcome::Inserted(_) = task.await.unwrap() {
                inserted += 1;
            }
        }

        assert_eq!(inserted, 1);
        assert_eq!(
            store.list_answers(session_id, question_id).await.unwrap().len(),
            1
        );
    }

    #[tokio::test]
    async fn concurrent_increments_are_not_lost() {
        let store = MemorySessionStore::new();
        let session_id = Uuid::new_v4();
        store.create_session(session(session_id)).await.unwrap();
        let participant = store
            .join_participant(session_id, Uuid::new_v4(), "Grace".into())
            .await
            .unwrap();
        let participant_id = participant.id;

        let tasks: Vec<_> = (0..20)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move {
                    store
                        .increment_participant_score(participant_id, 5)
                        .await
                        .unwrap()
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        let stored = store.find_participant(participant_id).await.unwrap().unwrap();
        assert_eq!(stored.score, 100);
        assert_eq!(stored.revision, 20);
    }

    #[tokio::test]
    async fn subscribers_only_see_their_session() {
        let store = MemorySessionStore::new();
        let watched = Uuid::new_v4();
        let other = Uuid::new_v4();
        let mut changes = store.subscribe(watched);

        store.create_session(session(other)).await.unwrap();
        store.create_session(session(watched)).await.unwrap();

        match changes.next().await {
            Some(StoreChange::Session(row)) => assert_eq!(row.id, watched),
            other => panic!("unexpected change {other:?}"),
        }
    }
}
