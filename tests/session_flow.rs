use std::{sync::Arc, time::Duration};

use futures::{future::BoxFuture, stream::BoxStream};
use tokio::{
    sync::broadcast,
    time::{Instant, sleep, sleep_until},
};
use uuid::Uuid;

use quiz_live_back::{
    config::{AppConfig, TimingConfig},
    dao::{
        models::{
            AnswerEntity, ParticipantEntity, QuestionEntity, QuestionOptionEntity, SessionEntity,
            SessionMode, SessionStatus, TeamEntity,
        },
        session_store::{
            ConditionalWrite, InsertOutcome, SessionStore, StoreChange, memory::MemorySessionStore,
        },
        storage::StorageResult,
    },
    dto::{
        session::{
            AnswerReceipt, CreateSessionRequest, CreateTeamRequest, JoinSessionRequest, JoinTeamRequest,
            SubmitAnswerRequest, TeamSummary,
        },
        sse::ServerEvent,
    },
    error::ServiceError,
    services::{answer_service, results_service, session_service, snapshot_service, team_service},
    state::{AppState, Clock, SessionEvent, SharedState, TimedPhase},
};

const EPOCH_MS: u64 = 1_700_000_000_000;
const TIME_LIMIT_UNITS: u32 = 20;

struct Harness {
    state: SharedState,
    store: Arc<MemorySessionStore>,
    host: Uuid,
    session_id: Uuid,
    access_code: String,
    questions: Vec<QuestionEntity>,
}

#[derive(Clone, Copy)]
struct Player {
    user_id: Uuid,
    participant_id: Uuid,
}

impl Harness {
    async fn new(question_count: usize) -> Self {
        Self::with(AppConfig::default(), question_count, |store| store as Arc<dyn SessionStore>).await
    }

    /// Harness whose engine talks to `install(store)` while reads go straight to `store`.
    async fn with<F>(config: AppConfig, question_count: usize, install: F) -> Self
    where
        F: FnOnce(Arc<MemorySessionStore>) -> Arc<dyn SessionStore>,
    {
        let state = AppState::with_clock(config, Clock::starting_at(EPOCH_MS));
        let store = Arc::new(MemorySessionStore::new());
        state.install_session_store(install(store.clone())).await;

        let quiz_id = Uuid::new_v4();
        let questions: Vec<QuestionEntity> = (0..question_count)
            .map(|position| QuestionEntity {
                id: Uuid::new_v4(),
                quiz_id,
                position: position as u32,
                text: format!("question {position}"),
                media_url: None,
                options: vec![
                    QuestionOptionEntity {
                        text: "right".into(),
                        is_correct: true,
                    },
                    QuestionOptionEntity {
                        text: "wrong".into(),
                        is_correct: false,
                    },
                ],
                time_limit_secs: TIME_LIMIT_UNITS,
                base_points: 100,
            })
            .collect();
        store.save_questions(quiz_id, questions.clone()).await.unwrap();

        let host = Uuid::new_v4();
        let session = session_service::create_session(&state, host, CreateSessionRequest { quiz_id })
            .await
            .unwrap();

        Self {
            state,
            store,
            host,
            session_id: session.id,
            access_code: session.access_code,
            questions,
        }
    }

    async fn join(&self, name: &str) -> Player {
        let user_id = Uuid::new_v4();
        let joined = session_service::join_session(
            &self.state,
            user_id,
            JoinSessionRequest {
                access_code: self.access_code.clone(),
                display_name: name.into(),
            },
        )
        .await
        .unwrap();
        Player {
            user_id,
            participant_id: joined.participant.id,
        }
    }

    async fn create_team(&self, name: &str) -> TeamSummary {
        team_service::create_team(
            &self.state,
            self.session_id,
            self.host,
            CreateTeamRequest { name: name.into() },
        )
        .await
        .unwrap()
    }

    async fn join_team(&self, player: &Player, team: &TeamSummary) {
        team_service::join_team(
            &self.state,
            self.session_id,
            team.id,
            player.user_id,
            JoinTeamRequest {
                participant_id: player.participant_id,
            },
        )
        .await
        .unwrap();
    }

    async fn participant(&self, player: &Player) -> ParticipantEntity {
        self.store
            .find_participant(player.participant_id)
            .await
            .unwrap()
            .unwrap()
    }

    async fn session(&self) -> SessionEntity {
        self.store
            .find_session(self.session_id)
            .await
            .unwrap()
            .unwrap()
    }

    /// Let timers and spawned tasks run until the session reaches `status`.
    async fn wait_for(&self, status: SessionStatus) -> SessionEntity {
        for _ in 0..500 {
            let session = self.session().await;
            if session.status == status {
                return session;
            }
            sleep(Duration::from_millis(10)).await;
        }
        panic!("session never reached {status:?}");
    }

    async fn start_and_open_first_question(&self) -> SessionEntity {
        session_service::start_session(&self.state, self.session_id, self.host)
            .await
            .unwrap();
        sleep(self.state.timing().countdown()).await;
        self.wait_for(SessionStatus::QuestionActive).await
    }

    async fn answer(&self, player: &Player, question_id: Uuid, option: Option<usize>) -> AnswerReceipt {
        answer_service::submit_answer(
            &self.state,
            self.session_id,
            player.user_id,
            SubmitAnswerRequest {
                participant_id: player.participant_id,
                question_id,
                selected_option: option,
            },
        )
        .await
        .unwrap()
    }
}

fn drain(receiver: &mut broadcast::Receiver<ServerEvent>) -> Vec<ServerEvent> {
    let mut events = Vec::new();
    while let Ok(event) = receiver.try_recv() {
        events.push(event);
    }
    events
}

#[tokio::test(start_paused = true)]
async fn everyone_answering_closes_the_question_after_the_grace_delay() {
    let harness = Harness::new(1).await;
    let mut players = Vec::new();
    for name in ["ada", "bob", "cyd", "dan"] {
        players.push(harness.join(name).await);
    }

    let session = harness.start_and_open_first_question().await;
    let question_id = session.current_question_id().unwrap();
    let deadline_ms = session.answer_window_deadline_ms.unwrap();

    // 10 units left on a 20 unit window
    sleep(harness.state.timing().units(10)).await;
    for player in &players {
        let receipt = harness.answer(player, question_id, Some(0)).await;
        assert!(receipt.accepted);
    }
    let answered_at = Instant::now();
    let answered_at_ms = harness.state.clock().now_ms();
    let grace = harness.state.timing().grace();
    let margin = Duration::from_millis(10);

    // not immediately
    assert_eq!(harness.session().await.status, SessionStatus::QuestionActive);
    assert_eq!(
        harness.state.timers().current(harness.session_id),
        Some(TimedPhase::GraceDelay { index: 0 })
    );

    sleep_until(answered_at + grace - margin).await;
    assert_eq!(harness.session().await.status, SessionStatus::QuestionActive);

    sleep_until(answered_at + grace + margin).await;
    assert_eq!(harness.session().await.status, SessionStatus::ShowingResults);
    // the full deadline was still 10 units away
    assert!(answered_at_ms + harness.state.timing().units_ms(10) <= deadline_ms);
}

#[tokio::test(start_paused = true)]
async fn unanswered_question_closes_at_its_deadline() {
    let harness = Harness::new(1).await;
    harness.join("ada").await;

    let session = harness.start_and_open_first_question().await;
    let deadline_ms = session.answer_window_deadline_ms.unwrap();

    sleep(harness.state.timing().units(TIME_LIMIT_UNITS - 1)).await;
    assert_eq!(harness.session().await.status, SessionStatus::QuestionActive);

    harness.wait_for(SessionStatus::ShowingResults).await;
    assert!(harness.state.clock().now_ms() >= deadline_ms);

    let results = results_service::question_results_for(&harness.state, harness.session_id, 0)
        .await
        .unwrap();
    assert_eq!(results.no_answer, 1);
}

#[tokio::test(start_paused = true)]
async fn next_question_while_waiting_is_rejected() {
    let harness = Harness::new(2).await;
    harness.join("ada").await;
    let before = harness.session().await;

    let err = session_service::advance_to_next_question(&harness.state, harness.session_id, harness.host)
        .await
        .unwrap_err();

    assert!(matches!(err, ServiceError::InvalidTransition(_)));
    let after = harness.session().await;
    assert_eq!(after.status, SessionStatus::Waiting);
    assert_eq!(after.version, before.version);
}

#[tokio::test(start_paused = true)]
async fn host_commands_require_the_host() {
    let harness = Harness::new(1).await;
    let player = harness.join("ada").await;

    let err = session_service::start_session(&harness.state, harness.session_id, player.user_id)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Forbidden(_)));
    assert_eq!(harness.session().await.status, SessionStatus::Waiting);
}

#[tokio::test(start_paused = true)]
async fn duplicate_answer_returns_the_first_one() {
    let harness = Harness::new(1).await;
    let ada = harness.join("ada").await;
    harness.join("bob").await;

    let session = harness.start_and_open_first_question().await;
    let question_id = session.current_question_id().unwrap();

    sleep(harness.state.timing().units(5)).await;
    let first = harness.answer(&ada, question_id, Some(0)).await;
    let second = harness.answer(&ada, question_id, Some(1)).await;

    assert!(first.accepted);
    assert!(!second.accepted);
    assert_eq!(second.answer, first.answer);

    let stored = harness
        .store
        .list_answers(harness.session_id, question_id)
        .await
        .unwrap();
    assert_eq!(stored.len(), 1);

    let participant = harness
        .store
        .find_participant(ada.participant_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(participant.score, first.answer.points);
}

#[tokio::test(start_paused = true)]
async fn score_is_the_sum_of_awarded_points() {
    let harness = Harness::new(2).await;
    let ada = harness.join("ada").await;

    let session = harness.start_and_open_first_question().await;
    let first_question = session.current_question_id().unwrap();
    sleep(harness.state.timing().units(5)).await;
    let first = harness.answer(&ada, first_question, Some(0)).await;
    // 15 of 20 units left, give or take the polling granularity of the harness
    assert!((170..=175).contains(&first.answer.points));

    harness.wait_for(SessionStatus::ShowingResults).await;
    session_service::advance_to_next_question(&harness.state, harness.session_id, harness.host)
        .await
        .unwrap();
    let session = harness.session().await;
    let second_question = session.current_question_id().unwrap();
    let second = harness.answer(&ada, second_question, Some(1)).await;
    assert_eq!(second.answer.points, 0);

    let participant = harness
        .store
        .find_participant(ada.participant_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(participant.score, first.answer.points + second.answer.points);

    harness.wait_for(SessionStatus::ShowingResults).await;
    session_service::end_session(&harness.state, harness.session_id, harness.host)
        .await
        .unwrap();
    assert_eq!(harness.session().await.status, SessionStatus::Completed);

    let board = results_service::leaderboard_for(&harness.state, harness.session_id)
        .await
        .unwrap();
    assert_eq!(board.podium[0].score, participant.score);
}

#[tokio::test(start_paused = true)]
async fn stale_timer_events_leave_the_session_untouched() {
    let harness = Harness::new(2).await;
    harness.join("ada").await;
    harness.start_and_open_first_question().await;

    session_service::advance_to_results(&harness.state, harness.session_id, harness.host)
        .await
        .unwrap();
    session_service::advance_to_next_question(&harness.state, harness.session_id, harness.host)
        .await
        .unwrap();
    let before = harness.session().await;
    assert_eq!(before.current_question_index, Some(1));

    // deadline armed for question 0 arriving late
    let err = session_service::apply_event(
        &harness.state,
        harness.session_id,
        SessionEvent::CloseQuestion { index: 0 },
    )
    .await
    .unwrap_err();

    assert!(matches!(err, ServiceError::InvalidTransition(_)));
    let after = harness.session().await;
    assert_eq!(after.version, before.version);
    assert_eq!(after.status, SessionStatus::QuestionActive);
}

#[tokio::test(start_paused = true)]
async fn missing_question_forces_completion() {
    let harness = Harness::new(2).await;
    harness.join("ada").await;
    let session = harness.start_and_open_first_question().await;

    // the second question disappears from the catalogue
    harness
        .store
        .save_questions(session.quiz_id, harness.questions[..1].to_vec())
        .await
        .unwrap();
    session_service::advance_to_results(&harness.state, harness.session_id, harness.host)
        .await
        .unwrap();

    let err = session_service::advance_to_next_question(&harness.state, harness.session_id, harness.host)
        .await
        .unwrap_err();

    assert!(matches!(err, ServiceError::InvalidQuestionIndex { index: 1, len: 2 }));
    let after = harness.session().await;
    assert_eq!(after.status, SessionStatus::Completed);
    assert_eq!(after.current_question_index, Some(0));
}

#[tokio::test(start_paused = true)]
async fn team_scores_follow_members_and_are_cleared_on_cancel() {
    let harness = Harness::new(1).await;
    session_service::select_mode(&harness.state, harness.session_id, harness.host, SessionMode::Team)
        .await
        .unwrap();

    let red = harness.create_team("red").await;
    let blue = harness.create_team("blue").await;

    let ada = harness.join("ada").await;
    let bob = harness.join("bob").await;
    let cyd = harness.join("cyd").await;
    for (player, team) in [(&ada, &red), (&bob, &red), (&cyd, &blue)] {
        harness.join_team(player, team).await;
    }

    let session = harness.start_and_open_first_question().await;
    let question_id = session.current_question_id().unwrap();

    // thinking time refuses answers
    let early = answer_service::submit_answer(
        &harness.state,
        harness.session_id,
        ada.user_id,
        SubmitAnswerRequest {
            participant_id: ada.participant_id,
            question_id,
            selected_option: Some(0),
        },
    )
    .await;
    assert!(matches!(early, Err(ServiceError::InvalidState(_))));

    sleep(harness.state.timing().thinking()).await;
    let a = harness.answer(&ada, question_id, Some(0)).await;
    let b = harness.answer(&bob, question_id, Some(0)).await;
    harness.answer(&cyd, question_id, Some(1)).await;

    let participants = harness.store.list_participants(harness.session_id).await.unwrap();
    let teams = harness.store.list_teams(harness.session_id).await.unwrap();
    let summaries = team_service::team_summaries(&teams, &participants);
    let score_of = |team_id: Uuid| {
        summaries
            .iter()
            .find(|team| team.id == team_id)
            .map(|team| team.score)
    };
    assert_eq!(score_of(red.id), Some(a.answer.points + b.answer.points));
    assert_eq!(score_of(blue.id), Some(0));

    let mut events = harness.state.session_hub(harness.session_id).subscribe();
    session_service::cancel_session(&harness.state, harness.session_id, harness.host)
        .await
        .unwrap();

    let finished = drain(&mut events)
        .into_iter()
        .find(|event| event.event.as_deref() == Some("session.finished"))
        .expect("session.finished broadcast");
    let payload: serde_json::Value = serde_json::from_str(&finished.data).unwrap();
    assert_eq!(payload["status"], "cancelled");
    assert_eq!(payload["leaderboard"]["teams"][0]["name"], "red");

    let participants = harness.store.list_participants(harness.session_id).await.unwrap();
    assert!(participants.iter().all(|participant| participant.team_id.is_none()));
    let summaries = team_service::team_summaries(&teams, &participants);
    assert!(summaries.iter().all(|team| team.members.is_empty() && team.score == 0));
    assert_eq!(harness.state.timers().current(harness.session_id), None);
}

#[tokio::test(start_paused = true)]
async fn late_joiners_are_refused_but_rejoining_is_idempotent() {
    let harness = Harness::new(1).await;
    let ada = harness.join("ada").await;
    harness.start_and_open_first_question().await;

    let again = session_service::join_session(
        &harness.state,
        ada.user_id,
        JoinSessionRequest {
            access_code: harness.access_code.clone(),
            display_name: "ada".into(),
        },
    )
    .await
    .unwrap();
    assert_eq!(again.participant.id, ada.participant_id);

    let late = session_service::join_session(
        &harness.state,
        Uuid::new_v4(),
        JoinSessionRequest {
            access_code: harness.access_code.clone(),
            display_name: "zed".into(),
        },
    )
    .await;
    assert!(matches!(late, Err(ServiceError::InvalidState(_))));
}

/// Store whose answer inserts land `delay` after they were issued.
struct SlowAnswerStore {
    inner: Arc<MemorySessionStore>,
    delay: Duration,
}

impl SessionStore for SlowAnswerStore {
    fn create_session(&self, session: SessionEntity) -> BoxFuture<'static, StorageResult<()>> {
        self.inner.create_session(session)
    }
    fn find_session(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<SessionEntity>>> {
        self.inner.find_session(id)
    }
    fn find_session_by_code(
        &self,
        access_code: String,
    ) -> BoxFuture<'static, StorageResult<Option<SessionEntity>>> {
        self.inner.find_session_by_code(access_code)
    }
    fn update_session(
        &self,
        expected_version: u64,
        next: SessionEntity,
    ) -> BoxFuture<'static, StorageResult<ConditionalWrite<SessionEntity>>> {
        self.inner.update_session(expected_version, next)
    }
    fn subscribe(&self, session_id: Uuid) -> BoxStream<'static, StoreChange> {
        self.inner.subscribe(session_id)
    }
    fn join_participant(
        &self,
        session_id: Uuid,
        user_id: Uuid,
        display_name: String,
    ) -> BoxFuture<'static, StorageResult<ParticipantEntity>> {
        self.inner.join_participant(session_id, user_id, display_name)
    }
    fn find_participant(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<ParticipantEntity>>> {
        self.inner.find_participant(id)
    }
    fn list_participants(&self, session_id: Uuid) -> BoxFuture<'static, StorageResult<Vec<ParticipantEntity>>> {
        self.inner.list_participants(session_id)
    }
    fn increment_participant_score(
        &self,
        participant_id: Uuid,
        delta: i64,
    ) -> BoxFuture<'static, StorageResult<ParticipantEntity>> {
        self.inner.increment_participant_score(participant_id, delta)
    }
    fn create_team(&self, team: TeamEntity) -> BoxFuture<'static, StorageResult<()>> {
        self.inner.create_team(team)
    }
    fn list_teams(&self, session_id: Uuid) -> BoxFuture<'static, StorageResult<Vec<TeamEntity>>> {
        self.inner.list_teams(session_id)
    }
    fn assign_team(
        &self,
        participant_id: Uuid,
        team_id: Option<Uuid>,
    ) -> BoxFuture<'static, StorageResult<ParticipantEntity>> {
        self.inner.assign_team(participant_id, team_id)
    }
    fn clear_team_memberships(&self, session_id: Uuid) -> BoxFuture<'static, StorageResult<Vec<ParticipantEntity>>> {
        self.inner.clear_team_memberships(session_id)
    }
    fn insert_answer_if_absent(
        &self,
        answer: AnswerEntity,
    ) -> BoxFuture<'static, StorageResult<InsertOutcome<AnswerEntity>>> {
        let inner = Arc::clone(&self.inner);
        let delay = self.delay;
        Box::pin(async move {
            sleep(delay).await;
            inner.insert_answer_if_absent(answer).await
        })
    }
    fn list_answers(
        &self,
        session_id: Uuid,
        question_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Vec<AnswerEntity>>> {
        self.inner.list_answers(session_id, question_id)
    }
    fn save_questions(
        &self,
        quiz_id: Uuid,
        questions: Vec<QuestionEntity>,
    ) -> BoxFuture<'static, StorageResult<()>> {
        self.inner.save_questions(quiz_id, questions)
    }
    fn list_questions(&self, quiz_id: Uuid) -> BoxFuture<'static, StorageResult<Vec<QuestionEntity>>> {
        self.inner.list_questions(quiz_id)
    }
    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        self.inner.health_check()
    }
    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        self.inner.try_reconnect()
    }
}

#[tokio::test(start_paused = true)]
async fn answer_in_flight_commits_before_the_host_closes_the_question() {
    let harness = Harness::with(AppConfig::default(), 1, |inner| {
        Arc::new(SlowAnswerStore {
            inner,
            delay: Duration::from_millis(300),
        }) as Arc<dyn SessionStore>
    })
    .await;
    let ada = harness.join("ada").await;
    harness.join("bob").await;
    let session = harness.start_and_open_first_question().await;
    let question_id = session.current_question_id().unwrap();
    sleep(harness.state.timing().units(1)).await;

    let mut events = harness.state.session_hub(harness.session_id).subscribe();
    let close = async {
        // the insert of ada is still pending by now
        sleep(Duration::from_millis(50)).await;
        session_service::advance_to_results(&harness.state, harness.session_id, harness.host).await
    };
    let (receipt, closed) = tokio::join!(harness.answer(&ada, question_id, Some(0)), close);

    assert!(receipt.accepted);
    assert!(receipt.answer.points > 0);
    closed.unwrap();
    assert_eq!(harness.session().await.status, SessionStatus::ShowingResults);

    let results = results_service::question_results_for(&harness.state, harness.session_id, 0)
        .await
        .unwrap();
    assert_eq!(results.no_answer, 1);

    let broadcast = drain(&mut events)
        .into_iter()
        .find(|event| event.event.as_deref() == Some("question.results"))
        .expect("question.results broadcast");
    let payload: serde_json::Value = serde_json::from_str(&broadcast.data).unwrap();
    assert_eq!(payload["no_answer"], 1);
}

#[tokio::test(start_paused = true)]
async fn answers_after_the_close_are_refused_and_not_stored() {
    let harness = Harness::new(1).await;
    let ada = harness.join("ada").await;
    let session = harness.start_and_open_first_question().await;
    let question_id = session.current_question_id().unwrap();

    session_service::advance_to_results(&harness.state, harness.session_id, harness.host)
        .await
        .unwrap();
    let late = answer_service::submit_answer(
        &harness.state,
        harness.session_id,
        ada.user_id,
        SubmitAnswerRequest {
            participant_id: ada.participant_id,
            question_id,
            selected_option: Some(0),
        },
    )
    .await;

    assert!(matches!(late, Err(ServiceError::InvalidState(_))));
    let stored = harness
        .store
        .list_answers(harness.session_id, question_id)
        .await
        .unwrap();
    assert!(stored.is_empty());
    assert_eq!(harness.participant(&ada).await.score, 0);
}

#[tokio::test(start_paused = true)]
async fn final_team_leaderboard_survives_the_end_of_the_session() {
    let harness = Harness::new(1).await;
    session_service::select_mode(&harness.state, harness.session_id, harness.host, SessionMode::Team)
        .await
        .unwrap();
    let red = harness.create_team("red").await;
    let blue = harness.create_team("blue").await;
    let ada = harness.join("ada").await;
    let bob = harness.join("bob").await;
    harness.join_team(&ada, &red).await;
    harness.join_team(&bob, &blue).await;

    let session = harness.start_and_open_first_question().await;
    let question_id = session.current_question_id().unwrap();
    sleep(harness.state.timing().thinking()).await;
    let right = harness.answer(&ada, question_id, Some(0)).await;
    let wrong = harness.answer(&bob, question_id, Some(1)).await;
    assert!(right.answer.points > 0);
    assert_eq!(wrong.answer.points, 0);

    harness.wait_for(SessionStatus::ShowingResults).await;
    session_service::end_session(&harness.state, harness.session_id, harness.host)
        .await
        .unwrap();
    assert_eq!(harness.session().await.status, SessionStatus::Completed);
    assert!(harness.participant(&ada).await.team_id.is_none());

    let board = results_service::leaderboard_for(&harness.state, harness.session_id)
        .await
        .unwrap();
    assert_eq!(board.teams.len(), 2);
    assert_eq!(board.teams[0].team_id, red.id);
    assert_eq!(board.teams[0].score, right.answer.points);
    assert_eq!(board.teams[1].team_id, blue.id);
    assert_eq!(board.teams[1].score, 0);
    assert_eq!(board.team_podium[0].team_id, red.id);

    let snapshot = snapshot_service::session_snapshot(&harness.state, harness.session_id)
        .await
        .unwrap();
    let red_standing = snapshot
        .teams
        .iter()
        .find(|team| team.id == red.id)
        .expect("red keeps its standing");
    assert_eq!(red_standing.score, right.answer.points);
    assert_eq!(red_standing.members, vec![ada.participant_id]);
}

async fn submit(
    state: SharedState,
    session_id: Uuid,
    player: Player,
    question_id: Uuid,
    option: usize,
) -> AnswerReceipt {
    answer_service::submit_answer(
        &state,
        session_id,
        player.user_id,
        SubmitAnswerRequest {
            participant_id: player.participant_id,
            question_id,
            selected_option: Some(option),
        },
    )
    .await
    .unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_submissions_store_one_answer_per_participant() {
    let config = AppConfig {
        timing: TimingConfig {
            time_unit: Duration::from_millis(100),
            ..TimingConfig::default()
        },
        ..AppConfig::default()
    };
    let harness = Harness::with(config, 1, |store| store as Arc<dyn SessionStore>).await;
    let ada = harness.join("ada").await;
    let bob = harness.join("bob").await;
    let session = harness.start_and_open_first_question().await;
    let question_id = session.current_question_id().unwrap();

    let attempts = [(ada, 0), (ada, 1), (ada, 0), (ada, 1), (ada, 0), (ada, 1), (bob, 1), (bob, 0)];
    let handles: Vec<_> = attempts
        .iter()
        .map(|(player, option)| {
            tokio::spawn(submit(
                harness.state.clone(),
                harness.session_id,
                *player,
                question_id,
                *option,
            ))
        })
        .collect();
    let mut receipts = Vec::new();
    for (handle, (player, _)) in handles.into_iter().zip(attempts) {
        receipts.push((player.participant_id, handle.await.unwrap()));
    }

    let stored = harness
        .store
        .list_answers(harness.session_id, question_id)
        .await
        .unwrap();
    assert_eq!(stored.len(), 2);

    for player in [ada, bob] {
        let mine: Vec<&AnswerReceipt> = receipts
            .iter()
            .filter(|(participant_id, _)| *participant_id == player.participant_id)
            .map(|(_, receipt)| receipt)
            .collect();
        assert_eq!(mine.iter().filter(|receipt| receipt.accepted).count(), 1);

        let row = stored
            .iter()
            .find(|answer| answer.participant_id == player.participant_id)
            .expect("one stored answer");
        assert!(mine.iter().all(|receipt| receipt.answer.id == row.id));

        let points: i64 = stored
            .iter()
            .filter(|answer| answer.participant_id == player.participant_id)
            .map(|answer| answer.points)
            .sum();
        assert_eq!(harness.participant(&player).await.score, points);
    }

    // everyone answered, so the grace delay closes the question
    harness.wait_for(SessionStatus::ShowingResults).await;
    let late = submit(harness.state.clone(), harness.session_id, ada, question_id, 1).await;
    assert!(!late.accepted);
    assert_eq!(
        harness
            .store
            .list_answers(harness.session_id, question_id)
            .await
            .unwrap()
            .len(),
        2
    );
}

#[tokio::test(start_paused = true)]
async fn cancel_racing_the_next_question_leaves_no_timer_behind() {
    let harness = Harness::new(2).await;
    harness.join("ada").await;
    harness.start_and_open_first_question().await;
    session_service::advance_to_results(&harness.state, harness.session_id, harness.host)
        .await
        .unwrap();

    let mut events = harness.state.session_hub(harness.session_id).subscribe();
    let (next, cancel) = tokio::join!(
        session_service::advance_to_next_question(&harness.state, harness.session_id, harness.host),
        session_service::cancel_session(&harness.state, harness.session_id, harness.host),
    );
    // the next question may lose the race
    if let Err(err) = next {
        assert!(matches!(err, ServiceError::InvalidTransition(_)));
    }
    cancel.unwrap();

    assert_eq!(harness.session().await.status, SessionStatus::Cancelled);
    assert_eq!(harness.state.timers().current(harness.session_id), None);

    // every deadline of the second question passes without effect
    sleep(harness.state.timing().units(TIME_LIMIT_UNITS + 5)).await;
    assert_eq!(harness.session().await.status, SessionStatus::Cancelled);
    let events = drain(&mut events);
    let finished_at = events
        .iter()
        .position(|event| event.event.as_deref() == Some("session.finished"))
        .expect("session.finished broadcast");
    assert!(
        events[finished_at..]
            .iter()
            .all(|event| event.event.as_deref() != Some("question.results"))
    );
}
