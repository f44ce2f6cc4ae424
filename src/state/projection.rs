//! Client-side projection of a session and the single merge rule feeding it.
//!
//! Push notifications and poll snapshots both go through [`reconcile`], which only ever moves a
//! projection forward: session rows by version, participant rows by revision, teams and answers
//! by union.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::dao::{
    models::{
        AnswerEntity, ParticipantEntity, SessionEntity, SessionMode, SessionStatus, TeamEntity,
    },
    session_store::StoreChange,
};

/// What a client should currently display for a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum SessionView {
    /// Lobby.
    Waiting,
    /// Pre-quiz countdown running.
    Countdown {
        /// Absolute end of the countdown (epoch milliseconds).
        ends_at_ms: u64,
    },
    /// A question is open.
    Question {
        /// Position of the question.
        index: usize,
        /// Question identifier.
        question_id: Uuid,
        /// Answers are refused before this instant (team thinking time).
        answers_open_at_ms: u64,
        /// Absolute end of the answer window.
        deadline_ms: u64,
    },
    /// Results of a question are displayed.
    Results {
        /// Position of the question.
        index: usize,
        /// Question identifier.
        question_id: Uuid,
    },
    /// Quiz finished.
    Completed,
    /// Session cancelled by the host.
    Cancelled,
}

impl SessionView {
    /// Derive the view from a session row.
    pub fn of(session: &SessionEntity) -> Self {
        let index = session.current_question_index.unwrap_or_default();
        let question_id = session.current_question_id().unwrap_or_default();
        match session.status {
            SessionStatus::Waiting => SessionView::Waiting,
            SessionStatus::Active => SessionView::Countdown {
                ends_at_ms: session.countdown_ends_at_ms.unwrap_or_default(),
            },
            SessionStatus::QuestionActive => SessionView::Question {
                index,
                question_id,
                answers_open_at_ms: session.answers_open_at_ms.unwrap_or_default(),
                deadline_ms: session.answer_window_deadline_ms.unwrap_or_default(),
            },
            SessionStatus::ShowingResults => SessionView::Results { index, question_id },
            SessionStatus::Completed => SessionView::Completed,
            SessionStatus::Cancelled => SessionView::Cancelled,
        }
    }

    /// Position in the lifecycle; a view never moves to a lower position.
    fn progress(&self) -> (u8, usize, u8) {
        match self {
            SessionView::Waiting => (0, 0, 0),
            SessionView::Countdown { .. } => (1, 0, 0),
            SessionView::Question { index, .. } => (2, *index, 0),
            SessionView::Results { index, .. } => (2, *index, 1),
            SessionView::Completed | SessionView::Cancelled => (3, 0, 0),
        }
    }

    /// Question currently displayed, if any.
    pub fn question_id(&self) -> Option<Uuid> {
        match self {
            SessionView::Question { question_id, .. } | SessionView::Results { question_id, .. } => {
                Some(*question_id)
            }
            _ => None,
        }
    }

    /// Whether the session is over.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionView::Completed | SessionView::Cancelled)
    }
}

/// Participant as seen by a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParticipantView {
    /// Name shown to the other players.
    pub display_name: String,
    /// Current team, if any.
    pub team_id: Option<Uuid>,
    /// Total points.
    pub score: i64,
    /// Row revision the entry was taken from.
    pub revision: u64,
    /// Join order, breaks ranking ties.
    pub joined_seq: u64,
}

impl From<&ParticipantEntity> for ParticipantView {
    fn from(value: &ParticipantEntity) -> Self {
        Self {
            display_name: value.display_name.clone(),
            team_id: value.team_id,
            score: value.score,
            revision: value.revision,
            joined_seq: value.joined_seq,
        }
    }
}

/// Local projection of one session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Projection {
    /// Session identifier.
    pub session_id: Uuid,
    /// Version of the session row the view was taken from.
    pub version: u64,
    /// Current phase.
    pub view: SessionView,
    /// Play mode, once selected.
    pub mode: Option<SessionMode>,
    /// Questions in the order.
    pub question_count: usize,
    /// Participants by identifier.
    pub participants: BTreeMap<Uuid, ParticipantView>,
    /// Team names by id.
    pub teams: BTreeMap<Uuid, String>,
    /// Participants that answered the current question.
    pub answered: BTreeSet<Uuid>,
}

impl Projection {
    fn seed(session: &SessionEntity) -> Self {
        Self {
            session_id: session.id,
            version: session.version,
            view: SessionView::of(session),
            mode: session.mode,
            question_count: session.question_order.len(),
            participants: BTreeMap::new(),
            teams: BTreeMap::new(),
            answered: BTreeSet::new(),
        }
    }

    /// Remaining answer time at `now_ms`, when a question is open.
    pub fn remaining_ms(&self, now_ms: u64) -> Option<u64> {
        match self.view {
            SessionView::Question { deadline_ms, .. } => Some(deadline_ms.saturating_sub(now_ms)),
            _ => None,
        }
    }

    fn merge_session(&mut self, session: &SessionEntity) {
        if session.id != self.session_id || session.version <= self.version {
            return;
        }
        let view = SessionView::of(session);
        if view.progress() < self.view.progress() {
            return;
        }

        let previous_question = self.view.question_id();
        self.version = session.version;
        self.view = view;
        self.mode = session.mode;
        self.question_count = session.question_order.len();
        if self.view.question_id() != previous_question {
            self.answered.clear();
        }
    }

    fn merge_participant(&mut self, participant: &ParticipantEntity) {
        if participant.session_id != self.session_id {
            return;
        }
        let newer = self
            .participants
            .get(&participant.id)
            .is_none_or(|known| participant.revision > known.revision);
        if newer {
            self.participants
                .insert(participant.id, ParticipantView::from(participant));
        }
    }

    fn merge_team(&mut self, team: &TeamEntity) {
        if team.session_id == self.session_id {
            self.teams.insert(team.id, team.name.clone());
        }
    }

    /// Answers for another question than the displayed one are not tracked.
    fn merge_answer(&mut self, answer: &AnswerEntity) {
        if answer.session_id == self.session_id
            && self.view.question_id() == Some(answer.question_id)
        {
            self.answered.insert(answer.participant_id);
        }
    }
}

/// Authoritative state fetched by a poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteSnapshot {
    /// Session row.
    pub session: SessionEntity,
    /// Participants of the session.
    pub participants: Vec<ParticipantEntity>,
    /// Teams of the session.
    pub teams: Vec<TeamEntity>,
    /// Answers of the current question.
    pub answers: Vec<AnswerEntity>,
}

/// Anything a client can learn about a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Observation {
    /// Full state fetched by a poll.
    Snapshot(RemoteSnapshot),
    /// Session row changed.
    Session(SessionEntity),
    /// Participant row changed.
    Participant(ParticipantEntity),
    /// Team row changed.
    Team(TeamEntity),
    /// Answer stored.
    Answer(AnswerEntity),
}

impl From<StoreChange> for Observation {
    fn from(value: StoreChange) -> Self {
        match value {
            StoreChange::Session(session) => Observation::Session(session),
            StoreChange::Participant(participant) => Observation::Participant(participant),
            StoreChange::Team(team) => Observation::Team(team),
            StoreChange::Answer(answer) => Observation::Answer(answer),
        }
    }
}

/// Merge an observation into the local projection.
///
/// Returns the new projection, or `None` when the observation changes nothing.
pub fn reconcile(local: Option<&Projection>, observation: &Observation) -> Option<Projection> {
    let mut next = match local {
        Some(local) => local.clone(),
        None => match observation {
            Observation::Snapshot(snapshot) => Projection::seed(&snapshot.session),
            Observation::Session(session) => Projection::seed(session),
            // Rows cannot be placed before the session itself is known.
            _ => return None,
        },
    };

    match observation {
        Observation::Snapshot(snapshot) => {
            next.merge_session(&snapshot.session);
            for participant in &snapshot.participants {
                next.merge_participant(participant);
            }
            for team in &snapshot.teams {
                next.merge_team(team);
            }
            for answer in &snapshot.answers {
                next.merge_answer(answer);
            }
        }
        Observation::Session(session) => next.merge_session(session),
        Observation::Participant(participant) => next.merge_participant(participant),
        Observation::Team(team) => next.merge_team(team),
        Observation::Answer(answer) => next.merge_answer(answer),
    }

    match local {
        Some(local) if *local == next => None,
        _ => Some(next),
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, UNIX_EPOCH};

    use super::*;

    struct World {
        session: SessionEntity,
        participants: Vec<ParticipantEntity>,
    }

    impl World {
        fn new() -> Self {
            let session_id = Uuid::new_v4();
            let at = UNIX_EPOCH + Duration::from_secs(1_700_000_000);
            let session = SessionEntity {
                id: session_id,
                quiz_id: Uuid::new_v4(),
                host_id: Uuid::new_v4(),
                access_code: "QWERTY".into(),
                mode: None,
                status: SessionStatus::Waiting,
                current_question_index: None,
                question_order: vec![Uuid::new_v4(), Uuid::new_v4()],
                countdown_ends_at_ms: None,
                answers_open_at_ms: None,
                answer_window_deadline_ms: None,
                version: 1,
                created_at: at,
                updated_at: at,
            };
            let participants = (0..2)
                .map(|seq| ParticipantEntity {
                    id: Uuid::new_v4(),
                    session_id,
                    user_id: Uuid::new_v4(),
                    display_name: format!("player {seq}"),
                    team_id: None,
                    score: 0,
                    revision: 0,
                    joined_seq: seq,
                    joined_at: at,
                })
                .collect();
            Self {
                session,
                participants,
            }
        }

        fn advance(&mut self, status: SessionStatus, index: Option<usize>) -> SessionEntity {
            self.session.status = status;
            self.session.current_question_index = index;
            self.session.answer_window_deadline_ms = Some(1_700_000_020_000);
            self.session.version += 1;
            self.session.clone()
        }

        fn snapshot(&self, answers: Vec<AnswerEntity>) -> Observation {
            Observation::Snapshot(RemoteSnapshot {
                session: self.session.clone(),
                participants: self.participants.clone(),
                teams: Vec::new(),
                answers,
            })
        }

        fn answer(&self, participant: usize, question: usize) -> AnswerEntity {
            AnswerEntity {
                id: Uuid::new_v4(),
                session_id: self.session.id,
                participant_id: self.participants[participant].id,
                team_id: None,
                question_id: self.session.question_order[question],
                question_index: question,
                selected_option: Some(0),
                is_correct: true,
                points: 150,
                time_taken_ms: 5_000,
                submitted_at_ms: 1_700_000_005_000,
            }
        }
    }

    fn fold(observations: &[Observation]) -> Option<Projection> {
        observations.iter().fold(None, |local, observation| {
            reconcile(local.as_ref(), observation).or(local)
        })
    }

    #[test]
    fn reapplying_a_snapshot_is_a_no_op() {
        let world = World::new();
        let snapshot = world.snapshot(Vec::new());

        let first = reconcile(None, &snapshot).unwrap();
        assert_eq!(first.participants.len(), 2);
        assert!(reconcile(Some(&first), &snapshot).is_none());
    }

    #[test]
    fn delayed_session_row_does_not_regress() {
        let mut world = World::new();
        let question = world.advance(SessionStatus::QuestionActive, Some(0));
        let results = world.advance(SessionStatus::ShowingResults, Some(0));

        let local = fold(&[Observation::Session(results.clone())]).unwrap();
        assert!(matches!(local.view, SessionView::Results { index: 0, .. }));
        assert!(reconcile(Some(&local), &Observation::Session(question)).is_none());
        assert!(reconcile(Some(&local), &Observation::Session(results)).is_none());
    }

    #[test]
    fn participant_rows_merge_by_revision() {
        let mut world = World::new();
        let local = reconcile(None, &world.snapshot(Vec::new())).unwrap();

        let stale = world.participants[0].clone();
        world.participants[0].score = 175;
        world.participants[0].revision = 1;
        let fresh = world.participants[0].clone();

        let local = reconcile(Some(&local), &Observation::Participant(fresh.clone())).unwrap();
        assert_eq!(local.participants[&fresh.id].score, 175);
        assert!(reconcile(Some(&local), &Observation::Participant(stale)).is_none());
    }

    #[test]
    fn answers_only_count_for_the_displayed_question() {
        let mut world = World::new();
        world.advance(SessionStatus::QuestionActive, Some(0));
        let local = reconcile(None, &world.snapshot(Vec::new())).unwrap();

        let late = world.answer(0, 1);
        assert!(reconcile(Some(&local), &Observation::Answer(late)).is_none());

        let current = world.answer(1, 0);
        let local = reconcile(Some(&local), &Observation::Answer(current.clone())).unwrap();
        assert!(local.answered.contains(&current.participant_id));

        let next_question = world.advance(SessionStatus::QuestionActive, Some(1));
        let local = reconcile(Some(&local), &Observation::Session(next_question)).unwrap();
        assert!(local.answered.is_empty());
    }

    #[test]
    fn any_order_converges_to_the_fresh_snapshot() {
        let mut world = World::new();
        let mut observations = vec![world.snapshot(Vec::new())];
        observations.push(Observation::Session(
            world.advance(SessionStatus::Active, None),
        ));
        observations.push(Observation::Session(
            world.advance(SessionStatus::QuestionActive, Some(0)),
        ));
        let answer = world.answer(0, 0);
        world.participants[0].score = answer.points;
        world.participants[0].revision = 1;
        observations.push(Observation::Answer(answer.clone()));
        observations.push(Observation::Participant(world.participants[0].clone()));
        let fresh = world.snapshot(vec![answer]);

        let expected = reconcile(None, &fresh).unwrap();

        let mut forward = observations.clone();
        forward.push(fresh.clone());
        let mut backward: Vec<_> = observations.into_iter().rev().collect();
        backward.push(fresh);

        assert_eq!(fold(&forward).unwrap(), expected);
        assert_eq!(fold(&backward).unwrap(), expected);
    }
}
