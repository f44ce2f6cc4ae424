use std::collections::HashMap;

use uuid::Uuid;

use crate::{
    dao::models::{
        AnswerEntity, ParticipantEntity, QuestionEntity, SessionEntity, SessionMode, SessionStatus,
    },
    dto::session::{
        LeaderboardResponse, OptionTally, ParticipantOutcome, QuestionResultsResponse,
        RankedParticipant, RankedTeam, TeamSummary,
    },
    error::ServiceError,
    services::{session_service, team_service},
    state::SharedState,
};

/// Number of entries shown on a podium.
pub const PODIUM_SIZE: usize = 3;

/// Answer distribution of question `index`.
///
/// Participants without a stored answer are counted as "no answer" together with timeouts.
pub fn question_results(
    index: usize,
    question: &QuestionEntity,
    participants: &[ParticipantEntity],
    answers: &[AnswerEntity],
) -> QuestionResultsResponse {
    let mut counts = vec![0usize; question.options.len()];
    let mut no_answer = 0;

    let by_participant: HashMap<Uuid, &AnswerEntity> = answers
        .iter()
        .filter(|answer| answer.question_id == question.id)
        .map(|answer| (answer.participant_id, answer))
        .collect();

    let outcomes = participants
        .iter()
        .map(|participant| {
            let answer = by_participant.get(&participant.id);
            let selected_option = answer.and_then(|answer| answer.selected_option);
            match selected_option.and_then(|option| counts.get_mut(option)) {
                Some(count) => *count += 1,
                None => no_answer += 1,
            }
            ParticipantOutcome {
                participant_id: participant.id,
                display_name: participant.display_name.clone(),
                selected_option,
                is_correct: answer.is_some_and(|answer| answer.is_correct),
                points: answer.map(|answer| answer.points).unwrap_or_default(),
            }
        })
        .collect();

    let options = question
        .options
        .iter()
        .zip(counts)
        .enumerate()
        .map(|(index, (option, count))| OptionTally {
            index,
            text: option.text.clone(),
            is_correct: option.is_correct,
            count,
        })
        .collect();

    QuestionResultsResponse {
        question_id: question.id,
        index,
        correct_option: question.correct_option(),
        options,
        no_answer,
        outcomes,
    }
}

/// Individual ranking by score, ties broken by arrival order.
pub fn rank_participants(participants: &[ParticipantEntity]) -> Vec<RankedParticipant> {
    let mut ordered: Vec<&ParticipantEntity> = participants.iter().collect();
    ordered.sort_by(|a, b| b.score.cmp(&a.score).then(a.joined_seq.cmp(&b.joined_seq)));

    ordered
        .into_iter()
        .enumerate()
        .map(|(position, participant)| RankedParticipant {
            rank: position + 1,
            participant_id: participant.id,
            display_name: participant.display_name.clone(),
            score: participant.score,
        })
        .collect()
}

/// Team ranking by derived score; ties keep creation order.
pub fn rank_teams(teams: &[TeamSummary]) -> Vec<RankedTeam> {
    let mut ordered: Vec<&TeamSummary> = teams.iter().collect();
    ordered.sort_by(|a, b| b.score.cmp(&a.score));

    ordered
        .into_iter()
        .enumerate()
        .map(|(position, team)| RankedTeam {
            rank: position + 1,
            team_id: team.id,
            name: team.name.clone(),
            score: team.score,
        })
        .collect()
}

/// First [`PODIUM_SIZE`] entries of a ranking, fewer when the ranking is shorter.
pub fn podium<T: Clone>(ranking: &[T]) -> Vec<T> {
    ranking.iter().take(PODIUM_SIZE).cloned().collect()
}

/// Build both leaderboards. Team rankings are only produced in team mode.
pub fn leaderboard(
    mode: Option<SessionMode>,
    participants: &[ParticipantEntity],
    teams: &[TeamSummary],
) -> LeaderboardResponse {
    let ranked = rank_participants(participants);
    let ranked_teams = match mode {
        Some(SessionMode::Team) => rank_teams(teams),
        _ => Vec::new(),
    };

    LeaderboardResponse {
        podium: podium(&ranked),
        participants: ranked,
        team_podium: podium(&ranked_teams),
        teams: ranked_teams,
    }
}

/// Load what [`leaderboard`] needs for a session.
///
/// Finished sessions rank teams from their answers, so the standings outlive team memberships.
pub async fn session_leaderboard(
    state: &SharedState,
    session: &SessionEntity,
) -> Result<LeaderboardResponse, ServiceError> {
    let store = state.require_store().await?;
    let (participants, teams) = futures::try_join!(
        store.list_participants(session.id),
        store.list_teams(session.id)
    )?;
    let standings = match session.mode {
        Some(SessionMode::Team) => {
            team_service::team_standings(store.as_ref(), session, &teams, &participants).await?
        }
        _ => Vec::new(),
    };
    Ok(leaderboard(session.mode, &participants, &standings))
}

/// Current leaderboards of a session, final ones once it ended.
pub async fn leaderboard_for(
    state: &SharedState,
    session_id: Uuid,
) -> Result<LeaderboardResponse, ServiceError> {
    let store = state.require_store().await?;
    let session = session_service::load_session(store.as_ref(), session_id).await?;
    session_leaderboard(state, &session).await
}

/// Results of question `index`, available once that question has been closed.
pub async fn question_results_for(
    state: &SharedState,
    session_id: Uuid,
    index: usize,
) -> Result<QuestionResultsResponse, ServiceError> {
    let store = state.require_store().await?;
    let session = session_service::load_session(store.as_ref(), session_id).await?;

    let question_id = session.question_order.get(index).copied().ok_or_else(|| {
        ServiceError::NotFound(format!("question {index} of session `{session_id}`"))
    })?;
    if !is_closed(&session, index) {
        return Err(ServiceError::InvalidState(format!(
            "question {index} has not been closed yet"
        )));
    }

    let (questions, participants, answers) = futures::try_join!(
        store.list_questions(session.quiz_id),
        store.list_participants(session_id),
        store.list_answers(session_id, question_id)
    )?;
    let question = questions
        .iter()
        .find(|question| question.id == question_id)
        .ok_or(ServiceError::InvalidQuestionIndex {
            index,
            len: session.question_order.len(),
        })?;

    Ok(question_results(index, question, &participants, &answers))
}

fn is_closed(session: &SessionEntity, index: usize) -> bool {
    let Some(current) = session.current_question_index else {
        return false;
    };
    match session.status {
        SessionStatus::QuestionActive => index < current,
        SessionStatus::ShowingResults | SessionStatus::Completed | SessionStatus::Cancelled => {
            index <= current
        }
        SessionStatus::Waiting | SessionStatus::Active => false,
    }
}

#[cfg(test)]
mod tests {
    use std::time::UNIX_EPOCH;

    use super::*;
    use crate::dao::models::{QuestionOptionEntity, TeamEntity};

    fn participant(seq: u64, score: i64, team_id: Option<Uuid>) -> ParticipantEntity {
        ParticipantEntity {
            id: Uuid::new_v4(),
            session_id: Uuid::nil(),
            user_id: Uuid::new_v4(),
            display_name: format!("player-{seq}"),
            team_id,
            score,
            revision: 0,
            joined_seq: seq,
            joined_at: UNIX_EPOCH,
        }
    }

    fn team(name: &str) -> TeamEntity {
        TeamEntity {
            id: Uuid::new_v4(),
            session_id: Uuid::nil(),
            name: name.into(),
            created_at: UNIX_EPOCH,
        }
    }

    fn answer(participant: &ParticipantEntity, question: &QuestionEntity, option: Option<usize>) -> AnswerEntity {
        let is_correct = option.is_some_and(|option| question.options[option].is_correct);
        AnswerEntity {
            id: Uuid::new_v4(),
            session_id: Uuid::nil(),
            participant_id: participant.id,
            team_id: participant.team_id,
            question_id: question.id,
            question_index: 0,
            selected_option: option,
            is_correct,
            points: if is_correct { 150 } else { 0 },
            time_taken_ms: 1_000,
            submitted_at_ms: 0,
        }
    }

    #[test]
    fn question_results_count_missing_answers() {
        let question = QuestionEntity {
            id: Uuid::new_v4(),
            quiz_id: Uuid::nil(),
            position: 0,
            text: "2 + 2".into(),
            media_url: None,
            options: ["3", "4", "5"]
                .into_iter()
                .map(|text| QuestionOptionEntity {
                    text: text.into(),
                    is_correct: text == "4",
                })
                .collect(),
            time_limit_secs: 10,
            base_points: 100,
        };
        let players: Vec<_> = (0..4).map(|seq| participant(seq, 0, None)).collect();
        let answers = vec![
            answer(&players[0], &question, Some(1)),
            answer(&players[1], &question, Some(1)),
            answer(&players[2], &question, None),
        ];

        let results = question_results(0, &question, &players, &answers);

        assert_eq!(results.correct_option, Some(1));
        let counts: Vec<usize> = results.options.iter().map(|tally| tally.count).collect();
        assert_eq!(counts, vec![0, 2, 0]);
        // one timeout and one participant that never answered
        assert_eq!(results.no_answer, 2);
        assert!(results.outcomes[0].is_correct);
        assert_eq!(results.outcomes[3].points, 0);
    }

    #[test]
    fn ties_are_broken_by_arrival_order() {
        let players = vec![
            participant(2, 300, None),
            participant(0, 100, None),
            participant(1, 300, None),
        ];

        let ranking = rank_participants(&players);
        let order: Vec<u64> = ranking
            .iter()
            .map(|entry| {
                players
                    .iter()
                    .find(|player| player.id == entry.participant_id)
                    .map(|player| player.joined_seq)
                    .unwrap_or_default()
            })
            .collect();
        assert_eq!(order, vec![1, 2, 0]);
        assert_eq!(ranking[0].rank, 1);
        assert_eq!(ranking[2].rank, 3);
    }

    #[test]
    fn podium_tolerates_short_rankings() {
        let ranking = rank_participants(&[participant(0, 10, None), participant(1, 20, None)]);
        assert_eq!(podium(&ranking).len(), 2);
        assert!(podium::<RankedParticipant>(&[]).is_empty());
    }

    #[test]
    fn team_ranking_only_in_team_mode() {
        let red = team("red");
        let blue = team("blue");
        let players = vec![
            participant(0, 100, Some(red.id)),
            participant(1, 150, Some(blue.id)),
            participant(2, 100, Some(red.id)),
        ];
        let teams = vec![red.clone(), blue.clone()];

        let summaries = team_service::team_summaries(&teams, &players);
        let board = leaderboard(Some(SessionMode::Team), &players, &summaries);
        assert_eq!(board.teams[0].team_id, red.id);
        assert_eq!(board.teams[0].score, 200);
        assert_eq!(board.teams[1].score, 150);
        assert_eq!(board.team_podium.len(), 2);

        let classic = leaderboard(Some(SessionMode::Classic), &players, &summaries);
        assert!(classic.teams.is_empty());
        assert_eq!(classic.podium.len(), 3);
    }
}
