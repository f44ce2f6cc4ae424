use std::time::{Duration, SystemTime};

use indexmap::IndexMap;
use tokio::time::sleep;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    dao::{
        models::{
            AnswerEntity, ParticipantEntity, SessionEntity, SessionMode, SessionStatus, TeamEntity,
        },
        session_store::SessionStore,
        storage::{StorageError, StorageResult},
    },
    dto::session::{CreateTeamRequest, JoinTeamRequest, ParticipantSummary, TeamSummary},
    error::ServiceError,
    services::session_service,
    state::SharedState,
};

const CLEANUP_ATTEMPTS: u32 = 3;
const CLEANUP_INITIAL_DELAY: Duration = Duration::from_millis(100);

/// Group participants by team and derive each team's score from its current members.
///
/// Teams keep the order of `teams`; participants without a known team are ignored.
pub fn team_summaries(teams: &[TeamEntity], participants: &[ParticipantEntity]) -> Vec<TeamSummary> {
    let mut grouped = empty_summaries(teams);

    for participant in participants {
        let Some(team) = participant.team_id.and_then(|id| grouped.get_mut(&id)) else {
            continue;
        };
        team.score += participant.score;
        team.members.push(participant.id);
    }

    grouped.into_values().collect()
}

/// Final standings of a finished session, rebuilt from the team stamped on every answer.
///
/// Memberships are gone once a session ended, so members are the participants that answered
/// for the team.
pub fn final_team_summaries(teams: &[TeamEntity], answers: &[AnswerEntity]) -> Vec<TeamSummary> {
    let mut grouped = empty_summaries(teams);

    for answer in answers {
        let Some(team) = answer.team_id.and_then(|id| grouped.get_mut(&id)) else {
            continue;
        };
        team.score += answer.points;
        if !team.members.contains(&answer.participant_id) {
            team.members.push(answer.participant_id);
        }
    }

    grouped.into_values().collect()
}

fn empty_summaries(teams: &[TeamEntity]) -> IndexMap<Uuid, TeamSummary> {
    teams
        .iter()
        .map(|team| {
            (
                team.id,
                TeamSummary {
                    id: team.id,
                    name: team.name.clone(),
                    score: 0,
                    members: Vec::new(),
                },
            )
        })
        .collect()
}

/// Team standings as readers should see them: live members while the session runs, the
/// answer-derived final standings once it ended.
pub async fn team_standings(
    store: &dyn SessionStore,
    session: &SessionEntity,
    teams: &[TeamEntity],
    participants: &[ParticipantEntity],
) -> StorageResult<Vec<TeamSummary>> {
    if !session.status.is_terminal() {
        return Ok(team_summaries(teams, participants));
    }
    let answers = session_answers(store, session).await?;
    Ok(final_team_summaries(teams, &answers))
}

/// Every answer recorded in a session, question by question.
pub async fn session_answers(
    store: &dyn SessionStore,
    session: &SessionEntity,
) -> StorageResult<Vec<AnswerEntity>> {
    let played = session
        .current_question_index
        .map_or(0, |index| index + 1)
        .min(session.question_order.len());
    let per_question = futures::future::try_join_all(
        session.question_order[..played]
            .iter()
            .map(|question_id| store.list_answers(session.id, *question_id)),
    )
    .await?;
    Ok(per_question.into_iter().flatten().collect())
}

/// Number of teams that currently have at least one member.
pub fn teams_with_members(teams: &[TeamEntity], participants: &[ParticipantEntity]) -> usize {
    team_summaries(teams, participants)
        .iter()
        .filter(|team| !team.members.is_empty())
        .count()
}

/// Create a team in a waiting team-mode session. Host only.
pub async fn create_team(
    state: &SharedState,
    session_id: Uuid,
    caller: Uuid,
    request: CreateTeamRequest,
) -> Result<TeamSummary, ServiceError> {
    let store = state.require_store().await?;
    let session = session_service::load_session(store.as_ref(), session_id).await?;
    session_service::ensure_host(&session, caller)?;
    ensure_team_lobby(session.status, session.mode)?;

    let team = TeamEntity {
        id: Uuid::new_v4(),
        session_id,
        name: request.name.trim().to_string(),
        created_at: SystemTime::now(),
    };
    store.create_team(team.clone()).await?;
    info!(session_id = %session_id, team_id = %team.id, name = %team.name, "team created");

    Ok(TeamSummary {
        id: team.id,
        name: team.name,
        score: 0,
        members: Vec::new(),
    })
}

/// Put the caller's participant into a team of the same session.
pub async fn join_team(
    state: &SharedState,
    session_id: Uuid,
    team_id: Uuid,
    caller: Uuid,
    request: JoinTeamRequest,
) -> Result<ParticipantSummary, ServiceError> {
    let store = state.require_store().await?;
    let session = session_service::load_session(store.as_ref(), session_id).await?;
    let participant =
        session_service::load_owned_participant(store.as_ref(), session_id, request.participant_id, caller)
            .await?;
    ensure_team_lobby(session.status, session.mode)?;

    let teams = store.list_teams(session_id).await?;
    if !teams.iter().any(|team| team.id == team_id) {
        return Err(ServiceError::NotFound(format!("team `{team_id}`")));
    }

    let updated = store.assign_team(participant.id, Some(team_id)).await?;
    info!(
        session_id = %session_id,
        participant_id = %participant.id,
        team_id = %team_id,
        "participant joined team"
    );
    Ok(ParticipantSummary::from(&updated))
}

fn ensure_team_lobby(status: SessionStatus, mode: Option<SessionMode>) -> Result<(), ServiceError> {
    if status != SessionStatus::Waiting {
        return Err(ServiceError::InvalidState(
            "teams can only change while the session is waiting".into(),
        ));
    }
    if mode != Some(SessionMode::Team) {
        return Err(ServiceError::InvalidState(
            "teams require the session to be in team mode".into(),
        ));
    }
    Ok(())
}

/// Detach every participant of a finished session from its team, retrying with backoff.
pub async fn clear_memberships(
    store: &dyn SessionStore,
    session_id: Uuid,
) -> Result<usize, StorageError> {
    let mut attempt = 1;
    let mut delay = CLEANUP_INITIAL_DELAY;
    loop {
        match store.clear_team_memberships(session_id).await {
            Ok(cleared) => {
                info!(session_id = %session_id, cleared = cleared.len(), "team memberships cleared");
                return Ok(cleared.len());
            }
            Err(err) if attempt < CLEANUP_ATTEMPTS => {
                warn!(session_id = %session_id, attempt, error = %err, "team cleanup failed; retrying");
                sleep(delay).await;
                delay *= 2;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::UNIX_EPOCH;

    use super::*;

    fn team(name: &str) -> TeamEntity {
        TeamEntity {
            id: Uuid::new_v4(),
            session_id: Uuid::nil(),
            name: name.into(),
            created_at: UNIX_EPOCH,
        }
    }

    fn member(team_id: Option<Uuid>, score: i64) -> ParticipantEntity {
        ParticipantEntity {
            id: Uuid::new_v4(),
            session_id: Uuid::nil(),
            user_id: Uuid::new_v4(),
            display_name: "p".into(),
            team_id,
            score,
            revision: 0,
            joined_seq: 0,
            joined_at: UNIX_EPOCH,
        }
    }

    #[test]
    fn team_score_is_sum_of_members() {
        let red = team("red");
        let blue = team("blue");
        let players = vec![
            member(Some(red.id), 120),
            member(Some(red.id), 80),
            member(None, 500),
            member(Some(Uuid::new_v4()), 40),
        ];
        let teams = vec![red.clone(), blue.clone()];

        let summaries = team_summaries(&teams, &players);
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].id, red.id);
        assert_eq!(summaries[0].score, 200);
        assert_eq!(summaries[0].members.len(), 2);
        assert_eq!(summaries[1].score, 0);

        // recomputing without new answers yields the same result
        assert_eq!(team_summaries(&teams, &players), summaries);
        assert_eq!(teams_with_members(&teams, &players), 1);
    }

    #[test]
    fn cleared_memberships_leave_empty_teams() {
        let red = team("red");
        let players = vec![member(None, 120), member(None, 80)];

        let summaries = team_summaries(&[red], &players);
        assert_eq!(summaries[0].score, 0);
        assert!(summaries[0].members.is_empty());
    }

    #[test]
    fn final_standings_survive_cleared_memberships() {
        let red = team("red");
        let blue = team("blue");
        let ada = member(None, 195);
        let bob = member(None, 0);
        let scored = |participant: &ParticipantEntity, team_id: Uuid, points: i64| AnswerEntity {
            id: Uuid::new_v4(),
            session_id: Uuid::nil(),
            participant_id: participant.id,
            team_id: Some(team_id),
            question_id: Uuid::new_v4(),
            question_index: 0,
            selected_option: Some(0),
            is_correct: points > 0,
            points,
            time_taken_ms: 500,
            submitted_at_ms: 0,
        };
        let answers = vec![
            scored(&ada, red.id, 120),
            scored(&ada, red.id, 75),
            scored(&bob, blue.id, 0),
        ];
        let teams = vec![red.clone(), blue.clone()];

        // memberships are already cleared
        assert!(team_summaries(&teams, &[ada.clone(), bob.clone()])
            .iter()
            .all(|team| team.score == 0));

        let standings = final_team_summaries(&teams, &answers);
        assert_eq!(standings[0].id, red.id);
        assert_eq!(standings[0].score, 195);
        assert_eq!(standings[0].members, vec![ada.id]);
        assert_eq!(standings[1].score, 0);
        assert_eq!(standings[1].members, vec![bob.id]);
    }

    #[test]
    fn lobby_guard() {
        assert!(ensure_team_lobby(SessionStatus::Waiting, Some(SessionMode::Team)).is_ok());
        assert!(matches!(
            ensure_team_lobby(SessionStatus::Active, Some(SessionMode::Team)),
            Err(ServiceError::InvalidState(_))
        ));
        assert!(matches!(
            ensure_team_lobby(SessionStatus::Waiting, None),
            Err(ServiceError::InvalidState(_))
        ));
    }
}
