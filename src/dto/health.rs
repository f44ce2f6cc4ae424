use serde::Serialize;
use utoipa::ToSchema;

/// Health response returned by the `/healthcheck` route.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    /// Health status ("ok" or "degraded").
    pub status: String,
    /// Sessions whose team memberships still await clearing.
    pub pending_team_cleanups: usize,
}

impl HealthResponse {
    /// Response reflecting the storage state and the cleanup backlog.
    pub fn new(degraded: bool, pending_team_cleanups: usize) -> Self {
        let status = if degraded { "degraded" } else { "ok" };
        Self {
            status: status.to_string(),
            pending_team_cleanups,
        }
    }
}
