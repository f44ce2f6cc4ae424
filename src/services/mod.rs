/// Answer Collector: validation, scoring and storage of submissions.
pub mod answer_service;
/// OpenAPI documentation generation.
pub mod documentation;
/// Health check service.
pub mod health_service;
/// Per-question results and leaderboards.
pub mod results_service;
/// Points awarded for an answer.
pub mod scoring;
/// Session lifecycle, host commands and timer-driven transitions.
pub mod session_service;
/// Read-only session snapshots.
pub mod snapshot_service;
/// Server-Sent Events message generation.
pub mod sse_events;
/// Server-Sent Events streaming.
pub mod sse_service;
/// Storage connection supervision.
pub mod storage_supervisor;
/// Push and poll reconciliation of session projections.
pub mod sync_service;
/// Team scores and membership commands.
pub mod team_service;
