//! Live quiz session engine: session lifecycle, timers, answers, teams, results and
//! push/poll synchronization over a pluggable session store.

/// Runtime configuration.
pub mod config;
/// Persistence layer.
pub mod dao;
/// Wire payloads.
pub mod dto;
/// Service and HTTP errors.
pub mod error;
/// HTTP routes.
pub mod routes;
/// Engine operations.
pub mod services;
/// Shared state, timers and the session state machine.
pub mod state;
