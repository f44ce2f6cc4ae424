/// Persisted row definitions.
pub mod models;
/// Session persistence contract and its backends.
pub mod session_store;
/// Backend-agnostic storage errors.
pub mod storage;
