use std::time::SystemTime;
use time::{OffsetDateTime, format_description::well_known::Rfc3339};

/// Health route payloads.
pub mod health;
/// Session, team, answer and results payloads.
pub mod session;
/// Server-sent event payloads.
pub mod sse;
/// Custom validators of request payloads.
pub mod validation;

fn format_system_time(time: SystemTime) -> String {
    OffsetDateTime::from(time)
        .format(&Rfc3339)
        .unwrap_or_else(|_| "invalid-timestamp".into())
}
