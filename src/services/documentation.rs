use utoipa::OpenApi;

#[derive(OpenApi)]
/// Aggregated OpenAPI specification of the live quiz session engine.
#[openapi(
    paths(
        crate::routes::health::healthcheck,
        crate::routes::sse::session_stream,
        crate::routes::sessions::create_session,
        crate::routes::sessions::join_session,
        crate::routes::sessions::get_session,
        crate::routes::sessions::refresh_session,
        crate::routes::sessions::question_results,
        crate::routes::sessions::leaderboard,
        crate::routes::host::select_mode,
        crate::routes::host::start_session,
        crate::routes::host::advance_to_results,
        crate::routes::host::advance_to_next_question,
        crate::routes::host::end_session,
        crate::routes::host::cancel_session,
        crate::routes::host::create_team,
        crate::routes::participant::submit_answer,
        crate::routes::participant::join_team,
    ),
    components(
        schemas(
            crate::dto::health::HealthResponse,
            crate::dto::sse::Handshake,
            crate::dto::sse::SessionViewEvent,
            crate::dto::sse::AnswersOpenEvent,
            crate::dto::sse::AnswerRecordedEvent,
            crate::dto::sse::SessionFinishedEvent,
            crate::dao::models::SessionStatus,
            crate::dao::models::SessionMode,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "sse", description = "Server-sent events streams"),
        (name = "sessions", description = "Session creation, joining and read-only views"),
        (name = "host", description = "Commands reserved to the session host"),
        (name = "participant", description = "Commands issued by participants"),
    )
)]
pub struct ApiDoc;
