pub mod assessment;
pub mod health;
pub mod sessions;
pub mod typing_texts;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};

use crate::middleware::rate_limit::{new_rps_state, rps_middleware};
use crate::AppState;

/// Media chunks are a second of compressed webcam video at most.
const MEDIA_CHUNK_LIMIT: usize = 8 * 1024 * 1024;

/// Every API route, rate limited per client at `rps`. State is attached by the caller.
pub fn api_router(rps: u32) -> Router<AppState> {
    let sessions = Router::new()
        .route("/api/register-candidate", post(sessions::register_candidate))
        .route("/api/sessions/:id/validate", get(sessions::validate_session))
        .route("/api/sessions/:id/invalidate", post(sessions::invalidate_session))
        .route(
            "/api/sessions/:id/stages/:stage/enter",
            post(assessment::enter_stage),
        )
        .route(
            "/api/sessions/:id/sections/:kind/start",
            post(assessment::start_section),
        )
        .route(
            "/api/sessions/:id/sections/:kind/submit",
            post(assessment::submit_section),
        )
        .route(
            "/api/sessions/:id/sections/:kind/answers",
            post(assessment::record_answer),
        )
        .route(
            "/api/sessions/:id/sections/:kind/responses",
            post(assessment::record_response),
        )
        .route(
            "/api/sessions/:id/sections/:kind/page",
            post(assessment::navigate),
        )
        .route("/api/sessions/:id/typing", post(assessment::record_typing))
        .route("/api/sessions/:id/signals", post(assessment::signal))
        .route(
            "/api/sessions/:id/media/permissions",
            post(assessment::set_media_permissions),
        )
        .route(
            "/api/sessions/:id/voice/answer",
            post(assessment::begin_voice_answer).put(assessment::finish_voice_answer),
        )
        .route("/api/sessions/:id/status", get(assessment::status))
        .route("/api/sessions/:id/results", get(assessment::results))
        .route("/api/sections/:kind/content", get(assessment::section_content));

    let media = Router::new()
        .route(
            "/api/sessions/:id/media/:purpose/chunks",
            post(assessment::push_media_chunk),
        )
        .layer(DefaultBodyLimit::max(MEDIA_CHUNK_LIMIT));

    let typing_texts = Router::new()
        .route(
            "/api/typing-texts",
            get(typing_texts::list_typing_texts).post(typing_texts::create_typing_text),
        )
        .route("/api/typing-texts/random", get(typing_texts::random_typing_text))
        .route(
            "/api/typing-texts/:id",
            get(typing_texts::get_typing_text)
                .patch(typing_texts::update_typing_text)
                .delete(typing_texts::delete_typing_text),
        );

    Router::new()
        .route("/health", get(health::health))
        .merge(
            sessions
                .merge(media)
                .merge(typing_texts)
                .layer(axum::middleware::from_fn_with_state(
                    new_rps_state(rps),
                    rps_middleware,
                )),
        )
}
