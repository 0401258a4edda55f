use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use validator::Validate;

use crate::dto::session_dto::{
    InvalidateSessionRequest, InvalidateSessionResponse, RegisterCandidateRequest,
    RegisterCandidateResponse,
};
use crate::utils::time::now;
use crate::AppState;

#[axum::debug_handler]
pub async fn register_candidate(
    State(state): State<AppState>,
    Json(req): Json<RegisterCandidateRequest>,
) -> crate::error::Result<Response> {
    req.validate()?;
    let session = state.session_service.register(req.into(), now()).await?;
    let response = RegisterCandidateResponse {
        session_id: session.session_id,
        session_created_at: session.created_at,
    };
    Ok((StatusCode::CREATED, Json(response)).into_response())
}

#[axum::debug_handler]
pub async fn validate_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> crate::error::Result<Response> {
    let validation = state.session_service.check(&session_id, now()).await?;
    let status = if validation.valid {
        StatusCode::OK
    } else {
        StatusCode::UNAUTHORIZED
    };
    Ok((status, Json(validation)).into_response())
}

#[axum::debug_handler]
pub async fn invalidate_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(req): Json<InvalidateSessionRequest>,
) -> crate::error::Result<Response> {
    req.validate()?;
    state
        .assessment_service
        .invalidate(&session_id, req.reason.trim())
        .await?;
    Ok(Json(InvalidateSessionResponse {
        success: true,
        message: "Session invalidated".to_string(),
    })
    .into_response())
}
