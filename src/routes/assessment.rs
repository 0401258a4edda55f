use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde_json::json;
use validator::Validate;

use crate::dto::assessment_dto::{
    AnswerRequest, MediaPermissionsRequest, NavigateRequest, StartSectionRequest,
    TypingProgressRequest, WritingResponseRequest,
};
use crate::error::Error;
use crate::models::media::MediaPurpose;
use crate::models::proctoring::HostSignal;
use crate::models::section::{SectionKind, Stage, WritingTask};
use crate::services::question_bank;
use crate::AppState;

/// Questions and prompts for one section. Answer keys are never serialized.
#[axum::debug_handler]
pub async fn section_content(
    State(state): State<AppState>,
    Path(kind): Path<SectionKind>,
) -> crate::error::Result<Response> {
    let mut body = match kind {
        SectionKind::Typing => json!({
            "kind": kind,
        }),
        SectionKind::Reading => json!({
            "kind": kind,
            "scenarios": question_bank::READING_SCENARIOS,
        }),
        SectionKind::Grammar => json!({
            "kind": kind,
            "questions": question_bank::GRAMMAR_QUESTIONS,
            "writing_prompt": question_bank::GRAMMAR_WRITING_PROMPT,
        }),
        SectionKind::Voice => json!({
            "kind": kind,
            "prompts": question_bank::VOICE_PROMPTS,
        }),
        SectionKind::Writing => json!({
            "kind": kind,
            "prompts": WritingTask::ALL
                .iter()
                .map(|t| question_bank::writing_prompt(*t))
                .collect::<Vec<_>>(),
        }),
        SectionKind::Sjt => json!({
            "kind": kind,
            "scenarios": question_bank::SJT_SCENARIOS,
        }),
    };
    body["time_limit_seconds"] = json!(state.assessment_service.policy().time_limit(kind).num_seconds());
    Ok(Json(body).into_response())
}

#[axum::debug_handler]
pub async fn enter_stage(
    State(state): State<AppState>,
    Path((session_id, stage)): Path<(String, Stage)>,
) -> crate::error::Result<Response> {
    let step = state.assessment_service.enter_stage(&session_id, stage).await?;
    Ok(Json(step).into_response())
}

#[axum::debug_handler]
pub async fn start_section(
    State(state): State<AppState>,
    Path((session_id, kind)): Path<(String, SectionKind)>,
    Json(req): Json<StartSectionRequest>,
) -> crate::error::Result<Response> {
    req.validate()?;
    let step = state
        .assessment_service
        .start_section(&session_id, kind, req)
        .await?;
    Ok(Json(step).into_response())
}

#[axum::debug_handler]
pub async fn submit_section(
    State(state): State<AppState>,
    Path((session_id, kind)): Path<(String, SectionKind)>,
) -> crate::error::Result<Response> {
    let step = state
        .assessment_service
        .submit_section(&session_id, kind)
        .await?;
    Ok(Json(step).into_response())
}

#[axum::debug_handler]
pub async fn record_answer(
    State(state): State<AppState>,
    Path((session_id, kind)): Path<(String, SectionKind)>,
    Json(req): Json<AnswerRequest>,
) -> crate::error::Result<Response> {
    req.validate()?;
    let step = state
        .assessment_service
        .record_answer(&session_id, kind, req)
        .await?;
    Ok(Json(step).into_response())
}

#[axum::debug_handler]
pub async fn record_response(
    State(state): State<AppState>,
    Path((session_id, kind)): Path<(String, SectionKind)>,
    Json(req): Json<WritingResponseRequest>,
) -> crate::error::Result<Response> {
    req.validate()?;
    let svc = &state.assessment_service;
    let step = match (kind, req.task) {
        (SectionKind::Grammar, _) => svc.record_grammar_writing(&session_id, req.response).await?,
        (SectionKind::Writing, Some(task)) => svc.record_writing(&session_id, task, req.response).await?,
        (SectionKind::Writing, None) => {
            return Err(Error::BadRequest("A writing task is required".to_string()))
        }
        _ => {
            return Err(Error::BadRequest(format!(
                "{} does not take written responses",
                kind
            )))
        }
    };
    Ok(Json(step).into_response())
}

#[axum::debug_handler]
pub async fn navigate(
    State(state): State<AppState>,
    Path((session_id, kind)): Path<(String, SectionKind)>,
    Json(req): Json<NavigateRequest>,
) -> crate::error::Result<Response> {
    let step = state
        .assessment_service
        .navigate(&session_id, kind, req.page)
        .await?;
    Ok(Json(step).into_response())
}

#[axum::debug_handler]
pub async fn record_typing(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(req): Json<TypingProgressRequest>,
) -> crate::error::Result<Response> {
    req.validate()?;
    let step = state.assessment_service.record_typing(&session_id, req).await?;
    Ok(Json(step).into_response())
}

#[axum::debug_handler]
pub async fn signal(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(signal): Json<HostSignal>,
) -> crate::error::Result<Response> {
    let step = state.assessment_service.signal(&session_id, signal).await?;
    Ok(Json(step).into_response())
}

#[axum::debug_handler]
pub async fn set_media_permissions(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(req): Json<MediaPermissionsRequest>,
) -> crate::error::Result<Response> {
    let step = state
        .assessment_service
        .set_permissions(&session_id, req)
        .await?;
    Ok(Json(step).into_response())
}

#[axum::debug_handler]
pub async fn push_media_chunk(
    State(state): State<AppState>,
    Path((session_id, purpose)): Path<(String, MediaPurpose)>,
    body: Bytes,
) -> crate::error::Result<Response> {
    if body.is_empty() {
        return Err(Error::BadRequest("Empty media chunk".to_string()));
    }
    state
        .assessment_service
        .push_media_chunk(&session_id, purpose, &body)
        .await?;
    Ok((StatusCode::ACCEPTED, Json(json!({ "accepted": body.len() }))).into_response())
}

#[axum::debug_handler]
pub async fn begin_voice_answer(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> crate::error::Result<Response> {
    let prompt = state.assessment_service.begin_voice_answer(&session_id).await?;
    Ok(Json(prompt).into_response())
}

#[axum::debug_handler]
pub async fn finish_voice_answer(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> crate::error::Result<Response> {
    let step = state.assessment_service.finish_voice_answer(&session_id).await?;
    Ok(Json(step).into_response())
}

#[axum::debug_handler]
pub async fn status(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> crate::error::Result<Response> {
    let status = state.assessment_service.status(&session_id).await?;
    Ok(Json(status).into_response())
}

#[axum::debug_handler]
pub async fn results(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> crate::error::Result<Response> {
    let history = state.assessment_service.results(&session_id).await?;
    Ok(Json(history).into_response())
}
