use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use validator::Validate;

use crate::dto::typing_text_dto::{
    CreateTypingTextPayload, RandomTypingTextQuery, UpdateTypingTextPayload,
};
use crate::error::Error;
use crate::AppState;

#[axum::debug_handler]
pub async fn list_typing_texts(State(state): State<AppState>) -> crate::error::Result<Response> {
    let texts = state.typing_texts.repository().list().await?;
    Ok(Json(texts).into_response())
}

#[axum::debug_handler]
pub async fn get_typing_text(
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> crate::error::Result<Response> {
    let text = state.typing_texts.repository().get(id).await?;
    Ok(Json(text).into_response())
}

#[axum::debug_handler]
pub async fn create_typing_text(
    State(state): State<AppState>,
    Json(payload): Json<CreateTypingTextPayload>,
) -> crate::error::Result<Response> {
    payload.validate()?;
    let text = state.typing_texts.repository().create(payload).await?;
    Ok((StatusCode::CREATED, Json(text)).into_response())
}

#[axum::debug_handler]
pub async fn update_typing_text(
    State(state): State<AppState>,
    Path(id): Path<i32>,
    Json(payload): Json<UpdateTypingTextPayload>,
) -> crate::error::Result<Response> {
    payload.validate()?;
    let text = state.typing_texts.repository().update(id, payload).await?;
    Ok(Json(text).into_response())
}

#[axum::debug_handler]
pub async fn delete_typing_text(
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> crate::error::Result<Response> {
    state.typing_texts.repository().delete(id).await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

#[axum::debug_handler]
pub async fn random_typing_text(
    State(state): State<AppState>,
    Query(query): Query<RandomTypingTextQuery>,
) -> crate::error::Result<Response> {
    query.validate()?;
    let text = state
        .typing_texts
        .repository()
        .random(query.difficulty)
        .await?
        .ok_or_else(|| Error::NotFound("No typing texts available".to_string()))?;
    Ok(Json(text).into_response())
}
