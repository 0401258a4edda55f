use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use rand::seq::SliceRandom;
use sqlx::PgPool;
use tokio::sync::RwLock;
use validator::Validate;

use crate::dto::typing_text_dto::{CreateTypingTextPayload, UpdateTypingTextPayload};
use crate::error::{Error, Result};
use crate::models::typing_text::TypingText;
use crate::services::question_bank::DEFAULT_TYPING_TEXT;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TypingTextRepository: Send + Sync {
    async fn list(&self) -> Result<Vec<TypingText>>;
    async fn get(&self, id: i32) -> Result<TypingText>;
    async fn create(&self, payload: CreateTypingTextPayload) -> Result<TypingText>;
    async fn update(&self, id: i32, payload: UpdateTypingTextPayload) -> Result<TypingText>;
    async fn delete(&self, id: i32) -> Result<()>;
    async fn random(&self, difficulty: Option<i32>) -> Result<Option<TypingText>>;
}

#[derive(Clone)]
pub struct PgTypingTextRepository {
    pool: PgPool,
}

impl PgTypingTextRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TypingTextRepository for PgTypingTextRepository {
    async fn list(&self) -> Result<Vec<TypingText>> {
        let texts = sqlx::query_as::<_, TypingText>(
            "SELECT * FROM typing_texts ORDER BY difficulty ASC, id ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(texts)
    }

    async fn get(&self, id: i32) -> Result<TypingText> {
        sqlx::query_as::<_, TypingText>("SELECT * FROM typing_texts WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Typing text {} not found", id)))
    }

    async fn create(&self, payload: CreateTypingTextPayload) -> Result<TypingText> {
        payload.validate()?;
        let text = sqlx::query_as::<_, TypingText>(
            r#"
            INSERT INTO typing_texts (text, category, difficulty)
            VALUES ($1, $2, $3)
            RETURNING *
            "#,
        )
        .bind(payload.text.trim())
        .bind(payload.category.unwrap_or_else(|| "general".to_string()))
        .bind(payload.difficulty.unwrap_or(1))
        .fetch_one(&self.pool)
        .await?;
        tracing::info!(id = text.id, difficulty = text.difficulty, "typing text created");
        Ok(text)
    }

    async fn update(&self, id: i32, payload: UpdateTypingTextPayload) -> Result<TypingText> {
        payload.validate()?;
        sqlx::query_as::<_, TypingText>(
            r#"
            UPDATE typing_texts SET
                text = COALESCE($2, text),
                category = COALESCE($3, category),
                difficulty = COALESCE($4, difficulty),
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(payload.text.as_deref().map(str::trim))
        .bind(payload.category)
        .bind(payload.difficulty)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| Error::NotFound(format!("Typing text {} not found", id)))
    }

    async fn delete(&self, id: i32) -> Result<()> {
        let res = sqlx::query("DELETE FROM typing_texts WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if res.rows_affected() == 0 {
            return Err(Error::NotFound(format!("Typing text {} not found", id)));
        }
        Ok(())
    }

    async fn random(&self, difficulty: Option<i32>) -> Result<Option<TypingText>> {
        let text = sqlx::query_as::<_, TypingText>(
            r#"
            SELECT * FROM typing_texts
            WHERE ($1::INT IS NULL OR difficulty = $1)
            ORDER BY RANDOM()
            LIMIT 1
            "#,
        )
        .bind(difficulty)
        .fetch_optional(&self.pool)
        .await?;
        Ok(text)
    }
}

#[derive(Default)]
pub struct MemoryTypingTextRepository {
    texts: RwLock<Vec<TypingText>>,
}

#[async_trait]
impl TypingTextRepository for MemoryTypingTextRepository {
    async fn list(&self) -> Result<Vec<TypingText>> {
        let mut texts = self.texts.read().await.clone();
        texts.sort_by_key(|t| (t.difficulty, t.id));
        Ok(texts)
    }

    async fn get(&self, id: i32) -> Result<TypingText> {
        self.texts
            .read()
            .await
            .iter()
            .find(|t| t.id == id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("Typing text {} not found", id)))
    }

    async fn create(&self, payload: CreateTypingTextPayload) -> Result<TypingText> {
        payload.validate()?;
        let mut texts = self.texts.write().await;
        let now = Utc::now();
        let text = TypingText {
            id: texts.iter().map(|t| t.id).max().unwrap_or(0) + 1,
            text: payload.text.trim().to_string(),
            category: payload.category.unwrap_or_else(|| "general".to_string()),
            difficulty: payload.difficulty.unwrap_or(1),
            created_at: now,
            updated_at: now,
        };
        texts.push(text.clone());
        Ok(text)
    }

    async fn update(&self, id: i32, payload: UpdateTypingTextPayload) -> Result<TypingText> {
        payload.validate()?;
        let mut texts = self.texts.write().await;
        let text = texts
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or_else(|| Error::NotFound(format!("Typing text {} not found", id)))?;
        if let Some(body) = payload.text {
            text.text = body.trim().to_string();
        }
        if let Some(category) = payload.category {
            text.category = category;
        }
        if let Some(difficulty) = payload.difficulty {
            text.difficulty = difficulty;
        }
        text.updated_at = Utc::now();
        Ok(text.clone())
    }

    async fn delete(&self, id: i32) -> Result<()> {
        let mut texts = self.texts.write().await;
        let before = texts.len();
        texts.retain(|t| t.id != id);
        if texts.len() == before {
            return Err(Error::NotFound(format!("Typing text {} not found", id)));
        }
        Ok(())
    }

    async fn random(&self, difficulty: Option<i32>) -> Result<Option<TypingText>> {
        let texts = self.texts.read().await;
        let candidates: Vec<&TypingText> = texts
            .iter()
            .filter(|t| difficulty.map_or(true, |d| t.difficulty == d))
            .collect();
        Ok(candidates.choose(&mut rand::thread_rng()).map(|t| (*t).clone()))
    }
}

/// Picks reference texts for the typing section.
#[derive(Clone)]
pub struct TypingTextService {
    repo: Arc<dyn TypingTextRepository>,
}

impl TypingTextService {
    pub fn new(repo: Arc<dyn TypingTextRepository>) -> Self {
        Self { repo }
    }

    pub fn repository(&self) -> &Arc<dyn TypingTextRepository> {
        &self.repo
    }

    /// A random stored text, or the built-in paragraph when none is available.
    pub async fn reference_text(&self, difficulty: Option<i32>) -> String {
        match self.repo.random(difficulty).await {
            Ok(Some(t)) => t.text,
            Ok(None) => DEFAULT_TYPING_TEXT.to_string(),
            Err(e) => {
                tracing::warn!(error = %e, "typing text lookup failed, using built-in text");
                DEFAULT_TYPING_TEXT.to_string()
            }
        }
    }
}
