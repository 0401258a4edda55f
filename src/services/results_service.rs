use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use tokio::sync::RwLock;

use crate::error::Result;
use crate::models::proctoring::ProctoringEvent;
use crate::models::results::{
    ResultsHistory, SectionResult, SectionResultRecord, Stage1Summary, Stage2Summary, StageSummary,
};
use crate::models::section::{SectionKind, SectionStatus};

/// Where completed section results, stage summaries and proctoring audit lines end up.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ResultsStore: Send + Sync {
    async fn submit_section(&self, session_id: &str, record: SectionResultRecord) -> Result<()>;
    async fn submit_stage(&self, session_id: &str, summary: StageSummary) -> Result<()>;
    async fn record_event(&self, session_id: &str, event: ProctoringEvent) -> Result<()>;
    async fn history(&self, session_id: &str) -> Result<ResultsHistory>;
}

#[derive(Default)]
pub struct MemoryResultsStore {
    history: RwLock<HashMap<String, ResultsHistory>>,
    events: RwLock<HashMap<String, Vec<ProctoringEvent>>>,
}

impl MemoryResultsStore {
    pub async fn events(&self, session_id: &str) -> Vec<ProctoringEvent> {
        self.events
            .read()
            .await
            .get(session_id)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl ResultsStore for MemoryResultsStore {
    async fn submit_section(&self, session_id: &str, record: SectionResultRecord) -> Result<()> {
        self.history
            .write()
            .await
            .entry(session_id.to_string())
            .or_default()
            .sections
            .push(record);
        Ok(())
    }

    async fn submit_stage(&self, session_id: &str, summary: StageSummary) -> Result<()> {
        self.history
            .write()
            .await
            .entry(session_id.to_string())
            .or_default()
            .stages
            .push(summary);
        Ok(())
    }

    async fn record_event(&self, session_id: &str, event: ProctoringEvent) -> Result<()> {
        self.events
            .write()
            .await
            .entry(session_id.to_string())
            .or_default()
            .push(event);
        Ok(())
    }

    async fn history(&self, session_id: &str) -> Result<ResultsHistory> {
        Ok(self
            .history
            .read()
            .await
            .get(session_id)
            .cloned()
            .unwrap_or_default())
    }
}

#[derive(Clone)]
pub struct PgResultsStore {
    pool: PgPool,
}

impl PgResultsStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn submit_stage1(&self, session_id: &str, s: &Stage1Summary) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO stage1_results (
                session_id, typing_passed, reading_passed, grammar_passed, stage1_passed
            ) VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(session_id)
        .bind(s.typing_passed)
        .bind(s.reading_passed)
        .bind(s.grammar_passed)
        .bind(s.stage1_passed)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn submit_stage2(&self, session_id: &str, s: &Stage2Summary) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO stage2_results (
                session_id, voice_passed, writing_passed, sjt_passed,
                overall_score, cefr_level, recommendations, stage2_passed
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(session_id)
        .bind(s.voice_passed)
        .bind(s.writing_passed)
        .bind(s.sjt_passed)
        .bind(s.overall_score)
        .bind(&s.cefr_level)
        .bind(serde_json::to_value(&s.recommendations)?)
        .bind(s.stage2_passed)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl ResultsStore for PgResultsStore {
    async fn submit_section(&self, session_id: &str, record: SectionResultRecord) -> Result<()> {
        let payload = record.result.as_ref().map(serde_json::to_value).transpose()?;
        sqlx::query(
            r#"
            INSERT INTO section_results (
                session_id, section_kind, status, score, passed, payload, recorded_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(session_id)
        .bind(record.kind.as_str())
        .bind(record.status.as_str())
        .bind(record.result.as_ref().map(SectionResult::score))
        .bind(record.result.as_ref().map(SectionResult::passed))
        .bind(payload)
        .bind(record.recorded_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn submit_stage(&self, session_id: &str, summary: StageSummary) -> Result<()> {
        match &summary {
            StageSummary::One(s) => self.submit_stage1(session_id, s).await,
            StageSummary::Two(s) => self.submit_stage2(session_id, s).await,
        }
    }

    async fn record_event(&self, session_id: &str, event: ProctoringEvent) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO proctoring_events (session_id, event_type, section_kind, escalated, occurred_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(session_id)
        .bind(event.event_type.to_string())
        .bind(event.section.map(SectionKind::as_str))
        .bind(event.escalated)
        .bind(event.timestamp)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn history(&self, session_id: &str) -> Result<ResultsHistory> {
        let rows = sqlx::query(
            r#"
            SELECT section_kind, status, payload, recorded_at
            FROM section_results
            WHERE session_id = $1
            ORDER BY recorded_at ASC, id ASC
            "#,
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;

        let mut sections = Vec::with_capacity(rows.len());
        for row in rows {
            let kind: String = row.try_get("section_kind")?;
            let status: String = row.try_get("status")?;
            let payload: Option<serde_json::Value> = row.try_get("payload")?;
            sections.push(SectionResultRecord {
                kind: serde_json::from_value::<SectionKind>(serde_json::Value::String(kind))?,
                status: serde_json::from_value::<SectionStatus>(serde_json::Value::String(status))?,
                result: payload.map(serde_json::from_value).transpose()?,
                recorded_at: row.try_get::<DateTime<Utc>, _>("recorded_at")?,
            });
        }

        let mut stages = Vec::new();
        let stage1 = sqlx::query(
            r#"
            SELECT typing_passed, reading_passed, grammar_passed, stage1_passed
            FROM stage1_results
            WHERE session_id = $1
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await?;
        if let Some(row) = stage1 {
            stages.push(StageSummary::One(Stage1Summary {
                typing_passed: row.try_get("typing_passed")?,
                reading_passed: row.try_get("reading_passed")?,
                grammar_passed: row.try_get("grammar_passed")?,
                stage1_passed: row.try_get("stage1_passed")?,
            }));
        }

        let stage2 = sqlx::query(
            r#"
            SELECT voice_passed, writing_passed, sjt_passed, overall_score,
                   cefr_level, recommendations, stage2_passed
            FROM stage2_results
            WHERE session_id = $1
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await?;
        if let Some(row) = stage2 {
            let recommendations: serde_json::Value = row.try_get("recommendations")?;
            stages.push(StageSummary::Two(Stage2Summary {
                voice_passed: row.try_get("voice_passed")?,
                writing_passed: row.try_get("writing_passed")?,
                sjt_passed: row.try_get("sjt_passed")?,
                overall_score: row.try_get("overall_score")?,
                cefr_level: row.try_get("cefr_level")?,
                recommendations: serde_json::from_value(recommendations)?,
                stage2_passed: row.try_get("stage2_passed")?,
            }));
        }

        Ok(ResultsHistory { sections, stages })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::proctoring::ViolationType;

    #[tokio::test]
    async fn memory_store_keeps_sessions_apart() {
        let store = MemoryResultsStore::default();
        let record = SectionResultRecord {
            kind: SectionKind::Reading,
            status: SectionStatus::Completed,
            result: Some(SectionResult::Reading {
                score: 75.0,
                correct_answers: 3,
                total_questions: 4,
                passed: true,
            }),
            recorded_at: Utc::now(),
        };
        store.submit_section("ses_a", record.clone()).await.unwrap();
        store
            .submit_stage(
                "ses_a",
                StageSummary::One(Stage1Summary {
                    typing_passed: true,
                    reading_passed: true,
                    grammar_passed: false,
                    stage1_passed: false,
                }),
            )
            .await
            .unwrap();

        let a = store.history("ses_a").await.unwrap();
        assert_eq!(a.sections, vec![record]);
        assert_eq!(a.stages.len(), 1);
        assert!(!a.stages[0].passed());

        let b = store.history("ses_b").await.unwrap();
        assert!(b.sections.is_empty());
        assert!(b.stages.is_empty());
    }

    #[tokio::test]
    async fn memory_store_appends_events() {
        let store = MemoryResultsStore::default();
        let event = ProctoringEvent {
            event_type: ViolationType::TabHidden,
            timestamp: Utc::now(),
            section: Some(SectionKind::Typing),
            escalated: true,
        };
        store.record_event("ses_a", event.clone()).await.unwrap();
        store.record_event("ses_a", event.clone()).await.unwrap();
        assert_eq!(store.events("ses_a").await.len(), 2);
    }
}
