use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Row};
use tokio::sync::RwLock;
use validator::Validate;

use crate::error::{Error, Result};
use crate::models::session::{AssessmentSession, Candidate, SessionValidation, SessionValidity};
use crate::services::assessment_machine::MachineSnapshot;
use crate::utils::token::generate_session_id;

/// Everything persisted for one candidate session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session: AssessmentSession,
    pub snapshot: Option<MachineSnapshot>,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn get(&self, session_id: &str) -> Result<Option<SessionRecord>>;
    async fn set(&self, record: SessionRecord) -> Result<()>;
    async fn clear(&self, session_id: &str) -> Result<()>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SessionValidator: Send + Sync {
    /// Never fails: lookup errors are reported as an invalid session.
    async fn validate(&self, session_id: &str) -> SessionValidation;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SessionInvalidator: Send + Sync {
    async fn invalidate(&self, session_id: &str, reason: &str) -> Result<()>;
}

#[derive(Default)]
pub struct MemorySessionStore {
    records: RwLock<HashMap<String, SessionRecord>>,
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn get(&self, session_id: &str) -> Result<Option<SessionRecord>> {
        Ok(self.records.read().await.get(session_id).cloned())
    }

    async fn set(&self, record: SessionRecord) -> Result<()> {
        self.records
            .write()
            .await
            .insert(record.session.session_id.clone(), record);
        Ok(())
    }

    async fn clear(&self, session_id: &str) -> Result<()> {
        self.records.write().await.remove(session_id);
        Ok(())
    }
}

#[derive(Clone)]
pub struct PgSessionStore {
    pool: PgPool,
}

impl PgSessionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SessionStore for PgSessionStore {
    async fn get(&self, session_id: &str) -> Result<Option<SessionRecord>> {
        let row = sqlx::query(
            r#"
            SELECT session_id, full_name, email, phone, location, created_at,
                   is_valid, invalidated_reason, snapshot
            FROM assessment_sessions
            WHERE session_id = $1
            "#,
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let snapshot = row
            .try_get::<Option<serde_json::Value>, _>("snapshot")?
            .map(serde_json::from_value::<MachineSnapshot>)
            .transpose()?;

        Ok(Some(SessionRecord {
            session: AssessmentSession {
                session_id: row.try_get("session_id")?,
                created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
                is_valid: row.try_get("is_valid")?,
                candidate: Candidate {
                    full_name: row.try_get("full_name")?,
                    email: row.try_get("email")?,
                    phone: row.try_get("phone")?,
                    location: row.try_get("location")?,
                },
                invalidated_reason: row.try_get("invalidated_reason")?,
            },
            snapshot,
        }))
    }

    async fn set(&self, record: SessionRecord) -> Result<()> {
        let snapshot = record
            .snapshot
            .as_ref()
            .map(serde_json::to_value)
            .transpose()?;
        let s = &record.session;

        sqlx::query(
            r#"
            INSERT INTO assessment_sessions (
                session_id, full_name, email, phone, location, created_at,
                is_valid, invalidated_reason, snapshot, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, NOW())
            ON CONFLICT (session_id) DO UPDATE SET
                is_valid = EXCLUDED.is_valid,
                invalidated_reason = EXCLUDED.invalidated_reason,
                snapshot = EXCLUDED.snapshot,
                updated_at = NOW()
            "#,
        )
        .bind(&s.session_id)
        .bind(&s.candidate.full_name)
        .bind(&s.candidate.email)
        .bind(&s.candidate.phone)
        .bind(&s.candidate.location)
        .bind(s.created_at)
        .bind(s.is_valid)
        .bind(&s.invalidated_reason)
        .bind(snapshot)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn clear(&self, session_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM assessment_sessions WHERE session_id = $1")
            .bind(session_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

/// Registration, validation and invalidation of candidate sessions.
#[derive(Clone)]
pub struct SessionService {
    store: Arc<dyn SessionStore>,
    ttl: Duration,
}

impl SessionService {
    pub fn new(store: Arc<dyn SessionStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    pub async fn register(&self, candidate: Candidate, now: DateTime<Utc>) -> Result<AssessmentSession> {
        candidate.validate()?;
        let session = AssessmentSession {
            session_id: generate_session_id(now),
            created_at: now,
            is_valid: true,
            candidate,
            invalidated_reason: None,
        };
        self.store
            .set(SessionRecord {
                session: session.clone(),
                snapshot: None,
            })
            .await?;
        tracing::info!(
            session_id = %session.session_id,
            email = %session.candidate.email,
            "candidate session registered"
        );
        Ok(session)
    }

    pub async fn get(&self, session_id: &str) -> Result<SessionRecord> {
        self.store
            .get(session_id)
            .await?
            .ok_or_else(|| Error::NotFound("No active session found".to_string()))
    }

    /// Validity at `now`. An expired session is flipped to invalid in the store.
    pub async fn check(&self, session_id: &str, now: DateTime<Utc>) -> Result<SessionValidation> {
        let Some(mut record) = self.store.get(session_id).await? else {
            return Ok(SessionValidation::invalid("Session is invalid or expired", now));
        };

        match record.session.validity(now, self.ttl) {
            SessionValidity::Valid => Ok(SessionValidation::valid(now)),
            SessionValidity::Invalid => {
                Ok(SessionValidation::invalid("Session is invalid or expired", now))
            }
            SessionValidity::Expired => {
                record.session.is_valid = false;
                record.session.invalidated_reason = Some("expired".to_string());
                self.store.set(record).await?;
                tracing::info!(session_id = %session_id, "session expired");
                Ok(SessionValidation::expired(now))
            }
        }
    }

    pub async fn save_snapshot(&self, session_id: &str, snapshot: MachineSnapshot) -> Result<()> {
        let mut record = self.get(session_id).await?;
        record.session.is_valid = record.session.is_valid && snapshot.session_valid;
        record.snapshot = Some(snapshot);
        self.store.set(record).await
    }

    pub async fn load_snapshot(&self, session_id: &str) -> Result<Option<MachineSnapshot>> {
        Ok(self.get(session_id).await?.snapshot)
    }
}

#[async_trait]
impl SessionValidator for SessionService {
    async fn validate(&self, session_id: &str) -> SessionValidation {
        let now = Utc::now();
        match self.check(session_id, now).await {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(session_id = %session_id, error = %e, "session validation failed");
                SessionValidation::invalid("Unable to validate session", now)
            }
        }
    }
}

#[async_trait]
impl SessionInvalidator for SessionService {
    async fn invalidate(&self, session_id: &str, reason: &str) -> Result<()> {
        let mut record = self.get(session_id).await?;
        record.session.is_valid = false;
        record.session.invalidated_reason = Some(reason.to_string());
        self.store.set(record).await?;
        tracing::info!(
            session_id = %session_id,
            reason = %reason,
            at = %Utc::now().to_rfc3339(),
            "session invalidated"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> SessionService {
        SessionService::new(Arc::new(MemorySessionStore::default()), Duration::hours(3))
    }

    fn candidate() -> Candidate {
        Candidate {
            full_name: "Dana Reyes".into(),
            email: "dana@example.com".into(),
            phone: Some("+1 555 0100".into()),
            location: None,
        }
    }

    #[tokio::test]
    async fn registered_session_is_valid() {
        let svc = service();
        let now = Utc::now();
        let session = svc.register(candidate(), now).await.unwrap();
        assert!(session.session_id.starts_with("ses_"));
        let v = svc.check(&session.session_id, now + Duration::hours(1)).await.unwrap();
        assert!(v.valid);
    }

    #[tokio::test]
    async fn session_expires_after_three_hours() {
        let svc = service();
        let t = Utc::now();
        let session = svc.register(candidate(), t).await.unwrap();

        let v = svc.check(&session.session_id, t + Duration::hours(4)).await.unwrap();
        assert!(!v.valid);
        assert!(v.expired);

        // The flag stays flipped even if asked again "earlier".
        let v = svc.check(&session.session_id, t).await.unwrap();
        assert!(!v.valid);
    }

    #[tokio::test]
    async fn invalidation_is_permanent() {
        let svc = service();
        let now = Utc::now();
        let session = svc.register(candidate(), now).await.unwrap();
        svc.invalidate(&session.session_id, "fullscreen_exit").await.unwrap();

        let v = svc.validate(&session.session_id).await;
        assert!(!v.valid);
        let record = svc.get(&session.session_id).await.unwrap();
        assert_eq!(record.session.invalidated_reason.as_deref(), Some("fullscreen_exit"));
    }

    #[tokio::test]
    async fn unknown_session_is_invalid() {
        let svc = service();
        let v = svc.validate("ses_missing").await;
        assert!(!v.valid);
        assert!(svc.invalidate("ses_missing", "x").await.is_err());
    }

    #[tokio::test]
    async fn bad_email_rejected() {
        let svc = service();
        let mut c = candidate();
        c.email = "not-an-email".into();
        let err = svc.register(c, Utc::now()).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn store_failure_reads_as_invalid() {
        let mut store = MockSessionStore::new();
        store
            .expect_get()
            .returning(|_| Err(Error::Internal("db down".into())));
        let svc = SessionService::new(Arc::new(store), Duration::hours(3));
        let v = svc.validate("ses_1").await;
        assert!(!v.valid);
        assert_eq!(v.message.as_deref(), Some("Unable to validate session"));
    }
}
