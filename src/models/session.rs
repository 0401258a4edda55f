use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct Candidate {
    #[validate(length(min = 1))]
    pub full_name: String,
    #[validate(email)]
    pub email: String,
    pub phone: Option<String>,
    pub location: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssessmentSession {
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    pub is_valid: bool,
    pub candidate: Candidate,
    pub invalidated_reason: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionValidity {
    Valid,
    Invalid,
    Expired,
}

impl AssessmentSession {
    pub fn validity(&self, now: DateTime<Utc>, ttl: Duration) -> SessionValidity {
        if !self.is_valid {
            SessionValidity::Invalid
        } else if now - self.created_at > ttl {
            SessionValidity::Expired
        } else {
            SessionValidity::Valid
        }
    }
}

/// Answer of the session validation collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionValidation {
    pub valid: bool,
    pub expired: bool,
    pub message: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl SessionValidation {
    pub fn valid(timestamp: DateTime<Utc>) -> Self {
        Self {
            valid: true,
            expired: false,
            message: None,
            timestamp,
        }
    }

    pub fn invalid(message: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            valid: false,
            expired: false,
            message: Some(message.into()),
            timestamp,
        }
    }

    pub fn expired(timestamp: DateTime<Utc>) -> Self {
        Self {
            valid: false,
            expired: true,
            message: Some("Session has expired".to_string()),
            timestamp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(created_at: DateTime<Utc>) -> AssessmentSession {
        AssessmentSession {
            session_id: "ses_1".into(),
            created_at,
            is_valid: true,
            candidate: Candidate {
                full_name: "Dana Reyes".into(),
                email: "dana@example.com".into(),
                phone: None,
                location: None,
            },
            invalidated_reason: None,
        }
    }

    #[test]
    fn expires_after_ttl() {
        let t = Utc::now();
        let s = session(t);
        assert_eq!(s.validity(t + Duration::hours(2), Duration::hours(3)), SessionValidity::Valid);
        assert_eq!(s.validity(t + Duration::hours(3), Duration::hours(3)), SessionValidity::Valid);
        assert_eq!(s.validity(t + Duration::hours(4), Duration::hours(3)), SessionValidity::Expired);
    }

    #[test]
    fn invalidated_session_stays_invalid() {
        let t = Utc::now();
        let mut s = session(t);
        s.is_valid = false;
        assert_eq!(s.validity(t, Duration::hours(3)), SessionValidity::Invalid);
    }
}
