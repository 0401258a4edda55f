use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::models::session::Candidate;

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RegisterCandidateRequest {
    #[validate(length(min = 1, message = "Full name is required"))]
    pub full_name: String,
    #[validate(email(message = "Invalid email address"))]
    pub email: String,
    pub phone: Option<String>,
    pub location: Option<String>,
}

impl From<RegisterCandidateRequest> for Candidate {
    fn from(req: RegisterCandidateRequest) -> Self {
        Candidate {
            full_name: req.full_name.trim().to_string(),
            email: req.email.trim().to_string(),
            phone: req.phone,
            location: req.location,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterCandidateResponse {
    pub session_id: String,
    pub session_created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct InvalidateSessionRequest {
    #[validate(length(min = 1, max = 200))]
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvalidateSessionResponse {
    pub success: bool,
    pub message: String,
}
