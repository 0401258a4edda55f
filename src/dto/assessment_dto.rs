use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::models::proctoring::{ProctoringEvent, SignalVerdict};
use crate::models::results::{SectionResult, StageSummary};
use crate::models::section::{SectionKind, SectionStatus, WritingTask};
use crate::services::assessment_machine::AssessmentPhase;
use crate::services::question_bank::VoicePrompt;

#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct StartSectionRequest {
    pub fullscreen: bool,
    pub visible: bool,
    /// Preferred typing text difficulty.
    #[validate(range(min = 1, max = 3))]
    pub difficulty: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct TypingProgressRequest {
    #[validate(length(max = 10000))]
    pub transcript: String,
    /// Keystroke timestamps in milliseconds.
    #[serde(default)]
    #[validate(length(max = 20000))]
    pub keystrokes: Vec<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct AnswerRequest {
    #[validate(length(min = 1))]
    pub question_id: String,
    pub option: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct WritingResponseRequest {
    /// Absent for the grammar section's short writing task.
    pub task: Option<WritingTask>,
    #[validate(length(max = 20000))]
    pub response: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NavigateRequest {
    pub page: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MediaPermissionsRequest {
    pub video: Option<bool>,
    pub audio: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveSectionView {
    pub kind: SectionKind,
    pub generation: u32,
    pub started_at: Option<DateTime<Utc>>,
    pub remaining_seconds: Option<i64>,
    pub page: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub live_wpm: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice_prompt_index: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SectionView {
    pub kind: SectionKind,
    pub title: String,
    pub status: SectionStatus,
    pub result: Option<SectionResult>,
}

/// Everything the candidate page needs to render the current state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssessmentStatus {
    pub session_id: String,
    pub phase: AssessmentPhase,
    pub session_valid: bool,
    pub current_section: Option<SectionKind>,
    pub active_section: Option<ActiveSectionView>,
    pub sections: Vec<SectionView>,
    pub stage_summaries: Vec<StageSummary>,
    pub proctoring_log: Vec<ProctoringEvent>,
    /// Clipboard, context menu and blocked shortcuts must be disabled while true.
    pub lockdown: bool,
    pub pending_violation_deadline: Option<DateTime<Utc>>,
    /// Explicit reason once the assessment is complete.
    pub message: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Result of a state-changing call. Persistence failures do not block the
/// candidate, they are reported here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verdict: Option<SignalVerdict>,
    pub status: AssessmentStatus,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub persistence_errors: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct VoicePromptResponse {
    pub prompt_index: usize,
    pub prompt: VoicePrompt,
    pub status: AssessmentStatus,
}
