use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::models::section::SectionKind;

/// What to do when the scoring oracle cannot be reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackScoring {
    /// Zero scores, not passed.
    Conservative,
    /// Fixed optimistic scores that pass (legacy behaviour).
    Optimistic,
}

impl std::str::FromStr for FallbackScoring {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "conservative" => Ok(Self::Conservative),
            "optimistic" => Ok(Self::Optimistic),
            other => Err(format!("unknown fallback scoring '{}'", other)),
        }
    }
}

/// Result synthesized for a section that is force-completed by a violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForceCompletionPolicy {
    /// Grade whatever progress exists and mark the section as not passed.
    Fail,
    /// Fixed default scores marked as passed (legacy behaviour).
    Lenient,
}

impl std::str::FromStr for ForceCompletionPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fail" => Ok(Self::Fail),
            "lenient" => Ok(Self::Lenient),
            other => Err(format!("unknown force completion policy '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PassThresholds {
    pub typing_wpm: u32,
    pub typing_accuracy: f64,
    pub reading: f64,
    pub grammar_combined: f64,
    pub voice: f64,
    pub writing: f64,
    pub sjt: f64,
}

impl Default for PassThresholds {
    fn default() -> Self {
        Self {
            typing_wpm: 35,
            typing_accuracy: 85.0,
            reading: 70.0,
            grammar_combined: 75.0,
            voice: 75.0,
            writing: 75.0,
            sjt: 70.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AssessmentPolicy {
    pub session_ttl: Duration,
    pub fullscreen_exit_grace: Duration,
    pub shortcut_warning_limit: u32,
    pub media_timeslice: std::time::Duration,
    pub thresholds: PassThresholds,
    pub fallback_scoring: FallbackScoring,
    pub force_completion: ForceCompletionPolicy,
}

impl AssessmentPolicy {
    pub fn time_limit(&self, kind: SectionKind) -> Duration {
        match kind {
            SectionKind::Typing => Duration::minutes(3),
            SectionKind::Reading => Duration::minutes(10),
            SectionKind::Grammar => Duration::minutes(10),
            // 30 + 90 + 120 seconds of speaking plus preparation time.
            SectionKind::Voice => Duration::minutes(10),
            SectionKind::Writing => Duration::minutes(20),
            SectionKind::Sjt => Duration::minutes(15),
        }
    }
}

impl Default for AssessmentPolicy {
    fn default() -> Self {
        Self {
            session_ttl: Duration::hours(3),
            fullscreen_exit_grace: Duration::seconds(3),
            shortcut_warning_limit: 3,
            media_timeslice: std::time::Duration::from_millis(1000),
            thresholds: PassThresholds::default(),
            fallback_scoring: FallbackScoring::Conservative,
            force_completion: ForceCompletionPolicy::Fail,
        }
    }
}
