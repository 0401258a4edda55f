use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::section::{SectionKind, SectionStatus, Stage};
use crate::models::typing::TypingMetrics;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoiceResult {
    pub pronunciation: f64,
    pub fluency: f64,
    pub vocabulary: f64,
    pub grammar: f64,
    pub overall: f64,
    pub cefr_level: String,
    pub prompts_scored: usize,
    pub passed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WritingResult {
    pub email_response_score: f64,
    pub complaint_resolution_score: f64,
    pub process_documentation_score: f64,
    pub overall_score: f64,
    pub passed: bool,
}

/// Kind-specific payload of a finished section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SectionResult {
    Typing {
        metrics: TypingMetrics,
        passed: bool,
    },
    Reading {
        score: f64,
        correct_answers: u32,
        total_questions: u32,
        passed: bool,
    },
    Grammar {
        grammar_score: f64,
        writing_score: f64,
        combined_score: f64,
        passed: bool,
    },
    Voice(VoiceResult),
    Writing(WritingResult),
    Sjt {
        score: f64,
        correct_answers: u32,
        total_scenarios: u32,
        passed: bool,
    },
}

impl SectionResult {
    pub fn kind(&self) -> SectionKind {
        match self {
            SectionResult::Typing { .. } => SectionKind::Typing,
            SectionResult::Reading { .. } => SectionKind::Reading,
            SectionResult::Grammar { .. } => SectionKind::Grammar,
            SectionResult::Voice(_) => SectionKind::Voice,
            SectionResult::Writing(_) => SectionKind::Writing,
            SectionResult::Sjt { .. } => SectionKind::Sjt,
        }
    }

    pub fn passed(&self) -> bool {
        match self {
            SectionResult::Typing { passed, .. }
            | SectionResult::Reading { passed, .. }
            | SectionResult::Grammar { passed, .. }
            | SectionResult::Sjt { passed, .. } => *passed,
            SectionResult::Voice(v) => v.passed,
            SectionResult::Writing(w) => w.passed,
        }
    }

    /// Headline score on a 0-100 scale.
    pub fn score(&self) -> f64 {
        match self {
            SectionResult::Typing { metrics, .. } => metrics.accuracy,
            SectionResult::Reading { score, .. } | SectionResult::Sjt { score, .. } => *score,
            SectionResult::Grammar { combined_score, .. } => *combined_score,
            SectionResult::Voice(v) => v.overall,
            SectionResult::Writing(w) => w.overall_score,
        }
    }
}

/// One row of the results log: a finished section, with or without a result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectionResultRecord {
    pub kind: SectionKind,
    pub status: SectionStatus,
    pub result: Option<SectionResult>,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stage1Summary {
    pub typing_passed: bool,
    pub reading_passed: bool,
    pub grammar_passed: bool,
    pub stage1_passed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stage2Summary {
    pub voice_passed: bool,
    pub writing_passed: bool,
    pub sjt_passed: bool,
    pub overall_score: f64,
    pub cefr_level: String,
    pub recommendations: Vec<String>,
    pub stage2_passed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum StageSummary {
    #[serde(rename = "stage1")]
    One(Stage1Summary),
    #[serde(rename = "stage2")]
    Two(Stage2Summary),
}

impl StageSummary {
    pub fn stage(&self) -> Stage {
        match self {
            StageSummary::One(_) => Stage::One,
            StageSummary::Two(_) => Stage::Two,
        }
    }

    pub fn passed(&self) -> bool {
        match self {
            StageSummary::One(s) => s.stage1_passed,
            StageSummary::Two(s) => s.stage2_passed,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResultsHistory {
    pub sections: Vec<SectionResultRecord>,
    pub stages: Vec<StageSummary>,
}
