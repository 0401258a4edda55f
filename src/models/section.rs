use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::results::SectionResult;
use crate::models::typing::TypingAttempt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    #[serde(rename = "stage1")]
    One,
    #[serde(rename = "stage2")]
    Two,
}

impl Stage {
    pub fn sections(self) -> &'static [SectionKind] {
        match self {
            Stage::One => &[SectionKind::Typing, SectionKind::Reading, SectionKind::Grammar],
            Stage::Two => &[SectionKind::Voice, SectionKind::Writing, SectionKind::Sjt],
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stage::One => write!(f, "stage1"),
            Stage::Two => write!(f, "stage2"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionKind {
    Typing,
    Reading,
    Grammar,
    Voice,
    Writing,
    Sjt,
}

impl SectionKind {
    /// Every section in assessment order.
    pub const ALL: [SectionKind; 6] = [
        SectionKind::Typing,
        SectionKind::Reading,
        SectionKind::Grammar,
        SectionKind::Voice,
        SectionKind::Writing,
        SectionKind::Sjt,
    ];

    pub fn stage(self) -> Stage {
        match self {
            SectionKind::Typing | SectionKind::Reading | SectionKind::Grammar => Stage::One,
            SectionKind::Voice | SectionKind::Writing | SectionKind::Sjt => Stage::Two,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SectionKind::Typing => "typing",
            SectionKind::Reading => "reading",
            SectionKind::Grammar => "grammar",
            SectionKind::Voice => "voice",
            SectionKind::Writing => "writing",
            SectionKind::Sjt => "sjt",
        }
    }

    pub fn title(self) -> &'static str {
        match self {
            SectionKind::Typing => "Typing test",
            SectionKind::Reading => "Reading comprehension",
            SectionKind::Grammar => "Grammar and writing",
            SectionKind::Voice => "Voice assessment",
            SectionKind::Writing => "Written communication",
            SectionKind::Sjt => "Situational judgment",
        }
    }
}

impl std::fmt::Display for SectionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionStatus {
    NotStarted,
    Active,
    Completed,
    ForceCompleted,
}

impl SectionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, SectionStatus::Completed | SectionStatus::ForceCompleted)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SectionStatus::NotStarted => "not_started",
            SectionStatus::Active => "active",
            SectionStatus::Completed => "completed",
            SectionStatus::ForceCompleted => "force_completed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WritingTask {
    EmailResponse,
    ComplaintResolution,
    ProcessDocumentation,
}

impl WritingTask {
    pub const ALL: [WritingTask; 3] = [
        WritingTask::EmailResponse,
        WritingTask::ComplaintResolution,
        WritingTask::ProcessDocumentation,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            WritingTask::EmailResponse => "email_response",
            WritingTask::ComplaintResolution => "complaint_resolution",
            WritingTask::ProcessDocumentation => "process_documentation",
        }
    }
}

impl std::str::FromStr for WritingTask {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        WritingTask::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unknown writing task '{}'", s))
    }
}

/// Scores returned for one recorded voice prompt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptScore {
    pub prompt_index: usize,
    pub pronunciation: f64,
    pub fluency: f64,
    pub vocabulary: f64,
    pub grammar: f64,
    pub overall: f64,
    pub cefr_level: Option<String>,
    pub fallback: bool,
}

/// Work captured while a section is active. Graded when the section ends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SectionProgress {
    Empty,
    Typing(TypingAttempt),
    Choices {
        answers: BTreeMap<String, u32>,
    },
    Grammar {
        answers: BTreeMap<String, u32>,
        writing_response: String,
    },
    Voice {
        prompt_index: usize,
        scores: Vec<PromptScore>,
    },
    Writing {
        responses: BTreeMap<WritingTask, String>,
        scores: BTreeMap<WritingTask, f64>,
    },
}

impl SectionProgress {
    pub fn initial(kind: SectionKind, reference_text: Option<String>) -> Self {
        match kind {
            SectionKind::Typing => SectionProgress::Typing(TypingAttempt::new(
                reference_text.unwrap_or_default(),
            )),
            SectionKind::Reading | SectionKind::Sjt => SectionProgress::Choices {
                answers: BTreeMap::new(),
            },
            SectionKind::Grammar => SectionProgress::Grammar {
                answers: BTreeMap::new(),
                writing_response: String::new(),
            },
            SectionKind::Voice => SectionProgress::Voice {
                prompt_index: 0,
                scores: Vec::new(),
            },
            SectionKind::Writing => SectionProgress::Writing {
                responses: BTreeMap::new(),
                scores: BTreeMap::new(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Section {
    pub kind: SectionKind,
    pub status: SectionStatus,
    pub time_limit_seconds: i64,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Bumped on every activation; stale async results carry an older value.
    pub generation: u32,
    /// Review page inside the section (reading scenarios).
    pub page: usize,
    pub progress: SectionProgress,
    pub result: Option<SectionResult>,
}

impl Section {
    pub fn new(kind: SectionKind, time_limit_seconds: i64) -> Self {
        Self {
            kind,
            status: SectionStatus::NotStarted,
            time_limit_seconds,
            started_at: None,
            finished_at: None,
            generation: 0,
            page: 0,
            progress: SectionProgress::Empty,
            result: None,
        }
    }

    pub fn deadline(&self) -> Option<DateTime<Utc>> {
        self.started_at
            .map(|s| s + chrono::Duration::seconds(self.time_limit_seconds))
    }

    pub fn elapsed_seconds(&self, now: DateTime<Utc>) -> f64 {
        match self.started_at {
            Some(started) => {
                let ms = (now - started).num_milliseconds().max(0) as f64 / 1000.0;
                ms.min(self.time_limit_seconds as f64)
            }
            None => 0.0,
        }
    }

    pub fn remaining_seconds(&self, now: DateTime<Utc>) -> Option<i64> {
        if self.status != SectionStatus::Active {
            return None;
        }
        self.deadline().map(|d| (d - now).num_seconds().max(0))
    }
}

/// Handed out when a section becomes active; async work carries it back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionTicket {
    pub kind: SectionKind,
    pub generation: u32,
}
