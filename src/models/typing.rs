use serde::{Deserialize, Serialize};

/// Reference text, live transcript and keystroke log of one typing section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypingAttempt {
    pub reference_text: String,
    pub transcript: String,
    /// Keystroke timestamps in milliseconds, in the order they were observed.
    pub keystrokes: Vec<i64>,
}

impl TypingAttempt {
    pub fn new(reference_text: String) -> Self {
        Self {
            reference_text,
            transcript: String::new(),
            keystrokes: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypingMetrics {
    pub wpm: u32,
    pub accuracy: f64,
    pub consistency: f64,
    pub elapsed_seconds: f64,
    pub total_chars: usize,
    pub correct_chars: usize,
    pub error_chars: usize,
}
