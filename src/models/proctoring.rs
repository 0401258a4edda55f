use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::section::SectionKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationType {
    FullscreenExited,
    TabHidden,
    CopyPasteAttempted,
    ShortcutBlocked,
}

impl ViolationType {
    pub fn termination_message(self) -> &'static str {
        match self {
            ViolationType::FullscreenExited => {
                "Your assessment has been submitted because you exited fullscreen mode. You cannot retake this assessment."
            }
            ViolationType::TabHidden => {
                "Your assessment has been submitted because you switched away from the assessment tab. You cannot retake this assessment."
            }
            ViolationType::CopyPasteAttempted => {
                "Your assessment has been submitted after repeated copy or paste attempts. You cannot retake this assessment."
            }
            ViolationType::ShortcutBlocked => {
                "Your assessment has been submitted after repeated use of blocked keyboard shortcuts. You cannot retake this assessment."
            }
        }
    }
}

impl std::fmt::Display for ViolationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ViolationType::FullscreenExited => "fullscreen_exited",
            ViolationType::TabHidden => "tab_hidden",
            ViolationType::CopyPasteAttempted => "copy_paste_attempted",
            ViolationType::ShortcutBlocked => "shortcut_blocked",
        };
        f.write_str(s)
    }
}

/// Append-only audit entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProctoringEvent {
    #[serde(rename = "type")]
    pub event_type: ViolationType,
    pub timestamp: DateTime<Utc>,
    pub section: Option<SectionKind>,
    /// False for attempts that stayed under the warning limit.
    pub escalated: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClipboardAction {
    Copy,
    Cut,
    Paste,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct KeyCombo {
    pub key: String,
    #[serde(default)]
    pub ctrl: bool,
    #[serde(default)]
    pub alt: bool,
    #[serde(default)]
    pub shift: bool,
    #[serde(default)]
    pub meta: bool,
}

impl KeyCombo {
    /// Print, save, devtools, print-screen and window switching.
    pub fn is_blocked(&self) -> bool {
        let key = self.key.to_ascii_lowercase();
        let command = self.ctrl || self.meta;
        match key.as_str() {
            "printscreen" | "f12" => true,
            "p" | "s" => command,
            "i" | "j" | "c" => command && self.shift,
            "tab" => self.alt,
            _ => false,
        }
    }
}

/// Raw observation forwarded by the candidate's browser.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "signal", rename_all = "snake_case")]
pub enum HostSignal {
    FullscreenChanged { fullscreen: bool },
    VisibilityChanged { visible: bool },
    Clipboard { action: ClipboardAction },
    KeyDown(KeyCombo),
    /// Periodic heartbeat carrying the current host state.
    Poll { fullscreen: bool, visible: bool },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalVerdict {
    Allowed,
    Rejected,
}
