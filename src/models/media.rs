use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Audio,
    Video,
}

/// Why a capture is running. One active capture per purpose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaPurpose {
    Security,
    VoiceAnswer,
}

impl MediaPurpose {
    pub fn constraints(self) -> CaptureConstraints {
        match self {
            MediaPurpose::Security => CaptureConstraints { audio: false, video: true },
            MediaPurpose::VoiceAnswer => CaptureConstraints { audio: true, video: false },
        }
    }

    pub fn kind(self) -> MediaKind {
        match self {
            MediaPurpose::Security => MediaKind::Video,
            MediaPurpose::VoiceAnswer => MediaKind::Audio,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureConstraints {
    pub audio: bool,
    pub video: bool,
}

impl CaptureConstraints {
    pub fn kind(&self) -> Option<MediaKind> {
        match (self.audio, self.video) {
            (true, false) => Some(MediaKind::Audio),
            (false, true) => Some(MediaKind::Video),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MediaRecording {
    pub kind: MediaKind,
    pub blob: Bytes,
    pub chunk_count: usize,
    pub started_at: DateTime<Utc>,
    pub stopped_at: DateTime<Utc>,
}

impl MediaRecording {
    pub fn content_type(&self) -> &'static str {
        match self.kind {
            MediaKind::Audio => "audio/webm",
            MediaKind::Video => "video/webm",
        }
    }
}
