use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::models::media::{CaptureConstraints, MediaKind, MediaPurpose, MediaRecording};

/// A physical (or browser-proxied) capture device.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MediaDevice: Send + Sync {
    async fn open(
        &self,
        purpose: MediaPurpose,
        constraints: CaptureConstraints,
    ) -> Result<Box<dyn MediaTrack>>;
}

pub trait MediaTrack: Send {
    /// Data produced since the previous drain.
    fn drain(&mut self) -> Option<Bytes>;
    fn stop(&mut self);
}

/// Stops the wrapped track when dropped.
struct TrackGuard(Box<dyn MediaTrack>);

impl Drop for TrackGuard {
    fn drop(&mut self) {
        self.0.stop();
    }
}

/// Single-flight ownership of a capture purpose within one session.
#[derive(Clone, Default)]
pub struct DeviceRegistry {
    held: Arc<Mutex<HashSet<MediaPurpose>>>,
}

impl DeviceRegistry {
    pub fn acquire(&self, purpose: MediaPurpose) -> Result<PurposeLease> {
        let mut held = self
            .held
            .lock()
            .map_err(|_| Error::Internal("device registry poisoned".to_string()))?;
        if !held.insert(purpose) {
            return Err(Error::Conflict(format!(
                "A {:?} capture is already running",
                purpose
            )));
        }
        Ok(PurposeLease {
            purpose,
            held: self.held.clone(),
        })
    }

    pub fn is_held(&self, purpose: MediaPurpose) -> bool {
        self.held
            .lock()
            .map(|h| h.contains(&purpose))
            .unwrap_or(false)
    }
}

pub struct PurposeLease {
    purpose: MediaPurpose,
    held: Arc<Mutex<HashSet<MediaPurpose>>>,
}

impl Drop for PurposeLease {
    fn drop(&mut self) {
        if let Ok(mut held) = self.held.lock() {
            held.remove(&self.purpose);
        }
    }
}

struct ActiveCapture {
    _lease: PurposeLease,
    started_at: DateTime<Utc>,
    track: Arc<Mutex<TrackGuard>>,
    chunks: Arc<Mutex<Vec<Bytes>>>,
    cancel: CancellationToken,
    collector: Option<JoinHandle<()>>,
}

impl Drop for ActiveCapture {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

pub struct MediaCaptureController {
    purpose: MediaPurpose,
    device: Arc<dyn MediaDevice>,
    registry: DeviceRegistry,
    timeslice: Duration,
    active: Option<ActiveCapture>,
}

impl MediaCaptureController {
    pub fn new(
        purpose: MediaPurpose,
        device: Arc<dyn MediaDevice>,
        registry: DeviceRegistry,
        timeslice: Duration,
    ) -> Self {
        Self {
            purpose,
            device,
            registry,
            timeslice,
            active: None,
        }
    }

    pub fn purpose(&self) -> MediaPurpose {
        self.purpose
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    pub async fn start(&mut self, constraints: CaptureConstraints) -> Result<()> {
        if self.active.is_some() {
            return Err(Error::Conflict(format!(
                "{:?} capture already started",
                self.purpose
            )));
        }
        if constraints.kind() != Some(self.purpose.kind()) {
            return Err(Error::BadRequest(format!(
                "{:?} capture requires {:?}-only constraints",
                self.purpose,
                self.purpose.kind()
            )));
        }

        let lease = self.registry.acquire(self.purpose)?;
        let track = self.device.open(self.purpose, constraints).await?;
        let track = Arc::new(Mutex::new(TrackGuard(track)));
        let chunks = Arc::new(Mutex::new(Vec::new()));
        let cancel = CancellationToken::new();

        let collector = tokio::spawn(collect_chunks(
            track.clone(),
            chunks.clone(),
            cancel.clone(),
            self.timeslice,
        ));

        tracing::debug!(purpose = ?self.purpose, "media capture started");
        self.active = Some(ActiveCapture {
            _lease: lease,
            started_at: Utc::now(),
            track,
            chunks,
            cancel,
            collector: Some(collector),
        });
        Ok(())
    }

    /// Finalizes buffered chunks into one recording and releases the device.
    /// Returns `None` when nothing was started.
    pub async fn stop(&mut self) -> Result<Option<MediaRecording>> {
        let Some(mut active) = self.active.take() else {
            return Ok(None);
        };

        active.cancel.cancel();
        if let Some(collector) = active.collector.take() {
            if let Err(e) = collector.await {
                tracing::warn!(purpose = ?self.purpose, "media collector ended abnormally: {}", e);
            }
        }

        drain_into(&active.track, &active.chunks);

        let chunks = active
            .chunks
            .lock()
            .map(|mut c| std::mem::take(&mut *c))
            .map_err(|_| Error::Internal("media buffer poisoned".to_string()))?;
        let chunk_count = chunks.len();
        let mut blob = BytesMut::with_capacity(chunks.iter().map(|c| c.len()).sum());
        for chunk in chunks {
            blob.extend_from_slice(&chunk);
        }

        let recording = MediaRecording {
            kind: self.purpose.kind(),
            blob: blob.freeze(),
            chunk_count,
            started_at: active.started_at,
            stopped_at: Utc::now(),
        };
        tracing::debug!(
            purpose = ?self.purpose,
            bytes = recording.blob.len(),
            chunks = chunk_count,
            "media capture stopped"
        );
        // Dropping `active` stops the track and releases the purpose lease.
        drop(active);
        Ok(Some(recording))
    }
}

async fn collect_chunks(
    track: Arc<Mutex<TrackGuard>>,
    chunks: Arc<Mutex<Vec<Bytes>>>,
    cancel: CancellationToken,
    timeslice: Duration,
) {
    let mut ticker = tokio::time::interval(timeslice);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => drain_into(&track, &chunks),
        }
    }
}

fn drain_into(track: &Mutex<TrackGuard>, chunks: &Mutex<Vec<Bytes>>) {
    let data = match track.lock() {
        Ok(mut t) => t.0.drain(),
        Err(_) => return,
    };
    if let Some(data) = data.filter(|d| !d.is_empty()) {
        if let Ok(mut c) = chunks.lock() {
            c.push(data);
        }
    }
}

#[derive(Default)]
struct UploadState {
    granted: HashMap<MediaKind, bool>,
    live: HashSet<MediaPurpose>,
    buffers: HashMap<MediaPurpose, BytesMut>,
}

/// Device backed by the candidate's browser: it reports permission grants and
/// uploads recorder chunks that the controller then drains.
#[derive(Clone, Default)]
pub struct UploadDevice {
    state: Arc<Mutex<UploadState>>,
}

impl UploadDevice {
    pub fn set_permission(&self, kind: MediaKind, granted: bool) -> Result<()> {
        let mut state = self.lock()?;
        state.granted.insert(kind, granted);
        Ok(())
    }

    pub fn push(&self, purpose: MediaPurpose, data: &[u8]) -> Result<()> {
        let mut state = self.lock()?;
        if !state.live.contains(&purpose) {
            return Err(Error::BadRequest(format!(
                "No {:?} capture is running",
                purpose
            )));
        }
        state.buffers.entry(purpose).or_default().extend_from_slice(data);
        Ok(())
    }

    pub fn is_live(&self, purpose: MediaPurpose) -> bool {
        self.lock().map(|s| s.live.contains(&purpose)).unwrap_or(false)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, UploadState>> {
        self.state
            .lock()
            .map_err(|_| Error::Internal("upload device poisoned".to_string()))
    }
}

#[async_trait]
impl MediaDevice for UploadDevice {
    async fn open(
        &self,
        purpose: MediaPurpose,
        constraints: CaptureConstraints,
    ) -> Result<Box<dyn MediaTrack>> {
        let mut state = self.lock()?;
        let kind = constraints
            .kind()
            .ok_or_else(|| Error::BadRequest("Unsupported capture constraints".to_string()))?;
        if !state.granted.get(&kind).copied().unwrap_or(false) {
            let device = match kind {
                MediaKind::Video => "Camera",
                MediaKind::Audio => "Microphone",
            };
            return Err(Error::PermissionDenied(format!(
                "{} access is required to start this section",
                device
            )));
        }
        state.live.insert(purpose);
        state.buffers.insert(purpose, BytesMut::new());
        Ok(Box::new(UploadTrack {
            purpose,
            state: self.state.clone(),
        }))
    }
}

struct UploadTrack {
    purpose: MediaPurpose,
    state: Arc<Mutex<UploadState>>,
}

impl MediaTrack for UploadTrack {
    fn drain(&mut self) -> Option<Bytes> {
        let mut state = self.state.lock().ok()?;
        let buffer = state.buffers.get_mut(&self.purpose)?;
        if buffer.is_empty() {
            None
        } else {
            Some(buffer.split().freeze())
        }
    }

    fn stop(&mut self) {
        if let Ok(mut state) = self.state.lock() {
            state.live.remove(&self.purpose);
            state.buffers.remove(&self.purpose);
        }
    }
}

#[derive(Debug, Clone)]
pub struct ArchivedRecording {
    pub path: PathBuf,
    pub sha256: String,
    pub size: usize,
}

/// Writes finished security recordings to disk.
#[derive(Debug, Clone)]
pub struct RecordingArchive {
    root: PathBuf,
}

impl RecordingArchive {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub async fn store(&self, session_id: &str, recording: &MediaRecording) -> Result<ArchivedRecording> {
        if session_id.is_empty()
            || !session_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(Error::BadRequest("Invalid session id".to_string()));
        }

        let dir = self.root.join("security").join(session_id);
        tokio::fs::create_dir_all(&dir).await?;
        let path = dir.join(format!("{}.webm", uuid::Uuid::new_v4()));
        tokio::fs::write(&path, &recording.blob).await?;

        let sha256 = hex::encode(Sha256::digest(&recording.blob));
        tracing::info!(
            session_id = %session_id,
            path = %path.display(),
            sha256 = %sha256,
            bytes = recording.blob.len(),
            "security recording archived"
        );
        Ok(ArchivedRecording {
            path,
            sha256,
            size: recording.blob.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller(purpose: MediaPurpose, device: &UploadDevice, registry: &DeviceRegistry) -> MediaCaptureController {
        MediaCaptureController::new(
            purpose,
            Arc::new(device.clone()),
            registry.clone(),
            Duration::from_millis(10),
        )
    }

    fn granted_device() -> UploadDevice {
        let device = UploadDevice::default();
        device.set_permission(MediaKind::Video, true).unwrap();
        device.set_permission(MediaKind::Audio, true).unwrap();
        device
    }

    #[tokio::test]
    async fn stop_joins_uploaded_chunks() {
        let device = granted_device();
        let registry = DeviceRegistry::default();
        let mut voice = controller(MediaPurpose::VoiceAnswer, &device, &registry);

        voice.start(MediaPurpose::VoiceAnswer.constraints()).await.unwrap();
        device.push(MediaPurpose::VoiceAnswer, b"abc").unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        device.push(MediaPurpose::VoiceAnswer, b"def").unwrap();

        let recording = voice.stop().await.unwrap().unwrap();
        assert_eq!(&recording.blob[..], b"abcdef");
        assert_eq!(recording.kind, MediaKind::Audio);
        assert!(recording.chunk_count >= 1);
        assert!(!device.is_live(MediaPurpose::VoiceAnswer));
        assert!(!registry.is_held(MediaPurpose::VoiceAnswer));
    }

    #[tokio::test]
    async fn stop_without_start_is_noop() {
        let device = granted_device();
        let mut c = controller(MediaPurpose::Security, &device, &DeviceRegistry::default());
        assert!(c.stop().await.unwrap().is_none());
        assert!(c.stop().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn one_capture_per_purpose() {
        let device = granted_device();
        let registry = DeviceRegistry::default();
        let mut a = controller(MediaPurpose::Security, &device, &registry);
        let mut b = controller(MediaPurpose::Security, &device, &registry);

        a.start(MediaPurpose::Security.constraints()).await.unwrap();
        let err = b.start(MediaPurpose::Security.constraints()).await.unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
        let err = a.start(MediaPurpose::Security.constraints()).await.unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));

        a.stop().await.unwrap();
        b.start(MediaPurpose::Security.constraints()).await.unwrap();
    }

    #[tokio::test]
    async fn purposes_are_independent() {
        let device = granted_device();
        let registry = DeviceRegistry::default();
        let mut security = controller(MediaPurpose::Security, &device, &registry);
        let mut voice = controller(MediaPurpose::VoiceAnswer, &device, &registry);

        security.start(MediaPurpose::Security.constraints()).await.unwrap();
        voice.start(MediaPurpose::VoiceAnswer.constraints()).await.unwrap();
        voice.stop().await.unwrap();

        assert!(security.is_active());
        assert!(device.is_live(MediaPurpose::Security));
        device.push(MediaPurpose::Security, b"frame").unwrap();
        let rec = security.stop().await.unwrap().unwrap();
        assert_eq!(&rec.blob[..], b"frame");
    }

    #[tokio::test]
    async fn denied_permission_blocks_start_and_releases_lease() {
        let device = UploadDevice::default();
        let registry = DeviceRegistry::default();
        let mut security = controller(MediaPurpose::Security, &device, &registry);

        let err = security.start(MediaPurpose::Security.constraints()).await.unwrap_err();
        assert!(matches!(err, Error::PermissionDenied(_)));
        assert!(!registry.is_held(MediaPurpose::Security));

        device.set_permission(MediaKind::Video, true).unwrap();
        security.start(MediaPurpose::Security.constraints()).await.unwrap();
    }

    #[tokio::test]
    async fn wrong_constraints_rejected() {
        let device = granted_device();
        let mut security = controller(MediaPurpose::Security, &device, &DeviceRegistry::default());
        let err = security
            .start(CaptureConstraints { audio: true, video: true })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::BadRequest(_)));
    }

    #[tokio::test]
    async fn dropping_controller_releases_device() {
        let device = granted_device();
        let registry = DeviceRegistry::default();
        {
            let mut security = controller(MediaPurpose::Security, &device, &registry);
            security.start(MediaPurpose::Security.constraints()).await.unwrap();
        }
        assert!(!registry.is_held(MediaPurpose::Security));
        // The collector task holds the track until it observes cancellation.
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!device.is_live(MediaPurpose::Security));
    }

    #[tokio::test]
    async fn open_failure_from_device_propagates() {
        let mut device = MockMediaDevice::new();
        device
            .expect_open()
            .returning(|_, _| Err(Error::PermissionDenied("Microphone blocked".into())));
        let mut voice = MediaCaptureController::new(
            MediaPurpose::VoiceAnswer,
            Arc::new(device),
            DeviceRegistry::default(),
            Duration::from_millis(10),
        );
        let err = voice.start(MediaPurpose::VoiceAnswer.constraints()).await.unwrap_err();
        assert!(matches!(err, Error::PermissionDenied(_)));
        assert!(!voice.is_active());
    }

    #[tokio::test]
    async fn archive_writes_digest() {
        let dir = std::env::temp_dir().join(format!("archive-{}", uuid::Uuid::new_v4()));
        let archive = RecordingArchive::new(&dir);
        let recording = MediaRecording {
            kind: MediaKind::Video,
            blob: Bytes::from_static(b"video"),
            chunk_count: 1,
            started_at: Utc::now(),
            stopped_at: Utc::now(),
        };
        let stored = archive.store("ses_1_abc", &recording).await.unwrap();
        assert_eq!(stored.size, 5);
        assert_eq!(stored.sha256, hex::encode(Sha256::digest(b"video")));
        assert_eq!(tokio::fs::read(&stored.path).await.unwrap(), b"video");
        assert!(archive.store("../escape", &recording).await.is_err());
        let _ = tokio::fs::remove_dir_all(&dir).await;
    }
}
