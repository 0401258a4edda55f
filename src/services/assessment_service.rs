use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use base64::Engine;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex as AsyncMutex;

use crate::dto::assessment_dto::{
    ActiveSectionView, AnswerRequest, AssessmentStatus, MediaPermissionsRequest, SectionView,
    StartSectionRequest, StepResponse, TypingProgressRequest, VoicePromptResponse,
};
use crate::error::{Error, Result};
use crate::models::media::{MediaKind, MediaPurpose};
use crate::models::policy::AssessmentPolicy;
use crate::models::proctoring::HostSignal;
use crate::models::results::{ResultsHistory, SectionResultRecord};
use crate::models::section::{
    SectionKind, SectionProgress, SectionStatus, SectionTicket, Stage, WritingTask,
};
use crate::models::session::SessionValidation;
use crate::services::assessment_machine::{
    AssessmentMachine, AssessmentPhase, MachineEvent, SectionSetup,
};
use crate::services::media_service::{
    DeviceRegistry, MediaCaptureController, MediaDevice, RecordingArchive, UploadDevice,
};
use crate::services::proctoring_service::{ClientLockdown, LockdownHooks};
use crate::services::question_bank::{self, VoicePrompt};
use crate::services::results_service::ResultsStore;
use crate::services::scoring_service::{
    fallback_scores, AnswerPayload, OracleScores, ScoringOracle, ScoringRequest,
};
use crate::services::session_service::{SessionInvalidator, SessionService, SessionValidator};
use crate::services::typing_text_service::TypingTextService;

pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// External parties the assessment talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub sessions: SessionService,
    pub validator: Arc<dyn SessionValidator>,
    pub invalidator: Arc<dyn SessionInvalidator>,
    pub results: Arc<dyn ResultsStore>,
    pub oracle: Arc<dyn ScoringOracle>,
    pub typing_texts: TypingTextService,
}

/// Per-session runtime: the state machine plus the devices it drives.
struct LiveSession {
    machine: AssessmentMachine,
    uploads: UploadDevice,
    security: MediaCaptureController,
    voice: MediaCaptureController,
    lockdown: Arc<ClientLockdown>,
    voice_answer: Option<(SectionTicket, usize)>,
    /// Last time a caller stepped the session.
    touched: DateTime<Utc>,
}

impl LiveSession {
    fn new(machine: AssessmentMachine, policy: &AssessmentPolicy, now: DateTime<Utc>) -> Self {
        let uploads = UploadDevice::default();
        let registry = DeviceRegistry::default();
        let device: Arc<dyn MediaDevice> = Arc::new(uploads.clone());
        Self {
            security: MediaCaptureController::new(
                MediaPurpose::Security,
                device.clone(),
                registry.clone(),
                policy.media_timeslice,
            ),
            voice: MediaCaptureController::new(
                MediaPurpose::VoiceAnswer,
                device,
                registry,
                policy.media_timeslice,
            ),
            machine,
            uploads,
            lockdown: Arc::new(ClientLockdown::default()),
            voice_answer: None,
            touched: now,
        }
    }
}

struct Inner {
    policy: AssessmentPolicy,
    collaborators: Collaborators,
    archive: RecordingArchive,
    clock: Clock,
    live: Mutex<HashMap<String, Arc<AsyncMutex<LiveSession>>>>,
}

/// Runs candidate assessments. One transition at a time per session; oracle
/// calls happen outside the session lock.
#[derive(Clone)]
pub struct AssessmentService {
    inner: Arc<Inner>,
}

impl AssessmentService {
    pub fn new(policy: AssessmentPolicy, collaborators: Collaborators, archive: RecordingArchive) -> Self {
        Self::with_clock(policy, collaborators, archive, Arc::new(Utc::now))
    }

    pub fn with_clock(
        policy: AssessmentPolicy,
        collaborators: Collaborators,
        archive: RecordingArchive,
        clock: Clock,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                policy,
                collaborators,
                archive,
                clock,
                live: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn policy(&self) -> &AssessmentPolicy {
        &self.inner.policy
    }

    fn now(&self) -> DateTime<Utc> {
        (self.inner.clock)()
    }

    pub async fn enter_stage(&self, session_id: &str, stage: Stage) -> Result<StepResponse> {
        let validation = self.inner.collaborators.validator.validate(session_id).await;
        let ((), step) = self
            .step(session_id, |live, _| {
                live.machine.enter_stage(stage, &validation)?;
                Ok(((), Vec::new()))
            })
            .await?;
        Ok(step)
    }

    pub async fn set_permissions(
        &self,
        session_id: &str,
        req: MediaPermissionsRequest,
    ) -> Result<StepResponse> {
        let ((), step) = self
            .step(session_id, |live, _| {
                if let Some(granted) = req.video {
                    live.uploads.set_permission(MediaKind::Video, granted)?;
                }
                if let Some(granted) = req.audio {
                    live.uploads.set_permission(MediaKind::Audio, granted)?;
                }
                Ok(((), Vec::new()))
            })
            .await?;
        Ok(step)
    }

    pub async fn start_section(
        &self,
        session_id: &str,
        kind: SectionKind,
        req: StartSectionRequest,
    ) -> Result<StepResponse> {
        let validation = self.inner.collaborators.validator.validate(session_id).await;
        let reference_text = match kind {
            SectionKind::Typing => Some(
                self.inner
                    .collaborators
                    .typing_texts
                    .reference_text(req.difficulty)
                    .await,
            ),
            _ => None,
        };
        let setup = SectionSetup {
            fullscreen: req.fullscreen,
            visible: req.visible,
            reference_text,
        };

        let handle = self.live(session_id).await?;
        let mut live = handle.lock().await;
        let now = self.now();
        let events = live.machine.tick(now);
        let outcome = open_section(&mut *live, kind, &validation, setup, now)
            .await
            .map(|events| ((), events));
        if let Err(Error::PermissionDenied(msg)) = &outcome {
            tracing::warn!(session_id = %session_id, section = %kind, "section start blocked: {}", msg);
        }
        let ((), step) = self.conclude(session_id, &mut *live, now, events, outcome).await?;
        Ok(step)
    }

    pub async fn record_typing(&self, session_id: &str, req: TypingProgressRequest) -> Result<StepResponse> {
        let ((), step) = self
            .step(session_id, |live, now| {
                live.machine.record_typing(req.transcript, req.keystrokes, now)?;
                Ok(((), Vec::new()))
            })
            .await?;
        Ok(step)
    }

    pub async fn record_answer(
        &self,
        session_id: &str,
        kind: SectionKind,
        req: AnswerRequest,
    ) -> Result<StepResponse> {
        let ((), step) = self
            .step(session_id, |live, now| {
                live.machine.record_answer(kind, req.question_id, req.option, now)?;
                Ok(((), Vec::new()))
            })
            .await?;
        Ok(step)
    }

    pub async fn record_grammar_writing(&self, session_id: &str, response: String) -> Result<StepResponse> {
        let ((), step) = self
            .step(session_id, |live, now| {
                live.machine.record_grammar_writing(response, now)?;
                Ok(((), Vec::new()))
            })
            .await?;
        Ok(step)
    }

    /// Saves a writing task answer and scores it. A score that arrives after the
    /// section has ended is dropped.
    pub async fn record_writing(
        &self,
        session_id: &str,
        task: WritingTask,
        response: String,
    ) -> Result<StepResponse> {
        let answer = response.clone();
        let (ticket, first) = self
            .step(session_id, |live, now| {
                live.machine.record_writing(task, answer, now)?;
                let ticket = live
                    .machine
                    .active_ticket()
                    .ok_or_else(|| Error::Internal("writing section lost its ticket".to_string()))?;
                Ok((ticket, Vec::new()))
            })
            .await?;

        let prompt = question_bank::writing_prompt(task);
        let (scores, _) = self
            .score_or_fallback(
                session_id,
                ScoringRequest {
                    answer: AnswerPayload::Text(response),
                    prompt: prompt.text.to_string(),
                    task_type: task.as_str().to_string(),
                },
            )
            .await;

        let (applied, mut step) = self
            .step(session_id, |live, _| {
                let applied = live
                    .machine
                    .apply_writing_scores(ticket, BTreeMap::from([(task, scores.overall)]));
                Ok((applied, Vec::new()))
            })
            .await?;
        if !applied {
            tracing::info!(session_id = %session_id, task = %task.as_str(), "late writing score ignored");
        }
        let mut errors = first.persistence_errors;
        errors.append(&mut step.persistence_errors);
        step.persistence_errors = errors;
        Ok(step)
    }

    pub async fn navigate(&self, session_id: &str, kind: SectionKind, page: usize) -> Result<StepResponse> {
        let (_, step) = self
            .step(session_id, |live, now| Ok((live.machine.navigate(kind, page, now)?, Vec::new())))
            .await?;
        Ok(step)
    }

    pub async fn submit_section(&self, session_id: &str, kind: SectionKind) -> Result<StepResponse> {
        let ((), step) = self
            .step(session_id, |live, now| {
                Ok(((), live.machine.submit_section(kind, now)?))
            })
            .await?;
        Ok(step)
    }

    pub async fn signal(&self, session_id: &str, signal: HostSignal) -> Result<StepResponse> {
        let (verdict, mut step) = self
            .step(session_id, |live, now| {
                let outcome = live.machine.observe(&signal, now);
                Ok((outcome.verdict, outcome.events))
            })
            .await?;
        step.verdict = Some(verdict);
        Ok(step)
    }

    /// Opens the microphone for the current voice prompt.
    pub async fn begin_voice_answer(&self, session_id: &str) -> Result<VoicePromptResponse> {
        let handle = self.live(session_id).await?;
        let mut live = handle.lock().await;
        let now = self.now();
        let events = live.machine.tick(now);
        let outcome = open_voice_answer(&mut *live).await.map(|v| (v, Vec::new()));
        let ((prompt_index, prompt), step) =
            self.conclude(session_id, &mut *live, now, events, outcome).await?;
        Ok(VoicePromptResponse {
            prompt_index,
            prompt,
            status: step.status,
        })
    }

    /// Closes the microphone, scores the recording and advances the voice section.
    pub async fn finish_voice_answer(&self, session_id: &str) -> Result<StepResponse> {
        let handle = self.live(session_id).await?;
        let (ticket, prompt_index, audio) = {
            let mut live = handle.lock().await;
            let now = self.now();
            let events = live.machine.tick(now);
            let outcome = close_voice_answer(&mut *live).await.map(|v| (v, Vec::new()));
            let (value, _) = self.conclude(session_id, &mut *live, now, events, outcome).await?;
            value
        };

        let prompt = question_bank::voice_prompt(prompt_index)
            .ok_or_else(|| Error::BadRequest(format!("Unknown voice prompt {}", prompt_index)))?;
        let (scores, fallback) = self
            .score_or_fallback(
                session_id,
                ScoringRequest {
                    answer: AnswerPayload::AudioBase64(
                        base64::engine::general_purpose::STANDARD.encode(&audio),
                    ),
                    prompt: prompt.text.to_string(),
                    task_type: prompt.task_type.to_string(),
                },
            )
            .await;
        let score = scores.into_prompt_score(prompt_index, fallback);

        let (applied, step) = self
            .step(session_id, |live, now| {
                match live.machine.apply_voice_score(ticket, score, now) {
                    Some(events) => Ok((true, events)),
                    None => Ok((false, Vec::new())),
                }
            })
            .await?;
        if !applied {
            tracing::info!(session_id = %session_id, prompt_index, "late voice score ignored");
        }
        Ok(step)
    }

    pub async fn push_media_chunk(&self, session_id: &str, purpose: MediaPurpose, data: &[u8]) -> Result<()> {
        let handle = self.live(session_id).await?;
        let live = handle.lock().await;
        live.uploads.push(purpose, data)
    }

    pub async fn status(&self, session_id: &str) -> Result<AssessmentStatus> {
        let handle = self.live(session_id).await?;
        let mut live = handle.lock().await;
        let now = self.now();
        live.touched = now;
        let events = live.machine.tick(now);
        if !events.is_empty() {
            self.dispatch(session_id, &mut *live, events).await;
        }
        Ok(status_of(&live, now))
    }

    pub async fn results(&self, session_id: &str) -> Result<ResultsHistory> {
        self.inner.collaborators.sessions.get(session_id).await?;
        self.inner.collaborators.results.history(session_id).await
    }

    /// Clears the session flag locally, then tells the session store. A store
    /// failure is logged; the local invalidation stands.
    pub async fn invalidate(&self, session_id: &str, reason: &str) -> Result<()> {
        let handle = self.live(session_id).await?;
        {
            let mut live = handle.lock().await;
            live.machine.invalidate_session(reason);
            self.dispatch(session_id, &mut *live, Vec::new()).await;
        }
        if let Err(e) = self
            .inner
            .collaborators
            .invalidator
            .invalidate(session_id, reason)
            .await
        {
            tracing::warn!(session_id = %session_id, error = %e, "session invalidation failed");
        }
        Ok(())
    }

    /// Applies due violations and timeouts for every loaded session, then
    /// unloads the ones that are complete, invalid or idle past the session ttl.
    pub async fn tick_all(&self) {
        let handles: Vec<(String, Arc<AsyncMutex<LiveSession>>)> = match self.inner.live.lock() {
            Ok(map) => map.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            Err(_) => {
                tracing::error!("live session table poisoned");
                return;
            }
        };

        for (session_id, handle) in handles {
            let mut live = handle.lock().await;
            let now = self.now();
            let events = live.machine.tick(now);
            if !events.is_empty() {
                self.dispatch(&session_id, &mut *live, events).await;
            }
            let idle = live.machine.active_section().is_none()
                && !live.security.is_active()
                && !live.voice.is_active();
            let stale = live.machine.is_complete()
                || !live.machine.session_valid()
                || now - live.touched >= self.inner.policy.session_ttl;
            if idle && stale {
                tracing::debug!(session_id = %session_id, "unloading session runtime");
                if let Ok(mut map) = self.inner.live.lock() {
                    map.remove(&session_id);
                }
            }
        }
    }

    #[cfg(test)]
    fn is_loaded(&self, session_id: &str) -> bool {
        self.lookup(session_id).ok().flatten().is_some()
    }

    fn lookup(&self, session_id: &str) -> Result<Option<Arc<AsyncMutex<LiveSession>>>> {
        let map = self
            .inner
            .live
            .lock()
            .map_err(|_| Error::Internal("live session table poisoned".to_string()))?;
        Ok(map.get(session_id).cloned())
    }

    /// Loads the session runtime, rebuilding it from the stored snapshot when needed.
    async fn live(&self, session_id: &str) -> Result<Arc<AsyncMutex<LiveSession>>> {
        if let Some(handle) = self.lookup(session_id)? {
            return Ok(handle);
        }

        let record = self.inner.collaborators.sessions.get(session_id).await?;
        let now = self.now();
        let policy = self.inner.policy.clone();
        let (mut machine, events) = match record.snapshot {
            Some(snapshot) => AssessmentMachine::restore(snapshot, policy, now),
            None => (AssessmentMachine::new(session_id, policy), Vec::new()),
        };
        if !record.session.is_valid {
            let reason = record
                .session
                .invalidated_reason
                .as_deref()
                .unwrap_or("invalidated");
            machine.invalidate_session(reason);
        }

        let fresh = Arc::new(AsyncMutex::new(LiveSession::new(machine, &self.inner.policy, now)));
        let (handle, inserted) = {
            let mut map = self
                .inner
                .live
                .lock()
                .map_err(|_| Error::Internal("live session table poisoned".to_string()))?;
            match map.get(session_id) {
                Some(existing) => (existing.clone(), false),
                None => {
                    map.insert(session_id.to_string(), fresh.clone());
                    (fresh, true)
                }
            }
        };

        if inserted && !events.is_empty() {
            let mut live = handle.lock().await;
            self.dispatch(session_id, &mut *live, events).await;
        }
        Ok(handle)
    }

    /// Locks the session, applies pending timers, runs `op` and carries out the
    /// resulting side effects.
    async fn step<T, F>(&self, session_id: &str, op: F) -> Result<(T, StepResponse)>
    where
        F: FnOnce(&mut LiveSession, DateTime<Utc>) -> Result<(T, Vec<MachineEvent>)>,
    {
        let handle = self.live(session_id).await?;
        let mut live = handle.lock().await;
        let now = self.now();
        live.touched = now;
        let events = live.machine.tick(now);
        let outcome = op(&mut *live, now);
        self.conclude(session_id, &mut *live, now, events, outcome).await
    }

    async fn conclude<T>(
        &self,
        session_id: &str,
        live: &mut LiveSession,
        now: DateTime<Utc>,
        mut events: Vec<MachineEvent>,
        outcome: Result<(T, Vec<MachineEvent>)>,
    ) -> Result<(T, StepResponse)> {
        let value = outcome.map(|(value, more)| {
            events.extend(more);
            value
        });
        let persistence_errors = self.dispatch(session_id, live, events).await;
        let value = value?;
        Ok((
            value,
            StepResponse {
                verdict: None,
                status: status_of(live, now),
                persistence_errors,
            },
        ))
    }

    /// Carries out machine side effects. Persistence is best effort: failures are
    /// logged and returned, never raised.
    async fn dispatch(
        &self,
        session_id: &str,
        live: &mut LiveSession,
        events: Vec<MachineEvent>,
    ) -> Vec<String> {
        let collab = &self.inner.collaborators;
        let now = self.now();
        let mut errors = Vec::new();
        let mut invalidations = Vec::new();

        for event in events {
            match event {
                MachineEvent::SectionStarted { ticket } => {
                    tracing::debug!(session_id = %session_id, section = %ticket.kind, "section opened");
                }
                MachineEvent::SectionCompleted {
                    kind,
                    status,
                    result,
                    timed_out,
                } => {
                    tracing::debug!(session_id = %session_id, section = %kind, timed_out, "submitting section result");
                    let record = SectionResultRecord {
                        kind,
                        status,
                        result,
                        recorded_at: now,
                    };
                    if let Err(e) = collab.results.submit_section(session_id, record).await {
                        errors.push(persistence_failure(session_id, "section result", e));
                    }
                }
                MachineEvent::SectionsLocked { kinds } => {
                    for kind in kinds {
                        let record = SectionResultRecord {
                            kind,
                            status: SectionStatus::ForceCompleted,
                            result: None,
                            recorded_at: now,
                        };
                        if let Err(e) = collab.results.submit_section(session_id, record).await {
                            errors.push(persistence_failure(session_id, "locked section", e));
                        }
                    }
                }
                MachineEvent::StageGated { summary } => {
                    if let Err(e) = collab.results.submit_stage(session_id, summary).await {
                        errors.push(persistence_failure(session_id, "stage summary", e));
                    }
                }
                MachineEvent::ProctoringLogged(event) => {
                    if let Err(e) = collab.results.record_event(session_id, event).await {
                        errors.push(persistence_failure(session_id, "proctoring event", e));
                    }
                }
                MachineEvent::Terminated(termination) => {
                    tracing::warn!(
                        session_id = %session_id,
                        at = %now.to_rfc3339(),
                        "assessment terminated: {}",
                        termination.message()
                    );
                }
                MachineEvent::SessionInvalidated { reason } => invalidations.push(reason),
            }
        }

        let active = live.machine.active_section().map(|s| s.kind);
        if active != Some(SectionKind::Voice) {
            live.voice_answer = None;
            if live.voice.is_active() {
                if let Err(e) = live.voice.stop().await {
                    tracing::warn!(session_id = %session_id, error = %e, "voice capture did not stop cleanly");
                }
            }
        }
        if active.is_none() && live.security.is_active() {
            match live.security.stop().await {
                Ok(Some(recording)) if !recording.blob.is_empty() => {
                    if let Err(e) = self.inner.archive.store(session_id, &recording).await {
                        tracing::error!(session_id = %session_id, error = %e, "failed to archive security recording");
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(session_id = %session_id, error = %e, "security capture did not stop cleanly");
                }
            }
        }

        // The local flag is already cleared; the remote outcome does not matter.
        for reason in invalidations {
            if let Err(e) = collab.invalidator.invalidate(session_id, &reason).await {
                tracing::warn!(session_id = %session_id, error = %e, "session invalidation failed");
            }
        }

        if let Err(e) = collab
            .sessions
            .save_snapshot(session_id, live.machine.snapshot())
            .await
        {
            errors.push(persistence_failure(session_id, "assessment state", e));
        }
        errors
    }

    async fn score_or_fallback(&self, session_id: &str, request: ScoringRequest) -> (OracleScores, bool) {
        let task_type = request.task_type.clone();
        match self.inner.collaborators.oracle.score(request).await {
            Ok(scores) => (scores, false),
            Err(e) => {
                let policy = self.inner.policy.fallback_scoring;
                tracing::warn!(
                    session_id = %session_id,
                    task_type = %task_type,
                    fallback = ?policy,
                    error = %e,
                    "scoring oracle failed, using fallback scores"
                );
                (fallback_scores(policy), true)
            }
        }
    }
}

async fn open_section(
    live: &mut LiveSession,
    kind: SectionKind,
    validation: &SessionValidation,
    setup: SectionSetup,
    now: DateTime<Utc>,
) -> Result<Vec<MachineEvent>> {
    live.machine.check_start(kind, validation, &setup)?;
    if !live.security.is_active() {
        live.security
            .start(MediaPurpose::Security.constraints())
            .await?;
    }
    let hooks: Arc<dyn LockdownHooks> = live.lockdown.clone();
    let (_, events) = live.machine.start_section(kind, validation, setup, hooks, now)?;
    Ok(events)
}

async fn open_voice_answer(live: &mut LiveSession) -> Result<(usize, VoicePrompt)> {
    let ticket = live
        .machine
        .active_ticket()
        .filter(|t| t.kind == SectionKind::Voice)
        .ok_or_else(|| Error::BadRequest("The voice section is not active".to_string()))?;
    if live.voice_answer.is_some() || live.voice.is_active() {
        return Err(Error::Conflict(
            "A voice answer is already being recorded".to_string(),
        ));
    }
    let index = live
        .machine
        .voice_prompt_index()
        .ok_or_else(|| Error::Internal("voice section has no prompt cursor".to_string()))?;
    let prompt = question_bank::voice_prompt(index)
        .ok_or_else(|| Error::BadRequest("All voice prompts have been answered".to_string()))?;

    live.voice
        .start(MediaPurpose::VoiceAnswer.constraints())
        .await?;
    live.voice_answer = Some((ticket, index));
    Ok((index, prompt.clone()))
}

async fn close_voice_answer(live: &mut LiveSession) -> Result<(SectionTicket, usize, bytes::Bytes)> {
    let (ticket, index) = live
        .voice_answer
        .take()
        .ok_or_else(|| Error::BadRequest("No voice answer is being recorded".to_string()))?;
    let recording = live.voice.stop().await?;
    let audio = recording.map(|r| r.blob).unwrap_or_default();
    Ok((ticket, index, audio))
}

fn persistence_failure(session_id: &str, what: &str, err: Error) -> String {
    tracing::error!(
        session_id = %session_id,
        error = %err,
        at = %Utc::now().to_rfc3339(),
        "failed to persist {}",
        what
    );
    Error::Persistence(format!("{}: {}", what, err)).to_string()
}

fn status_of(live: &LiveSession, now: DateTime<Utc>) -> AssessmentStatus {
    let m = &live.machine;
    let active_section = m.active_section().map(|s| ActiveSectionView {
        kind: s.kind,
        generation: s.generation,
        started_at: s.started_at,
        remaining_seconds: s.remaining_seconds(now),
        page: s.page,
        reference_text: match &s.progress {
            SectionProgress::Typing(attempt) => Some(attempt.reference_text.clone()),
            _ => None,
        },
        live_wpm: m.live_wpm(now),
        voice_prompt_index: m.voice_prompt_index(),
    });
    let message = match m.phase() {
        AssessmentPhase::Complete { termination } => Some(termination.message().to_string()),
        _ => None,
    };

    AssessmentStatus {
        session_id: m.session_id().to_string(),
        phase: m.phase().clone(),
        session_valid: m.session_valid(),
        current_section: m.current_section(),
        active_section,
        sections: m
            .sections()
            .iter()
            .map(|s| SectionView {
                kind: s.kind,
                title: s.kind.title().to_string(),
                status: s.status,
                result: s.result.clone(),
            })
            .collect(),
        stage_summaries: m.stage_summaries().to_vec(),
        proctoring_log: m.proctoring_log().to_vec(),
        lockdown: live.lockdown.is_engaged(),
        pending_violation_deadline: m.pending_violation_deadline(),
        message,
        timestamp: now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::proctoring::ClipboardAction;
    use crate::models::session::Candidate;
    use crate::services::results_service::MemoryResultsStore;
    use crate::services::scoring_service::MockScoringOracle;
    use crate::services::session_service::{MemorySessionStore, MockSessionInvalidator};
    use crate::services::typing_text_service::MemoryTypingTextRepository;
    use async_trait::async_trait;
    use std::time::Duration as StdDuration;

    struct Harness {
        service: AssessmentService,
        sessions: SessionService,
        results: Arc<MemoryResultsStore>,
        store: Arc<MemorySessionStore>,
        clock: Arc<Mutex<DateTime<Utc>>>,
        uploads_dir: std::path::PathBuf,
    }

    impl Harness {
        fn advance(&self, secs: i64) {
            let mut t = self.clock.lock().unwrap();
            *t = *t + chrono::Duration::seconds(secs);
        }

        fn rebuilt(&self, oracle: Arc<dyn ScoringOracle>) -> AssessmentService {
            build(
                self.store.clone(),
                self.results.clone(),
                oracle,
                self.clock.clone(),
                self.uploads_dir.clone(),
            )
            .0
        }
    }

    fn policy() -> AssessmentPolicy {
        AssessmentPolicy {
            media_timeslice: StdDuration::from_millis(10),
            ..AssessmentPolicy::default()
        }
    }

    fn build(
        store: Arc<MemorySessionStore>,
        results: Arc<MemoryResultsStore>,
        oracle: Arc<dyn ScoringOracle>,
        clock: Arc<Mutex<DateTime<Utc>>>,
        uploads_dir: std::path::PathBuf,
    ) -> (AssessmentService, SessionService) {
        let sessions = SessionService::new(store, chrono::Duration::hours(3));
        let collaborators = Collaborators {
            sessions: sessions.clone(),
            validator: Arc::new(sessions.clone()),
            invalidator: Arc::new(sessions.clone()),
            results,
            oracle,
            typing_texts: TypingTextService::new(Arc::new(MemoryTypingTextRepository::default())),
        };
        let tick = clock.clone();
        let service = AssessmentService::with_clock(
            policy(),
            collaborators,
            RecordingArchive::new(uploads_dir),
            Arc::new(move || *tick.lock().unwrap()),
        );
        (service, sessions)
    }

    fn harness(oracle: Arc<dyn ScoringOracle>) -> Harness {
        let store = Arc::new(MemorySessionStore::default());
        let results = Arc::new(MemoryResultsStore::default());
        let clock = Arc::new(Mutex::new(Utc::now()));
        let uploads_dir = std::env::temp_dir().join(format!("assessment-test-{}", uuid::Uuid::new_v4()));
        let (service, sessions) = build(
            store.clone(),
            results.clone(),
            oracle,
            clock.clone(),
            uploads_dir.clone(),
        );
        Harness {
            service,
            sessions,
            results,
            store,
            clock,
            uploads_dir,
        }
    }

    fn failing_oracle() -> Arc<dyn ScoringOracle> {
        let mut oracle = MockScoringOracle::new();
        oracle
            .expect_score()
            .returning(|_| Err(Error::ScoringOracle("unreachable".into())));
        Arc::new(oracle)
    }

    async fn register(h: &Harness) -> String {
        let now = *h.clock.lock().unwrap();
        h.sessions
            .register(
                Candidate {
                    full_name: "Sam Ortiz".into(),
                    email: "sam@example.com".into(),
                    phone: None,
                    location: None,
                },
                now,
            )
            .await
            .unwrap()
            .session_id
    }

    fn fullscreen() -> StartSectionRequest {
        StartSectionRequest {
            fullscreen: true,
            visible: true,
            difficulty: None,
        }
    }

    async fn grant_all(h: &Harness, id: &str) {
        h.service
            .set_permissions(
                id,
                MediaPermissionsRequest {
                    video: Some(true),
                    audio: Some(true),
                },
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn camera_denial_blocks_section_start() {
        let h = harness(failing_oracle());
        let id = register(&h).await;
        h.service.enter_stage(&id, Stage::One).await.unwrap();

        let err = h
            .service
            .start_section(&id, SectionKind::Typing, fullscreen())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::PermissionDenied(_)));

        let status = h.service.status(&id).await.unwrap();
        assert!(status.active_section.is_none());
        assert!(status.session_valid);

        grant_all(&h, &id).await;
        let step = h
            .service
            .start_section(&id, SectionKind::Typing, fullscreen())
            .await
            .unwrap();
        assert!(step.status.lockdown);
        let active = step.status.active_section.unwrap();
        assert_eq!(active.kind, SectionKind::Typing);
        assert_eq!(active.reference_text.as_deref(), Some(question_bank::DEFAULT_TYPING_TEXT));
    }

    #[tokio::test]
    async fn tab_switch_terminates_and_archives_recording() {
        let h = harness(failing_oracle());
        let id = register(&h).await;
        grant_all(&h, &id).await;
        h.service.enter_stage(&id, Stage::One).await.unwrap();
        h.service
            .start_section(&id, SectionKind::Typing, fullscreen())
            .await
            .unwrap();
        h.service
            .push_media_chunk(&id, MediaPurpose::Security, b"webm-bytes")
            .await
            .unwrap();

        let step = h
            .service
            .signal(&id, HostSignal::VisibilityChanged { visible: false })
            .await
            .unwrap();
        assert!(!step.status.session_valid);
        assert!(!step.status.lockdown);
        assert!(matches!(step.status.phase, AssessmentPhase::Complete { .. }));
        assert_eq!(
            step.status.sections[SectionKind::Typing as usize].status,
            SectionStatus::ForceCompleted
        );

        let history = h.service.results(&id).await.unwrap();
        assert_eq!(history.sections.len(), SectionKind::ALL.len());
        assert_eq!(h.results.events(&id).await.len(), 1);

        let record = h.sessions.get(&id).await.unwrap();
        assert!(!record.session.is_valid);

        let dir = h.uploads_dir.join("security").join(&id);
        let mut entries = tokio::fs::read_dir(&dir).await.unwrap();
        let entry = entries.next_entry().await.unwrap().unwrap();
        assert_eq!(tokio::fs::read(entry.path()).await.unwrap(), b"webm-bytes");

        let err = h
            .service
            .start_section(&id, SectionKind::Reading, fullscreen())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::SecurityViolation(_)));
    }

    #[tokio::test]
    async fn clipboard_attempts_are_rejected_not_fatal() {
        let h = harness(failing_oracle());
        let id = register(&h).await;
        grant_all(&h, &id).await;
        h.service.enter_stage(&id, Stage::One).await.unwrap();
        h.service
            .start_section(&id, SectionKind::Typing, fullscreen())
            .await
            .unwrap();

        let step = h
            .service
            .signal(
                &id,
                HostSignal::Clipboard {
                    action: ClipboardAction::Paste,
                },
            )
            .await
            .unwrap();
        assert_eq!(step.verdict, Some(crate::models::proctoring::SignalVerdict::Rejected));
        assert!(step.status.session_valid);
        assert!(step.status.active_section.is_some());
    }

    #[tokio::test]
    async fn timeout_rolls_into_next_section() {
        let h = harness(failing_oracle());
        let id = register(&h).await;
        grant_all(&h, &id).await;
        h.service.enter_stage(&id, Stage::One).await.unwrap();
        h.service
            .start_section(&id, SectionKind::Typing, fullscreen())
            .await
            .unwrap();

        h.advance(181);
        h.service.tick_all().await;

        let status = h.service.status(&id).await.unwrap();
        assert_eq!(
            status.sections[SectionKind::Typing as usize].status,
            SectionStatus::Completed
        );
        assert_eq!(
            status.active_section.map(|s| s.kind),
            Some(SectionKind::Reading)
        );
        let history = h.service.results(&id).await.unwrap();
        assert_eq!(history.sections.len(), 1);
    }

    #[tokio::test]
    async fn idle_sessions_are_unloaded_once_expired() {
        let h = harness(failing_oracle());
        let idle = register(&h).await;
        let withdrawn = register(&h).await;
        h.service.status(&idle).await.unwrap();
        h.service.invalidate(&withdrawn, "candidate withdrew").await.unwrap();

        h.service.tick_all().await;
        assert!(h.service.is_loaded(&idle));
        assert!(!h.service.is_loaded(&withdrawn));

        h.advance(3 * 60 * 60);
        h.service.tick_all().await;
        assert!(!h.service.is_loaded(&idle));
    }

    #[tokio::test]
    async fn invalidation_stands_when_store_update_fails() {
        let store = Arc::new(MemorySessionStore::default());
        let sessions = SessionService::new(store, chrono::Duration::hours(3));
        let mut invalidator = MockSessionInvalidator::new();
        invalidator
            .expect_invalidate()
            .times(1)
            .returning(|_, _| Err(Error::Internal("session store offline".into())));
        let collaborators = Collaborators {
            sessions: sessions.clone(),
            validator: Arc::new(sessions.clone()),
            invalidator: Arc::new(invalidator),
            results: Arc::new(MemoryResultsStore::default()),
            oracle: failing_oracle(),
            typing_texts: TypingTextService::new(Arc::new(MemoryTypingTextRepository::default())),
        };
        let uploads_dir = std::env::temp_dir().join(format!("assessment-test-{}", uuid::Uuid::new_v4()));
        let service = AssessmentService::new(policy(), collaborators, RecordingArchive::new(uploads_dir));
        let id = sessions
            .register(
                Candidate {
                    full_name: "Ari Lane".into(),
                    email: "ari@example.com".into(),
                    phone: None,
                    location: None,
                },
                Utc::now(),
            )
            .await
            .unwrap()
            .session_id;

        tokio_test::assert_ok!(service.invalidate(&id, "proctor closed the session").await);
        let status = service.status(&id).await.unwrap();
        assert!(!status.session_valid);
    }

    #[tokio::test]
    async fn reload_closes_active_section_and_refuses_retake() {
        let h = harness(failing_oracle());
        let id = register(&h).await;
        grant_all(&h, &id).await;
        h.service.enter_stage(&id, Stage::One).await.unwrap();
        h.service
            .start_section(&id, SectionKind::Typing, fullscreen())
            .await
            .unwrap();
        h.service
            .record_typing(
                &id,
                TypingProgressRequest {
                    transcript: "Customer service".into(),
                    keystrokes: vec![],
                },
            )
            .await
            .unwrap();

        let reloaded = h.rebuilt(failing_oracle());
        let status = reloaded.status(&id).await.unwrap();
        assert_eq!(
            status.sections[SectionKind::Typing as usize].status,
            SectionStatus::Completed
        );

        let err = reloaded
            .start_section(&id, SectionKind::Typing, fullscreen())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::SectionLocked(_)));
    }

    #[tokio::test]
    async fn oracle_failure_falls_back_to_conservative_scores() {
        let h = harness(failing_oracle());
        let id = register(&h).await;
        grant_all(&h, &id).await;
        h.service.enter_stage(&id, Stage::One).await.unwrap();
        pass_stage1(&h, &id).await;

        h.service.enter_stage(&id, Stage::Two).await.unwrap();
        h.service
            .start_section(&id, SectionKind::Voice, fullscreen())
            .await
            .unwrap();

        let prompt = h.service.begin_voice_answer(&id).await.unwrap();
        assert_eq!(prompt.prompt_index, 0);
        h.service
            .push_media_chunk(&id, MediaPurpose::VoiceAnswer, b"audio")
            .await
            .unwrap();
        let step = h.service.finish_voice_answer(&id).await.unwrap();
        let active = step.status.active_section.unwrap();
        assert_eq!(active.voice_prompt_index, Some(1));

        let voice = &step.status.sections[SectionKind::Voice as usize];
        assert_eq!(voice.status, SectionStatus::Active);
    }

    #[tokio::test]
    async fn late_voice_score_is_ignored_after_violation() {
        struct SlowOracle;

        #[async_trait]
        impl ScoringOracle for SlowOracle {
            async fn score(&self, _request: ScoringRequest) -> Result<OracleScores> {
                tokio::time::sleep(StdDuration::from_millis(200)).await;
                Ok(fallback_scores(crate::models::policy::FallbackScoring::Optimistic))
            }
        }

        let h = harness(Arc::new(SlowOracle));
        let id = register(&h).await;
        grant_all(&h, &id).await;
        h.service.enter_stage(&id, Stage::One).await.unwrap();
        pass_stage1(&h, &id).await;
        h.service.enter_stage(&id, Stage::Two).await.unwrap();
        h.service
            .start_section(&id, SectionKind::Voice, fullscreen())
            .await
            .unwrap();
        h.service.begin_voice_answer(&id).await.unwrap();

        let svc = h.service.clone();
        let sid = id.clone();
        let pending = tokio::spawn(async move { svc.finish_voice_answer(&sid).await });
        tokio::time::sleep(StdDuration::from_millis(50)).await;
        h.service
            .signal(&id, HostSignal::VisibilityChanged { visible: false })
            .await
            .unwrap();

        let late = pending.await.unwrap().unwrap();
        assert!(matches!(late.status.phase, AssessmentPhase::Complete { .. }));

        let status = h.service.status(&id).await.unwrap();
        let voice = &status.sections[SectionKind::Voice as usize];
        assert_eq!(voice.status, SectionStatus::ForceCompleted);
        match &h.sessions.load_snapshot(&id).await.unwrap().unwrap().sections
            [SectionKind::Voice as usize]
            .progress
        {
            SectionProgress::Voice { scores, .. } => assert!(scores.is_empty()),
            other => panic!("unexpected progress {:?}", other),
        }
    }

    async fn pass_stage1(h: &Harness, id: &str) {
        h.service
            .start_section(id, SectionKind::Typing, fullscreen())
            .await
            .unwrap();
        h.advance(30);
        let text: String = question_bank::DEFAULT_TYPING_TEXT.chars().take(150).collect();
        h.service
            .record_typing(
                id,
                TypingProgressRequest {
                    transcript: text,
                    keystrokes: vec![],
                },
            )
            .await
            .unwrap();
        h.service.submit_section(id, SectionKind::Typing).await.unwrap();

        h.service
            .start_section(id, SectionKind::Reading, fullscreen())
            .await
            .unwrap();
        for scenario in question_bank::READING_SCENARIOS {
            for q in scenario.questions {
                h.service
                    .record_answer(
                        id,
                        SectionKind::Reading,
                        AnswerRequest {
                            question_id: q.id.to_string(),
                            option: q.correct_answer,
                        },
                    )
                    .await
                    .unwrap();
            }
        }
        h.service.submit_section(id, SectionKind::Reading).await.unwrap();

        h.service
            .start_section(id, SectionKind::Grammar, fullscreen())
            .await
            .unwrap();
        for q in question_bank::GRAMMAR_QUESTIONS {
            h.service
                .record_answer(
                    id,
                    SectionKind::Grammar,
                    AnswerRequest {
                        question_id: q.id.to_string(),
                        option: q.correct_answer,
                    },
                )
                .await
                .unwrap();
        }
        h.service
            .record_grammar_writing(
                id,
                "We are sorry your order arrived damaged. Please reply with a photo and we will send a replacement today."
                    .into(),
            )
            .await
            .unwrap();
        let step = h.service.submit_section(id, SectionKind::Grammar).await.unwrap();
        assert_eq!(
            step.status.phase,
            AssessmentPhase::Stage1Gated { passed: true }
        );
    }
}
