use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::models::policy::AssessmentPolicy;
use crate::models::proctoring::{HostSignal, ProctoringEvent, SignalVerdict, ViolationType};
use crate::models::results::{SectionResult, StageSummary};
use crate::models::section::{
    PromptScore, Section, SectionKind, SectionProgress, SectionStatus, SectionTicket, Stage,
    WritingTask,
};
use crate::models::session::SessionValidation;
use crate::services::grading_service::GradingService;
use crate::services::proctoring_service::{LockdownHooks, ProctoringMonitor};
use crate::services::question_bank;
use crate::services::typing_metrics_service::TypingMetricsService;

/// Why an assessment reached `Complete`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum Termination {
    SecurityViolation {
        violation: ViolationType,
        at: DateTime<Utc>,
    },
    StageFailed {
        stage: Stage,
    },
    Finished,
}

impl Termination {
    pub fn message(&self) -> &'static str {
        match self {
            Termination::SecurityViolation { violation, .. } => violation.termination_message(),
            Termination::StageFailed { .. } => {
                "Stage 1 requirements were not met. Your assessment has been submitted and cannot be retaken."
            }
            Termination::Finished => "Your assessment is complete. Thank you for your time.",
        }
    }

    fn to_error(&self) -> Error {
        match self {
            Termination::SecurityViolation { violation, .. } => Error::SecurityViolation(*violation),
            other => Error::SectionLocked(other.message().to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum AssessmentPhase {
    NotStarted,
    Stage1Active,
    Stage1Gated { passed: bool },
    Stage2Active,
    Stage2Gated { passed: bool },
    Complete { termination: Termination },
}

/// Side effects the caller has to carry out after a transition.
#[derive(Debug, Clone, PartialEq)]
pub enum MachineEvent {
    SectionStarted {
        ticket: SectionTicket,
    },
    SectionCompleted {
        kind: SectionKind,
        status: SectionStatus,
        result: Option<SectionResult>,
        timed_out: bool,
    },
    SectionsLocked {
        kinds: Vec<SectionKind>,
    },
    StageGated {
        summary: StageSummary,
    },
    ProctoringLogged(ProctoringEvent),
    Terminated(Termination),
    SessionInvalidated {
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct SignalOutcome {
    pub verdict: SignalVerdict,
    pub events: Vec<MachineEvent>,
}

/// Host state reported by the browser when the candidate starts a section.
#[derive(Debug, Clone, Default)]
pub struct SectionSetup {
    pub fullscreen: bool,
    pub visible: bool,
    pub reference_text: Option<String>,
}

/// Persisted form of the machine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MachineSnapshot {
    pub session_id: String,
    pub phase: AssessmentPhase,
    pub sections: Vec<Section>,
    pub proctoring_log: Vec<ProctoringEvent>,
    pub stage_summaries: Vec<StageSummary>,
    pub session_valid: bool,
}

pub struct AssessmentMachine {
    session_id: String,
    policy: AssessmentPolicy,
    phase: AssessmentPhase,
    sections: Vec<Section>,
    proctoring_log: Vec<ProctoringEvent>,
    stage_summaries: Vec<StageSummary>,
    session_valid: bool,
    monitor: ProctoringMonitor,
    hooks: Option<Arc<dyn LockdownHooks>>,
}

impl AssessmentMachine {
    pub fn new(session_id: impl Into<String>, policy: AssessmentPolicy) -> Self {
        let sections = SectionKind::ALL
            .iter()
            .map(|k| Section::new(*k, policy.time_limit(*k).num_seconds()))
            .collect();
        Self {
            session_id: session_id.into(),
            monitor: ProctoringMonitor::new(&policy),
            policy,
            phase: AssessmentPhase::NotStarted,
            sections,
            proctoring_log: Vec::new(),
            stage_summaries: Vec::new(),
            session_valid: true,
            hooks: None,
        }
    }

    /// Rebuilds a machine from persisted state. A section that was active when the
    /// state was saved is closed out from its recorded progress; it is never reopened.
    pub fn restore(
        snapshot: MachineSnapshot,
        policy: AssessmentPolicy,
        now: DateTime<Utc>,
    ) -> (Self, Vec<MachineEvent>) {
        let mut machine = Self {
            session_id: snapshot.session_id,
            monitor: ProctoringMonitor::new(&policy),
            policy,
            phase: snapshot.phase,
            sections: snapshot.sections,
            proctoring_log: snapshot.proctoring_log,
            stage_summaries: snapshot.stage_summaries,
            session_valid: snapshot.session_valid,
            hooks: None,
        };

        let events = match machine.active_index() {
            Some(idx) => {
                let timed_out = machine.sections[idx]
                    .deadline()
                    .map(|d| now >= d)
                    .unwrap_or(false);
                tracing::info!(
                    session_id = %machine.session_id,
                    section = %machine.sections[idx].kind,
                    "closing section left active before reload"
                );
                machine.complete(idx, now, timed_out)
            }
            None => Vec::new(),
        };
        (machine, events)
    }

    pub fn snapshot(&self) -> MachineSnapshot {
        MachineSnapshot {
            session_id: self.session_id.clone(),
            phase: self.phase.clone(),
            sections: self.sections.clone(),
            proctoring_log: self.proctoring_log.clone(),
            stage_summaries: self.stage_summaries.clone(),
            session_valid: self.session_valid,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn phase(&self) -> &AssessmentPhase {
        &self.phase
    }

    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    pub fn section(&self, kind: SectionKind) -> &Section {
        &self.sections[kind as usize]
    }

    pub fn proctoring_log(&self) -> &[ProctoringEvent] {
        &self.proctoring_log
    }

    pub fn stage_summaries(&self) -> &[StageSummary] {
        &self.stage_summaries
    }

    pub fn session_valid(&self) -> bool {
        self.session_valid
    }

    pub fn is_complete(&self) -> bool {
        matches!(self.phase, AssessmentPhase::Complete { .. })
    }

    pub fn is_proctored(&self) -> bool {
        self.monitor.is_armed()
    }

    pub fn pending_violation_deadline(&self) -> Option<DateTime<Utc>> {
        self.monitor.pending_deadline()
    }

    pub fn active_section(&self) -> Option<&Section> {
        self.active_index().map(|i| &self.sections[i])
    }

    pub fn active_ticket(&self) -> Option<SectionTicket> {
        self.active_section().map(|s| SectionTicket {
            kind: s.kind,
            generation: s.generation,
        })
    }

    /// The section the candidate works on next: the active one, or the first
    /// unfinished section of the stage in progress.
    pub fn current_section(&self) -> Option<SectionKind> {
        let stage = match self.phase {
            AssessmentPhase::Stage1Active => Stage::One,
            AssessmentPhase::Stage2Active => Stage::Two,
            _ => return None,
        };
        stage
            .sections()
            .iter()
            .copied()
            .find(|k| !self.sections[*k as usize].status.is_terminal())
    }

    pub fn remaining_seconds(&self, now: DateTime<Utc>) -> Option<i64> {
        self.active_section().and_then(|s| s.remaining_seconds(now))
    }

    pub fn live_wpm(&self, now: DateTime<Utc>) -> Option<u32> {
        let section = self.active_section()?;
        match &section.progress {
            SectionProgress::Typing(attempt) => Some(TypingMetricsService::wpm(
                attempt.transcript.chars().count(),
                section.elapsed_seconds(now),
            )),
            _ => None,
        }
    }

    pub fn voice_prompt_index(&self) -> Option<usize> {
        match &self.active_section()?.progress {
            SectionProgress::Voice { prompt_index, .. } => Some(*prompt_index),
            _ => None,
        }
    }

    pub fn writing_responses(&self) -> Option<(SectionTicket, BTreeMap<WritingTask, String>)> {
        let ticket = self.active_ticket()?;
        match &self.active_section()?.progress {
            SectionProgress::Writing { responses, .. } => Some((ticket, responses.clone())),
            _ => None,
        }
    }

    pub fn enter_stage(&mut self, stage: Stage, validation: &SessionValidation) -> Result<()> {
        self.ensure_open()?;
        self.ensure_valid(validation)?;

        let next = match (stage, &self.phase) {
            (Stage::One, AssessmentPhase::NotStarted) => Some(AssessmentPhase::Stage1Active),
            (Stage::Two, AssessmentPhase::Stage1Gated { passed: true }) => {
                Some(AssessmentPhase::Stage2Active)
            }
            (Stage::One, AssessmentPhase::Stage1Active)
            | (Stage::Two, AssessmentPhase::Stage2Active) => None,
            (Stage::Two, _) => {
                return Err(Error::SectionLocked(
                    "Stage 1 must be passed before stage 2 can begin".to_string(),
                ))
            }
            (Stage::One, _) => {
                return Err(Error::SectionLocked(
                    "Stage 1 has already been completed".to_string(),
                ))
            }
        };

        if let Some(next) = next {
            tracing::info!(session_id = %self.session_id, stage = %stage, "stage entered");
            self.phase = next;
        }
        Ok(())
    }

    /// Every guard `start_section` applies, without changing state.
    pub fn check_start(
        &self,
        kind: SectionKind,
        validation: &SessionValidation,
        setup: &SectionSetup,
    ) -> Result<()> {
        self.ensure_open()?;
        self.ensure_valid(validation)?;
        self.check_startable(kind)?;
        if !setup.fullscreen || !setup.visible {
            return Err(Error::BadRequest(
                "Fullscreen mode is required to start this section".to_string(),
            ));
        }
        Ok(())
    }

    pub fn start_section(
        &mut self,
        kind: SectionKind,
        validation: &SessionValidation,
        setup: SectionSetup,
        hooks: Arc<dyn LockdownHooks>,
        now: DateTime<Utc>,
    ) -> Result<(SectionTicket, Vec<MachineEvent>)> {
        self.check_start(kind, validation, &setup)?;
        let ticket = self.activate(kind, setup.reference_text, hooks, now);
        Ok((ticket, vec![MachineEvent::SectionStarted { ticket }]))
    }

    pub fn record_typing(
        &mut self,
        transcript: String,
        keystrokes: Vec<i64>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        if !TypingMetricsService::keystrokes_well_formed(&keystrokes) {
            return Err(Error::BadRequest(
                "Keystroke timestamps must be non-negative and increasing".to_string(),
            ));
        }
        let section = self.active_mut(SectionKind::Typing, now)?;
        if let SectionProgress::Typing(attempt) = &mut section.progress {
            attempt.transcript = transcript;
            attempt.keystrokes = keystrokes;
        }
        Ok(())
    }

    pub fn record_answer(
        &mut self,
        kind: SectionKind,
        question_id: String,
        option: u32,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let options = question_bank::option_count(kind, &question_id).ok_or_else(|| {
            Error::BadRequest(format!("Unknown question '{}' for {}", question_id, kind))
        })?;
        if option as usize >= options {
            return Err(Error::BadRequest(format!(
                "Option {} is out of range for question '{}'",
                option, question_id
            )));
        }

        let section = self.active_mut(kind, now)?;
        match &mut section.progress {
            SectionProgress::Choices { answers } | SectionProgress::Grammar { answers, .. } => {
                answers.insert(question_id, option);
                Ok(())
            }
            _ => Err(Error::BadRequest(format!("{} does not take answers", kind))),
        }
    }

    pub fn record_grammar_writing(&mut self, response: String, now: DateTime<Utc>) -> Result<()> {
        let section = self.active_mut(SectionKind::Grammar, now)?;
        if let SectionProgress::Grammar {
            writing_response, ..
        } = &mut section.progress
        {
            *writing_response = response;
        }
        Ok(())
    }

    pub fn record_writing(
        &mut self,
        task: WritingTask,
        response: String,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let section = self.active_mut(SectionKind::Writing, now)?;
        if let SectionProgress::Writing { responses, .. } = &mut section.progress {
            responses.insert(task, response);
        }
        Ok(())
    }

    /// Scenario paging inside the active reading section.
    pub fn navigate(&mut self, kind: SectionKind, page: usize, now: DateTime<Utc>) -> Result<usize> {
        if kind != SectionKind::Reading {
            return Err(Error::BadRequest(format!("{} has no pages", kind)));
        }
        if page >= question_bank::READING_SCENARIOS.len() {
            return Err(Error::BadRequest(format!("Page {} does not exist", page)));
        }
        let section = self.active_mut(kind, now)?;
        section.page = page;
        Ok(page)
    }

    pub fn submit_section(&mut self, kind: SectionKind, now: DateTime<Utc>) -> Result<Vec<MachineEvent>> {
        self.ensure_open()?;

        // Pending violations and expired timers are applied before the submission.
        let events = self.tick(now);
        if !events.is_empty() {
            return Ok(events);
        }

        let idx = kind as usize;
        match self.sections[idx].status {
            SectionStatus::Active => Ok(self.complete(idx, now, false)),
            s if s.is_terminal() => Err(Error::SectionLocked(format!(
                "The {} section has already been completed",
                kind.title()
            ))),
            _ => Err(Error::BadRequest(format!(
                "The {} section has not been started",
                kind.title()
            ))),
        }
    }

    pub fn observe(&mut self, signal: &HostSignal, now: DateTime<Utc>) -> SignalOutcome {
        if self.is_complete() {
            return SignalOutcome {
                verdict: SignalVerdict::Allowed,
                events: Vec::new(),
            };
        }

        let obs = self.monitor.observe(signal, now);
        let mut events = Vec::new();
        if let Some(event) = obs.event {
            tracing::warn!(
                session_id = %self.session_id,
                event = %event.event_type,
                escalated = event.escalated,
                at = %event.timestamp.to_rfc3339(),
                "proctoring event"
            );
            self.proctoring_log.push(event.clone());
            events.push(MachineEvent::ProctoringLogged(event));
        }

        match obs.violation {
            Some(violation) => events.extend(self.force_complete(violation, now)),
            None => events.extend(self.tick(now)),
        }

        SignalOutcome {
            verdict: obs.verdict,
            events,
        }
    }

    /// Applies due violations, then expired timers. A violation wins when both are due.
    pub fn tick(&mut self, now: DateTime<Utc>) -> Vec<MachineEvent> {
        if self.is_complete() {
            return Vec::new();
        }
        let Some(idx) = self.active_index() else {
            return Vec::new();
        };

        if let Some(violation) = self.monitor.poll_due(now) {
            return self.force_complete(violation, now);
        }

        let expired = self.sections[idx]
            .deadline()
            .map(|d| now >= d)
            .unwrap_or(false);
        if expired {
            tracing::info!(
                session_id = %self.session_id,
                section = %self.sections[idx].kind,
                "section time limit reached"
            );
            return self.complete(idx, now, true);
        }
        Vec::new()
    }

    /// Records one scored voice answer. Returns `None` when the ticket is stale.
    pub fn apply_voice_score(
        &mut self,
        ticket: SectionTicket,
        score: PromptScore,
        now: DateTime<Utc>,
    ) -> Option<Vec<MachineEvent>> {
        if ticket.kind != SectionKind::Voice || !self.ticket_current(ticket) {
            return None;
        }

        let idx = SectionKind::Voice as usize;
        let done = match &mut self.sections[idx].progress {
            SectionProgress::Voice {
                prompt_index,
                scores,
            } if score.prompt_index == *prompt_index => {
                scores.push(score);
                *prompt_index += 1;
                *prompt_index >= question_bank::VOICE_PROMPTS.len()
            }
            _ => return None,
        };

        if done {
            Some(self.complete(idx, now, false))
        } else {
            Some(Vec::new())
        }
    }

    /// Stores oracle scores for the writing tasks. Returns false when the ticket is stale.
    pub fn apply_writing_scores(
        &mut self,
        ticket: SectionTicket,
        new_scores: BTreeMap<WritingTask, f64>,
    ) -> bool {
        if ticket.kind != SectionKind::Writing || !self.ticket_current(ticket) {
            return false;
        }
        match &mut self.sections[SectionKind::Writing as usize].progress {
            SectionProgress::Writing { scores, .. } => {
                scores.extend(new_scores);
                true
            }
            _ => false,
        }
    }

    /// Marks the session invalid without touching section state.
    pub fn invalidate_session(&mut self, reason: &str) -> bool {
        let was_valid = std::mem::replace(&mut self.session_valid, false);
        if was_valid {
            tracing::info!(session_id = %self.session_id, reason = %reason, "session invalidated");
        }
        was_valid
    }

    pub fn ticket_current(&self, ticket: SectionTicket) -> bool {
        let section = &self.sections[ticket.kind as usize];
        section.status == SectionStatus::Active && section.generation == ticket.generation
    }

    fn active_index(&self) -> Option<usize> {
        self.sections
            .iter()
            .position(|s| s.status == SectionStatus::Active)
    }

    fn ensure_open(&self) -> Result<()> {
        match &self.phase {
            AssessmentPhase::Complete { termination } => Err(termination.to_error()),
            _ => Ok(()),
        }
    }

    fn ensure_valid(&self, validation: &SessionValidation) -> Result<()> {
        if !validation.valid {
            let message = validation
                .message
                .clone()
                .unwrap_or_else(|| "Session is invalid".to_string());
            return Err(if validation.expired {
                Error::SessionExpired(message)
            } else {
                Error::SessionInvalid(message)
            });
        }
        if !self.session_valid {
            return Err(Error::SessionInvalid(
                "Session is no longer valid".to_string(),
            ));
        }
        Ok(())
    }

    fn check_startable(&self, kind: SectionKind) -> Result<()> {
        if self.sections[kind as usize].status.is_terminal() {
            return Err(Error::SectionLocked(format!(
                "The {} section has already been completed and cannot be retaken",
                kind.title()
            )));
        }
        if let Some(active) = self.active_section() {
            return Err(Error::Conflict(format!(
                "The {} section is still in progress",
                active.kind.title()
            )));
        }

        let stage = kind.stage();
        let stage_active = match stage {
            Stage::One => self.phase == AssessmentPhase::Stage1Active,
            Stage::Two => self.phase == AssessmentPhase::Stage2Active,
        };
        if !stage_active {
            return Err(Error::SectionLocked(format!("{} has not been entered", stage)));
        }

        if let Some(earlier) = stage
            .sections()
            .iter()
            .take_while(|k| **k != kind)
            .find(|k| !self.sections[**k as usize].status.is_terminal())
        {
            return Err(Error::SectionLocked(format!(
                "Complete the {} section first",
                earlier.title()
            )));
        }
        Ok(())
    }

    fn active_mut(&mut self, kind: SectionKind, now: DateTime<Utc>) -> Result<&mut Section> {
        self.ensure_open()?;
        let section = &mut self.sections[kind as usize];
        match section.status {
            SectionStatus::Active => {
                if section.deadline().map(|d| now >= d).unwrap_or(false) {
                    Err(Error::SectionLocked(format!(
                        "Time is up for the {} section",
                        kind.title()
                    )))
                } else {
                    Ok(section)
                }
            }
            s if s.is_terminal() => Err(Error::SectionLocked(format!(
                "The {} section has already been completed",
                kind.title()
            ))),
            _ => Err(Error::BadRequest(format!(
                "The {} section has not been started",
                kind.title()
            ))),
        }
    }

    fn activate(
        &mut self,
        kind: SectionKind,
        reference_text: Option<String>,
        hooks: Arc<dyn LockdownHooks>,
        now: DateTime<Utc>,
    ) -> SectionTicket {
        let reference_text = match kind {
            SectionKind::Typing => Some(
                reference_text.unwrap_or_else(|| question_bank::DEFAULT_TYPING_TEXT.to_string()),
            ),
            _ => None,
        };

        let section = &mut self.sections[kind as usize];
        section.status = SectionStatus::Active;
        section.started_at = Some(now);
        section.finished_at = None;
        section.generation += 1;
        section.page = 0;
        section.progress = SectionProgress::initial(kind, reference_text);
        let ticket = SectionTicket {
            kind,
            generation: section.generation,
        };

        self.monitor.arm(kind, hooks.clone());
        self.hooks = Some(hooks);
        tracing::info!(
            session_id = %self.session_id,
            section = %kind,
            generation = ticket.generation,
            "section started"
        );
        ticket
    }

    fn complete(&mut self, idx: usize, now: DateTime<Utc>, timed_out: bool) -> Vec<MachineEvent> {
        if let Some(violation) = self.monitor.fire_pending() {
            return self.force_complete(violation, now);
        }
        self.monitor.disarm();

        let section = &mut self.sections[idx];
        let elapsed = section.elapsed_seconds(now);
        let result = GradingService::grade(
            section.kind,
            &section.progress,
            elapsed,
            &self.policy.thresholds,
        );
        section.status = SectionStatus::Completed;
        section.finished_at = Some(now);
        section.result = Some(result.clone());
        let kind = section.kind;

        tracing::info!(
            session_id = %self.session_id,
            section = %kind,
            passed = result.passed(),
            timed_out,
            "section completed"
        );

        let mut events = vec![MachineEvent::SectionCompleted {
            kind,
            status: SectionStatus::Completed,
            result: Some(result),
            timed_out,
        }];

        let stage = kind.stage();
        let next = stage
            .sections()
            .iter()
            .copied()
            .find(|k| !self.sections[*k as usize].status.is_terminal());

        match next {
            Some(next) => {
                // A timeout rolls straight into the next section of the stage.
                if timed_out {
                    if let Some(hooks) = self.hooks.clone() {
                        let ticket = self.activate(next, None, hooks, now);
                        events.push(MachineEvent::SectionStarted { ticket });
                    }
                }
            }
            None => events.extend(self.gate(stage, now)),
        }
        events
    }

    fn gate(&mut self, stage: Stage, now: DateTime<Utc>) -> Vec<MachineEvent> {
        let result = |kind: SectionKind| self.sections[kind as usize].result.as_ref();
        let summary = match stage {
            Stage::One => StageSummary::One(GradingService::stage1_summary(
                result(SectionKind::Typing),
                result(SectionKind::Reading),
                result(SectionKind::Grammar),
            )),
            Stage::Two => StageSummary::Two(GradingService::stage2_summary(
                result(SectionKind::Voice),
                result(SectionKind::Writing),
                result(SectionKind::Sjt),
            )),
        };
        let passed = summary.passed();
        tracing::info!(session_id = %self.session_id, stage = %stage, passed, "stage gated");

        self.stage_summaries.push(summary.clone());
        let mut events = vec![MachineEvent::StageGated { summary }];

        match stage {
            Stage::One => {
                self.phase = AssessmentPhase::Stage1Gated { passed };
                if !passed {
                    events.extend(self.terminate(Termination::StageFailed { stage }, now));
                }
            }
            Stage::Two => {
                self.phase = AssessmentPhase::Stage2Gated { passed };
                events.extend(self.terminate(Termination::Finished, now));
            }
        }
        events
    }

    fn force_complete(&mut self, violation: ViolationType, now: DateTime<Utc>) -> Vec<MachineEvent> {
        let Some(idx) = self.active_index() else {
            return Vec::new();
        };

        let section = &mut self.sections[idx];
        let elapsed = section.elapsed_seconds(now);
        let result = GradingService::forced_result(section.kind, &section.progress, elapsed, &self.policy);
        section.status = SectionStatus::ForceCompleted;
        section.finished_at = Some(now);
        section.result = Some(result.clone());
        let kind = section.kind;

        let mut events = vec![MachineEvent::SectionCompleted {
            kind,
            status: SectionStatus::ForceCompleted,
            result: Some(result),
            timed_out: false,
        }];

        let locked: Vec<SectionKind> = self
            .sections
            .iter_mut()
            .filter(|s| !s.status.is_terminal())
            .map(|s| {
                s.status = SectionStatus::ForceCompleted;
                s.finished_at = Some(now);
                s.kind
            })
            .collect();
        if !locked.is_empty() {
            events.push(MachineEvent::SectionsLocked { kinds: locked });
        }

        tracing::warn!(
            session_id = %self.session_id,
            section = %kind,
            violation = %violation,
            at = %now.to_rfc3339(),
            "assessment force-completed after security violation"
        );
        events.extend(self.terminate(Termination::SecurityViolation { violation, at: now }, now));
        events
    }

    fn terminate(&mut self, termination: Termination, now: DateTime<Utc>) -> Vec<MachineEvent> {
        self.monitor.disarm();
        self.hooks = None;
        self.session_valid = false;
        let reason = termination.message().to_string();
        tracing::info!(
            session_id = %self.session_id,
            termination = ?termination,
            at = %now.to_rfc3339(),
            "assessment complete"
        );
        self.phase = AssessmentPhase::Complete {
            termination: termination.clone(),
        };
        vec![
            MachineEvent::Terminated(termination),
            MachineEvent::SessionInvalidated { reason },
        ]
    }
}
