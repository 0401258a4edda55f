use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use crate::models::policy::AssessmentPolicy;
use crate::models::proctoring::{HostSignal, ProctoringEvent, SignalVerdict, ViolationType};
use crate::models::section::SectionKind;

/// Input suppression installed while a section is proctored.
#[cfg_attr(test, mockall::automock)]
pub trait LockdownHooks: Send + Sync {
    fn engage(&self);
    fn release(&self);
}

/// Lockdown reported to the browser as a directive (clipboard, context menu and
/// blocked shortcuts disabled while engaged).
#[derive(Debug, Default)]
pub struct ClientLockdown {
    engaged: AtomicBool,
}

impl ClientLockdown {
    pub fn is_engaged(&self) -> bool {
        self.engaged.load(Ordering::SeqCst)
    }
}

impl LockdownHooks for ClientLockdown {
    fn engage(&self) {
        self.engaged.store(true, Ordering::SeqCst);
    }

    fn release(&self) {
        self.engaged.store(false, Ordering::SeqCst);
    }
}

/// Holds the lockdown for as long as it lives.
pub struct LockdownGuard {
    hooks: Arc<dyn LockdownHooks>,
}

impl LockdownGuard {
    pub fn engage(hooks: Arc<dyn LockdownHooks>) -> Self {
        hooks.engage();
        Self { hooks }
    }
}

impl Drop for LockdownGuard {
    fn drop(&mut self) {
        self.hooks.release();
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct PendingViolation {
    violation: ViolationType,
    deadline: DateTime<Utc>,
}

struct ArmedState {
    section: SectionKind,
    _lockdown: LockdownGuard,
    fullscreen: bool,
    visible: bool,
    pending: Option<PendingViolation>,
    clipboard_attempts: u32,
    shortcut_attempts: u32,
    fired: bool,
}

/// What the monitor made of one host signal.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub verdict: SignalVerdict,
    pub event: Option<ProctoringEvent>,
    pub violation: Option<ViolationType>,
}

impl Observation {
    fn allowed() -> Self {
        Self {
            verdict: SignalVerdict::Allowed,
            event: None,
            violation: None,
        }
    }
}

pub struct ProctoringMonitor {
    grace: Duration,
    warning_limit: u32,
    armed: Option<ArmedState>,
}

impl ProctoringMonitor {
    pub fn new(policy: &AssessmentPolicy) -> Self {
        Self {
            grace: policy.fullscreen_exit_grace,
            warning_limit: policy.shortcut_warning_limit,
            armed: None,
        }
    }

    /// Starts watching `section`. The host is expected to be fullscreen and visible.
    pub fn arm(&mut self, section: SectionKind, hooks: Arc<dyn LockdownHooks>) {
        // Dropping any previous state releases its lockdown first.
        self.armed = None;
        self.armed = Some(ArmedState {
            section,
            _lockdown: LockdownGuard::engage(hooks),
            fullscreen: true,
            visible: true,
            pending: None,
            clipboard_attempts: 0,
            shortcut_attempts: 0,
            fired: false,
        });
    }

    pub fn disarm(&mut self) {
        self.armed = None;
    }

    pub fn is_armed(&self) -> bool {
        self.armed.is_some()
    }

    pub fn armed_section(&self) -> Option<SectionKind> {
        self.armed.as_ref().map(|a| a.section)
    }

    pub fn pending_deadline(&self) -> Option<DateTime<Utc>> {
        self.armed
            .as_ref()
            .and_then(|a| if a.fired { None } else { a.pending.map(|p| p.deadline) })
    }

    pub fn observe(&mut self, signal: &HostSignal, now: DateTime<Utc>) -> Observation {
        let grace = self.grace;
        let limit = self.warning_limit;
        let Some(state) = self.armed.as_mut() else {
            return Observation::allowed();
        };

        let mut obs = match signal {
            HostSignal::FullscreenChanged { fullscreen } => {
                state.fullscreen_edge(*fullscreen, grace, now)
            }
            HostSignal::VisibilityChanged { visible } => state.visibility_edge(*visible, now),
            HostSignal::Poll {
                fullscreen,
                visible,
            } => {
                let hidden = state.visibility_edge(*visible, now);
                if hidden.violation.is_some() {
                    hidden
                } else {
                    state.fullscreen_edge(*fullscreen, grace, now)
                }
            }
            HostSignal::Clipboard { .. } => {
                state.clipboard_attempts += 1;
                state.blocked_attempt(
                    ViolationType::CopyPasteAttempted,
                    state.clipboard_attempts,
                    limit,
                    now,
                )
            }
            HostSignal::KeyDown(combo) if combo.is_blocked() => {
                state.shortcut_attempts += 1;
                state.blocked_attempt(
                    ViolationType::ShortcutBlocked,
                    state.shortcut_attempts,
                    limit,
                    now,
                )
            }
            HostSignal::KeyDown(_) => Observation::allowed(),
        };

        if obs.violation.is_none() {
            obs.violation = state.due(now);
        }
        if obs.violation.is_some() {
            if state.fired {
                obs.violation = None;
            } else {
                state.fired = true;
            }
        }
        obs
    }

    /// Fires a pending fullscreen violation once its grace period has run out.
    pub fn poll_due(&mut self, now: DateTime<Utc>) -> Option<ViolationType> {
        let state = self.armed.as_mut()?;
        if state.fired {
            return None;
        }
        let due = state.due(now);
        if due.is_some() {
            state.fired = true;
        }
        due
    }

    /// Fires a pending violation ahead of its deadline. Used when the section is about to
    /// end, since ending it must not discard an exit already observed.
    pub fn fire_pending(&mut self) -> Option<ViolationType> {
        let state = self.armed.as_mut()?;
        if state.fired {
            return None;
        }
        let pending = state.pending.map(|p| p.violation);
        if pending.is_some() {
            state.fired = true;
        }
        pending
    }
}

impl ArmedState {
    fn event(&self, event_type: ViolationType, escalated: bool, now: DateTime<Utc>) -> ProctoringEvent {
        ProctoringEvent {
            event_type,
            timestamp: now,
            section: Some(self.section),
            escalated,
        }
    }

    fn fullscreen_edge(&mut self, fullscreen: bool, grace: Duration, now: DateTime<Utc>) -> Observation {
        let was = std::mem::replace(&mut self.fullscreen, fullscreen);
        if !(was && !fullscreen) || self.pending.is_some() {
            return Observation::allowed();
        }

        // Re-entering fullscreen during the grace period does not cancel it.
        self.pending = Some(PendingViolation {
            violation: ViolationType::FullscreenExited,
            deadline: now + grace,
        });
        Observation {
            verdict: SignalVerdict::Allowed,
            event: Some(self.event(ViolationType::FullscreenExited, true, now)),
            violation: None,
        }
    }

    fn visibility_edge(&mut self, visible: bool, now: DateTime<Utc>) -> Observation {
        let was = std::mem::replace(&mut self.visible, visible);
        if !(was && !visible) {
            return Observation::allowed();
        }
        Observation {
            verdict: SignalVerdict::Allowed,
            event: Some(self.event(ViolationType::TabHidden, true, now)),
            violation: Some(ViolationType::TabHidden),
        }
    }

    fn blocked_attempt(
        &self,
        kind: ViolationType,
        attempts: u32,
        limit: u32,
        now: DateTime<Utc>,
    ) -> Observation {
        let escalated = attempts > limit;
        Observation {
            verdict: SignalVerdict::Rejected,
            event: Some(self.event(kind, escalated, now)),
            violation: escalated.then_some(kind),
        }
    }

    fn due(&self, now: DateTime<Utc>) -> Option<ViolationType> {
        self.pending
            .filter(|p| now >= p.deadline)
            .map(|p| p.violation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::proctoring::{ClipboardAction, KeyCombo};

    fn monitor() -> ProctoringMonitor {
        ProctoringMonitor::new(&AssessmentPolicy::default())
    }

    fn lockdown() -> Arc<ClientLockdown> {
        Arc::new(ClientLockdown::default())
    }

    fn exit() -> HostSignal {
        HostSignal::FullscreenChanged { fullscreen: false }
    }

    #[test]
    fn disarmed_monitor_ignores_everything() {
        let mut m = monitor();
        let now = Utc::now();
        let obs = m.observe(&exit(), now);
        assert_eq!(obs, Observation::allowed());
        assert_eq!(m.poll_due(now + Duration::seconds(10)), None);
    }

    #[test]
    fn fullscreen_exit_fires_after_grace() {
        let mut m = monitor();
        let t0 = Utc::now();
        m.arm(SectionKind::Typing, lockdown());

        let obs = m.observe(&exit(), t0);
        assert_eq!(obs.violation, None);
        assert_eq!(obs.event.map(|e| e.event_type), Some(ViolationType::FullscreenExited));
        assert_eq!(m.pending_deadline(), Some(t0 + Duration::seconds(3)));

        assert_eq!(m.poll_due(t0 + Duration::seconds(2)), None);
        assert_eq!(
            m.poll_due(t0 + Duration::seconds(3)),
            Some(ViolationType::FullscreenExited)
        );
        assert_eq!(m.poll_due(t0 + Duration::seconds(4)), None);
    }

    #[test]
    fn continued_exit_does_not_refire() {
        let mut m = monitor();
        let t0 = Utc::now();
        m.arm(SectionKind::Reading, lockdown());

        assert!(m.observe(&exit(), t0).event.is_some());
        for i in 1..5 {
            let poll = HostSignal::Poll {
                fullscreen: false,
                visible: true,
            };
            let obs = m.observe(&poll, t0 + Duration::milliseconds(500 * i));
            assert!(obs.event.is_none());
        }
    }

    #[test]
    fn returning_to_fullscreen_keeps_pending_violation() {
        let mut m = monitor();
        let t0 = Utc::now();
        m.arm(SectionKind::Reading, lockdown());
        m.observe(&exit(), t0);
        m.observe(&HostSignal::FullscreenChanged { fullscreen: true }, t0 + Duration::seconds(1));
        assert_eq!(
            m.poll_due(t0 + Duration::seconds(3)),
            Some(ViolationType::FullscreenExited)
        );
    }

    #[test]
    fn pending_exit_fires_early_once() {
        let mut m = monitor();
        let t0 = Utc::now();
        m.arm(SectionKind::Typing, lockdown());
        assert_eq!(m.fire_pending(), None);
        m.observe(&exit(), t0);
        assert_eq!(m.fire_pending(), Some(ViolationType::FullscreenExited));
        assert_eq!(m.fire_pending(), None);
        assert_eq!(m.poll_due(t0 + Duration::seconds(5)), None);
    }

    #[test]
    fn tab_hidden_is_immediate() {
        let mut m = monitor();
        m.arm(SectionKind::Grammar, lockdown());
        let obs = m.observe(&HostSignal::VisibilityChanged { visible: false }, Utc::now());
        assert_eq!(obs.violation, Some(ViolationType::TabHidden));
    }

    #[test]
    fn poll_detects_hidden_tab_edge() {
        let mut m = monitor();
        m.arm(SectionKind::Grammar, lockdown());
        let poll = HostSignal::Poll {
            fullscreen: true,
            visible: false,
        };
        assert_eq!(
            m.observe(&poll, Utc::now()).violation,
            Some(ViolationType::TabHidden)
        );
    }

    #[test]
    fn clipboard_escalates_past_warning_limit() {
        let mut m = monitor();
        m.arm(SectionKind::Typing, lockdown());
        let paste = HostSignal::Clipboard {
            action: ClipboardAction::Paste,
        };
        let now = Utc::now();
        for _ in 0..3 {
            let obs = m.observe(&paste, now);
            assert_eq!(obs.verdict, SignalVerdict::Rejected);
            assert_eq!(obs.violation, None);
            assert!(!obs.event.map(|e| e.escalated).unwrap_or(true));
        }
        let obs = m.observe(&paste, now);
        assert_eq!(obs.violation, Some(ViolationType::CopyPasteAttempted));
    }

    #[test]
    fn allowed_keys_pass_through() {
        let mut m = monitor();
        m.arm(SectionKind::Typing, lockdown());
        let key = HostSignal::KeyDown(KeyCombo {
            key: "a".into(),
            ..KeyCombo::default()
        });
        assert_eq!(m.observe(&key, Utc::now()), Observation::allowed());

        let print = HostSignal::KeyDown(KeyCombo {
            key: "p".into(),
            ctrl: true,
            ..KeyCombo::default()
        });
        assert_eq!(m.observe(&print, Utc::now()).verdict, SignalVerdict::Rejected);
    }

    #[test]
    fn lockdown_released_on_disarm() {
        let mut hooks = MockLockdownHooks::new();
        hooks.expect_engage().times(1).return_const(());
        hooks.expect_release().times(1).return_const(());

        let mut m = monitor();
        m.arm(SectionKind::Voice, Arc::new(hooks));
        m.disarm();
        assert!(!m.is_armed());
    }

    #[test]
    fn lockdown_released_when_monitor_dropped() {
        let lock = lockdown();
        {
            let mut m = monitor();
            m.arm(SectionKind::Voice, lock.clone());
            assert!(lock.is_engaged());
        }
        assert!(!lock.is_engaged());
    }

    #[test]
    fn lockdown_released_on_unwind() {
        let lock = lockdown();
        let inner = lock.clone();
        let result = std::panic::catch_unwind(move || {
            let mut m = monitor();
            m.arm(SectionKind::Sjt, inner);
            panic!("section handler failed");
        });
        assert!(result.is_err());
        assert!(!lock.is_engaged());
    }
}
