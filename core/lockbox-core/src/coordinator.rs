//! Lock session coordination.
//!
//! The coordinator reconciles three independently-failing subsystems — the
//! session store, the deferred timer, and the physical actuator — into one
//! state machine. All mutations of the active session go through it, under a
//! single mutex: at most one session is ever `LOCKED` (the store enforces
//! this too), so one gate serializing `start_lock`, `request_override`, and
//! `on_timer_fired` is sufficient by design, not a scalability shortcut.
//!
//! Commit ordering: store transitions are decided first and never rolled
//! back on actuator failure. The session bookkeeping must track wall-clock
//! and override decisions even when hardware is unresponsive; a human
//! reconciles the device separately.

use chrono::{DateTime, Duration, Utc};
use std::sync::{Arc, Mutex};

use crate::actuator::Actuator;
use crate::classifier::Classifier;
use crate::error::{LockboxError, Result};
use crate::session::{SessionStatus, UnlockAttempt};
use crate::store::SessionStore;
use crate::timer::{CancelOutcome, DeferredTimer};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartedLock {
    pub session_id: i64,
    pub end_time: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OverrideOutcome {
    pub granted: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct StatusSnapshot {
    pub session_id: i64,
    pub status: SessionStatus,
    pub seconds_remaining: i64,
}

pub struct Coordinator {
    store: SessionStore,
    actuator: Arc<dyn Actuator>,
    classifier: Arc<dyn Classifier>,
    timer: DeferredTimer,
    // Serializes every path that can transition the active session. The
    // timer callback re-enters through on_timer_fired and takes this gate
    // like any caller thread.
    gate: Mutex<()>,
}

impl Coordinator {
    pub fn new(
        store: SessionStore,
        actuator: Arc<dyn Actuator>,
        classifier: Arc<dyn Classifier>,
        timer: DeferredTimer,
    ) -> Self {
        Self {
            store,
            actuator,
            classifier,
            timer,
            gate: Mutex::new(()),
        }
    }

    /// Starts a new lock session.
    ///
    /// Rejects a non-positive duration before touching any collaborator and
    /// rejects with a conflict while a session is `LOCKED` — the UI must not
    /// be able to start two concurrent sessions, and that is enforced here
    /// as well as at the storage boundary. On acceptance: persist, actuate,
    /// schedule the one-shot unlock timer keyed by the new session id.
    pub fn start_lock(self: &Arc<Self>, duration_minutes: i64) -> Result<StartedLock> {
        if duration_minutes <= 0 {
            return Err(LockboxError::InvalidInput(
                "duration must be a positive number of minutes".to_string(),
            ));
        }
        // try_minutes bounds the span; checked_add_signed below bounds the
        // resulting instant. Either failing is a caller input problem, not a
        // panic.
        let lock_span = Duration::try_minutes(duration_minutes).ok_or_else(|| {
            LockboxError::InvalidInput("duration is too large to schedule".to_string())
        })?;

        let _guard = self.lock_gate();

        if let Some(active) = self.store.current_locked()? {
            return Err(LockboxError::Conflict {
                active_session_id: active.id,
            });
        }

        let start_time = Utc::now();
        let end_time = start_time.checked_add_signed(lock_span).ok_or_else(|| {
            LockboxError::InvalidInput("duration is too large to schedule".to_string())
        })?;
        let session_id = self.store.create(start_time, end_time, duration_minutes)?;

        tracing::info!(session_id, duration_minutes, end_time = %end_time, "Lock session started");

        if let Err(err) = self.actuator.lock() {
            tracing::error!(session_id, error = %err, "Actuator failed to lock; session remains recorded");
        }

        let coordinator = Arc::clone(self);
        let scheduled = self.timer.schedule(
            &timer_key(session_id),
            end_time,
            Box::new(move || coordinator.on_timer_fired(session_id)),
        );
        if let Err(err) = scheduled {
            // Session ids are unique, so a key collision cannot happen in
            // practice; if scheduling still fails the override path remains
            // the way out, same as a missed fire.
            tracing::error!(session_id, error = %err, "Failed to schedule unlock timer");
        }

        Ok(StartedLock {
            session_id,
            end_time,
        })
    }

    /// Handles an early-unlock request.
    ///
    /// An empty reason or a missing active session is rejected before the
    /// classifier runs and before anything is audited: an attempt against no
    /// session is not loggable against any session. Every classified request
    /// writes exactly one attempt row, granted or refused.
    pub fn request_override(&self, reason: &str) -> Result<OverrideOutcome> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(LockboxError::InvalidInput(
                "a reason is required".to_string(),
            ));
        }

        let _guard = self.lock_gate();

        let session = self.store.current_locked()?.ok_or(LockboxError::NotLocked)?;

        let granted = self.classifier.classify(reason);
        self.store.record_attempt(&UnlockAttempt {
            session_id: session.id,
            reason: reason.to_string(),
            decision: granted,
            timestamp: Utc::now(),
        })?;

        if !granted {
            tracing::info!(session_id = session.id, "Override refused; box stays locked");
            return Ok(OverrideOutcome { granted: false });
        }

        tracing::warn!(session_id = session.id, "Emergency override granted");

        if let Err(err) = self.actuator.unlock() {
            tracing::error!(session_id = session.id, error = %err, "Actuator failed to unlock on override");
        }

        // Best effort: NotFound and AlreadyFired mean the natural expiry got
        // there first and its unlock path is (or was) running. The override
        // already succeeded from the caller's perspective.
        match self.timer.cancel(&timer_key(session.id)) {
            CancelOutcome::Cancelled => {
                tracing::debug!(session_id = session.id, "Unlock timer cancelled")
            }
            outcome => {
                tracing::debug!(session_id = session.id, ?outcome, "No pending unlock timer")
            }
        }

        self.store.mark_premature(session.id, true)?;

        Ok(OverrideOutcome { granted: true })
    }

    /// Startup recovery. In-flight timers do not survive a restart, so a
    /// session still `LOCKED` at boot keeps the commitment: the actuator is
    /// re-driven to its locked level (the pin level after a reboot is
    /// whatever the hardware left it) and the session stays open to the
    /// override path or the next start_lock's repair. Surfaced loudly.
    pub fn recover_startup_state(&self) {
        let _guard = self.lock_gate();

        let session = match self.store.current_locked() {
            Ok(Some(session)) => session,
            Ok(None) => return,
            Err(err) => {
                tracing::warn!(error = %err, "Failed to check for a stale locked session at startup");
                return;
            }
        };

        tracing::warn!(
            session_id = session.id,
            end_time = %session.end_time,
            "Locked session found at startup; its unlock timer did not survive the restart. \
             The override path remains available."
        );

        if let Err(err) = self.actuator.lock() {
            tracing::error!(session_id = session.id, error = %err, "Actuator failed to re-lock at startup");
        }
    }

    /// Timer-fire entry point. Invoked from the timer worker thread; also
    /// the natural-expiry event for callers that drive time themselves.
    ///
    /// A session no longer `LOCKED` means an override won the race; that is
    /// the expected outcome, not an error, and nothing is re-actuated.
    pub fn on_timer_fired(&self, session_id: i64) {
        let _guard = self.lock_gate();

        let session = match self.store.get_session(session_id) {
            Ok(Some(session)) => session,
            Ok(None) => {
                tracing::warn!(session_id, "Timer fired for unknown session");
                return;
            }
            Err(err) => {
                tracing::error!(session_id, error = %err, "Failed to load session on timer fire");
                return;
            }
        };

        if session.status != SessionStatus::Locked {
            tracing::debug!(session_id, status = session.status.as_str(), "Timer fired after session already ended");
            return;
        }

        tracing::info!(session_id, "Lock duration elapsed; completing session");

        if let Err(err) = self.actuator.unlock() {
            tracing::error!(session_id, error = %err, "Actuator failed to unlock on expiry");
        }

        if let Err(err) = self.store.mark_completed(session_id) {
            tracing::error!(session_id, error = %err, "Failed to mark session completed");
        }
    }

    /// Reports the active session, if any, with remaining time clamped at
    /// zero. Read-only; does not take the gate.
    pub fn current_status(&self) -> Result<Option<StatusSnapshot>> {
        let session = match self.store.current_locked()? {
            Some(session) => session,
            None => return Ok(None),
        };

        let seconds_remaining = (session.end_time - Utc::now()).num_seconds().max(0);
        Ok(Some(StatusSnapshot {
            session_id: session.id,
            status: session.status,
            seconds_remaining,
        }))
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    fn lock_gate(&self) -> std::sync::MutexGuard<'_, ()> {
        self.gate.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn timer_key(session_id: i64) -> String {
    format!("unlock-{}", session_id)
}
