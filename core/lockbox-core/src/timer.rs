//! One-shot deferred timers with cancellation by key.
//!
//! Each scheduled entry parks a worker thread on `recv_timeout` until its
//! deadline or a cancellation signal. A shared registry arbitrates the race
//! between cancellation and firing under one lock: whichever side removes
//! the pending entry first wins, so a cancelled timer never fires and a
//! fired timer reports `AlreadyFired` to a late cancel.
//!
//! Cancellation is modeled as an outcome, not an error: `NotFound` and
//! `AlreadyFired` both mean "nothing left to cancel", which is the expected
//! result when an override races the natural expiry. Fired keys are retained
//! only until the next successful schedule; a cancel arriving after that
//! sees `NotFound`, which carries the same meaning.

use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::error::{LockboxError, Result};

pub type TimerCallback = Box<dyn FnOnce() + Send + 'static>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    Cancelled,
    NotFound,
    AlreadyFired,
}

/// Handle for a scheduled entry. Dropping it does not cancel the timer;
/// cancellation goes through [`DeferredTimer::cancel`] by key.
#[derive(Debug)]
pub struct TimerHandle {
    key: String,
    worker: JoinHandle<()>,
}

impl TimerHandle {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Blocks until the worker thread exits. Test helper; the coordinator
    /// never joins its timers.
    pub fn join(self) {
        let _ = self.worker.join();
    }
}

#[derive(Default)]
struct TimerRegistry {
    pending: HashMap<String, mpsc::Sender<()>>,
    fired: HashSet<String>,
}

pub struct DeferredTimer {
    registry: Arc<Mutex<TimerRegistry>>,
    misfire_grace: Duration,
}

impl DeferredTimer {
    pub fn new(misfire_grace: Duration) -> Self {
        Self {
            registry: Arc::new(Mutex::new(TimerRegistry::default())),
            misfire_grace,
        }
    }

    /// Registers a one-shot callback to run at `fire_at`.
    ///
    /// A key already pending (or already fired) is rejected: a session has
    /// exactly one timer, created once, so replacement is never valid. A
    /// deadline already in the past fires as soon as possible from the worker
    /// thread, never inline on the caller.
    pub fn schedule(
        &self,
        key: &str,
        fire_at: DateTime<Utc>,
        callback: TimerCallback,
    ) -> Result<TimerHandle> {
        let (cancel_tx, cancel_rx) = mpsc::channel();

        {
            let mut registry = self.registry.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            if registry.pending.contains_key(key) || registry.fired.contains(key) {
                return Err(LockboxError::Timer(format!(
                    "timer key already used: {}",
                    key
                )));
            }
            // Fired keys are kept only to answer a cancel racing that fire. A
            // new schedule means earlier entries are settled, so drop them
            // here rather than let the set grow for the life of the process.
            registry.fired.clear();
            registry.pending.insert(key.to_string(), cancel_tx);
        }

        let registry = Arc::clone(&self.registry);
        let key_owned = key.to_string();
        let misfire_grace = self.misfire_grace;
        let worker = thread::spawn(move || {
            let delay = (fire_at - Utc::now()).to_std().unwrap_or(Duration::ZERO);

            match cancel_rx.recv_timeout(delay) {
                Err(RecvTimeoutError::Timeout) => {}
                // A signal or a dropped sender both mean the entry was
                // cancelled (or the timer service is shutting down).
                Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                    tracing::debug!(key = %key_owned, "Timer worker exiting after cancel");
                    return;
                }
            }

            {
                let mut registry = registry.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
                if registry.pending.remove(&key_owned).is_none() {
                    // Cancel claimed the entry between our timeout and this
                    // lock; it already reported Cancelled to its caller.
                    tracing::debug!(key = %key_owned, "Timer lost fire race to cancel");
                    return;
                }
                registry.fired.insert(key_owned.clone());
            }

            let late_by = (Utc::now() - fire_at).to_std().unwrap_or(Duration::ZERO);
            if late_by > misfire_grace {
                // Past the grace window we still deliver: a skipped fire
                // would leave the box locked with no remaining unlock path.
                tracing::warn!(key = %key_owned, late_secs = late_by.as_secs(), "Timer fired past misfire grace window");
            } else {
                tracing::info!(key = %key_owned, "Timer fired");
            }
            callback();
        });

        Ok(TimerHandle {
            key: key.to_string(),
            worker,
        })
    }

    /// Removes a pending entry. Never an error; see module docs.
    pub fn cancel(&self, key: &str) -> CancelOutcome {
        let mut registry = self.registry.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(cancel_tx) = registry.pending.remove(key) {
            let _ = cancel_tx.send(());
            tracing::debug!(key = %key, "Timer cancelled");
            CancelOutcome::Cancelled
        } else if registry.fired.contains(key) {
            CancelOutcome::AlreadyFired
        } else {
            CancelOutcome::NotFound
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use std::time::Instant;

    const GRACE: Duration = Duration::from_secs(600);

    fn fired_probe() -> (TimerCallback, mpsc::Receiver<thread::ThreadId>) {
        let (tx, rx) = mpsc::channel();
        let callback = Box::new(move || {
            let _ = tx.send(thread::current().id());
        });
        (callback, rx)
    }

    #[test]
    fn fires_after_deadline_then_reports_already_fired() {
        let timer = DeferredTimer::new(GRACE);
        let (callback, rx) = fired_probe();

        let handle = timer
            .schedule("unlock-1", Utc::now() + ChronoDuration::milliseconds(30), callback)
            .expect("schedule");
        rx.recv_timeout(Duration::from_secs(2)).expect("fired");
        handle.join();

        assert_eq!(timer.cancel("unlock-1"), CancelOutcome::AlreadyFired);
    }

    #[test]
    fn cancel_prevents_fire() {
        let timer = DeferredTimer::new(GRACE);
        let (callback, rx) = fired_probe();

        let handle = timer
            .schedule("unlock-2", Utc::now() + ChronoDuration::milliseconds(150), callback)
            .expect("schedule");
        assert_eq!(timer.cancel("unlock-2"), CancelOutcome::Cancelled);
        handle.join();

        assert!(rx.recv_timeout(Duration::from_millis(400)).is_err());
    }

    #[test]
    fn cancel_unknown_key_reports_not_found() {
        let timer = DeferredTimer::new(GRACE);
        assert_eq!(timer.cancel("unlock-99"), CancelOutcome::NotFound);
    }

    #[test]
    fn rejects_duplicate_key_while_pending() {
        let timer = DeferredTimer::new(GRACE);
        let (callback, _rx) = fired_probe();
        let (duplicate, _rx2) = fired_probe();

        let fire_at = Utc::now() + ChronoDuration::seconds(60);
        let _handle = timer.schedule("unlock-3", fire_at, callback).expect("schedule");
        let err = timer.schedule("unlock-3", fire_at, duplicate).unwrap_err();
        assert!(matches!(err, LockboxError::Timer(_)));

        assert_eq!(timer.cancel("unlock-3"), CancelOutcome::Cancelled);
    }

    #[test]
    fn next_schedule_prunes_fired_keys() {
        let timer = DeferredTimer::new(GRACE);
        let (callback, rx) = fired_probe();

        let handle = timer
            .schedule("unlock-5", Utc::now() + ChronoDuration::milliseconds(30), callback)
            .expect("schedule");
        rx.recv_timeout(Duration::from_secs(2)).expect("fired");
        handle.join();
        assert_eq!(timer.cancel("unlock-5"), CancelOutcome::AlreadyFired);

        let (next, _rx2) = fired_probe();
        let _handle = timer
            .schedule("unlock-6", Utc::now() + ChronoDuration::seconds(60), next)
            .expect("schedule");

        assert_eq!(timer.cancel("unlock-5"), CancelOutcome::NotFound);
        assert_eq!(timer.cancel("unlock-6"), CancelOutcome::Cancelled);
    }

    #[test]
    fn past_deadline_fires_promptly_off_the_caller_thread() {
        let timer = DeferredTimer::new(GRACE);
        let (callback, rx) = fired_probe();

        let started = Instant::now();
        let handle = timer
            .schedule("unlock-4", Utc::now() - ChronoDuration::seconds(5), callback)
            .expect("schedule");
        let fired_on = rx.recv_timeout(Duration::from_secs(2)).expect("fired");
        handle.join();

        assert!(started.elapsed() < Duration::from_secs(2));
        assert_ne!(fired_on, thread::current().id());
    }
}
