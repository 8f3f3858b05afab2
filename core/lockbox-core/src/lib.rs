//! # lockbox-core
//!
//! Core library for the lockbox commitment device: a user locks a physical
//! box for a chosen duration, and the actuator holds it closed until the
//! timer elapses or an emergency override is granted.
//!
//! ## Design principles
//!
//! - **Synchronous**: no async runtime; the coordinator serializes its entry
//!   points behind a single mutex and collaborators are called inline.
//! - **Single active session**: at most one session is `LOCKED` at a time,
//!   enforced both in the coordinator and at the storage boundary.
//! - **Explicit capabilities**: the actuator and classifier are trait
//!   objects chosen once at startup by configuration, never probed from the
//!   environment at call time.
//! - **Expected races are outcomes, not errors**: timer cancellation racing
//!   a natural expiry resolves to an enum, and a fire arriving after an
//!   override is a logged no-op.

pub mod actuator;
pub mod classifier;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod session;
pub mod store;
pub mod timer;

pub use actuator::{Actuator, HardwareActuator, SimulatedActuator};
pub use classifier::{Classifier, KeywordClassifier};
pub use config::{load_config, ActuatorConfig, LockboxConfig};
pub use coordinator::{Coordinator, OverrideOutcome, StartedLock, StatusSnapshot};
pub use error::{LockboxError, Result};
pub use session::{Session, SessionStatus, UnlockAttempt, DATETIME_FORMAT};
pub use store::SessionStore;
pub use timer::{CancelOutcome, DeferredTimer, TimerHandle};
