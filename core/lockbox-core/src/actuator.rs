//! Physical lock actuation behind a capability trait.
//!
//! Exactly two implementations exist, selected once at startup by
//! configuration: a sysfs-GPIO relay driver for the real box and a simulated
//! actuator that records its calls. Both are idempotent by contract; driving
//! a relay that is already in the requested state is a no-op success, not an
//! error, because the physical layer cannot report its state reliably.

use std::path::PathBuf;
use std::sync::Mutex;

use crate::error::{LockboxError, Result};

pub trait Actuator: Send + Sync {
    fn lock(&self) -> Result<()>;
    fn unlock(&self) -> Result<()>;
}

const SYSFS_GPIO_BASE: &str = "/sys/class/gpio";

/// Relay driver over the Linux sysfs GPIO interface.
///
/// The relay closes the lock when its line is driven high (or low when
/// `active_low` is set, for low-trigger relay boards). Redundant writes of
/// the same level are harmless, which gives the idempotence the contract
/// requires without reading hardware state back.
pub struct HardwareActuator {
    pin: u32,
    active_low: bool,
    base: PathBuf,
}

impl HardwareActuator {
    pub fn new(pin: u32, active_low: bool) -> Result<Self> {
        Self::with_base(pin, active_low, PathBuf::from(SYSFS_GPIO_BASE))
    }

    /// Same as [`new`](Self::new) with the sysfs root overridden; used by
    /// tests that fake the GPIO tree in a temp dir.
    pub fn with_base(pin: u32, active_low: bool, base: PathBuf) -> Result<Self> {
        let actuator = Self {
            pin,
            active_low,
            base,
        };
        actuator.export_and_configure()?;
        Ok(actuator)
    }

    fn export_and_configure(&self) -> Result<()> {
        if !self.pin_dir().exists() {
            fs_err::write(self.base.join("export"), self.pin.to_string()).map_err(|err| {
                LockboxError::actuator(format!("export gpio {}", self.pin), err)
            })?;
        }
        fs_err::write(self.pin_dir().join("direction"), "out").map_err(|err| {
            LockboxError::actuator(format!("set gpio {} direction", self.pin), err)
        })?;
        tracing::info!(pin = self.pin, active_low = self.active_low, "GPIO actuator ready");
        Ok(())
    }

    fn pin_dir(&self) -> PathBuf {
        self.base.join(format!("gpio{}", self.pin))
    }

    fn write_level(&self, asserted: bool, context: &str) -> Result<()> {
        let level = if asserted != self.active_low { "1" } else { "0" };
        fs_err::write(self.pin_dir().join("value"), level)
            .map_err(|err| LockboxError::actuator(context.to_string(), err))
    }
}

impl Actuator for HardwareActuator {
    fn lock(&self) -> Result<()> {
        self.write_level(true, "drive relay to locked")?;
        tracing::info!(pin = self.pin, "Box locked");
        Ok(())
    }

    fn unlock(&self) -> Result<()> {
        self.write_level(false, "drive relay to unlocked")?;
        tracing::info!(pin = self.pin, "Box unlocked");
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActuatorCommand {
    Lock,
    Unlock,
}

#[derive(Default)]
struct SimState {
    locked: bool,
    history: Vec<ActuatorCommand>,
}

/// In-memory stand-in for the relay. Keeps a call history so tests can
/// assert single actuation and idempotence.
#[derive(Default)]
pub struct SimulatedActuator {
    state: Mutex<SimState>,
}

impl SimulatedActuator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_locked(&self) -> bool {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .locked
    }

    pub fn history(&self) -> Vec<ActuatorCommand> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .history
            .clone()
    }

    pub fn unlock_calls(&self) -> usize {
        self.history()
            .iter()
            .filter(|command| **command == ActuatorCommand::Unlock)
            .count()
    }

    fn apply(&self, command: ActuatorCommand) {
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        state.locked = command == ActuatorCommand::Lock;
        state.history.push(command);
        tracing::info!(?command, "Simulated actuator");
    }
}

impl Actuator for SimulatedActuator {
    fn lock(&self) -> Result<()> {
        self.apply(ActuatorCommand::Lock);
        Ok(())
    }

    fn unlock(&self) -> Result<()> {
        self.apply(ActuatorCommand::Unlock);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    /// Fake sysfs tree so the hardware driver can run against a temp dir.
    fn fake_gpio_tree(base: &Path, pin: u32) {
        let pin_dir = base.join(format!("gpio{}", pin));
        std::fs::create_dir_all(&pin_dir).expect("create pin dir");
        std::fs::write(base.join("export"), "").expect("seed export");
        std::fs::write(pin_dir.join("direction"), "in").expect("seed direction");
        std::fs::write(pin_dir.join("value"), "0").expect("seed value");
    }

    #[test]
    fn simulated_unlock_is_idempotent() {
        let actuator = SimulatedActuator::new();
        actuator.lock().expect("lock");
        actuator.unlock().expect("first unlock");
        actuator.unlock().expect("second unlock");

        assert!(!actuator.is_locked());
        assert_eq!(actuator.unlock_calls(), 2);
    }

    #[test]
    fn hardware_actuator_drives_configured_levels() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        fake_gpio_tree(temp_dir.path(), 12);

        let actuator = HardwareActuator::with_base(12, false, temp_dir.path().to_path_buf())
            .expect("actuator init");
        let value_path = temp_dir.path().join("gpio12").join("value");

        actuator.lock().expect("lock");
        assert_eq!(std::fs::read_to_string(&value_path).expect("read"), "1");
        actuator.unlock().expect("unlock");
        assert_eq!(std::fs::read_to_string(&value_path).expect("read"), "0");

        let direction = std::fs::read_to_string(temp_dir.path().join("gpio12").join("direction"))
            .expect("read direction");
        assert_eq!(direction, "out");
    }

    #[test]
    fn hardware_actuator_inverts_for_active_low_relays() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        fake_gpio_tree(temp_dir.path(), 17);

        let actuator = HardwareActuator::with_base(17, true, temp_dir.path().to_path_buf())
            .expect("actuator init");
        let value_path = temp_dir.path().join("gpio17").join("value");

        actuator.lock().expect("lock");
        assert_eq!(std::fs::read_to_string(&value_path).expect("read"), "0");
        actuator.unlock().expect("unlock");
        assert_eq!(std::fs::read_to_string(&value_path).expect("read"), "1");
    }

    #[test]
    fn hardware_actuator_fails_without_gpio_tree() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let missing = temp_dir.path().join("no-such-sysfs");
        let result = HardwareActuator::with_base(12, false, missing);
        assert!(matches!(result, Err(LockboxError::Actuator { .. })));
    }
}
