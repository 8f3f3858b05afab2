//! Runtime configuration for the lockbox service.
//!
//! Loaded once at startup from `~/.lockbox/config.toml`; a missing file
//! yields defaults (simulated actuator, the stock keyword lists, a ten
//! minute misfire grace window). The actuator variant is fixed here by
//! configuration, never probed from the runtime environment.

use serde::Deserialize;
use std::path::PathBuf;

use crate::classifier::{DEFAULT_EMERGENCY_KEYWORDS, DEFAULT_ROUTINE_PHRASES};
use crate::error::{LockboxError, Result};

pub const DEFAULT_CONFIG_RELATIVE_PATH: &str = ".lockbox/config.toml";
const DEFAULT_MISFIRE_GRACE_SECS: u64 = 600;
const DEFAULT_RELAY_PIN: u32 = 12;

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ActuatorConfig {
    Simulated,
    Hardware {
        #[serde(default = "default_relay_pin")]
        pin: u32,
        #[serde(default)]
        active_low: bool,
    },
}

impl Default for ActuatorConfig {
    fn default() -> Self {
        ActuatorConfig::Simulated
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct TimerConfig {
    #[serde(default = "default_misfire_grace_secs")]
    pub misfire_grace_secs: u64,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            misfire_grace_secs: DEFAULT_MISFIRE_GRACE_SECS,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ClassifierConfig {
    #[serde(default = "default_emergency_keywords")]
    pub emergency_keywords: Vec<String>,
    #[serde(default = "default_routine_phrases")]
    pub routine_phrases: Vec<String>,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            emergency_keywords: default_emergency_keywords(),
            routine_phrases: default_routine_phrases(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct LockboxConfig {
    #[serde(default)]
    pub actuator: ActuatorConfig,
    #[serde(default)]
    pub timer: TimerConfig,
    #[serde(default)]
    pub classifier: ClassifierConfig,
}

pub fn default_config_path() -> Result<PathBuf> {
    let home = dirs::home_dir().ok_or_else(|| {
        LockboxError::InvalidInput("home directory not found".to_string())
    })?;
    Ok(home.join(DEFAULT_CONFIG_RELATIVE_PATH))
}

pub fn load_config(path: Option<PathBuf>) -> Result<LockboxConfig> {
    let config_path = match path {
        Some(path) => path,
        None => default_config_path()?,
    };

    if !config_path.exists() {
        return Ok(LockboxConfig::default());
    }

    let content = fs_err::read_to_string(&config_path)
        .map_err(|err| LockboxError::io(format!("read config {}", config_path.display()), err))?;
    toml::from_str::<LockboxConfig>(&content).map_err(|err| {
        LockboxError::InvalidInput(format!(
            "malformed config {}: {}",
            config_path.display(),
            err
        ))
    })
}

fn default_relay_pin() -> u32 {
    DEFAULT_RELAY_PIN
}

fn default_misfire_grace_secs() -> u64 {
    DEFAULT_MISFIRE_GRACE_SECS
}

fn default_emergency_keywords() -> Vec<String> {
    DEFAULT_EMERGENCY_KEYWORDS
        .iter()
        .map(|keyword| keyword.to_string())
        .collect()
}

fn default_routine_phrases() -> Vec<String> {
    DEFAULT_ROUTINE_PHRASES
        .iter()
        .map(|phrase| phrase.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_when_file_missing() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let config = load_config(Some(temp_dir.path().join("missing.toml"))).expect("load");
        assert_eq!(config.actuator, ActuatorConfig::Simulated);
        assert_eq!(config.timer.misfire_grace_secs, 600);
        assert!(!config.classifier.emergency_keywords.is_empty());
    }

    #[test]
    fn parses_hardware_actuator_and_overrides() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let path = temp_dir.path().join("config.toml");
        fs_err::write(
            &path,
            r#"
[actuator]
kind = "hardware"
pin = 17
active_low = true

[timer]
misfire_grace_secs = 120

[classifier]
emergency_keywords = ["hospital"]
routine_phrases = ["bored"]
"#,
        )
        .expect("write config");

        let config = load_config(Some(path)).expect("load");
        assert_eq!(
            config.actuator,
            ActuatorConfig::Hardware {
                pin: 17,
                active_low: true
            }
        );
        assert_eq!(config.timer.misfire_grace_secs, 120);
        assert_eq!(config.classifier.emergency_keywords, vec!["hospital"]);
        assert_eq!(config.classifier.routine_phrases, vec!["bored"]);
    }

    #[test]
    fn hardware_pin_defaults_to_relay_pin() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let path = temp_dir.path().join("config.toml");
        fs_err::write(&path, "[actuator]\nkind = \"hardware\"\n").expect("write config");

        let config = load_config(Some(path)).expect("load");
        assert_eq!(
            config.actuator,
            ActuatorConfig::Hardware {
                pin: 12,
                active_low: false
            }
        );
    }

    #[test]
    fn rejects_unknown_fields() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let path = temp_dir.path().join("config.toml");
        fs_err::write(&path, "bogus = 1\n\n[actuator]\nkind = \"simulated\"\n")
            .expect("write config");
        assert!(load_config(Some(path)).is_err());
    }
}
