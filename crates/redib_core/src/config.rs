//! Portal configuration loaded from a JSON file.
//!
//! Every field has a default, so an absent file or a partial file is valid.
//! Day counts drive the acceptance window and every periodic sweep.

use crate::clock::days;
use crate::model::application::ACCEPTANCE_WINDOW_DAYS;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

#[derive(Debug)]
pub enum ConfigError {
    Io { path: PathBuf, source: std::io::Error },
    Parse { path: PathBuf, source: serde_json::Error },
    Invalid(String),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io { path, source } => {
                write!(f, "failed to read config `{}`: {source}", path.display())
            }
            Self::Parse { path, source } => {
                write!(f, "failed to parse config `{}`: {source}", path.display())
            }
            Self::Invalid(message) => write!(f, "invalid config: {message}"),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Parse { source, .. } => Some(source),
            Self::Invalid(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PortalConfig {
    pub db_path: PathBuf,
    pub log_level: String,
    /// Absolute directory; `None` keeps logging disabled.
    pub log_dir: Option<PathBuf>,
    /// Days an applicant has to answer an acceptance.
    pub acceptance_window_days: u32,
    /// Reminder goes out once the deadline is this close.
    pub acceptance_reminder_days: u32,
    pub feasibility_reminder_after_days: u32,
    pub feasibility_reminder_interval_days: u32,
    /// Remind evaluators when the call's evaluation deadline is this close.
    pub evaluation_reminder_days: u32,
    pub publication_followup_after_days: u32,
    pub publication_followup_window_days: u32,
    pub evaluators_per_application: u32,
}

impl Default for PortalConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("redib.db"),
            log_level: crate::logging::default_log_level().to_string(),
            log_dir: None,
            acceptance_window_days: ACCEPTANCE_WINDOW_DAYS,
            acceptance_reminder_days: 3,
            feasibility_reminder_after_days: 5,
            feasibility_reminder_interval_days: 3,
            evaluation_reminder_days: 7,
            publication_followup_after_days: 180,
            publication_followup_window_days: 7,
            evaluators_per_application: 2,
        }
    }
}

impl PortalConfig {
    /// Loads and validates `path`; a missing file yields defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Self::default()),
            Err(source) => {
                return Err(ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        let config = Self::from_json(&raw).map_err(|err| match err {
            ConfigError::Parse { source, .. } => ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            },
            other => other,
        })?;
        Ok(config)
    }

    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(raw).map_err(|source| ConfigError::Parse {
            path: PathBuf::new(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        crate::logging::normalize_level(&self.log_level).map_err(ConfigError::Invalid)?;

        let windows = [
            ("acceptance_window_days", self.acceptance_window_days),
            ("acceptance_reminder_days", self.acceptance_reminder_days),
            (
                "feasibility_reminder_after_days",
                self.feasibility_reminder_after_days,
            ),
            (
                "feasibility_reminder_interval_days",
                self.feasibility_reminder_interval_days,
            ),
            ("evaluation_reminder_days", self.evaluation_reminder_days),
            (
                "publication_followup_window_days",
                self.publication_followup_window_days,
            ),
            ("evaluators_per_application", self.evaluators_per_application),
        ];
        if let Some((name, _)) = windows.iter().find(|(_, value)| *value == 0) {
            return Err(ConfigError::Invalid(format!("{name} must be positive")));
        }
        if self.acceptance_reminder_days >= self.acceptance_window_days {
            return Err(ConfigError::Invalid(format!(
                "acceptance_reminder_days ({}) must be shorter than acceptance_window_days ({})",
                self.acceptance_reminder_days, self.acceptance_window_days
            )));
        }
        Ok(())
    }

    pub fn acceptance_window_ms(&self) -> i64 {
        days(self.acceptance_window_days)
    }
}

#[cfg(test)]
mod tests {
    use super::{ConfigError, PortalConfig};
    use crate::clock::DAY_MS;

    #[test]
    fn defaults_are_valid() {
        let config = PortalConfig::default();
        config.validate().unwrap();
        assert_eq!(config.acceptance_window_ms(), 10 * DAY_MS);
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config = PortalConfig::from_json(r#"{ "acceptance_window_days": 14 }"#).unwrap();
        assert_eq!(config.acceptance_window_days, 14);
        assert_eq!(config.acceptance_reminder_days, 3);
    }

    #[test]
    fn reminder_must_fit_inside_window() {
        let err = PortalConfig::from_json(
            r#"{ "acceptance_window_days": 3, "acceptance_reminder_days": 3 }"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn zero_window_is_rejected() {
        let err = PortalConfig::from_json(r#"{ "evaluation_reminder_days": 0 }"#).unwrap_err();
        assert!(err.to_string().contains("evaluation_reminder_days"));
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let err = PortalConfig::from_json(r#"{ "acceptance_days": 3 }"#).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = PortalConfig::load(dir.path().join("absent.json")).unwrap();
        assert_eq!(config, PortalConfig::default());
    }

    #[test]
    fn file_is_loaded_and_validated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("portal.json");
        std::fs::write(&path, r#"{ "db_path": "/tmp/portal.db", "log_level": "warn" }"#).unwrap();
        let config = PortalConfig::load(&path).unwrap();
        assert_eq!(config.log_level, "warn");
        assert_eq!(config.db_path.to_str(), Some("/tmp/portal.db"));
    }
}
