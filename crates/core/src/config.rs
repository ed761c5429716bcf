//! Push settings
//!
//! Settings that shape a push but do not come from the devfile: target
//! namespace, how long to wait for a running pod, the shell used by init
//! containers, the supervisor bootstrap image and the default debug port.
//!
//! Resolution order, lowest to highest precedence:
//!
//! 1. built-in defaults
//! 2. an optional TOML settings file
//! 3. `DEVPUSH_*` environment variables

use crate::entrypoint::{DEFAULT_BOOTSTRAPPER_IMAGE, DEFAULT_DEBUG_PORT};
use crate::errors::{ConfigError, Result};
use crate::lifecycle::DEFAULT_SHELL;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, instrument};

pub const ENV_NAMESPACE: &str = "DEVPUSH_NAMESPACE";
pub const ENV_READINESS_TIMEOUT: &str = "DEVPUSH_READINESS_TIMEOUT";
pub const ENV_BOOTSTRAPPER_IMAGE: &str = "DEVPUSH_BOOTSTRAPPER_IMAGE";
pub const ENV_DEBUG_PORT: &str = "DEVPUSH_DEBUG_PORT";

/// Default time to wait for a running pod
pub const DEFAULT_READINESS_TIMEOUT_SECS: u64 = 240;

/// Settings for one push
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct PushSettings {
    /// Namespace holding the component's objects
    pub namespace: String,
    /// Seconds to wait for a running pod after reconcile
    pub readiness_timeout: u64,
    /// Shell used for init containers and in-pod commands
    pub shell: String,
    /// Image providing the supervisor binary
    pub bootstrap_image: String,
    /// Debug port used when a push does not supply one
    pub debug_port: i32,
}

impl Default for PushSettings {
    fn default() -> Self {
        Self {
            namespace: "default".to_string(),
            readiness_timeout: DEFAULT_READINESS_TIMEOUT_SECS,
            shell: DEFAULT_SHELL.to_string(),
            bootstrap_image: DEFAULT_BOOTSTRAPPER_IMAGE.to_string(),
            debug_port: DEFAULT_DEBUG_PORT,
        }
    }
}

impl PushSettings {
    /// Defaults, then the file at `path` if given, then the environment
    #[instrument(level = "debug")]
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let settings = match path {
            Some(path) => Self::load_from_path(path)?,
            None => Self::default(),
        };
        let settings = settings.apply_env_overrides()?;
        settings.validate()?;
        debug!(namespace = %settings.namespace, "Resolved push settings");
        Ok(settings)
    }

    /// Parse a TOML settings file; missing keys keep their defaults
    pub fn load_from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(ConfigError::NotFound {
                path: path.display().to_string(),
            }
            .into());
        }
        let content = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| {
            ConfigError::Parsing {
                what: "settings".to_string(),
                message: e.to_string(),
            }
            .into()
        })
    }

    /// Apply `DEVPUSH_*` variables on top of these settings
    pub fn apply_env_overrides(mut self) -> Result<Self> {
        if let Some(namespace) = env_value(ENV_NAMESPACE) {
            self.namespace = namespace;
        }
        if let Some(raw) = env_value(ENV_READINESS_TIMEOUT) {
            self.readiness_timeout = parse_env(ENV_READINESS_TIMEOUT, &raw)?;
        }
        if let Some(image) = env_value(ENV_BOOTSTRAPPER_IMAGE) {
            self.bootstrap_image = image;
        }
        if let Some(raw) = env_value(ENV_DEBUG_PORT) {
            self.debug_port = parse_env(ENV_DEBUG_PORT, &raw)?;
        }
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if self.namespace.trim().is_empty() {
            return Err(validation("namespace must not be empty"));
        }
        if self.readiness_timeout == 0 {
            return Err(validation("readiness-timeout must be greater than zero"));
        }
        if !(1..=65535).contains(&self.debug_port) {
            return Err(validation(&format!(
                "debug-port {} is outside 1-65535",
                self.debug_port
            )));
        }
        if self.shell.trim().is_empty() {
            return Err(validation("shell must not be empty"));
        }
        Ok(())
    }

    pub fn readiness_timeout(&self) -> Duration {
        Duration::from_secs(self.readiness_timeout)
    }
}

fn env_value(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse_env<T: std::str::FromStr>(name: &str, raw: &str) -> Result<T> {
    raw.trim().parse().map_err(|_| {
        ConfigError::Parsing {
            what: name.to_string(),
            message: format!("invalid value '{}'", raw),
        }
        .into()
    })
}

fn validation(message: &str) -> crate::errors::DevpushError {
    ConfigError::Validation {
        message: message.to_string(),
    }
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn clear_env() {
        for name in [
            ENV_NAMESPACE,
            ENV_READINESS_TIMEOUT,
            ENV_BOOTSTRAPPER_IMAGE,
            ENV_DEBUG_PORT,
        ] {
            std::env::remove_var(name);
        }
    }

    #[test]
    #[serial]
    fn test_defaults() {
        clear_env();
        let settings = PushSettings::load(None).unwrap();
        assert_eq!(settings.namespace, "default");
        assert_eq!(settings.readiness_timeout(), Duration::from_secs(240));
        assert_eq!(settings.shell, "/bin/sh");
        assert_eq!(settings.debug_port, 5858);
    }

    #[test]
    #[serial]
    fn test_file_overrides_defaults() -> anyhow::Result<()> {
        clear_env();
        let mut file = NamedTempFile::new()?;
        writeln!(file, "namespace = \"dev\"\nreadiness-timeout = 30")?;
        let settings = PushSettings::load(Some(file.path()))?;
        assert_eq!(settings.namespace, "dev");
        assert_eq!(settings.readiness_timeout, 30);
        assert_eq!(settings.shell, DEFAULT_SHELL);
        Ok(())
    }

    #[test]
    #[serial]
    fn test_env_overrides_file() -> anyhow::Result<()> {
        clear_env();
        let mut file = NamedTempFile::new()?;
        writeln!(file, "namespace = \"dev\"")?;
        std::env::set_var(ENV_NAMESPACE, "staging");
        std::env::set_var(ENV_DEBUG_PORT, "9229");
        std::env::set_var(ENV_BOOTSTRAPPER_IMAGE, "example.com/init:2");
        let settings = PushSettings::load(Some(file.path()));
        clear_env();

        let settings = settings?;
        assert_eq!(settings.namespace, "staging");
        assert_eq!(settings.debug_port, 9229);
        assert_eq!(settings.bootstrap_image, "example.com/init:2");
        Ok(())
    }

    #[test]
    #[serial]
    fn test_invalid_env_value() {
        clear_env();
        std::env::set_var(ENV_READINESS_TIMEOUT, "soon");
        let result = PushSettings::load(None);
        clear_env();
        assert!(result.unwrap_err().to_string().contains(ENV_READINESS_TIMEOUT));
    }

    #[test]
    fn test_unknown_key_is_rejected() {
        let err = PushSettings::from_toml_str("namespce = \"dev\"").unwrap_err();
        assert!(err.to_string().contains("Failed to parse settings"));
    }

    #[test]
    fn test_validation() {
        let settings = PushSettings {
            debug_port: 70000,
            ..Default::default()
        };
        assert!(settings.validate().is_err());

        let settings = PushSettings {
            readiness_timeout: 0,
            ..Default::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_missing_file() {
        let err = PushSettings::load_from_path(Path::new("/nonexistent/devpush.toml")).unwrap_err();
        assert!(err.to_string().contains("not found"));
    }
}
