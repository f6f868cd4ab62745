//! Reconciler configuration.
//!
//! Precedence: CLI flags > environment > `<config_dir>/gitrecon/config.toml` > defaults.

use anyhow::{anyhow, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use toml::Value as TomlValue;

pub const ENV_DEFAULT_REMOTE: &str = "GITRECON_DEFAULT_REMOTE";
pub const ENV_TEMP_REMOTE_PREFIX: &str = "GITRECON_TEMP_REMOTE_PREFIX";
pub const ENV_CREDENTIAL_HELPER: &str = "GITRECON_CREDENTIAL_HELPER";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcilerConfig {
    /// Remote used when a command does not name one.
    pub default_remote: String,
    /// Prefix for remotes created for a single fetch.
    pub temp_remote_prefix: String,
    /// Ask git credential helpers and the SSH agent for credentials.
    pub use_credential_helper: bool,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            default_remote: "origin".to_string(),
            temp_remote_prefix: "gitrecon-temp".to_string(),
            use_credential_helper: true,
        }
    }
}

impl ReconcilerConfig {
    /// Defaults, overlaid with the user config file and the environment.
    pub fn load() -> Result<Self> {
        let mut config = match config_path() {
            Some(path) if path.exists() => Self::from_file(&path)?,
            _ => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_toml_str(&text)
            .with_context(|| format!("Invalid config file {}", path.display()))
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        let value = text
            .parse::<TomlValue>()
            .context("Failed to parse TOML")?;
        let table = value
            .as_table()
            .ok_or_else(|| anyhow!("Config root must be a table"))?;

        let mut config = Self::default();
        if let Some(v) = table.get("default_remote") {
            config.default_remote = non_empty_str(v, "default_remote")?;
        }
        if let Some(v) = table.get("temp_remote_prefix") {
            config.temp_remote_prefix = non_empty_str(v, "temp_remote_prefix")?;
        }
        if let Some(v) = table.get("use_credential_helper") {
            config.use_credential_helper = v
                .as_bool()
                .ok_or_else(|| anyhow!("use_credential_helper must be a boolean"))?;
        }
        Ok(config)
    }

    /// Overrides fields from environment variables; blank values are ignored.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        if let Some(remote) = get(ENV_DEFAULT_REMOTE) {
            self.default_remote = remote;
        }
        if let Some(prefix) = get(ENV_TEMP_REMOTE_PREFIX) {
            self.temp_remote_prefix = prefix;
        }
        if let Some(flag) = get(ENV_CREDENTIAL_HELPER) {
            match flag.to_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => self.use_credential_helper = true,
                "0" | "false" | "no" | "off" => self.use_credential_helper = false,
                other => tracing::warn!("Ignoring {}={}", ENV_CREDENTIAL_HELPER, other),
            }
        }
    }
}

pub fn config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("gitrecon").join("config.toml"))
}

fn non_empty_str(value: &TomlValue, key: &str) -> Result<String> {
    let s = value
        .as_str()
        .map(str::trim)
        .ok_or_else(|| anyhow!("{} must be a string", key))?;
    if s.is_empty() {
        return Err(anyhow!("{} must not be empty", key));
    }
    Ok(s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    #[test]
    fn empty_file_yields_defaults() {
        assert_eq!(
            ReconcilerConfig::from_toml_str("").unwrap(),
            ReconcilerConfig::default()
        );
    }

    #[test]
    fn file_values_override_defaults() {
        let config = ReconcilerConfig::from_toml_str(
            r#"
            default_remote = "upstream"
            temp_remote_prefix = "scratch"
            use_credential_helper = false
            "#,
        )
        .unwrap();
        assert_eq!(
            config,
            ReconcilerConfig {
                default_remote: "upstream".to_string(),
                temp_remote_prefix: "scratch".to_string(),
                use_credential_helper: false,
            }
        );
    }

    #[test]
    fn malformed_values_are_errors() {
        assert!(ReconcilerConfig::from_toml_str("default_remote = 3").is_err());
        assert!(ReconcilerConfig::from_toml_str("default_remote = \"  \"").is_err());
        assert!(ReconcilerConfig::from_toml_str("use_credential_helper = \"yes\"").is_err());
        assert!(ReconcilerConfig::from_toml_str("not toml [").is_err());
    }

    #[test]
    fn environment_overrides_file() {
        let env: HashMap<&str, &str> = [
            (ENV_DEFAULT_REMOTE, "fork"),
            (ENV_TEMP_REMOTE_PREFIX, " "),
            (ENV_CREDENTIAL_HELPER, "off"),
        ]
        .into_iter()
        .collect();

        let mut config = ReconcilerConfig::default();
        config.apply_env(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.default_remote, "fork");
        assert_eq!(config.temp_remote_prefix, "gitrecon-temp");
        assert!(!config.use_credential_helper);
    }

    #[test]
    fn reads_config_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "default_remote = \"upstream\"\n").unwrap();
        let config = ReconcilerConfig::from_file(&path).unwrap();
        assert_eq!(config.default_remote, "upstream");
    }
}
