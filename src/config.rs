use serde::Deserialize;
use serde_json::Value;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::coerce::to_bool;
use crate::constants::{DEFAULT_ACCEL_TIMEOUT_SECS, DEFAULT_ACCEL_URL, DEFAULT_BASE_TIMEOUT_SECS, DEFAULT_BUS_DIR_NAME};
use crate::error::{CleanflowError, Result};

pub const DEFAULT_CONFIG_FILE: &str = "cleanflow.toml";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct AccelConfig {
    pub enabled: bool,
    pub url: String,
    pub timeout_secs: u64,
}

impl Default for AccelConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            url: DEFAULT_ACCEL_URL.to_string(),
            timeout_secs: DEFAULT_ACCEL_TIMEOUT_SECS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct BaseConfig {
    /// Job bookkeeping service; reporting is disabled when unset.
    pub url: Option<String>,
    pub timeout_secs: u64,
    pub api_key: Option<String>,
}

impl Default for BaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            timeout_secs: DEFAULT_BASE_TIMEOUT_SECS,
            api_key: None,
        }
    }
}

/// Settings for a cleaning run. Per-job params can still override the
/// acceleration URL/timeout and strict parquet mode.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct FlowConfig {
    pub accel: AccelConfig,
    pub base: BaseConfig,
    pub bus_root: PathBuf,
    pub local_parquet_strict: bool,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            accel: AccelConfig::default(),
            base: BaseConfig::default(),
            bus_root: default_bus_root(),
            local_parquet_strict: true,
        }
    }
}

fn default_bus_root() -> PathBuf {
    env::var_os("HOME")
        .filter(|h| !h.is_empty())
        .map(|h| PathBuf::from(h).join(DEFAULT_BUS_DIR_NAME))
        .unwrap_or_else(|| PathBuf::from(".").join(DEFAULT_BUS_DIR_NAME))
}

impl FlowConfig {
    /// Loads `path` (or `cleanflow.toml` when present), then `.env`, then
    /// `CLEANFLOW_*` environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None if Path::new(DEFAULT_CONFIG_FILE).is_file() => Self::from_file(Path::new(DEFAULT_CONFIG_FILE))?,
            None => Self::default(),
        };
        dotenv::dotenv().ok();
        config.apply_env(|key| env::var(key).ok())?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            CleanflowError::Config(format!("Failed to read config file '{}': {}", path.display(), e))
        })?;
        let config: FlowConfig = toml::from_str(&content)?;
        debug!(path = %path.display(), "config file loaded");
        Ok(config)
    }

    /// Applies overrides from `lookup`, which stands in for the environment.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let secs = |key: &str, raw: String| {
            raw.parse::<u64>()
                .map_err(|_| CleanflowError::Config(format!("{} must be a whole number of seconds, got '{}'", key, raw)))
        };

        if let Some(v) = get("CLEANFLOW_ACCEL_URL") {
            self.accel.url = v;
        }
        if let Some(v) = get("CLEANFLOW_ACCEL_TIMEOUT_SECS") {
            self.accel.timeout_secs = secs("CLEANFLOW_ACCEL_TIMEOUT_SECS", v)?;
        }
        if let Some(v) = get("CLEANFLOW_ACCEL_ENABLED") {
            self.accel.enabled = to_bool(&Value::String(v), self.accel.enabled);
        }
        if let Some(v) = get("CLEANFLOW_BASE_URL") {
            self.base.url = Some(v);
        }
        if let Some(v) = get("CLEANFLOW_BASE_TIMEOUT_SECS") {
            self.base.timeout_secs = secs("CLEANFLOW_BASE_TIMEOUT_SECS", v)?;
        }
        if let Some(v) = get("CLEANFLOW_API_KEY") {
            self.base.api_key = Some(v);
        }
        if let Some(v) = get("CLEANFLOW_BUS_ROOT") {
            self.bus_root = PathBuf::from(v);
        }
        if let Some(v) = get("CLEANFLOW_LOCAL_PARQUET_STRICT") {
            self.local_parquet_strict = to_bool(&Value::String(v), self.local_parquet_strict);
        }
        Ok(())
    }

    pub fn accel_timeout(&self) -> Duration {
        Duration::from_secs(self.accel.timeout_secs)
    }

    pub fn base_timeout(&self) -> Duration {
        Duration::from_secs(self.base.timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[test]
    fn toml_fields_default_individually() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cleanflow.toml");
        fs::write(&path, "local_parquet_strict = false\n[accel]\nurl = \"http://accel:9000\"\n").unwrap();
        let cfg = FlowConfig::from_file(&path).unwrap();
        assert_eq!(cfg.accel.url, "http://accel:9000");
        assert_eq!(cfg.accel.timeout_secs, DEFAULT_ACCEL_TIMEOUT_SECS);
        assert!(cfg.accel.enabled);
        assert!(!cfg.local_parquet_strict);
        assert!(cfg.base.url.is_none());
    }

    #[test]
    fn env_overrides_apply() {
        let vars: HashMap<&str, &str> = [
            ("CLEANFLOW_ACCEL_ENABLED", "off"),
            ("CLEANFLOW_BASE_URL", "http://base:18080"),
            ("CLEANFLOW_BASE_TIMEOUT_SECS", "5"),
            ("CLEANFLOW_API_KEY", " "),
            ("CLEANFLOW_BUS_ROOT", "/srv/bus"),
        ]
        .into_iter()
        .collect();
        let mut cfg = FlowConfig::default();
        cfg.apply_env(|k| vars.get(k).map(|v| v.to_string())).unwrap();
        assert!(!cfg.accel.enabled);
        assert_eq!(cfg.base.url.as_deref(), Some("http://base:18080"));
        assert_eq!(cfg.base_timeout(), Duration::from_secs(5));
        assert!(cfg.base.api_key.is_none());
        assert_eq!(cfg.bus_root, PathBuf::from("/srv/bus"));
    }

    #[test]
    fn bad_timeout_is_a_config_error() {
        let mut cfg = FlowConfig::default();
        let err = cfg
            .apply_env(|k| (k == "CLEANFLOW_ACCEL_TIMEOUT_SECS").then(|| "soon".to_string()))
            .unwrap_err();
        assert!(matches!(err, CleanflowError::Config(_)));
    }
}
