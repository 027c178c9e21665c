//! Named concurrency limits.
//!
//! Applications usually guard several resources (a settings file, an
//! outbound API, a pool of workers) with semaphores of different widths.
//! [`LimitsConfig`] keeps those widths in one place and builds labelled
//! [`Semaphore`]s from them.
//!
//! Configuration is layered by [`ConfigLoader`], lowest precedence first:
//!
//! 1. Built-in defaults (or a config file)
//! 2. Environment variables (`HANDOFF_DEFAULT_CAPACITY`, `HANDOFF_LIMIT_<NAME>`)
//! 3. Programmatic overrides
//!
//! The file format is a minimal `key = value` format:
//!
//! ```text
//! [defaults]
//! capacity = 4
//!
//! [limits]
//! settings_file = 1
//! llm_requests = 8
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::Error;
use crate::sync::Semaphore;

const ENV_PREFIX: &str = "HANDOFF_";
const DEFAULT_CAPACITY_KEY: &str = "HANDOFF_DEFAULT_CAPACITY";
const LIMIT_KEY_PREFIX: &str = "HANDOFF_LIMIT_";

/// Per-resource semaphore capacities.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LimitsConfig {
    /// Capacity for resources without an explicit limit.
    pub default_capacity: usize,
    /// Explicit capacities keyed by lower-case resource name.
    pub limits: BTreeMap<String, usize>,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            default_capacity: available_parallelism(),
            limits: BTreeMap::new(),
        }
    }
}

impl LimitsConfig {
    /// Sets the capacity of a named resource.
    #[must_use]
    pub fn limit(mut self, name: impl AsRef<str>, capacity: usize) -> Self {
        self.limits
            .insert(name.as_ref().to_ascii_lowercase(), capacity);
        self
    }

    /// Returns the capacity configured for `name`, or the default.
    #[must_use]
    pub fn capacity_for(&self, name: &str) -> usize {
        self.limits
            .get(&name.to_ascii_lowercase())
            .copied()
            .unwrap_or(self.default_capacity)
    }

    /// Builds a semaphore for `name`, labelled with the name.
    pub fn semaphore(&self, name: &str) -> Result<Semaphore, Error> {
        let capacity = self.capacity_for(name);
        tracing::debug!(resource = name, capacity, "building semaphore from limits");
        Semaphore::with_label(capacity, name)
    }

    /// Checks that every capacity is positive.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_capacity == 0 {
            return Err(ConfigError::ZeroCapacity("default".into()));
        }
        if let Some((name, _)) = self.limits.iter().find(|(_, capacity)| **capacity == 0) {
            return Err(ConfigError::ZeroCapacity(name.clone()));
        }
        Ok(())
    }
}

/// Layered configuration loader.
#[derive(Debug, Clone, Default)]
pub struct ConfigLoader {
    file_path: Option<PathBuf>,
    overrides: BTreeMap<String, String>,
}

impl ConfigLoader {
    /// Creates a loader that starts from [`LimitsConfig::default`].
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a file path for config loading.
    #[must_use]
    pub fn file(mut self, path: impl Into<PathBuf>) -> Self {
        self.file_path = Some(path.into());
        self
    }

    /// Adds a programmatic override (highest precedence). Keys use the
    /// environment variable names.
    #[must_use]
    pub fn override_value(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.overrides.insert(key.into(), value.into());
        self
    }

    /// Loads and validates the configuration.
    pub fn load(&self) -> Result<LimitsConfig, ConfigError> {
        let mut config = match &self.file_path {
            Some(path) => load_from_file(path)?,
            None => LimitsConfig::default(),
        };

        apply_env_overrides(&mut config)?;
        apply_overrides(&mut config, &self.overrides)?;
        config.validate()?;
        tracing::debug!(
            default_capacity = config.default_capacity,
            limits = config.limits.len(),
            "limits loaded"
        );
        Ok(config)
    }
}

/// Configuration errors.
#[derive(Debug)]
pub enum ConfigError {
    /// I/O error while reading configuration.
    Io(std::io::Error),
    /// Parse error.
    Parse(String),
    /// A capacity was zero; carries the resource name.
    ZeroCapacity(String),
    /// Unknown override key.
    InvalidOverride(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(err) => write!(f, "config I/O error: {err}"),
            Self::Parse(err) => write!(f, "config parse error: {err}"),
            Self::ZeroCapacity(name) => write!(f, "capacity for `{name}` must be > 0"),
            Self::InvalidOverride(key) => write!(f, "invalid override: {key}"),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

fn available_parallelism() -> usize {
    std::thread::available_parallelism()
        .map_or(1, std::num::NonZeroUsize::get)
        .max(1)
}

fn load_from_file(path: &Path) -> Result<LimitsConfig, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    parse_config(&contents, LimitsConfig::default())
}

fn apply_env_overrides(config: &mut LimitsConfig) -> Result<(), ConfigError> {
    apply_overrides(config, &env_overrides(std::env::vars()))
}

/// Keeps the variables that belong to this crate.
fn env_overrides(vars: impl IntoIterator<Item = (String, String)>) -> BTreeMap<String, String> {
    vars.into_iter()
        .filter(|(key, _)| key.starts_with(ENV_PREFIX))
        .collect()
}

fn apply_overrides(
    config: &mut LimitsConfig,
    overrides: &BTreeMap<String, String>,
) -> Result<(), ConfigError> {
    for (key, value) in overrides {
        apply_override(config, key, value)?;
    }
    Ok(())
}

fn apply_override(config: &mut LimitsConfig, key: &str, value: &str) -> Result<(), ConfigError> {
    if key == DEFAULT_CAPACITY_KEY {
        config.default_capacity = parse_usize(value, key)?;
        return Ok(());
    }
    match key.strip_prefix(LIMIT_KEY_PREFIX) {
        Some(name) if !name.is_empty() => {
            config
                .limits
                .insert(name.to_ascii_lowercase(), parse_usize(value, key)?);
            Ok(())
        }
        _ => Err(ConfigError::InvalidOverride(key.to_string())),
    }
}

fn parse_config(contents: &str, base: LimitsConfig) -> Result<LimitsConfig, ConfigError> {
    let mut config = base;
    let mut section = String::new();

    for (line_idx, raw) in contents.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        if line.starts_with('[') && line.ends_with(']') {
            section = line[1..line.len() - 1].trim().to_lowercase();
            continue;
        }

        let (key, value) = line
            .split_once('=')
            .ok_or_else(|| ConfigError::Parse(format!("line {}: {}", line_idx + 1, line)))?;
        let key = key.trim();
        let value = value.trim().trim_matches('"');

        match section.as_str() {
            "defaults" => match key {
                "capacity" => config.default_capacity = parse_usize(value, key)?,
                _ => return Err(ConfigError::Parse(format!("unknown defaults key: {key}"))),
            },
            "limits" => {
                config
                    .limits
                    .insert(key.to_ascii_lowercase(), parse_usize(value, key)?);
            }
            "" => {
                return Err(ConfigError::Parse(format!(
                    "missing section for key: {key}"
                )));
            }
            _ => return Err(ConfigError::Parse(format!("unknown section: {section}"))),
        }
    }

    Ok(config)
}

fn parse_usize(value: &str, key: &str) -> Result<usize, ConfigError> {
    value
        .parse::<usize>()
        .map_err(|_| ConfigError::Parse(format!("invalid usize for {key}: {value}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_valid() {
        let config = LimitsConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.default_capacity >= 1);
    }

    #[test]
    fn capacity_lookup_is_case_insensitive() {
        let config = LimitsConfig::default().limit("Settings_File", 1);
        assert_eq!(config.capacity_for("settings_file"), 1);
        assert_eq!(config.capacity_for("SETTINGS_FILE"), 1);
        assert_eq!(config.capacity_for("unknown"), config.default_capacity);
    }

    #[test]
    fn semaphore_uses_named_limit() {
        let config = LimitsConfig::default().limit("llm_requests", 3);
        let sem = config.semaphore("llm_requests").unwrap();
        assert_eq!(sem.capacity(), 3);
        assert_eq!(sem.label(), "llm_requests");
    }

    #[test]
    fn zero_limit_rejected() {
        let config = LimitsConfig::default().limit("uploads", 0);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ZeroCapacity(name)) if name == "uploads"
        ));
        assert!(matches!(
            config.semaphore("uploads"),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn file_loading_minimal() {
        let input = r#"
# limits for the desktop assistant
[defaults]
capacity = 2

[limits]
settings_file = 1
llm_requests = "8"
"#;
        let config = parse_config(input, LimitsConfig::default()).unwrap();
        assert_eq!(config.default_capacity, 2);
        assert_eq!(config.capacity_for("settings_file"), 1);
        assert_eq!(config.capacity_for("llm_requests"), 8);
    }

    #[test]
    fn file_loading_rejects_unknown_section() {
        let err = parse_config("[pools]\nsize = 3\n", LimitsConfig::default()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
        let err = parse_config("capacity = 3\n", LimitsConfig::default()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn programmatic_override_wins() {
        let config = ConfigLoader::new()
            .override_value("HANDOFF_DEFAULT_CAPACITY", "5")
            .override_value("HANDOFF_LIMIT_EXPORTS", "2")
            .load()
            .unwrap();
        assert_eq!(config.default_capacity, 5);
        assert_eq!(config.capacity_for("exports"), 2);
    }

    #[test]
    fn invalid_overrides_rejected() {
        let unknown = ConfigLoader::new()
            .override_value("HANDOFF_LIMIT_", "2")
            .load();
        assert!(matches!(unknown, Err(ConfigError::InvalidOverride(_))));

        let zero = ConfigLoader::new()
            .override_value("HANDOFF_LIMIT_ZEROED", "0")
            .load();
        assert!(matches!(zero, Err(ConfigError::ZeroCapacity(_))));

        let garbage = ConfigLoader::new()
            .override_value("HANDOFF_LIMIT_GARBAGE", "many")
            .load();
        assert!(matches!(garbage, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn env_overrides_keep_only_prefixed_vars() {
        let vars = [
            ("HANDOFF_LIMIT_ENV_UPLOADS".to_string(), "6".to_string()),
            ("HANDOFF_DEFAULT_CAPACITY".to_string(), "3".to_string()),
            ("PATH".to_string(), "/usr/bin".to_string()),
            ("LIMIT_HANDOFF_X".to_string(), "9".to_string()),
        ];
        let overrides = env_overrides(vars);
        assert_eq!(overrides.len(), 2);

        let mut config = LimitsConfig::default();
        apply_overrides(&mut config, &overrides).unwrap();
        assert_eq!(config.capacity_for("env_uploads"), 6);
        assert_eq!(config.default_capacity, 3);
    }

    #[test]
    fn missing_file_is_io_error() {
        let result = ConfigLoader::new()
            .file("/nonexistent/handoff-limits.conf")
            .load();
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }
}
