//! Configuration resolution (§4.9): built-in defaults, a config file, and
//! `CDXD_*` environment variables, layered lowest to highest precedence and
//! merged with explicit constructor overrides.
//!
//! Construction always runs through one fallible entry point and returns a
//! typed error, never panics on a bad value.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use cdxd_storage::DurabilityMode;
use thiserror::Error;

use cdxd_core::Limits;

/// Output format for process logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable, for a terminal.
    Pretty,
    /// One JSON object per line, for log aggregation.
    Json,
}

/// Errors raised while resolving a [`Config`].
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("reading config file {path}: {source}")]
    Io {
        /// Path that failed to read.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// A config file line was not `key = value`.
    #[error("malformed config line {line_no} in {path}: {line:?}")]
    MalformedLine {
        /// Path of the offending file.
        path: PathBuf,
        /// 1-based line number.
        line_no: usize,
        /// The offending line, verbatim.
        line: String,
    },
    /// A recognized key held a value that failed to parse.
    #[error("invalid value for {key}: {value:?}")]
    InvalidValue {
        /// The configuration key.
        key: String,
        /// The value that failed to parse.
        value: String,
    },
    /// The fully-resolved configuration failed validation.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Explicit overrides passed by the embedding caller, taking precedence over
/// everything else. Every field is optional; unset fields fall through to
/// the config file, then the environment, then built-in defaults.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    /// Directory holding one subdirectory per collection.
    pub data_dir: Option<PathBuf>,
    /// Durability mode applied to every collection's WAL.
    pub durability_mode: Option<DurabilityMode>,
    /// `tracing` filter directive, e.g. `"info"` or `"cdxd=debug,warn"`.
    pub log_level: Option<String>,
    /// Log output format.
    pub log_format: Option<LogFormat>,
    /// Cap on resident collection handles.
    pub max_open_collections: Option<usize>,
}

/// A fully-resolved, immutable server configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory holding one subdirectory per collection.
    pub data_dir: PathBuf,
    /// Durability mode applied to every collection's WAL.
    pub durability_mode: DurabilityMode,
    /// `tracing` filter directive controlling log verbosity.
    pub log_level: String,
    /// Log output format.
    pub log_format: LogFormat,
    /// Size and resource limits shared by every open collection.
    pub limits: Limits,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            data_dir: PathBuf::from("./data"),
            durability_mode: DurabilityMode::Strict,
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            limits: Limits::default(),
        }
    }
}

/// One `key = value` line per setting; blank lines and `#`-prefixed comments
/// are ignored. Deliberately not TOML or YAML: the recognized key set is
/// small and flat, and every value is already a plain string or integer.
fn parse_config_file(path: &Path, contents: &str) -> Result<HashMap<String, String>, ConfigError> {
    let mut values = HashMap::new();
    for (idx, raw_line) in contents.lines().enumerate() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            return Err(ConfigError::MalformedLine {
                path: path.to_path_buf(),
                line_no: idx + 1,
                line: raw_line.to_string(),
            });
        };
        values.insert(key.trim().to_string(), value.trim().to_string());
    }
    Ok(values)
}

fn parse_durability(value: &str) -> Option<DurabilityMode> {
    match value.to_ascii_lowercase().as_str() {
        "in_memory" | "inmemory" => Some(DurabilityMode::InMemory),
        "strict" => Some(DurabilityMode::Strict),
        "batched" => Some(DurabilityMode::default()),
        _ => None,
    }
}

fn parse_log_format(value: &str) -> Option<LogFormat> {
    match value.to_ascii_lowercase().as_str() {
        "pretty" | "text" => Some(LogFormat::Pretty),
        "json" => Some(LogFormat::Json),
        _ => None,
    }
}

impl Config {
    /// Resolve a [`Config`], applying (lowest to highest precedence):
    /// built-in defaults, an optional config file, `CDXD_*` entries of
    /// `env`, then `overrides`. `env` is passed explicitly (rather than
    /// read from the process environment) so resolution stays pure and
    /// testable.
    pub fn resolve(
        file_path: Option<&Path>,
        env: &HashMap<String, String>,
        overrides: ConfigOverrides,
    ) -> Result<Config, ConfigError> {
        let mut config = Config::default();

        if let Some(path) = file_path {
            let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })?;
            let file_values = parse_config_file(path, &contents)?;
            apply_string_map(&mut config, &file_values)?;
        }

        let env_values: HashMap<String, String> = env
            .iter()
            .filter_map(|(k, v)| k.strip_prefix("CDXD_").map(|stripped| (stripped.to_ascii_lowercase(), v.clone())))
            .collect();
        apply_string_map(&mut config, &env_values)?;

        if let Some(v) = overrides.data_dir {
            config.data_dir = v;
        }
        if let Some(v) = overrides.durability_mode {
            config.durability_mode = v;
        }
        if let Some(v) = overrides.log_level {
            config.log_level = v;
        }
        if let Some(v) = overrides.log_format {
            config.log_format = v;
        }
        if let Some(v) = overrides.max_open_collections {
            config.limits.max_open_collections = v;
        }

        config
            .limits
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        if config.log_level.is_empty() {
            return Err(ConfigError::Invalid("log_level must not be empty".to_string()));
        }

        Ok(config)
    }
}

fn apply_string_map(config: &mut Config, values: &HashMap<String, String>) -> Result<(), ConfigError> {
    for (key, value) in values {
        match key.as_str() {
            "data_dir" => config.data_dir = PathBuf::from(value),
            "durability_mode" => {
                config.durability_mode = parse_durability(value).ok_or_else(|| ConfigError::InvalidValue {
                    key: key.clone(),
                    value: value.clone(),
                })?
            }
            "log_level" => config.log_level = value.clone(),
            "log_format" => {
                config.log_format = parse_log_format(value).ok_or_else(|| ConfigError::InvalidValue {
                    key: key.clone(),
                    value: value.clone(),
                })?
            }
            "max_open_collections" => {
                config.limits.max_open_collections = value.parse().map_err(|_| ConfigError::InvalidValue {
                    key: key.clone(),
                    value: value.clone(),
                })?
            }
            "max_batch_bytes" => {
                config.limits.max_batch_bytes = value.parse().map_err(|_| ConfigError::InvalidValue {
                    key: key.clone(),
                    value: value.clone(),
                })?
            }
            "max_num_results" => {
                config.limits.max_num_results = value.parse().map_err(|_| ConfigError::InvalidValue {
                    key: key.clone(),
                    value: value.clone(),
                })?
            }
            // Unrecognized keys are ignored rather than rejected: a newer
            // config file read by an older binary should still start.
            _ => {}
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_when_nothing_else_is_set() {
        let config = Config::resolve(None, &HashMap::new(), ConfigOverrides::default()).unwrap();
        assert_eq!(config.data_dir, PathBuf::from("./data"));
        assert_eq!(config.durability_mode, DurabilityMode::Strict);
    }

    #[test]
    fn env_vars_override_defaults() {
        let mut env = HashMap::new();
        env.insert("CDXD_LOG_LEVEL".to_string(), "debug".to_string());
        env.insert("CDXD_DURABILITY_MODE".to_string(), "batched".to_string());
        let config = Config::resolve(None, &env, ConfigOverrides::default()).unwrap();
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.durability_mode, DurabilityMode::default());
    }

    #[test]
    fn explicit_overrides_beat_env_vars() {
        let mut env = HashMap::new();
        env.insert("CDXD_LOG_LEVEL".to_string(), "debug".to_string());
        let overrides = ConfigOverrides {
            log_level: Some("warn".to_string()),
            ..Default::default()
        };
        let config = Config::resolve(None, &env, overrides).unwrap();
        assert_eq!(config.log_level, "warn");
    }

    #[test]
    fn unrecognized_env_key_is_ignored() {
        let mut env = HashMap::new();
        env.insert("CDXD_NOT_A_REAL_SETTING".to_string(), "x".to_string());
        assert!(Config::resolve(None, &env, ConfigOverrides::default()).is_ok());
    }

    #[test]
    fn bad_durability_value_is_rejected() {
        let mut env = HashMap::new();
        env.insert("CDXD_DURABILITY_MODE".to_string(), "sometimes".to_string());
        let err = Config::resolve(None, &env, ConfigOverrides::default()).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn zero_max_open_collections_fails_validation() {
        let overrides = ConfigOverrides {
            max_open_collections: Some(0),
            ..Default::default()
        };
        let err = Config::resolve(None, &HashMap::new(), overrides).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn config_file_values_beat_defaults_but_lose_to_env() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cdxd.conf");
        std::fs::write(&path, "log_level = warn\nmax_open_collections = 5\n").unwrap();
        let mut env = HashMap::new();
        env.insert("CDXD_LOG_LEVEL".to_string(), "trace".to_string());
        let config = Config::resolve(Some(&path), &env, ConfigOverrides::default()).unwrap();
        assert_eq!(config.log_level, "trace");
        assert_eq!(config.limits.max_open_collections, 5);
    }

    #[test]
    fn malformed_config_line_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cdxd.conf");
        std::fs::write(&path, "this is not key value\n").unwrap();
        let err = Config::resolve(Some(&path), &HashMap::new(), ConfigOverrides::default()).unwrap_err();
        assert!(matches!(err, ConfigError::MalformedLine { .. }));
    }
}
