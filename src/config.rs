//! Configuration for the dallosh worker.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (DALLOSH_HOME, DALLOSH_STORAGE, limit overrides)
//! 2. Config file (.dallosh/config.yaml)
//! 3. Defaults (~/.dallosh)
//!
//! Config file discovery:
//! - Searches current directory and parents for .dallosh/config.yaml
//! - Paths in config file are relative to the .dallosh/ directory

use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::core::{BackoffPolicy, EnrichmentLimits};

/// Global cached configuration (stores Result to handle init errors)
static CONFIG: OnceLock<Result<ResolvedConfig, String>> = OnceLock::new();

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub enrichment: EnrichmentConfig,
    #[serde(default)]
    pub provider: ProviderConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PathsConfig {
    /// Worker state directory (statuses, events)
    pub home: Option<String>,
    /// Dataset artifact directory
    pub storage: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EnrichmentConfig {
    pub default_paginate_rows_limit: Option<usize>,
    pub max_paginate_rows_limit: Option<usize>,
    pub default_retry_requests: Option<u32>,
    pub max_retry_requests: Option<u32>,
    /// Backoff unit in milliseconds
    pub backoff_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProviderConfig {
    pub timeout_seconds: Option<u64>,
}

/// Resolved configuration with absolute paths
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// Worker state directory
    pub home: PathBuf,
    /// Dataset artifact directory
    pub storage: PathBuf,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
    pub limits: EnrichmentLimits,
    pub backoff: BackoffPolicy,
    /// Per-request timeout for model calls
    pub provider_timeout: Duration,
}

impl ResolvedConfig {
    /// Per-task status logs
    pub fn status_dir(&self) -> PathBuf {
        self.home.join("status")
    }

    /// Published event log
    pub fn events_path(&self) -> PathBuf {
        self.home.join("events.jsonl")
    }
}

/// Find config file by searching current directory and parents
fn find_config_file() -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let config_path = current.join(".dallosh").join("config.yaml");
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Resolve a path that may be relative to the config directory
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
            .canonicalize()
            .unwrap_or_else(|_| base.join(path_str))
    }
}

/// Read a numeric override, ignoring unset or unparseable values
fn number<T: std::str::FromStr>(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Option<T> {
    lookup(name).and_then(|v| v.trim().parse().ok())
}

/// Apply file values, then overrides from `lookup`, over the defaults
fn resolve_limits(
    file: &EnrichmentConfig,
    lookup: impl Fn(&str) -> Option<String>,
) -> (EnrichmentLimits, BackoffPolicy) {
    let defaults = EnrichmentLimits::default();
    let limits = EnrichmentLimits {
        default_paginate_rows: number(&lookup, "DEFAULT_PAGINATE_ROWS_LIMIT")
            .or(file.default_paginate_rows_limit)
            .unwrap_or(defaults.default_paginate_rows),
        max_paginate_rows: number(&lookup, "MAX_PAGINATE_ROWS_LIMIT")
            .or(file.max_paginate_rows_limit)
            .unwrap_or(defaults.max_paginate_rows),
        default_retry_requests: number(&lookup, "DEFAULT_RETRY_REQUESTS")
            .or(file.default_retry_requests)
            .unwrap_or(defaults.default_retry_requests),
        max_retry_requests: number(&lookup, "MAX_RETRY_REQUESTS")
            .or(file.max_retry_requests)
            .unwrap_or(defaults.max_retry_requests),
    };

    let backoff = match number::<u64>(&lookup, "DALLOSH_BACKOFF_MS").or(file.backoff_ms) {
        Some(ms) => BackoffPolicy::from_millis(ms),
        None => BackoffPolicy::default(),
    };

    (limits, backoff)
}

/// Load configuration from all sources
fn load_config() -> Result<ResolvedConfig> {
    let default_home = dirs::home_dir()
        .context("Failed to determine home directory")?
        .join(".dallosh");

    let config_file = find_config_file();
    let (file, config_dir) = match config_file {
        Some(ref path) => (
            load_config_file(path)?,
            path.parent().map(Path::to_path_buf),
        ),
        None => (ConfigFile::default(), None),
    };

    let home = if let Ok(env_home) = std::env::var("DALLOSH_HOME") {
        PathBuf::from(env_home)
    } else {
        match (&file.paths.home, &config_dir) {
            (Some(home), Some(dir)) => resolve_path(dir, home),
            _ => default_home,
        }
    };

    let storage = if let Ok(env_storage) = std::env::var("DALLOSH_STORAGE") {
        PathBuf::from(env_storage)
    } else {
        match (&file.paths.storage, &config_dir) {
            (Some(storage), Some(dir)) => resolve_path(dir, storage),
            _ => home.join("storage"),
        }
    };

    let (limits, backoff) = resolve_limits(&file.enrichment, |name| std::env::var(name).ok());
    let provider_timeout = Duration::from_secs(file.provider.timeout_seconds.unwrap_or(120));

    Ok(ResolvedConfig {
        home,
        storage,
        config_file,
        limits,
        backoff,
        provider_timeout,
    })
}

/// Get the global configuration (loads once, then cached)
pub fn config() -> Result<&'static ResolvedConfig> {
    let result = CONFIG.get_or_init(|| load_config().map_err(|e| format!("{:#}", e)));

    match result {
        Ok(config) => Ok(config),
        Err(e) => anyhow::bail!("{}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn test_config_file_parsing() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join(".dallosh");
        std::fs::create_dir_all(&dir).unwrap();

        let config_path = dir.join("config.yaml");
        let mut file = std::fs::File::create(&config_path).unwrap();
        writeln!(
            file,
            r#"
version: "1.0"
paths:
  home: ./state
  storage: ../datasets
enrichment:
  default_paginate_rows_limit: 200
  max_retry_requests: 4
provider:
  timeout_seconds: 30
"#
        )
        .unwrap();

        let config = load_config_file(&config_path).unwrap();
        assert_eq!(config.version.as_deref(), Some("1.0"));
        assert_eq!(config.paths.home.as_deref(), Some("./state"));
        assert_eq!(config.paths.storage.as_deref(), Some("../datasets"));
        assert_eq!(config.enrichment.default_paginate_rows_limit, Some(200));
        assert_eq!(config.enrichment.max_retry_requests, Some(4));
        assert_eq!(config.provider.timeout_seconds, Some(30));
    }

    #[test]
    fn test_empty_config_file_uses_defaults() {
        let config: ConfigFile = serde_yaml::from_str("version: \"1.0\"").unwrap();
        assert!(config.paths.home.is_none());
        assert!(config.enrichment.backoff_ms.is_none());
    }

    fn file_limits() -> EnrichmentConfig {
        EnrichmentConfig {
            default_paginate_rows_limit: Some(50),
            max_paginate_rows_limit: None,
            default_retry_requests: Some(2),
            max_retry_requests: None,
            backoff_ms: Some(10),
        }
    }

    #[test]
    fn test_file_limits_apply_over_defaults() {
        let (limits, backoff) = resolve_limits(&file_limits(), |_| None);
        assert_eq!(limits.default_paginate_rows, 50);
        assert_eq!(limits.max_paginate_rows, 1000);
        assert_eq!(limits.default_retry_requests, 2);
        assert_eq!(limits.max_retry_requests, 5);
        assert_eq!(backoff, BackoffPolicy::from_millis(10));
    }

    #[test]
    fn test_env_limits_override_file() {
        let env: HashMap<&str, &str> = [
            ("DEFAULT_PAGINATE_ROWS_LIMIT", "75"),
            ("MAX_RETRY_REQUESTS", " 8 "),
            ("DEFAULT_RETRY_REQUESTS", "many"),
            ("DALLOSH_BACKOFF_MS", "0"),
        ]
        .into_iter()
        .collect();

        let (limits, backoff) =
            resolve_limits(&file_limits(), |name| env.get(name).map(|v| v.to_string()));
        assert_eq!(limits.default_paginate_rows, 75);
        assert_eq!(limits.max_retry_requests, 8);
        // unparseable values fall through to the file
        assert_eq!(limits.default_retry_requests, 2);
        assert_eq!(limits.max_paginate_rows, 1000);
        assert_eq!(backoff, BackoffPolicy::from_millis(0));
    }

    #[test]
    fn test_resolve_relative_path() {
        let base = PathBuf::from("/home/user/project/.dallosh");

        assert_eq!(
            resolve_path(&base, "./state"),
            PathBuf::from("/home/user/project/.dallosh/state")
        );
        assert_eq!(
            resolve_path(&base, "/absolute/path"),
            PathBuf::from("/absolute/path")
        );
    }

    #[test]
    fn test_derived_paths() {
        let config = ResolvedConfig {
            home: PathBuf::from("/srv/dallosh"),
            storage: PathBuf::from("/srv/data"),
            config_file: None,
            limits: EnrichmentLimits::default(),
            backoff: BackoffPolicy::default(),
            provider_timeout: Duration::from_secs(120),
        };
        assert_eq!(config.status_dir(), PathBuf::from("/srv/dallosh/status"));
        assert_eq!(config.events_path(), PathBuf::from("/srv/dallosh/events.jsonl"));
    }
}
