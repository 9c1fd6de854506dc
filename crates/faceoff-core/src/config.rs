// Configuration loading and parsing (faceoff.toml).

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tracing::info;

use crate::scoring::{PointsSchedule, RetryPolicy, DEFAULT_SCHEDULE};

/// Name of the config file inside `config/` and `defaults/`.
pub const CONFIG_FILE: &str = "faceoff.toml";

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("validation error for field `{field}`: {message}")]
    ValidationError { field: String, message: String },

    #[error("failed to initialize config from defaults: {message}")]
    DefaultsCopyError { message: String },
}

// ---------------------------------------------------------------------------
// Assembled Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub db_path: PathBuf,
    pub roster_path: PathBuf,
    pub schedule: PointsSchedule,
    pub retry: RetryPolicy,
}

impl Config {
    /// `host:port` for the WebSocket listener.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    9001
}

// ---------------------------------------------------------------------------
// faceoff.toml structs
// ---------------------------------------------------------------------------

/// Raw deserialization target for the entire faceoff.toml file.
#[derive(Debug, Clone, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    server: ServerConfig,
    #[serde(default)]
    database: DatabaseSection,
    roster: RosterSection,
    #[serde(default)]
    scoring: ScoringSection,
    #[serde(default)]
    reconcile: ReconcileSection,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct DatabaseSection {
    path: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct RosterSection {
    path: String,
}

#[derive(Debug, Clone, Deserialize)]
struct ScoringSection {
    #[serde(default = "default_schedule")]
    schedule: Vec<i64>,
}

impl Default for ScoringSection {
    fn default() -> Self {
        ScoringSection {
            schedule: default_schedule(),
        }
    }
}

fn default_schedule() -> Vec<i64> {
    DEFAULT_SCHEDULE.to_vec()
}

#[derive(Debug, Clone, Deserialize)]
struct ReconcileSection {
    #[serde(default = "default_max_attempts")]
    max_attempts: u32,
    #[serde(default = "default_retry_backoff_ms")]
    retry_backoff_ms: u64,
}

impl Default for ReconcileSection {
    fn default() -> Self {
        ReconcileSection {
            max_attempts: default_max_attempts(),
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    50
}

// ---------------------------------------------------------------------------
// Loading logic
// ---------------------------------------------------------------------------

/// Load and validate configuration from `config/faceoff.toml` relative to
/// `base_dir`. Relative roster and database paths resolve against
/// `base_dir`.
///
/// This is the lower-level loading primitive that does not auto-copy defaults.
/// Prefer `load_config()` which handles default initialization automatically.
pub fn load_config_from(base_dir: &Path) -> Result<Config, ConfigError> {
    let config_path = base_dir.join("config").join(CONFIG_FILE);
    let text = read_file(&config_path)?;
    let file: ConfigFile = toml::from_str(&text).map_err(|e| ConfigError::ParseError {
        path: config_path.clone(),
        source: e,
    })?;

    validate(&file)?;

    let schedule =
        PointsSchedule::new(file.scoring.schedule).map_err(|e| ConfigError::ValidationError {
            field: "scoring.schedule".into(),
            message: e.to_string(),
        })?;

    let db_path = match file.database.path {
        Some(path) => base_dir.join(path),
        None => default_db_path(),
    };

    Ok(Config {
        server: file.server,
        db_path,
        roster_path: base_dir.join(file.roster.path),
        schedule,
        retry: RetryPolicy {
            max_attempts: file.reconcile.max_attempts,
            backoff: Duration::from_millis(file.reconcile.retry_backoff_ms),
        },
    })
}

/// Create `config/faceoff.toml` from `defaults/faceoff.toml` on first run.
/// An existing config file is never touched. Returns the path written, if any.
pub fn ensure_config_file(base_dir: &Path) -> Result<Option<PathBuf>, ConfigError> {
    let target = base_dir.join("config").join(CONFIG_FILE);
    if target.exists() {
        return Ok(None);
    }

    let source = base_dir.join("defaults").join(CONFIG_FILE);
    let content = std::fs::read(&source).map_err(|e| ConfigError::DefaultsCopyError {
        message: format!(
            "no {} and cannot read {}: {e}",
            target.display(),
            source.display()
        ),
    })?;

    if let Some(dir) = target.parent() {
        std::fs::create_dir_all(dir).map_err(|e| ConfigError::DefaultsCopyError {
            message: format!("failed to create {}: {e}", dir.display()),
        })?;
    }

    // create_new so a file written since the exists() check is kept.
    let mut dest = match std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&target)
    {
        Ok(dest) => dest,
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => return Ok(None),
        Err(e) => {
            return Err(ConfigError::DefaultsCopyError {
                message: format!("failed to create {}: {e}", target.display()),
            })
        }
    };
    dest.write_all(&content)
        .map_err(|e| ConfigError::DefaultsCopyError {
            message: format!("failed to write {}: {e}", target.display()),
        })?;

    Ok(Some(target))
}

/// Load config relative to the current working directory, creating it from
/// the defaults first if needed.
pub fn load_config() -> Result<Config, ConfigError> {
    let cwd = std::env::current_dir().map_err(|_| ConfigError::FileNotFound {
        path: PathBuf::from("."),
    })?;
    if let Some(path) = ensure_config_file(&cwd)? {
        info!("created {} from defaults", path.display());
    }
    load_config_from(&cwd)
}

/// Database location when `[database] path` is not set: the platform data
/// directory, or the working directory if none can be determined.
pub fn default_db_path() -> PathBuf {
    directories::ProjectDirs::from("", "", "faceoff")
        .map(|dirs| dirs.data_dir().join("faceoff.db"))
        .unwrap_or_else(|| PathBuf::from("faceoff.db"))
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn read_file(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|_| ConfigError::FileNotFound {
        path: path.to_path_buf(),
    })
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

fn validate(file: &ConfigFile) -> Result<(), ConfigError> {
    if file.server.host.trim().is_empty() {
        return Err(ConfigError::ValidationError {
            field: "server.host".into(),
            message: "must not be empty".into(),
        });
    }

    if file.roster.path.trim().is_empty() {
        return Err(ConfigError::ValidationError {
            field: "roster.path".into(),
            message: "must not be empty".into(),
        });
    }

    if file.database.path.as_deref().is_some_and(|p| p.trim().is_empty()) {
        return Err(ConfigError::ValidationError {
            field: "database.path".into(),
            message: "must not be empty when set".into(),
        });
    }

    if file.reconcile.max_attempts == 0 {
        return Err(ConfigError::ValidationError {
            field: "reconcile.max_attempts".into(),
            message: "must be at least 1".into(),
        });
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    /// Workspace root, where `defaults/` lives.
    fn project_root() -> PathBuf {
        let manifest_dir = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
        let root = manifest_dir.join("../..");
        assert!(
            root.join("defaults").exists(),
            "Cannot locate defaults/ directory from {:?}",
            manifest_dir
        );
        root
    }

    /// Fresh temp dir with a `config/faceoff.toml` holding `text`.
    fn temp_config(name: &str, text: &str) -> PathBuf {
        let tmp = std::env::temp_dir().join(format!("{name}_{}", std::process::id()));
        let _ = fs::remove_dir_all(&tmp);
        fs::create_dir_all(tmp.join("config")).unwrap();
        fs::write(tmp.join("config").join(CONFIG_FILE), text).unwrap();
        tmp
    }

    fn expect_validation_error(tmp: &Path, expected_field: &str) {
        let err = load_config_from(tmp).unwrap_err();
        match &err {
            ConfigError::ValidationError { field, .. } => assert_eq!(field, expected_field),
            other => panic!("expected ValidationError, got: {other}"),
        }
    }

    #[test]
    fn load_valid_config_from_defaults() {
        let root = project_root();
        let tmp = std::env::temp_dir().join(format!("faceoff_config_defaults_{}", std::process::id()));
        let _ = fs::remove_dir_all(&tmp);
        fs::create_dir_all(tmp.join("config")).unwrap();
        fs::copy(
            root.join("defaults").join(CONFIG_FILE),
            tmp.join("config").join(CONFIG_FILE),
        )
        .unwrap();

        let config = load_config_from(&tmp).expect("should load default config");
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 9001);
        assert_eq!(config.bind_addr(), "127.0.0.1:9001");
        assert_eq!(config.roster_path, tmp.join("data/roster.csv"));
        assert_eq!(config.schedule.values(), &DEFAULT_SCHEDULE);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.backoff, Duration::from_millis(50));

        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn minimal_config_uses_defaults() {
        let tmp = temp_config("faceoff_config_minimal", "[roster]\npath = \"roster.json\"\n");
        let config = load_config_from(&tmp).unwrap();

        assert_eq!(config.server.port, 9001);
        assert_eq!(config.db_path, default_db_path());
        assert_eq!(config.schedule, PointsSchedule::default());
        assert_eq!(config.retry, RetryPolicy::default());

        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn explicit_database_path_is_relative_to_base() {
        let tmp = temp_config(
            "faceoff_config_db_path",
            "[database]\npath = \"state/faceoff.db\"\n[roster]\npath = \"roster.json\"\n",
        );
        let config = load_config_from(&tmp).unwrap();
        assert_eq!(config.db_path, tmp.join("state/faceoff.db"));
        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn missing_config_file_is_reported() {
        let tmp = std::env::temp_dir().join(format!("faceoff_config_missing_{}", std::process::id()));
        let _ = fs::remove_dir_all(&tmp);
        fs::create_dir_all(&tmp).unwrap();

        assert!(matches!(
            load_config_from(&tmp),
            Err(ConfigError::FileNotFound { .. })
        ));
        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn malformed_toml_is_a_parse_error() {
        let tmp = temp_config("faceoff_config_bad_toml", "[roster\npath = 1");
        assert!(matches!(
            load_config_from(&tmp),
            Err(ConfigError::ParseError { .. })
        ));
        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn rejects_decreasing_schedule() {
        let tmp = temp_config(
            "faceoff_config_bad_schedule",
            "[roster]\npath = \"r.csv\"\n[scoring]\nschedule = [0, 5, 3]\n",
        );
        expect_validation_error(&tmp, "scoring.schedule");
        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn rejects_zero_max_attempts() {
        let tmp = temp_config(
            "faceoff_config_zero_attempts",
            "[roster]\npath = \"r.csv\"\n[reconcile]\nmax_attempts = 0\n",
        );
        expect_validation_error(&tmp, "reconcile.max_attempts");
        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn rejects_empty_roster_path() {
        let tmp = temp_config("faceoff_config_empty_roster", "[roster]\npath = \"  \"\n");
        expect_validation_error(&tmp, "roster.path");
        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn default_config_is_copied_once_and_never_overwritten() {
        let tmp = std::env::temp_dir().join(format!("faceoff_config_copy_{}", std::process::id()));
        let _ = fs::remove_dir_all(&tmp);
        fs::create_dir_all(tmp.join("defaults")).unwrap();
        fs::write(tmp.join("defaults").join(CONFIG_FILE), "[roster]\npath = \"a.csv\"\n").unwrap();

        let target = tmp.join("config").join(CONFIG_FILE);
        assert_eq!(ensure_config_file(&tmp).unwrap(), Some(target.clone()));
        assert!(fs::read_to_string(&target).unwrap().contains("a.csv"));

        fs::write(&target, "[roster]\npath = \"b.csv\"\n").unwrap();
        assert_eq!(ensure_config_file(&tmp).unwrap(), None);
        assert!(fs::read_to_string(&target).unwrap().contains("b.csv"));

        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn existing_config_needs_no_defaults() {
        let tmp = temp_config("faceoff_config_no_defaults", "[roster]\npath = \"r.csv\"\n");
        assert_eq!(ensure_config_file(&tmp).unwrap(), None);
        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn missing_defaults_and_config_is_an_error() {
        let tmp = std::env::temp_dir().join(format!("faceoff_config_none_{}", std::process::id()));
        let _ = fs::remove_dir_all(&tmp);
        fs::create_dir_all(&tmp).unwrap();
        assert!(matches!(
            ensure_config_file(&tmp),
            Err(ConfigError::DefaultsCopyError { .. })
        ));
        assert!(!tmp.join("config").exists());
        let _ = fs::remove_dir_all(&tmp);
    }
}
