use std::path::PathBuf;
use std::str::FromStr;

/// Which notification backend to install at startup.
/// Queue feeds streaming transports; Noop is for transports whose clients poll.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum NotifyMode {
    Queue,
    #[default]
    Noop,
}

impl FromStr for NotifyMode {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queue" => Ok(Self::Queue),
            "noop" => Ok(Self::Noop),
            other => Err(format!("unknown notify mode: {other}, must be queue or noop")),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid {var}: {detail}")]
    Invalid { var: &'static str, detail: String },
}

/// Process configuration. The heartbeat threshold is carried for front-ends;
/// the store itself never expires members.
#[derive(Clone, Debug)]
pub struct Config {
    pub db_path: PathBuf,
    pub busy_timeout_ms: u32,
    pub heartbeat_timeout_s: u64,
    pub notify: NotifyMode,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            busy_timeout_ms: 5_000,
            heartbeat_timeout_s: 300,
            notify: NotifyMode::default(),
        }
    }
}

impl Config {
    /// Build configuration from `ROUNDTABLE_*` environment variables,
    /// falling back to defaults for anything unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(path) = std::env::var("ROUNDTABLE_DB") {
            config.db_path = PathBuf::from(path);
        }
        if let Ok(raw) = std::env::var("ROUNDTABLE_BUSY_TIMEOUT_MS") {
            config.busy_timeout_ms = raw.parse().map_err(|_| ConfigError::Invalid {
                var: "ROUNDTABLE_BUSY_TIMEOUT_MS",
                detail: format!("{raw:?} is not a non-negative integer"),
            })?;
        }
        if let Ok(raw) = std::env::var("ROUNDTABLE_HEARTBEAT_TIMEOUT_S") {
            config.heartbeat_timeout_s = raw.parse().map_err(|_| ConfigError::Invalid {
                var: "ROUNDTABLE_HEARTBEAT_TIMEOUT_S",
                detail: format!("{raw:?} is not a non-negative integer"),
            })?;
        }
        if let Ok(raw) = std::env::var("ROUNDTABLE_NOTIFY") {
            config.notify = raw.parse().map_err(|detail| ConfigError::Invalid {
                var: "ROUNDTABLE_NOTIFY",
                detail,
            })?;
        }

        Ok(config)
    }
}

/// Default database path (~/.roundtable/roundtable.db).
fn default_db_path() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
        .join(".roundtable")
        .join("roundtable.db")
}
