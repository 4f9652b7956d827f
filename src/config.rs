use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::calendar::OperatingCalendar;
use crate::engine::EngineSettings;
use crate::limits::MAX_PENDING_TTL_SECS;

/// Daemon configuration, read from `SPABOOK_*` environment variables.
///
/// | variable                       | default     |
/// |--------------------------------|-------------|
/// | `SPABOOK_DATA_DIR`             | `./data`    |
/// | `SPABOOK_METRICS_PORT`         | unset (off) |
/// | `SPABOOK_OPEN`                 | `09:00`     |
/// | `SPABOOK_LAST_START`           | `21:30`     |
/// | `SPABOOK_SLOT_MINUTES`         | `30`        |
/// | `SPABOOK_PENDING_TTL_SECS`     | `600`       |
/// | `SPABOOK_DEPOSIT_PERCENT`      | `20`        |
/// | `SPABOOK_CODE_PREFIX`          | `SB`        |
/// | `SPABOOK_REAPER_INTERVAL_SECS` | `30`        |
/// | `SPABOOK_COMPACT_THRESHOLD`    | `1000`      |
#[derive(Debug, Clone)]
pub struct Config {
    pub data_dir: PathBuf,
    pub metrics_port: Option<u16>,
    pub engine: EngineSettings,
    pub reaper_interval: Duration,
    pub compact_threshold: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    Invalid { var: &'static str, value: String },
    Calendar(String),
    OutOfRange { var: &'static str, reason: &'static str },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Invalid { var, value } => write!(f, "{var}: cannot parse {value:?}"),
            ConfigError::Calendar(msg) => write!(f, "operating calendar: {msg}"),
            ConfigError::OutOfRange { var, reason } => write!(f, "{var}: {reason}"),
        }
    }
}

impl std::error::Error for ConfigError {}

fn parsed<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(var) {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { var, value }),
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build from any variable source; `from_env` passes the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = EngineSettings::default();
        let data_dir = lookup("SPABOOK_DATA_DIR").unwrap_or_else(|| "./data".into());
        let metrics_port = match lookup("SPABOOK_METRICS_PORT") {
            None => None,
            Some(value) => Some(value.trim().parse().map_err(|_| ConfigError::Invalid {
                var: "SPABOOK_METRICS_PORT",
                value,
            })?),
        };

        let open = lookup("SPABOOK_OPEN").unwrap_or_else(|| "09:00".into());
        let last_start = lookup("SPABOOK_LAST_START").unwrap_or_else(|| "21:30".into());
        let granularity = parsed(&lookup, "SPABOOK_SLOT_MINUTES", defaults.calendar.granularity())?;
        let calendar = OperatingCalendar::from_wall_clock(&open, &last_start, granularity)
            .map_err(|e| ConfigError::Calendar(e.to_string()))?;

        let pending_ttl_secs: u64 = parsed(&lookup, "SPABOOK_PENDING_TTL_SECS", 600)?;
        if pending_ttl_secs > MAX_PENDING_TTL_SECS {
            return Err(ConfigError::OutOfRange {
                var: "SPABOOK_PENDING_TTL_SECS",
                reason: "must be at most one week",
            });
        }
        let deposit_percent: u32 = parsed(&lookup, "SPABOOK_DEPOSIT_PERCENT", defaults.deposit_percent)?;
        if deposit_percent > 100 {
            return Err(ConfigError::OutOfRange {
                var: "SPABOOK_DEPOSIT_PERCENT",
                reason: "must be at most 100",
            });
        }
        let code_prefix = lookup("SPABOOK_CODE_PREFIX")
            .map(|p| p.trim().to_ascii_uppercase())
            .unwrap_or(defaults.code_prefix);
        if code_prefix.is_empty() || !code_prefix.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(ConfigError::OutOfRange {
                var: "SPABOOK_CODE_PREFIX",
                reason: "must be non-empty ASCII letters or digits",
            });
        }

        let reaper_secs: u64 = parsed(&lookup, "SPABOOK_REAPER_INTERVAL_SECS", 30)?;
        if reaper_secs == 0 {
            return Err(ConfigError::OutOfRange {
                var: "SPABOOK_REAPER_INTERVAL_SECS",
                reason: "must be positive",
            });
        }
        let compact_threshold = parsed(&lookup, "SPABOOK_COMPACT_THRESHOLD", 1000)?;

        Ok(Self {
            data_dir: PathBuf::from(data_dir),
            metrics_port,
            engine: EngineSettings {
                calendar,
                pending_ttl_ms: pending_ttl_secs as i64 * 1000,
                deposit_percent,
                code_prefix,
            },
            reaper_interval: Duration::from_secs(reaper_secs),
            compact_threshold,
        })
    }

    pub fn journal_path(&self) -> PathBuf {
        self.data_dir.join("spabook.journal")
    }
}
