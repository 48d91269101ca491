use std::path::PathBuf;
use std::str::FromStr;

use crate::limits::*;
use crate::model::{Ms, MINUTE_MS};

/// Booking policy applied by every tenant engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Policy {
    pub min_booking_ms: Ms,
    pub max_booking_ms: Ms,
    /// Check-in is accepted within `start ± grace`.
    pub check_in_grace_ms: Ms,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            min_booking_ms: DEFAULT_MIN_BOOKING_MS,
            max_booking_ms: DEFAULT_MAX_BOOKING_MS,
            check_in_grace_ms: DEFAULT_CHECK_IN_GRACE_MS,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("{name} has an invalid value: {value:?}")]
    Invalid { name: &'static str, value: String },
}

/// Process configuration, read once from `SPACEGATE_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub api_token: String,
    pub metrics_port: Option<u16>,
    pub compact_threshold: u64,
    pub max_concurrent_requests: usize,
    pub no_show_sweep_secs: u64,
    pub policy: Policy,
}

fn var(name: &'static str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn parsed<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match var(name) {
        None => Ok(default),
        Some(value) => value
            .parse()
            .map_err(|_| ConfigError::Invalid { name, value }),
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let metrics_port = match var("SPACEGATE_METRICS_PORT") {
            None => None,
            Some(value) => Some(value.parse().map_err(|_| ConfigError::Invalid {
                name: "SPACEGATE_METRICS_PORT",
                value,
            })?),
        };
        let grace_minutes: i64 = parsed("SPACEGATE_CHECKIN_GRACE_MINUTES", 15)?;
        if !(0..=24 * 60).contains(&grace_minutes) {
            return Err(ConfigError::Invalid {
                name: "SPACEGATE_CHECKIN_GRACE_MINUTES",
                value: grace_minutes.to_string(),
            });
        }

        Ok(Self {
            bind: var("SPACEGATE_BIND").unwrap_or_else(|| "0.0.0.0".into()),
            port: parsed("SPACEGATE_PORT", 8080)?,
            data_dir: PathBuf::from(var("SPACEGATE_DATA_DIR").unwrap_or_else(|| "./data".into())),
            api_token: var("SPACEGATE_API_TOKEN").ok_or(ConfigError::Missing("SPACEGATE_API_TOKEN"))?,
            metrics_port,
            compact_threshold: parsed("SPACEGATE_COMPACT_THRESHOLD", 1000)?,
            max_concurrent_requests: parsed("SPACEGATE_MAX_CONCURRENT_REQUESTS", 256)?,
            no_show_sweep_secs: parsed("SPACEGATE_NO_SHOW_SWEEP_SECS", 60)?,
            policy: Policy {
                check_in_grace_ms: grace_minutes * MINUTE_MS,
                ..Policy::default()
            },
        })
    }
}
