use std::collections::BTreeSet;

use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

pub const DEFAULT_REVIEW_HOURS: [u32; 4] = [8, 13, 19, 22];
pub const DEFAULT_BATCH_SIZE: usize = 20;
pub const MAX_BATCH_SIZE: usize = 50;
pub const DEFAULT_TIMEZONE: &str = "Europe/London";
pub const DEFAULT_MASTERY_THRESHOLD: u32 = 7;
pub const DEFAULT_INTERVAL_CAP_DAYS: u32 = 60;

/// Store key under which the runtime schedule is persisted.
pub const SCHEDULE_CONFIG_KEY: &str = "review_schedule";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("REVIEW_HOURS must contain at least one hour")]
    EmptyHours,
    #[error("invalid review hour '{0}': expected an integer 0-23")]
    InvalidHour(String),
    #[error("invalid batch size {0}: expected 1-{MAX_BATCH_SIZE}")]
    InvalidBatchSize(usize),
    #[error("invalid {name} '{value}': expected a positive integer")]
    InvalidNumber { name: &'static str, value: String },
    #[error("unknown time zone '{0}'")]
    UnknownTimeZone(String),
    #[error("{0} is not set")]
    MissingEnv(&'static str),
    #[error("no review sources configured")]
    NoSources,
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub review_hours: Vec<u32>,
    pub batch_size: usize,
    pub timezone: Tz,
    pub mastery_threshold: u32,
    pub interval_cap_days: u32,
    pub log_level: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            review_hours: DEFAULT_REVIEW_HOURS.to_vec(),
            batch_size: DEFAULT_BATCH_SIZE,
            timezone: default_timezone(),
            mastery_threshold: DEFAULT_MASTERY_THRESHOLD,
            interval_cap_days: DEFAULT_INTERVAL_CAP_DAYS,
            log_level: "info".to_string(),
        }
    }
}

impl EngineConfig {
    /// Reads the engine configuration from the environment. Unset variables
    /// fall back to defaults; set-but-invalid values are a hard error so a
    /// misconfigured deployment never proceeds to scheduling.
    pub fn from_env() -> Result<Self, ConfigError> {
        let review_hours = match env_string("REVIEW_HOURS") {
            Some(raw) => parse_hours(&raw)?,
            None => DEFAULT_REVIEW_HOURS.to_vec(),
        };

        let batch_size = match env_string("WORDS_PER_BATCH") {
            Some(raw) => {
                let parsed = raw.parse::<usize>().map_err(|_| ConfigError::InvalidNumber {
                    name: "WORDS_PER_BATCH",
                    value: raw.clone(),
                })?;
                validate_batch_size(parsed)?
            }
            None => DEFAULT_BATCH_SIZE,
        };

        let timezone = match env_string("TIMEZONE") {
            Some(raw) => raw
                .parse::<Tz>()
                .map_err(|_| ConfigError::UnknownTimeZone(raw))?,
            None => default_timezone(),
        };

        let mastery_threshold = match env_string("MASTERY_THRESHOLD") {
            Some(raw) => parse_positive(&raw, "MASTERY_THRESHOLD")?,
            None => DEFAULT_MASTERY_THRESHOLD,
        };

        let interval_cap_days = match env_string("MAX_INTERVAL_DAYS") {
            Some(raw) => parse_positive(&raw, "MAX_INTERVAL_DAYS")?,
            None => DEFAULT_INTERVAL_CAP_DAYS,
        };

        let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());

        Ok(Self {
            review_hours,
            batch_size,
            timezone,
            mastery_threshold,
            interval_cap_days,
            log_level,
        })
    }

    pub fn default_schedule(&self) -> ScheduleConfig {
        ScheduleConfig {
            review_hours: self.review_hours.clone(),
            batch_size: self.batch_size,
        }
    }
}

/// Runtime-adjustable part of the configuration, persisted in the primary
/// store. The serialized shape matches the documents the store already
/// holds, so older deployments keep working.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleConfig {
    pub review_hours: Vec<u32>,
    #[serde(rename = "words_per_batch")]
    pub batch_size: usize,
}

/// Parses "8,13,19,22" into a sorted, deduplicated hour list.
pub fn parse_hours(raw: &str) -> Result<Vec<u32>, ConfigError> {
    let mut tokens = Vec::new();
    for token in raw.split(',') {
        let token = token.trim();
        if !token.is_empty() {
            let hour = token
                .parse::<u32>()
                .map_err(|_| ConfigError::InvalidHour(token.to_string()))?;
            tokens.push(hour);
        }
    }
    validate_hours(tokens)
}

pub fn validate_hours(hours: Vec<u32>) -> Result<Vec<u32>, ConfigError> {
    if let Some(bad) = hours.iter().find(|h| **h > 23) {
        return Err(ConfigError::InvalidHour(bad.to_string()));
    }
    let deduped: BTreeSet<u32> = hours.into_iter().collect();
    if deduped.is_empty() {
        return Err(ConfigError::EmptyHours);
    }
    Ok(deduped.into_iter().collect())
}

pub fn validate_batch_size(batch_size: usize) -> Result<usize, ConfigError> {
    if batch_size == 0 || batch_size > MAX_BATCH_SIZE {
        return Err(ConfigError::InvalidBatchSize(batch_size));
    }
    Ok(batch_size)
}

fn default_timezone() -> Tz {
    DEFAULT_TIMEZONE.parse::<Tz>().unwrap_or(chrono_tz::UTC)
}

fn parse_positive(raw: &str, name: &'static str) -> Result<u32, ConfigError> {
    match raw.parse::<u32>() {
        Ok(value) if value > 0 => Ok(value),
        _ => Err(ConfigError::InvalidNumber {
            name,
            value: raw.to_string(),
        }),
    }
}

pub(crate) fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

pub(crate) fn env_u64(key: &str) -> Option<u64> {
    env_string(key)?.parse().ok()
}
