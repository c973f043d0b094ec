//! Settings for the ETL run, read once at startup and handed to each component.

use std::env;
use std::fmt;
use std::time::Duration;

use chrono::NaiveDate;
use thiserror::Error;

use crate::models::country::{self, Country};

pub const DEFAULT_BASE_URL: &str = "https://web-api.tp.entsoe.eu/api";
pub const DEFAULT_COUNTRY_CODE: &str = "DE";
pub const DEFAULT_START_DATE: &str = "2024-01-01";

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("invalid value for {key}: '{value}'")]
    Invalid { key: &'static str, value: String },
    #[error("country code '{code}' not found (available: {available})")]
    UnknownCountry { code: String, available: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

impl LogLevel {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "DEBUG" => Some(LogLevel::Debug),
            "INFO" => Some(LogLevel::Info),
            "WARNING" | "WARN" => Some(LogLevel::Warning),
            "ERROR" => Some(LogLevel::Error),
            "CRITICAL" => Some(LogLevel::Critical),
            _ => None,
        }
    }

    /// `tracing` filter directive for this level
    pub fn as_directive(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warning => "warn",
            LogLevel::Error | LogLevel::Critical => "error",
        }
    }
}

#[derive(Clone)]
pub struct Settings {
    pub entsoe_api_key: String,
    pub entsoe_base_url: String,
    pub database_url: String,
    pub country_code: String,
    /// Overrides the EIC code of `country_code` when set
    pub country_eic: Option<String>,
    pub log_level: LogLevel,
    pub max_retries: u32,
    pub request_timeout: Duration,
    pub default_start_date: NaiveDate,
}

// Secrets stay out of logs
impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settings")
            .field("entsoe_api_key", &"***")
            .field("entsoe_base_url", &self.entsoe_base_url)
            .field("database_url", &"***")
            .field("country_code", &self.country_code)
            .field("country_eic", &self.country_eic)
            .field("log_level", &self.log_level)
            .field("max_retries", &self.max_retries)
            .field("request_timeout", &self.request_timeout)
            .field("default_start_date", &self.default_start_date)
            .finish()
    }
}

impl Settings {
    /// Load settings from the process environment, reading `.env` first if present
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let entsoe_api_key = non_empty("ENTSOE_API_KEY").ok_or(ConfigError::Missing("ENTSOE_API_KEY"))?;
        let database_url = non_empty("DATABASE_URL").ok_or(ConfigError::Missing("DATABASE_URL"))?;

        let entsoe_base_url = non_empty("ENTSOE_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let country_code = non_empty("COUNTRY_CODE")
            .unwrap_or_else(|| DEFAULT_COUNTRY_CODE.to_string())
            .trim()
            .to_ascii_uppercase();
        let country_eic = non_empty("COUNTRY_EIC");

        let log_level = match non_empty("LOG_LEVEL") {
            Some(value) => LogLevel::parse(&value).ok_or(ConfigError::Invalid { key: "LOG_LEVEL", value })?,
            None => LogLevel::Info,
        };

        let max_retries = parse_positive(non_empty("MAX_RETRIES"), "MAX_RETRIES", 3)?;
        let request_timeout = parse_positive(non_empty("REQUEST_TIMEOUT"), "REQUEST_TIMEOUT", 30)?;

        let default_start_date = match non_empty("DEFAULT_START_DATE") {
            Some(value) => NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
                .map_err(|_| ConfigError::Invalid { key: "DEFAULT_START_DATE", value })?,
            None => NaiveDate::parse_from_str(DEFAULT_START_DATE, "%Y-%m-%d")
                .map_err(|_| ConfigError::Invalid { key: "DEFAULT_START_DATE", value: DEFAULT_START_DATE.to_string() })?,
        };

        Ok(Self {
            entsoe_api_key,
            entsoe_base_url,
            database_url,
            country_code,
            country_eic,
            log_level,
            max_retries,
            request_timeout: Duration::from_secs(request_timeout as u64),
            default_start_date,
        })
    }

    /// Resolve the target country. `override_code` (from the command line) wins over `COUNTRY_CODE`;
    /// `COUNTRY_EIC` only applies to the configured country.
    pub fn resolve_country(&self, override_code: Option<&str>) -> Result<Country, ConfigError> {
        let code = override_code.unwrap_or(&self.country_code);

        let mut resolved = country::lookup(code).ok_or_else(|| ConfigError::UnknownCountry {
            code: code.to_string(),
            available: country::available_codes().join(", "),
        })?;

        if let Some(eic) = &self.country_eic {
            if resolved.code == self.country_code {
                resolved.eic_code = eic.clone();
            }
        }

        Ok(resolved)
    }
}

fn parse_positive(value: Option<String>, key: &'static str, default: u32) -> Result<u32, ConfigError> {
    match value {
        None => Ok(default),
        Some(raw) => match raw.trim().parse::<u32>() {
            Ok(parsed) if parsed >= 1 => Ok(parsed),
            _ => Err(ConfigError::Invalid { key, value: raw }),
        },
    }
}
