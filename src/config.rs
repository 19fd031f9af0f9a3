// src/config.rs

use std::{env, fmt, str::FromStr, time::Duration};

use dotenvy::dotenv;

use crate::exam::{ModuleId, proctor::ProctorConfig};

/// Time allowed per module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModuleDurations {
    pub listening: Duration,
    pub reading: Duration,
    pub writing: Duration,
}

impl ModuleDurations {
    pub fn for_module(&self, module: ModuleId) -> Duration {
        match module {
            ModuleId::Listening => self.listening,
            ModuleId::Reading => self.reading,
            ModuleId::Writing => self.writing,
        }
    }
}

impl Default for ModuleDurations {
    fn default() -> Self {
        Self {
            listening: Duration::from_secs(30 * 60),
            reading: Duration::from_secs(60 * 60),
            writing: Duration::from_secs(60 * 60),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub jwt_secret: String,
    /// Lifetime of user login tokens, in seconds.
    pub jwt_expiration: u64,
    /// Lifetime of exam session tokens, in seconds.
    pub session_token_ttl: u64,
    pub rust_log: String,
    pub port: u16,
    pub admin_email: Option<String>,
    pub admin_password: Option<String>,
    pub proctoring: ProctorConfig,
    pub module_durations: ModuleDurations,
}

#[derive(Debug)]
pub enum ConfigError {
    Missing(&'static str),
    Invalid { key: &'static str, value: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Missing(key) => write!(f, "{} must be set", key),
            ConfigError::Invalid { key, value } => write!(f, "{} has invalid value '{}'", key, value),
        }
    }
}

impl std::error::Error for ConfigError {}

fn required(key: &'static str) -> Result<String, ConfigError> {
    env::var(key).map_err(|_| ConfigError::Missing(key))
}

fn parsed<T: FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value }),
        Err(_) => Ok(default),
    }
}

/// Parses an explicit on/off switch. Anything unrecognised is an error,
/// so a typo never silently turns proctoring off.
fn switch(key: &'static str, default: bool) -> Result<bool, ConfigError> {
    match env::var(key) {
        Ok(value) => parse_switch(key, value),
        Err(_) => Ok(default),
    }
}

fn parse_switch(key: &'static str, value: String) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "on" | "yes" => Ok(true),
        "0" | "false" | "off" | "no" => Ok(false),
        _ => Err(ConfigError::Invalid { key, value }),
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv().ok();

        let database_url = required("DATABASE_URL")?;
        let jwt_secret = required("JWT_SECRET")?;

        let rust_log = env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());

        let defaults = ModuleDurations::default();
        let minutes = |d: Duration| d.as_secs() / 60;
        let module_durations = ModuleDurations {
            listening: Duration::from_secs(
                60 * parsed("LISTENING_MINUTES", minutes(defaults.listening))?,
            ),
            reading: Duration::from_secs(60 * parsed("READING_MINUTES", minutes(defaults.reading))?),
            writing: Duration::from_secs(60 * parsed("WRITING_MINUTES", minutes(defaults.writing))?),
        };

        let proctoring_defaults = ProctorConfig::default();
        let proctoring = ProctorConfig {
            enabled: switch("PROCTORING_ENABLED", true)?,
            max_violations: parsed("MAX_VIOLATIONS", proctoring_defaults.max_violations)?,
            blur_confirm_delay: Duration::from_millis(parsed(
                "BLUR_CONFIRM_MS",
                proctoring_defaults.blur_confirm_delay.as_millis() as u64,
            )?),
        };
        if proctoring.max_violations == 0 {
            return Err(ConfigError::Invalid {
                key: "MAX_VIOLATIONS",
                value: "0".to_string(),
            });
        }

        Ok(Self {
            database_url,
            jwt_secret,
            jwt_expiration: parsed("JWT_EXPIRATION", 24 * 3600)?,
            session_token_ttl: parsed("SESSION_TOKEN_TTL", 4 * 3600)?,
            rust_log,
            port: parsed("PORT", 3000)?,
            admin_email: env::var("ADMIN_EMAIL").ok(),
            admin_password: env::var("ADMIN_PASSWORD").ok(),
            proctoring,
            module_durations,
        })
    }
}
