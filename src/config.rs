//! Configuration and settings management
//!
//! Loads settings from config files and environment variables and defines
//! transport constants.

use crate::error::ConfigError;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Application settings loaded from environment variables
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Settings {
    /// Telegram Bot API token
    pub telegram_token: String,

    /// Connection string handed to storage-backed handlers
    pub database_url: Option<String>,

    /// How many jobs may wait or run in the admission queue
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,

    /// How many admitted jobs may execute at once
    #[serde(default = "default_queue_parallelism")]
    pub queue_parallelism: usize,

    /// Server-side long-poll timeout in seconds
    #[serde(default = "default_poll_timeout_secs")]
    pub poll_timeout_secs: u64,

    /// Pause before retrying a failed long poll
    #[serde(default = "default_poll_retry_secs")]
    pub poll_retry_secs: u64,

    /// Bot username; fetched with `getMe` when unset
    pub bot_username: Option<String>,
}

const fn default_queue_depth() -> usize {
    4
}

const fn default_queue_parallelism() -> usize {
    1
}

const fn default_poll_timeout_secs() -> u64 {
    30
}

const fn default_poll_retry_secs() -> u64 {
    3
}

impl Settings {
    /// Create new settings by loading from environment and files
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use stepwise_bot::config::Settings;
    ///
    /// let settings = Settings::new().expect("Failed to load configuration");
    /// ```
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if loading fails or a value is unusable.
    pub fn new() -> Result<Self, ConfigError> {
        let run_mode = std::env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{run_mode}")).required(false))
            // Not checked into git
            .add_source(File::with_name("config/local").required(false))
            // Eg.. `APP__QUEUE_DEPTH=8 ./target/app`
            .add_source(Environment::with_prefix("APP").separator("__"))
            // Plain UPPER_SNAKE_CASE variables; empty ones count as unset
            .add_source(Environment::default().ignore_empty(true))
            .build()?;

        let settings: Self = s.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Check cross-field constraints that serde cannot express
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.telegram_token.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "telegram_token",
                reason: "must not be empty".to_string(),
            });
        }
        if self.queue_depth == 0 {
            return Err(ConfigError::Invalid {
                field: "queue_depth",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.queue_parallelism == 0 {
            return Err(ConfigError::Invalid {
                field: "queue_parallelism",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.queue_parallelism > self.queue_depth {
            return Err(ConfigError::Invalid {
                field: "queue_parallelism",
                reason: format!(
                    "{} exceeds queue_depth {}",
                    self.queue_parallelism, self.queue_depth
                ),
            });
        }
        Ok(())
    }

    /// Long-poll timeout as a `Duration`
    #[must_use]
    pub const fn poll_timeout(&self) -> Duration {
        Duration::from_secs(self.poll_timeout_secs)
    }

    /// Long-poll retry backoff as a `Duration`
    #[must_use]
    pub const fn poll_retry(&self) -> Duration {
        Duration::from_secs(self.poll_retry_secs)
    }
}

// Telegram API retry configuration
/// Initial backoff for retried sends
pub const TELEGRAM_API_INITIAL_BACKOFF_MS: u64 = 500;
/// Upper bound for a single backoff step
pub const TELEGRAM_API_MAX_BACKOFF_MS: u64 = 5_000;
/// Number of retries after the first attempt
pub const TELEGRAM_API_MAX_RETRIES: usize = 3;

/// Telegram's hard limit is 4096; leave room for the mention prefix
pub const TELEGRAM_MESSAGE_LIMIT: usize = 4000;

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    fn settings() -> Settings {
        Settings {
            telegram_token: "dummy".to_string(),
            database_url: None,
            queue_depth: 4,
            queue_parallelism: 1,
            poll_timeout_secs: 30,
            poll_retry_secs: 3,
            bot_username: None,
        }
    }

    // Single test touching the environment to avoid races between tests
    #[test]
    fn test_config_env_loading() -> Result<(), Box<dyn std::error::Error>> {
        env::set_var("TELEGRAM_TOKEN", "dummy_token");
        env::set_var("QUEUE_DEPTH", "8");
        env::set_var("DATABASE_URL", "");

        let settings = Settings::new()?;
        assert_eq!(settings.telegram_token, "dummy_token");
        assert_eq!(settings.queue_depth, 8);
        assert_eq!(settings.queue_parallelism, 1);
        assert_eq!(settings.database_url, None);
        assert_eq!(settings.poll_retry(), Duration::from_secs(3));

        env::set_var("QUEUE_DEPTH", "0");
        assert!(Settings::new().is_err());

        env::remove_var("TELEGRAM_TOKEN");
        env::remove_var("QUEUE_DEPTH");
        env::remove_var("DATABASE_URL");
        Ok(())
    }

    #[test]
    fn test_validate() {
        assert!(settings().validate().is_ok());

        let mut s = settings();
        s.telegram_token = "  ".to_string();
        assert!(matches!(
            s.validate(),
            Err(ConfigError::Invalid {
                field: "telegram_token",
                ..
            })
        ));

        let mut s = settings();
        s.queue_parallelism = 0;
        assert!(s.validate().is_err());

        let mut s = settings();
        s.queue_parallelism = 5;
        assert!(matches!(
            s.validate(),
            Err(ConfigError::Invalid {
                field: "queue_parallelism",
                ..
            })
        ));
    }
}
