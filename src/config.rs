use std::time::Duration;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{0} must be greater than zero")]
    Zero(&'static str),
}

/// Where the store and the generation functions live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connection {
    pub database_url: String,
    /// Base URL of the platform; functions are served under `/functions/v1`.
    pub supabase_url: String,
    pub service_key: String,
}

impl Connection {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database_url.trim().is_empty() {
            return Err(ConfigError::Missing("DATABASE_URL"));
        }
        if self.supabase_url.trim().is_empty() {
            return Err(ConfigError::Missing("SUPABASE_URL"));
        }
        if self.service_key.trim().is_empty() {
            return Err(ConfigError::Missing("SUPABASE_SERVICE_ROLE_KEY"));
        }
        Ok(())
    }

    pub fn functions_url(&self) -> String {
        format!("{}/functions/v1", self.supabase_url.trim_end_matches('/'))
    }
}

/// Timing and retry knobs of the scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub poll_interval: Duration,
    pub max_retries: i32,
    pub rate_limit_cooldown: Duration,
    pub image_delay: Duration,
    pub video_delay: Duration,
    pub poll_batch: i64,
    pub function_timeout: Duration,
    pub retry_error_limit: usize,
    pub terminal_error_limit: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            poll_interval: Duration::from_secs(15),
            max_retries: 3,
            rate_limit_cooldown: Duration::from_secs(60),
            image_delay: Duration::from_secs(5),
            video_delay: Duration::from_secs(10),
            poll_batch: 10,
            function_timeout: Duration::from_secs(120),
            retry_error_limit: 500,
            terminal_error_limit: 1000,
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval.is_zero() {
            return Err(ConfigError::Zero("poll interval"));
        }
        if self.max_retries <= 0 {
            return Err(ConfigError::Zero("max retries"));
        }
        if self.poll_batch <= 0 {
            return Err(ConfigError::Zero("poll batch"));
        }
        if self.function_timeout.is_zero() {
            return Err(ConfigError::Zero("function timeout"));
        }
        Ok(())
    }
}
