use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_WORKSHEET: &str = "People Data";
const DEFAULT_CREDENTIALS: &str = "credentials.json";
const MIN_POLL_INTERVAL_SECS: u64 = 5;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable {0}")]
    MissingVar(&'static str),
    #[error("Invalid value for {var}: {reason}")]
    InvalidVar { var: &'static str, reason: String },
}

/// Runtime configuration, read once at startup. Startup errors are fatal.
#[derive(Debug, Clone)]
pub struct Config {
    pub spreadsheet_id: String,
    pub worksheet: String,
    pub credentials_path: PathBuf,
    pub poll_interval: Duration,
    pub http_timeout: Duration,
    /// Politeness delay between rows in a cycle, to stay under search quotas.
    pub row_delay: Duration,
    pub accept_threshold: f64,
    pub tie_margin: f64,
    /// Bounded retries for a single transient sheet write failure.
    pub write_retries: u32,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let spreadsheet_id = std::env::var("MARGATSNI_SPREADSHEET_ID")
            .map_err(|_| ConfigError::MissingVar("MARGATSNI_SPREADSHEET_ID"))?;

        let config = Config {
            spreadsheet_id,
            worksheet: env_or("MARGATSNI_WORKSHEET", DEFAULT_WORKSHEET),
            credentials_path: PathBuf::from(env_or(
                "MARGATSNI_CREDENTIALS",
                DEFAULT_CREDENTIALS,
            )),
            poll_interval: Duration::from_secs(env_parsed("MARGATSNI_POLL_INTERVAL_SECS", 60)?),
            http_timeout: Duration::from_secs(env_parsed("MARGATSNI_HTTP_TIMEOUT_SECS", 30)?),
            row_delay: Duration::from_secs(env_parsed("MARGATSNI_ROW_DELAY_SECS", 3)?),
            accept_threshold: env_parsed("MARGATSNI_ACCEPT_THRESHOLD", 0.6)?,
            tie_margin: env_parsed("MARGATSNI_TIE_MARGIN", 0.05)?,
            write_retries: env_parsed("MARGATSNI_WRITE_RETRIES", 1)?,
        };

        config.validate()
    }

    pub fn validate(self) -> Result<Self, ConfigError> {
        if self.spreadsheet_id.trim().is_empty() {
            return Err(ConfigError::InvalidVar {
                var: "MARGATSNI_SPREADSHEET_ID",
                reason: "must not be empty".to_string(),
            });
        }
        if self.poll_interval < Duration::from_secs(MIN_POLL_INTERVAL_SECS) {
            return Err(ConfigError::InvalidVar {
                var: "MARGATSNI_POLL_INTERVAL_SECS",
                reason: format!("must be at least {MIN_POLL_INTERVAL_SECS} seconds"),
            });
        }
        if self.http_timeout.is_zero() {
            return Err(ConfigError::InvalidVar {
                var: "MARGATSNI_HTTP_TIMEOUT_SECS",
                reason: "must be greater than 0".to_string(),
            });
        }
        if !(self.accept_threshold > 0.0 && self.accept_threshold < 1.0) {
            return Err(ConfigError::InvalidVar {
                var: "MARGATSNI_ACCEPT_THRESHOLD",
                reason: "must be strictly between 0 and 1".to_string(),
            });
        }
        if self.tie_margin < 0.0 || self.tie_margin >= self.accept_threshold {
            return Err(ConfigError::InvalidVar {
                var: "MARGATSNI_TIE_MARGIN",
                reason: "must be non-negative and smaller than the accept threshold".to_string(),
            });
        }
        Ok(self)
    }
}

fn env_or(var: &str, default: &str) -> String {
    std::env::var(var).unwrap_or_else(|_| default.to_string())
}

fn env_parsed<T: std::str::FromStr>(var: &'static str, default: T) -> Result<T, ConfigError> {
    match std::env::var(var) {
        Ok(raw) => raw.parse().map_err(|_| ConfigError::InvalidVar {
            var,
            reason: format!("could not parse '{raw}'"),
        }),
        Err(_) => Ok(default),
    }
}
