//! Configuration types.
//!
//! Everything is read from `RELAY_*` environment variables with sensible
//! defaults, and passed explicitly into the components that need it.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;

/// How the binary runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// One cycle over every mailbox, then exit.
    Once,
    /// Cycles on a cron schedule until shutdown.
    Schedule,
    /// Long-lived live listeners, one per mailbox.
    Watch,
}

impl FromStr for RunMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "once" => Ok(Self::Once),
            "schedule" => Ok(Self::Schedule),
            "watch" => Ok(Self::Watch),
            other => Err(format!("unknown mode '{other}' (expected once, schedule or watch)")),
        }
    }
}

impl std::fmt::Display for RunMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Once => "once",
            Self::Schedule => "schedule",
            Self::Watch => "watch",
        };
        write!(f, "{s}")
    }
}

/// Relay configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// JSON file listing mailboxes and their webhooks.
    pub accounts_path: PathBuf,
    /// Mailbox to open on every account.
    pub mailbox: String,
    /// Only messages from this sender are considered. `None` searches all unseen mail.
    pub sender_filter: Option<String>,
    /// Global guard over the historical scan of one mailbox.
    pub scan_timeout: Duration,
    /// Upper bound on any single IMAP command.
    pub command_timeout: Duration,
    /// Per-delivery HTTP timeout.
    pub delivery_timeout: Duration,
    /// Maximum concurrent webhook deliveries per dispatch.
    pub max_in_flight_deliveries: usize,
    /// Maximum mailboxes scanned in parallel during one run.
    pub max_concurrent_mailboxes: usize,
    /// Cron expression (with seconds field) for scheduled runs.
    pub schedule: String,
    /// Delay before a failed live watcher reconnects.
    pub watch_retry_delay: Duration,
    pub mode: RunMode,
    /// When set, logs are also written to a daily rolling file here.
    pub log_dir: Option<PathBuf>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            accounts_path: PathBuf::from("./data/accounts.json"),
            mailbox: "INBOX".to_string(),
            sender_filter: None,
            scan_timeout: Duration::from_secs(300), // 5 minutes
            command_timeout: Duration::from_secs(30),
            delivery_timeout: Duration::from_secs(10),
            max_in_flight_deliveries: 8,
            max_concurrent_mailboxes: 4,
            schedule: "0 */15 * * * *".to_string(), // every 15 minutes
            watch_retry_delay: Duration::from_secs(10),
            mode: RunMode::Schedule,
            log_dir: None,
        }
    }
}

impl RelayConfig {
    /// Build config from environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let config = Self {
            accounts_path: std::env::var("RELAY_ACCOUNTS_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.accounts_path),
            mailbox: std::env::var("RELAY_MAILBOX").unwrap_or(defaults.mailbox),
            sender_filter: std::env::var("RELAY_SENDER_FILTER")
                .ok()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty()),
            scan_timeout: env_secs("RELAY_SCAN_TIMEOUT_SECS", defaults.scan_timeout)?,
            command_timeout: env_secs("RELAY_COMMAND_TIMEOUT_SECS", defaults.command_timeout)?,
            delivery_timeout: env_secs("RELAY_DELIVERY_TIMEOUT_SECS", defaults.delivery_timeout)?,
            max_in_flight_deliveries: env_parse(
                "RELAY_MAX_IN_FLIGHT_DELIVERIES",
                defaults.max_in_flight_deliveries,
            )?,
            max_concurrent_mailboxes: env_parse(
                "RELAY_MAX_CONCURRENT_MAILBOXES",
                defaults.max_concurrent_mailboxes,
            )?,
            schedule: std::env::var("RELAY_SCHEDULE").unwrap_or(defaults.schedule),
            watch_retry_delay: env_secs("RELAY_WATCH_RETRY_SECS", defaults.watch_retry_delay)?,
            mode: env_parse("RELAY_MODE", defaults.mode)?,
            log_dir: std::env::var("RELAY_LOG_DIR").ok().map(PathBuf::from),
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject values that would stall the pipeline.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_in_flight_deliveries == 0 {
            return Err(ConfigError::InvalidValue {
                key: "RELAY_MAX_IN_FLIGHT_DELIVERIES".into(),
                message: "must be at least 1".into(),
            });
        }
        if self.max_concurrent_mailboxes == 0 {
            return Err(ConfigError::InvalidValue {
                key: "RELAY_MAX_CONCURRENT_MAILBOXES".into(),
                message: "must be at least 1".into(),
            });
        }
        if self.mailbox.trim().is_empty() {
            return Err(ConfigError::MissingRequired {
                key: "RELAY_MAILBOX".into(),
                hint: "Set it to the folder to scan, e.g. INBOX.".into(),
            });
        }
        self.cron_schedule()?;
        Ok(())
    }

    /// Parse the configured cron expression.
    pub fn cron_schedule(&self) -> Result<cron::Schedule, ConfigError> {
        cron::Schedule::from_str(&self.schedule).map_err(|e| ConfigError::InvalidValue {
            key: "RELAY_SCHEDULE".into(),
            message: format!("invalid cron: {e}"),
        })
    }
}

fn env_parse<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        }),
        Err(_) => Ok(default),
    }
}

fn env_secs(key: &str, default: Duration) -> Result<Duration, ConfigError> {
    env_parse(key, default.as_secs()).map(Duration::from_secs)
}
