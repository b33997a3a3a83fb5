//! Service configuration, read once from the environment at startup.
//!
//! The reference timezone offset is explicit configuration: scheduling
//! correctness must never depend on the timezone of whatever machine the
//! service happens to run on.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::FixedOffset;
use thiserror::Error;

use crate::reminder::DispatchConfig;

/// Application-level constants
pub const APP_NAME: &str = "DoseGuard";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default tracing filter when RUST_LOG is not set.
pub fn default_log_filter() -> String {
    "doseguard=info,tower_http=warn".to_string()
}

/// Get the application data directory (~/.doseguard)
pub fn app_data_dir() -> PathBuf {
    let home = dirs::home_dir().expect("Cannot determine home directory");
    home.join(".doseguard")
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid value for {var}: {value}")]
    Invalid { var: String, value: String },
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Address the HTTP API binds to.
    pub bind_addr: SocketAddr,
    /// SQLite database path.
    pub db_path: PathBuf,
    /// Shared secret for the cron endpoints; `None` disables the check.
    pub cron_secret: Option<String>,
    /// Telegram Bot API token; `None` disables the chat channel.
    pub telegram_bot_token: Option<String>,
    /// The reference timezone all schedules are interpreted in.
    pub reference_offset: FixedOffset,
    /// Due-window tolerance around each scheduled time.
    pub tolerance_minutes: i64,
    /// Snooze interval offered on reminder action controls.
    pub default_snooze_minutes: i64,
    /// Grace period before an unhandled dose counts as missed.
    pub missed_after_minutes: i64,
}

impl AppConfig {
    /// Read configuration from the environment, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let bind_addr = match env_var("DOSEGUARD_BIND") {
            Some(value) => value.parse().map_err(|_| ConfigError::Invalid {
                var: "DOSEGUARD_BIND".to_string(),
                value,
            })?,
            None => SocketAddr::from(([127, 0, 0, 1], 8787)),
        };

        let db_path = env_var("DOSEGUARD_DB")
            .map(PathBuf::from)
            .unwrap_or_else(|| app_data_dir().join("doseguard.db"));

        let offset_minutes: i32 = parse_or("DOSEGUARD_UTC_OFFSET_MINUTES", 0)?;
        let reference_offset = reference_offset_from_minutes(offset_minutes)?;

        Ok(Self {
            bind_addr,
            db_path,
            cron_secret: env_var("CRON_SECRET"),
            telegram_bot_token: env_var("TELEGRAM_BOT_TOKEN"),
            reference_offset,
            tolerance_minutes: parse_or("DOSEGUARD_TOLERANCE_MINUTES", 5)?,
            default_snooze_minutes: parse_or("DOSEGUARD_SNOOZE_MINUTES", 10)?,
            missed_after_minutes: parse_or("DOSEGUARD_MISSED_AFTER_MINUTES", 30)?,
        })
    }

    /// The engine's view of this configuration.
    pub fn dispatch(&self) -> DispatchConfig {
        DispatchConfig {
            offset: self.reference_offset,
            tolerance_minutes: self.tolerance_minutes,
            snooze_minutes: self.default_snooze_minutes,
        }
    }
}

/// Build the reference offset from a whole-minute UTC offset.
pub fn reference_offset_from_minutes(minutes: i32) -> Result<FixedOffset, ConfigError> {
    FixedOffset::east_opt(minutes * 60).ok_or_else(|| ConfigError::Invalid {
        var: "DOSEGUARD_UTC_OFFSET_MINUTES".to_string(),
        value: minutes.to_string(),
    })
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn parse_or<T: FromStr>(var: &str, default: T) -> Result<T, ConfigError> {
    match env_var(var) {
        None => Ok(default),
        Some(value) => value.parse().map_err(|_| ConfigError::Invalid {
            var: var.to_string(),
            value,
        }),
    }
}
