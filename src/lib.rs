//! DoseGuard — medication dose reminder service.
//!
//! The core is the dispatch engine (`reminder`): given the current time
//! and each medication's daily clock-time schedule, it decides which doses
//! are due, claims each occurrence exactly once through a deterministic
//! idempotency key, and fans reminders out to the owner's notification
//! channels (Telegram bot, web push). User responses flow back through the
//! channel callbacks and drive the dose lifecycle
//! (pending → taken/skipped/missed/delayed) including snooze resurrection
//! and supply bookkeeping.

pub mod api;
pub mod config;
pub mod db;
pub mod notify;
pub mod reminder;
pub mod schedule;
pub mod state;

use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use crate::config::AppConfig;
use crate::notify::telegram::TelegramClient;
use crate::notify::webpush::PushClient;
use crate::notify::Notifier;
use crate::state::AppState;

/// Initialize logging, open the store, wire up the channels and serve the
/// API until shutdown.
pub fn run() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter())),
        )
        .init();

    tracing::info!("{} starting v{}", config::APP_NAME, config::APP_VERSION);

    let app_config = AppConfig::from_env()?;

    if let Some(parent) = app_config.db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let conn = db::sqlite::open_database(&app_config.db_path)?;

    // Channel clients are constructed once here and injected; handlers and
    // the dispatcher never build their own.
    let telegram = app_config
        .telegram_bot_token
        .as_deref()
        .map(TelegramClient::new);
    let mut notifier = Notifier::new().with_channel(Box::new(PushClient::new()));
    match &telegram {
        Some(client) => {
            notifier = notifier.with_channel(Box::new(client.clone()));
        }
        None => {
            tracing::warn!("TELEGRAM_BOT_TOKEN not set - chat reminders disabled");
        }
    }

    let state = Arc::new(AppState::new(app_config, conn, notifier, telegram));

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(api::router::serve(state))?;
    Ok(())
}
