//! Shared application state: configuration, the database handle and the
//! injected notification clients. Wrapped in `Arc` at startup and shared
//! by every HTTP handler.

use std::sync::{Mutex, MutexGuard};

use rusqlite::Connection;

use crate::config::AppConfig;
use crate::db::DatabaseError;
use crate::notify::telegram::TelegramClient;
use crate::notify::Notifier;
use crate::reminder::DispatchConfig;

pub struct AppState {
    pub config: AppConfig,
    /// The engine runs each invocation to completion; the mutex serializes
    /// store access in-process. Cross-invocation idempotency does not rely
    /// on it — that is the occurrence id's job.
    db: Mutex<Connection>,
    /// Fan-out channels for the dispatcher.
    pub notifier: Notifier,
    /// Bot client for callback acknowledgment and message editing.
    /// `None` when no bot token is configured.
    pub telegram: Option<TelegramClient>,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        conn: Connection,
        notifier: Notifier,
        telegram: Option<TelegramClient>,
    ) -> Self {
        Self {
            config,
            db: Mutex::new(conn),
            notifier,
            telegram,
        }
    }

    /// Borrow the database connection.
    pub fn db(&self) -> Result<MutexGuard<'_, Connection>, DatabaseError> {
        self.db.lock().map_err(|_| DatabaseError::LockPoisoned)
    }

    pub fn dispatch_config(&self) -> DispatchConfig {
        self.config.dispatch()
    }
}
