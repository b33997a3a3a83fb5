//! Per-user notification channel settings.
//!
//! Profiles are owned by an external identity provider; this service only
//! reads channel addresses and maintains the push subscription (including
//! the self-healing clear when a push endpoint reports gone).

use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::db::DatabaseError;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub id: String,
    pub name: String,
    pub telegram_chat_id: Option<String>,
    pub telegram_enabled: bool,
    pub push_subscription: Option<String>,
    pub push_enabled: bool,
}

/// A user's enabled channel addresses. Disabled channels appear as `None`.
#[derive(Debug, Clone, Default)]
pub struct UserChannels {
    pub telegram_chat_id: Option<String>,
    pub push_subscription: Option<String>,
}

impl UserChannels {
    pub fn any_enabled(&self) -> bool {
        self.telegram_chat_id.is_some() || self.push_subscription.is_some()
    }
}

/// Insert a profile row (registration itself is an external concern).
pub fn insert_profile(conn: &Connection, id: &str, name: &str) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO profiles (id, name) VALUES (?1, ?2)",
        params![id, name],
    )?;
    Ok(())
}

pub fn fetch_profile(conn: &Connection, id: &str) -> Result<Option<Profile>, DatabaseError> {
    let row = conn
        .query_row(
            "SELECT id, name, telegram_chat_id, telegram_enabled,
                    push_subscription, push_enabled
             FROM profiles WHERE id = ?1",
            params![id],
            |row| {
                Ok(Profile {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    telegram_chat_id: row.get(2)?,
                    telegram_enabled: row.get::<_, i64>(3)? != 0,
                    push_subscription: row.get(4)?,
                    push_enabled: row.get::<_, i64>(5)? != 0,
                })
            },
        )
        .optional()?;
    Ok(row)
}

/// Enabled channel addresses for a user; missing profile reads as no channels.
pub fn fetch_channels(conn: &Connection, user_id: &str) -> Result<UserChannels, DatabaseError> {
    let row = conn
        .query_row(
            "SELECT CASE WHEN telegram_enabled = 1 THEN telegram_chat_id END,
                    CASE WHEN push_enabled = 1 THEN push_subscription END
             FROM profiles WHERE id = ?1",
            params![user_id],
            |row| {
                Ok(UserChannels {
                    telegram_chat_id: row.get(0)?,
                    push_subscription: row.get(1)?,
                })
            },
        )
        .optional()?;
    Ok(row.unwrap_or_default())
}

/// Store the chat id delivered by the bot-connect flow and enable the channel.
pub fn connect_telegram(
    conn: &Connection,
    user_id: &str,
    chat_id: &str,
) -> Result<(), DatabaseError> {
    let changed = conn.execute(
        "UPDATE profiles SET telegram_chat_id = ?2, telegram_enabled = 1,
            updated_at = datetime('now')
         WHERE id = ?1",
        params![user_id, chat_id],
    )?;
    if changed == 0 {
        return Err(DatabaseError::NotFound {
            entity: "profile".to_string(),
            id: user_id.to_string(),
        });
    }
    Ok(())
}

/// Store a push subscription (serialized JSON) and enable the channel.
pub fn save_push_subscription(
    conn: &Connection,
    user_id: &str,
    subscription_json: &str,
) -> Result<(), DatabaseError> {
    let changed = conn.execute(
        "UPDATE profiles SET push_subscription = ?2, push_enabled = 1,
            updated_at = datetime('now')
         WHERE id = ?1",
        params![user_id, subscription_json],
    )?;
    if changed == 0 {
        return Err(DatabaseError::NotFound {
            entity: "profile".to_string(),
            id: user_id.to_string(),
        });
    }
    Ok(())
}

/// Drop the stored push subscription, e.g. after the endpoint reported gone.
pub fn clear_push_subscription(conn: &Connection, user_id: &str) -> Result<(), DatabaseError> {
    conn.execute(
        "UPDATE profiles SET push_subscription = NULL, push_enabled = 0,
            updated_at = datetime('now')
         WHERE id = ?1",
        params![user_id],
    )?;
    Ok(())
}
