//! Notification channels: the seam between the reminder engine and the
//! outside world.
//!
//! Each channel implements [`ReminderChannel`]; the [`Notifier`] owns the
//! set of channels constructed once at process start and injected into the
//! dispatcher — no module-level client singletons. A channel failure is
//! never allowed to affect another channel's delivery.

pub mod telegram;
pub mod webpush;

use thiserror::Error;

/// Which delivery mechanism a channel is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    Telegram,
    WebPush,
}

impl std::fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Telegram => write!(f, "telegram"),
            Self::WebPush => write!(f, "web push"),
        }
    }
}

/// Errors from a single delivery attempt.
#[derive(Debug, Error)]
pub enum SendError {
    #[error("Channel not configured: {0}")]
    NotConfigured(String),

    /// The delivery endpoint no longer exists (e.g. an expired push
    /// subscription). The dispatcher reacts by clearing the stored address.
    #[error("Delivery endpoint gone")]
    Gone,

    #[error("Provider rejected the request: {0}")]
    Api(String),

    #[error("Transport error: {0}")]
    Transport(String),
}

/// Everything a channel needs to render one dose reminder.
#[derive(Debug, Clone)]
pub struct DoseReminder {
    pub occurrence_id: String,
    pub medication_id: String,
    pub medication_name: String,
    pub dosage: String,
    /// Scheduled clock time in the reference timezone ("08:00").
    pub time_label: String,
    /// Snooze interval offered on the reminder's action controls.
    pub snooze_minutes: i64,
}

/// A notification delivery mechanism. `target` is the user's address for
/// this channel: a chat id for Telegram, a subscription JSON document for
/// web push.
pub trait ReminderChannel: Send + Sync {
    fn kind(&self) -> ChannelKind;

    fn send_reminder(&self, target: &str, reminder: &DoseReminder) -> Result<(), SendError>;
}

/// The injected set of delivery channels.
#[derive(Default)]
pub struct Notifier {
    channels: Vec<Box<dyn ReminderChannel>>,
}

impl Notifier {
    pub fn new() -> Self {
        Self {
            channels: Vec::new(),
        }
    }

    pub fn with_channel(mut self, channel: Box<dyn ReminderChannel>) -> Self {
        self.channels.push(channel);
        self
    }

    pub fn channels(&self) -> &[Box<dyn ReminderChannel>] {
        &self.channels
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}
