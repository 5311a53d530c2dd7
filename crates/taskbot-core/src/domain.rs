use std::{fmt, sync::OnceLock};

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Telegram chat id (numeric).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChatId(pub i64);

impl fmt::Display for ChatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Telegram message id (numeric).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MessageId(pub i32);

/// A stable reference to a Telegram message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MessageRef {
    pub chat_id: ChatId,
    pub message_id: MessageId,
}

/// Secret token identifying one bot with the Telegram Bot API.
///
/// `Debug` and `Display` only ever print a short fingerprint.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BotCredential(String);

impl BotCredential {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into().trim().to_string())
    }

    /// The raw token, for building provider requests only.
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// `<bot id>:<secret>`, the shape issued by BotFather.
    pub fn is_well_formed(&self) -> bool {
        static SHAPE: OnceLock<Regex> = OnceLock::new();
        SHAPE
            .get_or_init(|| Regex::new(r"^[0-9]+:[A-Za-z0-9_-]+$").expect("valid regex"))
            .is_match(&self.0)
    }

    /// Short SHA-256 prefix used in logs and audit records.
    pub fn fingerprint(&self) -> String {
        let mut h = Sha256::new();
        h.update(self.0.as_bytes());
        hex_prefix(&h.finalize(), 12)
    }
}

impl fmt::Debug for BotCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BotCredential({})", self.fingerprint())
    }
}

impl fmt::Display for BotCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.fingerprint())
    }
}

fn hex_prefix(bytes: &[u8], len: usize) -> String {
    use std::fmt::Write;

    let mut out = String::with_capacity(len);
    for b in bytes {
        let _ = write!(&mut out, "{:02x}", b);
        if out.len() >= len {
            out.truncate(len);
            break;
        }
    }
    out
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Priority {
    Low,
    Medium,
    High,
}

impl Priority {
    pub fn glyph(self) -> &'static str {
        match self {
            Priority::High => "🔴",
            Priority::Medium => "🟡",
            Priority::Low => "🟢",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Priority::High => "urgent",
            Priority::Medium => "normal",
            Priority::Low => "low priority",
        }
    }
}

/// Local user account with its optional Telegram delivery settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub telegram_bot_token: Option<BotCredential>,
    #[serde(default)]
    pub telegram_chat_id: Option<ChatId>,
}

impl User {
    /// Where reminders for this user go; `None` until both settings are stored.
    pub fn delivery_target(&self) -> Option<(BotCredential, ChatId)> {
        match (&self.telegram_bot_token, self.telegram_chat_id) {
            (Some(cred), Some(chat)) => Some((cred.clone(), chat)),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub user_id: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub due_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub notify_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub notification_sent: bool,
    #[serde(default)]
    pub is_completed: bool,
    pub priority: Priority,
    pub created_at: DateTime<Utc>,
}

impl Task {
    /// Due for a reminder at `now`: notify time passed, not yet notified, not completed.
    pub fn is_reminder_due(&self, now: DateTime<Utc>) -> bool {
        !self.notification_sent
            && !self.is_completed
            && self.notify_at.map(|at| at <= now).unwrap_or(false)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoteTopic {
    pub id: String,
    pub user_id: String,
    pub topic: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoteEntry {
    pub id: String,
    pub topic_id: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// A task whose reminder is due, joined with its owner.
#[derive(Clone, Debug)]
pub struct ReminderCandidate {
    pub task: Task,
    pub owner: User,
}
