use crate::domain::{ChatId, MessageRef};

/// Provider-neutral inbound update, identical whether it came from a webhook push or a poll.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Update {
    Text(TextMessage),
    Callback(CallbackQuery),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TextMessage {
    pub chat_id: ChatId,
    pub text: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CallbackQuery {
    pub chat_id: ChatId,
    pub callback_id: String,
    /// The message carrying the pressed keyboard, when the provider still has it.
    pub message: Option<MessageRef>,
    pub data: String,
}

/// One fetched update: the provider's sequence id plus the normalized payload.
///
/// `update` is `None` for shapes this bot does not handle (edited messages, stickers, ...);
/// the id still counts for offset tracking.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawUpdate {
    pub id: i64,
    pub update: Option<Update>,
}

/// Inline keyboard (buttons attached to a message).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct InlineKeyboard {
    pub rows: Vec<Vec<InlineButton>>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InlineButton {
    pub label: String,
    pub action: ButtonAction,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ButtonAction {
    Callback(String),
    Url(String),
}

impl InlineButton {
    pub fn callback(label: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            action: ButtonAction::Callback(data.into()),
        }
    }

    pub fn url(label: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            action: ButtonAction::Url(url.into()),
        }
    }
}

impl InlineKeyboard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a row; empty rows are dropped.
    pub fn row(mut self, buttons: Vec<InlineButton>) -> Self {
        if !buttons.is_empty() {
            self.rows.push(buttons);
        }
        self
    }

    /// Convenience for "one button per row" layouts.
    pub fn single(self, button: InlineButton) -> Self {
        self.row(vec![button])
    }

    /// All callback payloads, in row order.
    pub fn callback_data(&self) -> Vec<&str> {
        self.rows
            .iter()
            .flatten()
            .filter_map(|b| match &b.action {
                ButtonAction::Callback(d) => Some(d.as_str()),
                ButtonAction::Url(_) => None,
            })
            .collect()
    }
}

/// Persistent reply keyboard shown under the input field.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReplyKeyboard {
    pub rows: Vec<Vec<String>>,
    pub resize: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Markup {
    Inline(InlineKeyboard),
    Reply(ReplyKeyboard),
}

impl Markup {
    pub fn as_inline(&self) -> Option<&InlineKeyboard> {
        match self {
            Markup::Inline(k) => Some(k),
            Markup::Reply(_) => None,
        }
    }
}

/// Capabilities / limits of a messenger implementation.
#[derive(Clone, Copy, Debug)]
pub struct MessagingCapabilities {
    pub supports_edit: bool,
    pub max_message_len: usize,
}
