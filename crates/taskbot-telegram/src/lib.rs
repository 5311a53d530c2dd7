//! Telegram adapter (teloxide).
//!
//! Implements the `taskbot-core` [`BotGateway`] over the Telegram Bot API and exposes the inbound
//! HTTP routes. One gateway serves every configured bot: each call builds a `Bot` for the given
//! credential on top of a shared HTTP client.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;

use teloxide::{
    prelude::*,
    types::{
        InlineKeyboardButton, InlineKeyboardMarkup, KeyboardButton, KeyboardMarkup, ParseMode,
        ReplyMarkup,
    },
    ApiError, RequestError,
};

pub mod normalize;
pub mod router;

use taskbot_core::{
    audit::{AuditEvent, AuditLogger, FailureKind},
    domain::{BotCredential, ChatId, MessageRef},
    errors::Error,
    messaging::{
        port::BotGateway,
        types::{ButtonAction, InlineKeyboard, Markup, MessagingCapabilities, RawUpdate},
    },
    Result,
};

pub const TELEGRAM_MESSAGE_LIMIT: usize = 4096;

#[derive(Clone)]
pub struct TelegramGateway {
    http: reqwest::Client,
    audit: Arc<AuditLogger>,
}

impl TelegramGateway {
    /// `timeout` bounds every Bot API request, so it must exceed the long-poll timeout.
    pub fn new(timeout: Duration, audit: Arc<AuditLogger>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("http client: {e}")))?;
        Ok(Self { http, audit })
    }

    fn bot(&self, cred: &BotCredential) -> Bot {
        Bot::with_client(cred.expose(), self.http.clone())
    }

    fn tg_chat(chat_id: ChatId) -> teloxide::types::ChatId {
        teloxide::types::ChatId(chat_id.0)
    }

    fn tg_msg_id(msg: MessageRef) -> teloxide::types::MessageId {
        teloxide::types::MessageId(msg.message_id.0)
    }

    fn inline_markup(keyboard: &InlineKeyboard) -> Result<InlineKeyboardMarkup> {
        let mut rows = Vec::with_capacity(keyboard.rows.len());
        for row in &keyboard.rows {
            let mut out = Vec::with_capacity(row.len());
            for b in row {
                let button = match &b.action {
                    ButtonAction::Callback(data) => {
                        InlineKeyboardButton::callback(b.label.clone(), data.clone())
                    }
                    ButtonAction::Url(url) => {
                        let url = reqwest::Url::parse(url).map_err(|e| {
                            Error::InvalidInput(format!("button url {url:?}: {e}"))
                        })?;
                        InlineKeyboardButton::url(b.label.clone(), url)
                    }
                };
                out.push(button);
            }
            rows.push(out);
        }
        Ok(InlineKeyboardMarkup::new(rows))
    }

    fn reply_markup(markup: &Markup) -> Result<ReplyMarkup> {
        Ok(match markup {
            Markup::Inline(k) => ReplyMarkup::InlineKeyboard(Self::inline_markup(k)?),
            Markup::Reply(k) => {
                let rows = k
                    .rows
                    .iter()
                    .map(|row| row.iter().map(|t| KeyboardButton::new(t.clone())).collect())
                    .collect::<Vec<Vec<KeyboardButton>>>();
                ReplyMarkup::Keyboard(KeyboardMarkup::new(rows).resize_keyboard(k.resize))
            }
        })
    }

    /// Record a failed Bot API call.
    fn report(&self, op: &str, cred: &BotCredential, chat_id: Option<ChatId>, e: &RequestError) {
        let kind = match e {
            RequestError::Api(_) | RequestError::MigrateToChatId(_) => FailureKind::Api,
            RequestError::RetryAfter(_) => FailureKind::RateLimited,
            _ => FailureKind::Transport,
        };
        let mut event = AuditEvent::new(kind, op, e.to_string()).credential(cred);
        if let Some(chat_id) = chat_id {
            event = event.chat(chat_id);
        }
        self.audit.record(event);
    }
}

#[async_trait]
impl BotGateway for TelegramGateway {
    fn capabilities(&self) -> MessagingCapabilities {
        MessagingCapabilities {
            supports_edit: true,
            max_message_len: TELEGRAM_MESSAGE_LIMIT,
        }
    }

    async fn send(
        &self,
        cred: &BotCredential,
        chat_id: ChatId,
        html: &str,
        markup: Option<&Markup>,
    ) -> Result<bool> {
        let mut req = self
            .bot(cred)
            .send_message(Self::tg_chat(chat_id), html.to_string())
            .parse_mode(ParseMode::Html);
        if let Some(m) = markup {
            req = req.reply_markup(Self::reply_markup(m)?);
        }

        match req.await {
            Ok(_) => {
                tracing::debug!(credential = %cred, chat_id = %chat_id, "message sent");
                Ok(true)
            }
            Err(e) => {
                self.report("send", cred, Some(chat_id), &e);
                Ok(false)
            }
        }
    }

    async fn edit(
        &self,
        cred: &BotCredential,
        msg: MessageRef,
        html: &str,
        keyboard: Option<&InlineKeyboard>,
    ) -> Result<bool> {
        let mut req = self
            .bot(cred)
            .edit_message_text(
                Self::tg_chat(msg.chat_id),
                Self::tg_msg_id(msg),
                html.to_string(),
            )
            .parse_mode(ParseMode::Html);
        if let Some(k) = keyboard {
            req = req.reply_markup(Self::inline_markup(k)?);
        }

        match req.await {
            Ok(_) => Ok(true),
            // Pressing the same button twice re-renders identical content.
            Err(RequestError::Api(ApiError::MessageNotModified)) => Ok(true),
            Err(e) => {
                self.report("edit", cred, Some(msg.chat_id), &e);
                Ok(false)
            }
        }
    }

    async fn answer_callback(&self, cred: &BotCredential, callback_id: &str) {
        if let Err(e) = self
            .bot(cred)
            .answer_callback_query(callback_id.to_string())
            .await
        {
            self.report("answer_callback", cred, None, &e);
        }
    }

    async fn register_webhook(&self, cred: &BotCredential, url: &str) -> Result<bool> {
        let url = reqwest::Url::parse(url)
            .map_err(|e| Error::InvalidInput(format!("webhook url {url:?}: {e}")))?;

        match self.bot(cred).set_webhook(url.clone()).await {
            Ok(_) => {
                tracing::info!(credential = %cred, %url, "webhook registered");
                Ok(true)
            }
            Err(e) => {
                self.report("register_webhook", cred, None, &e);
                Ok(false)
            }
        }
    }

    async fn poll(
        &self,
        cred: &BotCredential,
        offset: i64,
        limit: u8,
        timeout: Duration,
    ) -> Vec<RawUpdate> {
        let offset = i32::try_from(offset).unwrap_or(i32::MAX);
        let timeout = u32::try_from(timeout.as_secs()).unwrap_or(u32::MAX);

        match self
            .bot(cred)
            .get_updates()
            .offset(offset)
            .limit(limit)
            .timeout(timeout)
            .await
        {
            Ok(updates) => updates.iter().map(normalize::normalize).collect(),
            Err(e) => {
                self.report("poll", cred, None, &e);
                Vec::new()
            }
        }
    }
}
