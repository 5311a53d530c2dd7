//! Routes inbound updates to menu screens.
//!
//! Stateless between updates: the acting user is re-resolved from the chat id every time and all
//! navigation state comes from the callback token. Failures are audited and never escape, so one
//! bad update cannot abort the batch it arrived in.

use std::sync::Arc;

use crate::{
    audit::{AuditEvent, AuditLogger, FailureKind},
    callback::CallbackAction,
    domain::{BotCredential, ChatId, User},
    errors::Error,
    menu::{Destination, MenuService, MENU_NOTES, MENU_TASKS},
    messaging::{
        port::BotGateway,
        types::{CallbackQuery, RawUpdate, TextMessage, Update},
    },
    store::TaskStore,
    Result,
};

/// Literal texts the bot reacts to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TextCommand {
    Start,
    Tasks,
    Notes,
}

impl TextCommand {
    pub fn parse(text: &str) -> Option<Self> {
        match text.trim() {
            "/start" => Some(TextCommand::Start),
            MENU_TASKS | "/tasks" => Some(TextCommand::Tasks),
            MENU_NOTES | "/notes" => Some(TextCommand::Notes),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// A screen was delivered.
    Rendered,
    /// Nothing to do (unrecognized text or unknown token).
    Ignored,
    /// No user or no credential for the chat; nothing can be sent back.
    Dropped,
    /// Rendering or delivery failed; already audited.
    Failed,
}

impl DispatchOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            DispatchOutcome::Rendered => "rendered",
            DispatchOutcome::Ignored => "ignored",
            DispatchOutcome::Dropped => "dropped",
            DispatchOutcome::Failed => "failed",
        }
    }
}

pub struct UpdateDispatcher {
    store: Arc<dyn TaskStore>,
    gateway: Arc<dyn BotGateway>,
    menus: Arc<MenuService>,
    audit: Arc<AuditLogger>,
}

impl UpdateDispatcher {
    pub fn new(
        store: Arc<dyn TaskStore>,
        gateway: Arc<dyn BotGateway>,
        menus: Arc<MenuService>,
        audit: Arc<AuditLogger>,
    ) -> Self {
        Self {
            store,
            gateway,
            menus,
            audit,
        }
    }

    /// Fake text update, as if the chat had typed `text`.
    pub fn synthesize_text(chat_id: ChatId, text: impl Into<String>) -> Update {
        Update::Text(TextMessage {
            chat_id,
            text: text.into(),
        })
    }

    pub async fn dispatch_raw(&self, raw: &RawUpdate) -> DispatchOutcome {
        match &raw.update {
            Some(update) => self.dispatch(update).await,
            None => {
                tracing::debug!(update_id = raw.id, "ignoring unsupported update shape");
                DispatchOutcome::Ignored
            }
        }
    }

    pub async fn dispatch(&self, update: &Update) -> DispatchOutcome {
        match update {
            Update::Text(msg) => self.on_text(msg).await,
            Update::Callback(cb) => self.on_callback(cb).await,
        }
    }

    async fn on_text(&self, msg: &TextMessage) -> DispatchOutcome {
        let Some(command) = TextCommand::parse(&msg.text) else {
            return DispatchOutcome::Ignored;
        };
        let Some((user, cred)) = self.resolve(msg.chat_id, "text").await else {
            return DispatchOutcome::Dropped;
        };

        tracing::debug!(chat_id = %msg.chat_id, ?command, "text command");
        let dest = Destination::new(cred, msg.chat_id);
        let result = match command {
            TextCommand::Start => self.menus.show_welcome(&dest, &user).await,
            TextCommand::Tasks => self.menus.show_tasks(&dest, &user).await,
            TextCommand::Notes => self.menus.show_topics(&dest, &user).await,
        };
        self.settle(result, &dest, "text").await
    }

    async fn on_callback(&self, cb: &CallbackQuery) -> DispatchOutcome {
        let Some((user, cred)) = self.resolve(cb.chat_id, "callback").await else {
            return DispatchOutcome::Dropped;
        };

        let action = CallbackAction::parse(&cb.data);
        tracing::debug!(chat_id = %cb.chat_id, ?action, "callback");
        let dest = Destination::new(cred.clone(), cb.chat_id).editing(cb.message);

        let result = match &action {
            CallbackAction::CompleteTask(id) => self.menus.complete_task(&dest, &user, id).await,
            CallbackAction::ViewTask(id) => self.menus.show_task(&dest, &user, id).await,
            CallbackAction::BackToTasks => self.menus.show_tasks(&dest, &user).await,
            CallbackAction::ViewNotes | CallbackAction::BackToNotes => {
                self.menus.show_topics(&dest, &user).await
            }
            CallbackAction::ViewTopic { topic_id, page } => {
                self.menus.show_topic(&dest, &user, topic_id, *page).await
            }
            CallbackAction::Unknown(raw) => {
                self.audit.record(
                    AuditEvent::new(
                        FailureKind::UnknownToken,
                        "callback",
                        format!("unknown callback token {raw:?}"),
                    )
                    .credential(&cred)
                    .chat(cb.chat_id),
                );
                self.gateway.answer_callback(&cred, &cb.callback_id).await;
                return DispatchOutcome::Ignored;
            }
        };

        let outcome = self.settle(result, &dest, "callback").await;
        self.gateway.answer_callback(&cred, &cb.callback_id).await;
        outcome
    }

    /// Acting user and the credential to reply with.
    async fn resolve(&self, chat_id: ChatId, op: &str) -> Option<(User, BotCredential)> {
        let user = match self.store.find_user_by_chat_id(chat_id).await {
            Ok(Some(user)) => user,
            Ok(None) => {
                self.audit.record(
                    AuditEvent::new(FailureKind::LookupMiss, op, "no user for chat").chat(chat_id),
                );
                return None;
            }
            Err(e) => {
                self.audit.record(
                    AuditEvent::new(FailureKind::Store, op, format!("user lookup failed: {e}"))
                        .chat(chat_id),
                );
                return None;
            }
        };

        match user.telegram_bot_token.clone() {
            Some(cred) => Some((user, cred)),
            None => {
                self.audit.record(
                    AuditEvent::new(FailureKind::LookupMiss, op, "user has no bot credential")
                        .chat(chat_id),
                );
                None
            }
        }
    }

    async fn settle(&self, result: Result<bool>, dest: &Destination, op: &str) -> DispatchOutcome {
        match result {
            Ok(true) => DispatchOutcome::Rendered,
            // The gateway already audited the delivery failure.
            Ok(false) => DispatchOutcome::Failed,
            Err(e) => {
                let kind = match e {
                    Error::Store(_) => FailureKind::Store,
                    _ => FailureKind::Render,
                };
                self.audit.record(
                    AuditEvent::new(kind, op, e.to_string())
                        .credential(&dest.cred)
                        .chat(dest.chat_id),
                );
                if let Err(e) = self.menus.report_failure(dest).await {
                    tracing::warn!(chat_id = %dest.chat_id, "failed to send error notice: {e}");
                }
                DispatchOutcome::Failed
            }
        }
    }
}
