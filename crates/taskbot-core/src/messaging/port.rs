use std::time::Duration;

use async_trait::async_trait;

use crate::{
    domain::{BotCredential, ChatId, MessageRef},
    messaging::types::{InlineKeyboard, Markup, MessagingCapabilities, RawUpdate},
    Result,
};

/// Outbound/inbound port to the bot messaging provider.
///
/// Every call names the bot credential it acts as, so one gateway serves all configured bots.
/// Delivery is best-effort: transport and provider failures are logged by the implementation
/// and surface as `Ok(false)` (or an empty batch for `poll`). `Err` is reserved for malformed
/// local input such as an unparseable button URL.
#[async_trait]
pub trait BotGateway: Send + Sync {
    fn capabilities(&self) -> MessagingCapabilities;

    async fn send(
        &self,
        cred: &BotCredential,
        chat_id: ChatId,
        html: &str,
        markup: Option<&Markup>,
    ) -> Result<bool>;

    async fn edit(
        &self,
        cred: &BotCredential,
        msg: MessageRef,
        html: &str,
        keyboard: Option<&InlineKeyboard>,
    ) -> Result<bool>;

    /// Clears the button's loading indicator. Failures are logged and swallowed.
    async fn answer_callback(&self, cred: &BotCredential, callback_id: &str);

    async fn register_webhook(&self, cred: &BotCredential, url: &str) -> Result<bool>;

    /// One long-poll fetch starting at `offset`.
    async fn poll(
        &self,
        cred: &BotCredential,
        offset: i64,
        limit: u8,
        timeout: Duration,
    ) -> Vec<RawUpdate>;
}
