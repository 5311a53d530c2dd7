use std::sync::Arc;

use crate::{
    domain::{BotCredential, ChatId, User},
    errors::Error,
    menu::{Destination, MenuService},
    polling::PollingManager,
    store::TaskStore,
    Result,
};

/// Per-user Telegram settings: validation, storage, and the polling restart they imply.
pub struct SettingsService {
    store: Arc<dyn TaskStore>,
    polling: PollingManager,
    menus: Arc<MenuService>,
}

impl SettingsService {
    pub fn new(store: Arc<dyn TaskStore>, polling: PollingManager, menus: Arc<MenuService>) -> Self {
        Self {
            store,
            polling,
            menus,
        }
    }

    /// Validate and store the bot token and chat id. Blank values clear the setting.
    ///
    /// Polling is restarted when the user ends up with both settings, or had a credential before
    /// (so a replaced or removed bot stops being polled).
    pub async fn update_settings(
        &self,
        user_id: &str,
        token: Option<&str>,
        chat_id: Option<&str>,
    ) -> Result<User> {
        let token = parse_token(token)?;
        let chat_id = parse_chat_id(chat_id)?;

        let previous = self
            .store
            .find_user(user_id)
            .await?
            .ok_or_else(|| Error::InvalidInput(format!("user {user_id} not found")))?;

        let updated = self
            .store
            .update_telegram_settings(user_id, token, chat_id)
            .await?;
        let fingerprint = updated
            .telegram_bot_token
            .as_ref()
            .map(BotCredential::fingerprint)
            .unwrap_or_else(|| "-".to_string());
        tracing::info!(user_id, credential = %fingerprint, "telegram settings updated");

        if updated.delivery_target().is_some() || previous.telegram_bot_token.is_some() {
            if let Err(e) = self.polling.restart_polling().await {
                tracing::warn!(user_id, "polling restart after settings update failed: {e}");
            }
        }
        Ok(updated)
    }

    /// Send a connection-check message to the user's chat. `Ok(false)` if it was not delivered.
    pub async fn test_connection(&self, user_id: &str) -> Result<bool> {
        let user = self
            .store
            .find_user(user_id)
            .await?
            .ok_or_else(|| Error::InvalidInput(format!("user {user_id} not found")))?;
        let (cred, chat_id) = user.delivery_target().ok_or_else(|| {
            Error::InvalidInput("bot token and chat id must both be set".to_string())
        })?;

        self.menus
            .send_connection_check(&Destination::new(cred, chat_id), &user)
            .await
    }
}

fn parse_token(raw: Option<&str>) -> Result<Option<BotCredential>> {
    let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
        return Ok(None);
    };
    let cred = BotCredential::new(raw);
    if !cred.is_well_formed() {
        return Err(Error::InvalidInput(
            "bot token must look like <bot id>:<secret>".to_string(),
        ));
    }
    Ok(Some(cred))
}

fn parse_chat_id(raw: Option<&str>) -> Result<Option<ChatId>> {
    let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
        return Ok(None);
    };
    raw.parse::<i64>()
        .map(|id| Some(ChatId(id)))
        .map_err(|_| Error::InvalidInput(format!("chat id {raw:?} is not numeric")))
}
