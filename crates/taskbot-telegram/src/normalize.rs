//! Bot API updates -> provider-neutral `RawUpdate`, shared by webhook pushes and polling.

use teloxide::types::{Update as TgUpdate, UpdateKind};

use taskbot_core::{
    domain::{ChatId, MessageId, MessageRef},
    messaging::types::{CallbackQuery, RawUpdate, TextMessage, Update},
};

/// Normalize one update. Shapes the bot does not handle keep their id with `update: None`.
pub fn normalize(update: &TgUpdate) -> RawUpdate {
    let normalized = match &update.kind {
        UpdateKind::Message(msg) => msg.text().map(|text| {
            Update::Text(TextMessage {
                chat_id: ChatId(msg.chat.id.0),
                text: text.to_string(),
            })
        }),
        UpdateKind::CallbackQuery(q) => q.data.as_ref().map(|data| {
            let message = q.message.as_ref().map(|m| MessageRef {
                chat_id: ChatId(m.chat.id.0),
                message_id: MessageId(m.id.0),
            });
            // Without the message, the private chat id equals the sender's user id.
            let chat_id = message
                .map(|m| m.chat_id)
                .unwrap_or(ChatId(q.from.id.0 as i64));
            Update::Callback(CallbackQuery {
                chat_id,
                callback_id: q.id.clone(),
                message,
                data: data.clone(),
            })
        }),
        _ => None,
    };

    RawUpdate {
        id: i64::from(update.id),
        update: normalized,
    }
}

/// Parse a webhook body. `Err` carries the parse error for the audit log.
pub fn parse_webhook(body: &[u8]) -> Result<RawUpdate, serde_json::Error> {
    let update: TgUpdate = serde_json::from_slice(body)?;
    Ok(normalize(&update))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_message_becomes_text_update() {
        let body = br#"{
            "update_id": 10,
            "message": {
                "message_id": 1,
                "date": 1700000000,
                "chat": {"id": 7, "type": "private", "first_name": "Sam"},
                "from": {"id": 7, "is_bot": false, "first_name": "Sam"},
                "text": "/start"
            }
        }"#;
        let raw = parse_webhook(body).unwrap();
        assert_eq!(raw.id, 10);
        assert_eq!(
            raw.update,
            Some(Update::Text(TextMessage {
                chat_id: ChatId(7),
                text: "/start".to_string()
            }))
        );
    }

    #[test]
    fn callback_query_keeps_message_ref() {
        let body = br#"{
            "update_id": 11,
            "callback_query": {
                "id": "cb-9",
                "from": {"id": 7, "is_bot": false, "first_name": "Sam"},
                "chat_instance": "42",
                "data": "view_topic_n1_2",
                "message": {
                    "message_id": 55,
                    "date": 1700000000,
                    "chat": {"id": 7, "type": "private", "first_name": "Sam"},
                    "text": "menu"
                }
            }
        }"#;
        let raw = parse_webhook(body).unwrap();
        match raw.update {
            Some(Update::Callback(cb)) => {
                assert_eq!(cb.chat_id, ChatId(7));
                assert_eq!(cb.callback_id, "cb-9");
                assert_eq!(cb.data, "view_topic_n1_2");
                assert_eq!(cb.message.map(|m| m.message_id), Some(MessageId(55)));
            }
            other => panic!("unexpected update {other:?}"),
        }
    }

    #[test]
    fn garbage_is_an_error() {
        assert!(parse_webhook(b"{not json").is_err());
    }
}
