//! Inbound HTTP routes. The binary nests them under `/api/telegram`.

use std::{sync::Arc, time::Instant};

use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::{json, Value};

use taskbot_core::{
    audit::{AuditEvent, AuditLogger, FailureKind},
    dispatcher::UpdateDispatcher,
    domain::{BotCredential, ChatId},
    menu::MENU_TASKS,
    messaging::port::BotGateway,
    polling::PollingManager,
    settings::SettingsService,
};

use crate::normalize::parse_webhook;

#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<dyn BotGateway>,
    pub dispatcher: Arc<UpdateDispatcher>,
    pub polling: PollingManager,
    pub settings: Arc<SettingsService>,
    pub audit: Arc<AuditLogger>,
    /// Public URL registered by `/setup-webhook`.
    pub webhook_url: String,
    pub started: Instant,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/webhook", post(webhook))
        .route("/setup-webhook", post(setup_webhook))
        .route("/test-message", post(test_message))
        .route("/settings", post(update_settings))
        .route("/test-connection", post(test_connection))
        .route("/health", get(health))
        .with_state(state)
}

type JsonReply = (StatusCode, Json<Value>);

fn reply(status: StatusCode, body: Value) -> JsonReply {
    (status, Json(body))
}

fn bad_request(msg: impl Into<String>) -> JsonReply {
    reply(
        StatusCode::BAD_REQUEST,
        json!({ "ok": false, "error": msg.into() }),
    )
}

/// Always answers 200 so the provider does not redeliver updates we cannot handle.
async fn webhook(State(state): State<AppState>, body: Bytes) -> JsonReply {
    match parse_webhook(&body) {
        Ok(raw) => {
            let outcome = state.dispatcher.dispatch_raw(&raw).await;
            tracing::debug!(update_id = raw.id, outcome = outcome.as_str(), "webhook update");
        }
        Err(e) => state.audit.record(AuditEvent::new(
            FailureKind::MalformedUpdate,
            "webhook",
            format!("unparseable update: {e}"),
        )),
    }
    reply(StatusCode::OK, json!({ "ok": true }))
}

#[derive(Debug, Deserialize)]
struct SetupWebhookRequest {
    #[serde(default, alias = "botToken")]
    credential: Option<String>,
}

async fn setup_webhook(State(state): State<AppState>, body: Bytes) -> JsonReply {
    let req: SetupWebhookRequest = match serde_json::from_slice(&body) {
        Ok(r) => r,
        Err(e) => return bad_request(format!("invalid body: {e}")),
    };
    let Some(cred) = req
        .credential
        .map(BotCredential::new)
        .filter(|c| !c.expose().is_empty())
    else {
        return bad_request("credential is required");
    };

    match state.gateway.register_webhook(&cred, &state.webhook_url).await {
        Ok(true) => reply(
            StatusCode::OK,
            json!({ "ok": true, "url": state.webhook_url }),
        ),
        Ok(false) => bad_request("webhook registration failed"),
        Err(e) => bad_request(e.to_string()),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TestMessageRequest {
    #[serde(default)]
    chat_id: Value,
    #[serde(default)]
    command: Option<String>,
}

fn parse_chat_id(v: &Value) -> Option<ChatId> {
    match v {
        Value::Number(n) => n.as_i64().map(ChatId),
        Value::String(s) => s.trim().parse::<i64>().ok().map(ChatId),
        _ => None,
    }
}

/// Synthesize a text update, as if the chat had typed `command` (default: the task list).
async fn test_message(State(state): State<AppState>, body: Bytes) -> JsonReply {
    let req: TestMessageRequest = match serde_json::from_slice(&body) {
        Ok(r) => r,
        Err(e) => return bad_request(format!("invalid body: {e}")),
    };
    let Some(chat_id) = parse_chat_id(&req.chat_id) else {
        return bad_request("chatId must be numeric");
    };

    let command = req
        .command
        .filter(|c| !c.trim().is_empty())
        .unwrap_or_else(|| MENU_TASKS.to_string());
    let update = UpdateDispatcher::synthesize_text(chat_id, command);
    let outcome = state.dispatcher.dispatch(&update).await;

    reply(
        StatusCode::OK,
        json!({ "ok": true, "outcome": outcome.as_str() }),
    )
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SettingsRequest {
    user_id: String,
    #[serde(default)]
    bot_token: Option<String>,
    #[serde(default)]
    chat_id: Option<Value>,
}

fn settings_error(e: taskbot_core::Error) -> JsonReply {
    match e {
        taskbot_core::Error::InvalidInput(msg) => bad_request(msg),
        other => {
            tracing::error!("settings request failed: {other}");
            reply(
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({ "ok": false, "error": "internal error" }),
            )
        }
    }
}

async fn update_settings(State(state): State<AppState>, body: Bytes) -> JsonReply {
    let req: SettingsRequest = match serde_json::from_slice(&body) {
        Ok(r) => r,
        Err(e) => return bad_request(format!("invalid body: {e}")),
    };
    // Clients send the chat id either as a number or as a string.
    let chat_id = req.chat_id.and_then(|v| match v {
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) => Some(s),
        _ => None,
    });

    match state
        .settings
        .update_settings(&req.user_id, req.bot_token.as_deref(), chat_id.as_deref())
        .await
    {
        Ok(user) => reply(
            StatusCode::OK,
            json!({
                "ok": true,
                "connected": user.delivery_target().is_some(),
                "chatId": user.telegram_chat_id.map(|c| c.0),
            }),
        ),
        Err(e) => settings_error(e),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConnectionRequest {
    user_id: String,
}

async fn test_connection(State(state): State<AppState>, body: Bytes) -> JsonReply {
    let req: ConnectionRequest = match serde_json::from_slice(&body) {
        Ok(r) => r,
        Err(e) => return bad_request(format!("invalid body: {e}")),
    };
    match state.settings.test_connection(&req.user_id).await {
        Ok(true) => reply(StatusCode::OK, json!({ "ok": true })),
        Ok(false) => reply(
            StatusCode::BAD_GATEWAY,
            json!({ "ok": false, "error": "message was not delivered" }),
        ),
        Err(e) => settings_error(e),
    }
}

async fn health(State(state): State<AppState>) -> JsonReply {
    let failures: serde_json::Map<String, Value> = state
        .audit
        .snapshot()
        .into_iter()
        .map(|(k, v)| (k.as_str().to_string(), json!(v)))
        .collect();

    reply(
        StatusCode::OK,
        json!({
            "status": "ok",
            "version": env!("CARGO_PKG_VERSION"),
            "uptime_secs": state.started.elapsed().as_secs(),
            "polling_loops": state.polling.active_count().await,
            "failures": failures,
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{sync::Mutex, time::Duration};

    use async_trait::async_trait;
    use axum::{body::Body, http::Request};
    use tower::ServiceExt;

    use taskbot_core::{
        domain::{MessageRef, User},
        menu::{MenuConfig, MenuService},
        messaging::types::{InlineKeyboard, Markup, MessagingCapabilities, RawUpdate},
        polling::PollingConfig,
        store::MemoryStore,
        Result,
    };

    #[derive(Default)]
    struct RecordingGateway {
        sent: Mutex<Vec<(i64, String)>>,
        webhooks: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl BotGateway for RecordingGateway {
        fn capabilities(&self) -> MessagingCapabilities {
            MessagingCapabilities {
                    supports_edit: true,
                max_message_len: 4096,
            }
        }

        async fn send(
            &self,
            _cred: &BotCredential,
            chat_id: ChatId,
            html: &str,
            _markup: Option<&Markup>,
        ) -> Result<bool> {
            self.sent.lock().unwrap().push((chat_id.0, html.to_string()));
            Ok(true)
        }

        async fn edit(
            &self,
            _cred: &BotCredential,
            _msg: MessageRef,
            _html: &str,
            _keyboard: Option<&InlineKeyboard>,
        ) -> Result<bool> {
            Ok(true)
        }

        async fn answer_callback(&self, _cred: &BotCredential, _callback_id: &str) {}

        async fn register_webhook(&self, _cred: &BotCredential, url: &str) -> Result<bool> {
            self.webhooks.lock().unwrap().push(url.to_string());
            Ok(true)
        }

        async fn poll(
            &self,
            _cred: &BotCredential,
            _offset: i64,
            _limit: u8,
            _timeout: Duration,
        ) -> Vec<RawUpdate> {
            Vec::new()
        }
    }

    async fn app() -> (Router, Arc<RecordingGateway>, Arc<AuditLogger>) {
        let store = Arc::new(MemoryStore::default());
        store
            .insert_user(User {
                id: "u1".to_string(),
                name: "Sam".to_string(),
                telegram_bot_token: Some(BotCredential::new("100:token")),
                telegram_chat_id: Some(ChatId(7)),
            })
            .await
            .unwrap();
        let gw = Arc::new(RecordingGateway::default());
        let audit = Arc::new(AuditLogger::in_memory());
        let menus = Arc::new(MenuService::new(
            store.clone(),
            gw.clone(),
            MenuConfig::default(),
        ));
        let dispatcher = Arc::new(UpdateDispatcher::new(
            store.clone(),
            gw.clone(),
            menus.clone(),
            audit.clone(),
        ));
        let polling = PollingManager::new(
            PollingConfig {
                interval: Duration::from_secs(3600),
                ..PollingConfig::default()
            },
            store.clone(),
            gw.clone(),
            dispatcher.clone(),
            audit.clone(),
        );
        let settings = Arc::new(SettingsService::new(store, polling.clone(), menus));
        let state = AppState {
            gateway: gw.clone(),
            dispatcher,
            polling,
            settings,
            audit: audit.clone(),
            webhook_url: "https://bot.example.com/api/telegram/webhook".to_string(),
            started: Instant::now(),
        };
        (build_router(state), gw, audit)
    }

    fn post_json(uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json(resp: axum::response::Response) -> Value {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn webhook_dispatches_text_updates() {
        let (app, gw, _) = app().await;
        let body = r#"{"update_id":3,"message":{"message_id":1,"date":1700000000,
            "chat":{"id":7,"type":"private","first_name":"Sam"},"text":"/start"}}"#;

        let resp = app.oneshot(post_json("/webhook", body)).await.unwrap();

        assert_eq!(resp.status(), StatusCode::OK);
        let sent = gw.sent.lock().unwrap().clone();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, 7);
        assert!(sent[0].1.contains("Hello Sam"));
    }

    #[tokio::test]
    async fn malformed_webhook_still_gets_200() {
        let (app, gw, audit) = app().await;
        let resp = app.oneshot(post_json("/webhook", "{oops")).await.unwrap();

        assert_eq!(resp.status(), StatusCode::OK);
        assert!(gw.sent.lock().unwrap().is_empty());
        assert_eq!(audit.count(FailureKind::MalformedUpdate), 1);
    }

    #[tokio::test]
    async fn setup_webhook_requires_credential() {
        let (app, gw, _) = app().await;
        let resp = app
            .clone()
            .oneshot(post_json("/setup-webhook", "{}"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let resp = app
            .oneshot(post_json("/setup-webhook", r#"{"botToken":"100:token"}"#))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            gw.webhooks.lock().unwrap().clone(),
            vec!["https://bot.example.com/api/telegram/webhook".to_string()]
        );
    }

    #[tokio::test]
    async fn test_message_accepts_string_chat_id() {
        let (app, gw, _) = app().await;
        let resp = app
            .clone()
            .oneshot(post_json("/test-message", r#"{"chatId":"7"}"#))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await["outcome"], "rendered");
        assert!(gw.sent.lock().unwrap()[0].1.contains("Your tasks"));

        let resp = app
            .oneshot(post_json("/test-message", r#"{"chatId":"abc"}"#))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn settings_update_validates_and_reports_connection() {
        let (app, gw, _) = app().await;
        let resp = app
            .clone()
            .oneshot(post_json(
                "/settings",
                r#"{"userId":"u1","botToken":"nocolon","chatId":7}"#,
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let resp = app
            .clone()
            .oneshot(post_json(
                "/settings",
                r#"{"userId":"u1","botToken":"100:token","chatId":"8"}"#,
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp).await;
        assert_eq!(body["connected"], true);
        assert_eq!(body["chatId"], 8);

        let resp = app
            .oneshot(post_json("/test-connection", r#"{"userId":"u1"}"#))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(gw.sent.lock().unwrap().last().unwrap().0, 8);
    }

    #[tokio::test]
    async fn health_reports_polling_loops() {
        let (app, _, _) = app().await;
        let resp = app
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["polling_loops"], 0);
    }
}
