use std::{collections::HashMap, sync::Arc, time::Duration};

use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};

use crate::{
    domain::{BotCredential, ChatId, MessageRef},
    messaging::{
        port::BotGateway,
        types::{InlineKeyboard, Markup, MessagingCapabilities, RawUpdate},
    },
    Result,
};

#[derive(Clone, Copy, Debug)]
pub struct ThrottleConfig {
    /// Minimum spacing between *any* calls made as one bot (global flood control).
    pub per_bot_min_interval: Duration,
    /// Minimum spacing between calls to one chat (Telegram 1 msg/sec style limits).
    pub per_chat_min_interval: Duration,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            per_bot_min_interval: Duration::from_millis(40), // ~25/sec
            per_chat_min_interval: Duration::from_millis(1050), // ~0.95/sec
        }
    }
}

#[derive(Debug)]
struct IntervalLimiter {
    interval: Duration,
    next: Instant,
}

impl IntervalLimiter {
    fn new(interval: Duration) -> Self {
        Self {
            interval,
            next: Instant::now(),
        }
    }

    /// Reserve the next slot and return the wait duration required before executing.
    fn reserve(&mut self) -> Duration {
        let now = Instant::now();
        let start = if now >= self.next { now } else { self.next };
        self.next = start + self.interval;
        start.saturating_duration_since(now)
    }
}

type SharedLimiter = Arc<Mutex<IntervalLimiter>>;

/// BotGateway decorator that rate-limits outbound calls per bot and per chat.
///
/// Polling is passed straight through: it is already paced by the poll interval.
pub struct ThrottledGateway {
    inner: Arc<dyn BotGateway>,
    cfg: ThrottleConfig,
    per_bot: Mutex<HashMap<BotCredential, SharedLimiter>>,
    per_chat: Mutex<HashMap<(BotCredential, i64), SharedLimiter>>,
}

impl ThrottledGateway {
    pub fn new(inner: Arc<dyn BotGateway>, cfg: ThrottleConfig) -> Self {
        Self {
            inner,
            cfg,
            per_bot: Mutex::new(HashMap::new()),
            per_chat: Mutex::new(HashMap::new()),
        }
    }

    async fn limiter_for_bot(&self, cred: &BotCredential) -> SharedLimiter {
        let mut map = self.per_bot.lock().await;
        map.entry(cred.clone())
            .or_insert_with(|| {
                Arc::new(Mutex::new(IntervalLimiter::new(
                    self.cfg.per_bot_min_interval,
                )))
            })
            .clone()
    }

    async fn limiter_for_chat(&self, cred: &BotCredential, chat_id: i64) -> SharedLimiter {
        let mut map = self.per_chat.lock().await;
        map.entry((cred.clone(), chat_id))
            .or_insert_with(|| {
                Arc::new(Mutex::new(IntervalLimiter::new(
                    self.cfg.per_chat_min_interval,
                )))
            })
            .clone()
    }

    async fn throttle_chat(&self, cred: &BotCredential, chat_id: i64) {
        let bot_wait = {
            let lim = self.limiter_for_bot(cred).await;
            let mut guard = lim.lock().await;
            guard.reserve()
        };
        let chat_wait = {
            let lim = self.limiter_for_chat(cred, chat_id).await;
            let mut guard = lim.lock().await;
            guard.reserve()
        };

        let wait = bot_wait.max(chat_wait);
        if wait > Duration::ZERO {
            sleep(wait).await;
        }
    }

    async fn throttle_bot(&self, cred: &BotCredential) {
        let wait = {
            let lim = self.limiter_for_bot(cred).await;
            let mut guard = lim.lock().await;
            guard.reserve()
        };
        if wait > Duration::ZERO {
            sleep(wait).await;
        }
    }
}

#[async_trait::async_trait]
impl BotGateway for ThrottledGateway {
    fn capabilities(&self) -> MessagingCapabilities {
        self.inner.capabilities()
    }

    async fn send(
        &self,
        cred: &BotCredential,
        chat_id: ChatId,
        html: &str,
        markup: Option<&Markup>,
    ) -> Result<bool> {
        self.throttle_chat(cred, chat_id.0).await;
        self.inner.send(cred, chat_id, html, markup).await
    }

    async fn edit(
        &self,
        cred: &BotCredential,
        msg: MessageRef,
        html: &str,
        keyboard: Option<&InlineKeyboard>,
    ) -> Result<bool> {
        self.throttle_chat(cred, msg.chat_id.0).await;
        self.inner.edit(cred, msg, html, keyboard).await
    }

    async fn answer_callback(&self, cred: &BotCredential, callback_id: &str) {
        // No chat id available here; apply per-bot throttling only.
        self.throttle_bot(cred).await;
        self.inner.answer_callback(cred, callback_id).await
    }

    async fn register_webhook(&self, cred: &BotCredential, url: &str) -> Result<bool> {
        self.throttle_bot(cred).await;
        self.inner.register_webhook(cred, url).await
    }

    async fn poll(
        &self,
        cred: &BotCredential,
        offset: i64,
        limit: u8,
        timeout: Duration,
    ) -> Vec<RawUpdate> {
        self.inner.poll(cred, offset, limit, timeout).await
    }
}
