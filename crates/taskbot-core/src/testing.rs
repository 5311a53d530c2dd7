//! Test doubles shared by the core unit tests.

use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
        Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};

use crate::{
    domain::{
        BotCredential, ChatId, MessageRef, NoteEntry, NoteTopic, Priority, ReminderCandidate,
        Task, User,
    },
    messaging::{
        port::BotGateway,
        types::{InlineKeyboard, Markup, MessagingCapabilities, RawUpdate},
    },
    store::{MemoryStore, TaskStore},
    Result,
};

pub const TEST_TOKEN: &str = "100:test-token";

pub fn cred() -> BotCredential {
    BotCredential::new(TEST_TOKEN)
}

pub fn user(id: &str, chat: Option<i64>) -> User {
    User {
        id: id.to_string(),
        name: format!("User {id}"),
        telegram_bot_token: Some(cred()),
        telegram_chat_id: chat.map(ChatId),
    }
}

pub fn task(id: &str, user_id: &str) -> Task {
    Task {
        id: id.to_string(),
        user_id: user_id.to_string(),
        title: format!("Task {id}"),
        description: None,
        due_date: None,
        notify_at: None,
        notification_sent: false,
        is_completed: false,
        priority: Priority::Medium,
        created_at: Utc::now(),
    }
}

pub fn topic(id: &str, user_id: &str, name: &str) -> NoteTopic {
    NoteTopic {
        id: id.to_string(),
        user_id: user_id.to_string(),
        topic: name.to_string(),
        created_at: Utc::now(),
    }
}

/// Entry whose `created_at` grows with `minute`, so higher numbers sort first.
pub fn entry(id: &str, topic_id: &str, minute: i64) -> NoteEntry {
    NoteEntry {
        id: id.to_string(),
        topic_id: topic_id.to_string(),
        content: format!("Entry {id}"),
        created_at: base_time() + chrono::Duration::minutes(minute),
    }
}

pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 1, 8, 0, 0).unwrap()
}

#[derive(Clone, Debug)]
pub struct SentMessage {
    pub cred: BotCredential,
    pub chat_id: ChatId,
    pub text: String,
    pub markup: Option<Markup>,
}

#[derive(Clone, Debug)]
pub struct EditedMessage {
    pub msg: MessageRef,
    pub text: String,
    pub keyboard: Option<InlineKeyboard>,
}

/// Recording gateway with scripted poll batches and switchable failures.
pub struct FakeGateway {
    max_len: usize,
    fail_sends: AtomicBool,
    fail_edits: AtomicBool,
    send_delay_ms: AtomicU64,
    sends_in_flight: AtomicUsize,
    max_sends_in_flight: AtomicUsize,
    sent: Mutex<Vec<SentMessage>>,
    edited: Mutex<Vec<EditedMessage>>,
    answered: Mutex<Vec<String>>,
    batches: Mutex<VecDeque<Vec<RawUpdate>>>,
    poll_offsets: Mutex<Vec<i64>>,
}

impl Default for FakeGateway {
    fn default() -> Self {
        Self::with_max_len(4096)
    }
}

impl FakeGateway {
    pub fn with_max_len(max_len: usize) -> Self {
        Self {
            max_len,
            fail_sends: AtomicBool::new(false),
            fail_edits: AtomicBool::new(false),
            send_delay_ms: AtomicU64::new(0),
            sends_in_flight: AtomicUsize::new(0),
            max_sends_in_flight: AtomicUsize::new(0),
            sent: Mutex::new(Vec::new()),
            edited: Mutex::new(Vec::new()),
            answered: Mutex::new(Vec::new()),
            batches: Mutex::new(VecDeque::new()),
            poll_offsets: Mutex::new(Vec::new()),
        }
    }

    pub fn fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    pub fn fail_edits(&self, fail: bool) {
        self.fail_edits.store(fail, Ordering::SeqCst);
    }

    /// Every send sleeps this long before it is recorded.
    pub fn set_send_delay(&self, delay: Duration) {
        self.send_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Highest number of sends that were in progress at the same time.
    pub fn max_concurrent_sends(&self) -> usize {
        self.max_sends_in_flight.load(Ordering::SeqCst)
    }

    pub fn push_batch(&self, batch: Vec<RawUpdate>) {
        self.batches.lock().unwrap().push_back(batch);
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().unwrap().clone()
    }

    pub fn edited(&self) -> Vec<EditedMessage> {
        self.edited.lock().unwrap().clone()
    }

    pub fn answered(&self) -> Vec<String> {
        self.answered.lock().unwrap().clone()
    }

    pub fn poll_offsets(&self) -> Vec<i64> {
        self.poll_offsets.lock().unwrap().clone()
    }
}

#[async_trait]
impl BotGateway for FakeGateway {
    fn capabilities(&self) -> MessagingCapabilities {
        MessagingCapabilities {
            supports_edit: true,
            max_message_len: self.max_len,
        }
    }

    async fn send(
        &self,
        cred: &BotCredential,
        chat_id: ChatId,
        html: &str,
        markup: Option<&Markup>,
    ) -> Result<bool> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Ok(false);
        }
        let delay = self.send_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            let now = self.sends_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_sends_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(delay)).await;
            self.sends_in_flight.fetch_sub(1, Ordering::SeqCst);
        }
        self.sent.lock().unwrap().push(SentMessage {
            cred: cred.clone(),
            chat_id,
            text: html.to_string(),
            markup: markup.cloned(),
        });
        Ok(true)
    }

    async fn edit(
        &self,
        _cred: &BotCredential,
        msg: MessageRef,
        html: &str,
        keyboard: Option<&InlineKeyboard>,
    ) -> Result<bool> {
        if self.fail_edits.load(Ordering::SeqCst) {
            return Ok(false);
        }
        self.edited.lock().unwrap().push(EditedMessage {
            msg,
            text: html.to_string(),
            keyboard: keyboard.cloned(),
        });
        Ok(true)
    }

    async fn answer_callback(&self, _cred: &BotCredential, callback_id: &str) {
        self.answered.lock().unwrap().push(callback_id.to_string());
    }

    async fn register_webhook(&self, _cred: &BotCredential, _url: &str) -> Result<bool> {
        Ok(true)
    }

    async fn poll(
        &self,
        _cred: &BotCredential,
        offset: i64,
        _limit: u8,
        _timeout: Duration,
    ) -> Vec<RawUpdate> {
        self.poll_offsets.lock().unwrap().push(offset);
        self.batches.lock().unwrap().pop_front().unwrap_or_default()
    }
}

/// `MemoryStore` wrapper that records mutating calls and can fail `mark_notification_sent`.
#[derive(Default)]
pub struct RecordingStore {
    pub inner: MemoryStore,
    calls: Mutex<Vec<String>>,
    fail_mark_sent: AtomicBool,
}

impl RecordingStore {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn fail_mark_sent(&self, fail: bool) {
        self.fail_mark_sent.store(fail, Ordering::SeqCst);
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl TaskStore for RecordingStore {
    async fn find_due_unsent_incomplete_tasks(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<ReminderCandidate>> {
        self.inner.find_due_unsent_incomplete_tasks(now).await
    }

    async fn mark_notification_sent(&self, task_id: &str) -> Result<()> {
        self.record(format!("mark_notification_sent:{task_id}"));
        if self.fail_mark_sent.load(Ordering::SeqCst) {
            return Err(crate::Error::Store("write refused".to_string()));
        }
        self.inner.mark_notification_sent(task_id).await
    }

    async fn find_user_by_chat_id(&self, chat_id: ChatId) -> Result<Option<User>> {
        self.inner.find_user_by_chat_id(chat_id).await
    }

    async fn find_user(&self, user_id: &str) -> Result<Option<User>> {
        self.inner.find_user(user_id).await
    }

    async fn find_incomplete_tasks(&self, user_id: &str, limit: usize) -> Result<Vec<Task>> {
        self.inner.find_incomplete_tasks(user_id, limit).await
    }

    async fn find_task(&self, task_id: &str) -> Result<Option<Task>> {
        self.inner.find_task(task_id).await
    }

    async fn complete_task(&self, task_id: &str) -> Result<bool> {
        self.record(format!("complete_task:{task_id}"));
        self.inner.complete_task(task_id).await
    }

    async fn reschedule_task(
        &self,
        task_id: &str,
        notify_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        self.record(format!("reschedule_task:{task_id}"));
        self.inner.reschedule_task(task_id, notify_at).await
    }

    async fn find_note_topics(&self, user_id: &str, limit: usize) -> Result<Vec<NoteTopic>> {
        self.inner.find_note_topics(user_id, limit).await
    }

    async fn find_note_topic(&self, topic_id: &str) -> Result<Option<NoteTopic>> {
        self.inner.find_note_topic(topic_id).await
    }

    async fn find_note_entries(
        &self,
        topic_id: &str,
        page: u32,
        page_size: usize,
    ) -> Result<Vec<NoteEntry>> {
        self.inner.find_note_entries(topic_id, page, page_size).await
    }

    async fn count_note_entries(&self, topic_id: &str) -> Result<usize> {
        self.inner.count_note_entries(topic_id).await
    }

    async fn find_polling_credentials(&self) -> Result<Vec<BotCredential>> {
        self.inner.find_polling_credentials().await
    }

    async fn update_telegram_settings(
        &self,
        user_id: &str,
        token: Option<BotCredential>,
        chat_id: Option<ChatId>,
    ) -> Result<User> {
        self.record(format!("update_telegram_settings:{user_id}"));
        self.inner
            .update_telegram_settings(user_id, token, chat_id)
            .await
    }
}
