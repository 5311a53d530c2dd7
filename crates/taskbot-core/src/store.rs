//! Persistence port for the delivery subsystem plus an in-memory implementation.
//!
//! The surrounding CRUD application owns the real database. The bot only needs the handful of
//! queries below; `MemoryStore` implements them over a JSON snapshot so the service can run
//! standalone and tests can run without a database.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::{
    domain::{BotCredential, ChatId, NoteEntry, NoteTopic, ReminderCandidate, Task, User},
    errors::Error,
    Result,
};

#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Tasks with `notify_at <= now`, not yet notified and not completed, across all users.
    async fn find_due_unsent_incomplete_tasks(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<ReminderCandidate>>;

    async fn mark_notification_sent(&self, task_id: &str) -> Result<()>;

    async fn find_user_by_chat_id(&self, chat_id: ChatId) -> Result<Option<User>>;

    async fn find_user(&self, user_id: &str) -> Result<Option<User>>;

    /// Newest first.
    async fn find_incomplete_tasks(&self, user_id: &str, limit: usize) -> Result<Vec<Task>>;

    async fn find_task(&self, task_id: &str) -> Result<Option<Task>>;

    /// Returns `false` when the task does not exist.
    async fn complete_task(&self, task_id: &str) -> Result<bool>;

    /// Set a new reminder time; always re-arms the reminder (`notification_sent = false`).
    async fn reschedule_task(&self, task_id: &str, notify_at: Option<DateTime<Utc>>)
        -> Result<()>;

    /// Newest first.
    async fn find_note_topics(&self, user_id: &str, limit: usize) -> Result<Vec<NoteTopic>>;

    async fn find_note_topic(&self, topic_id: &str) -> Result<Option<NoteTopic>>;

    /// Newest first; `page` is zero-based.
    async fn find_note_entries(
        &self,
        topic_id: &str,
        page: u32,
        page_size: usize,
    ) -> Result<Vec<NoteEntry>>;

    async fn count_note_entries(&self, topic_id: &str) -> Result<usize>;

    /// Distinct credentials of users that have both a bot token and a chat id.
    async fn find_polling_credentials(&self) -> Result<Vec<BotCredential>>;

    async fn update_telegram_settings(
        &self,
        user_id: &str,
        token: Option<BotCredential>,
        chat_id: Option<ChatId>,
    ) -> Result<User>;
}

/// Snapshot format of [`MemoryStore`].
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreData {
    #[serde(default)]
    pub users: Vec<User>,
    #[serde(default)]
    pub tasks: Vec<Task>,
    #[serde(default)]
    pub note_topics: Vec<NoteTopic>,
    #[serde(default)]
    pub note_entries: Vec<NoteEntry>,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    path: Option<PathBuf>,
    data: RwLock<StoreData>,
}

impl MemoryStore {
    pub fn new(data: StoreData) -> Self {
        Self {
            path: None,
            data: RwLock::new(data),
        }
    }

    /// Load the snapshot at `path` (empty store if the file is missing) and write every
    /// mutation back to it.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let data = load_snapshot(&path)?.unwrap_or_default();
        tracing::info!(
            path = %path.display(),
            users = data.users.len(),
            tasks = data.tasks.len(),
            "store loaded"
        );
        Ok(Self {
            path: Some(path),
            data: RwLock::new(data),
        })
    }

    pub async fn snapshot(&self) -> StoreData {
        self.data.read().await.clone()
    }

    pub async fn insert_user(&self, user: User) -> Result<()> {
        self.mutate(|data| {
            data.users.retain(|u| u.id != user.id);
            data.users.push(user);
            Ok(())
        })
        .await
    }

    pub async fn insert_task(&self, task: Task) -> Result<()> {
        self.mutate(|data| {
            data.tasks.retain(|t| t.id != task.id);
            data.tasks.push(task);
            Ok(())
        })
        .await
    }

    pub async fn insert_note_topic(&self, topic: NoteTopic) -> Result<()> {
        self.mutate(|data| {
            data.note_topics.retain(|t| t.id != topic.id);
            data.note_topics.push(topic);
            Ok(())
        })
        .await
    }

    pub async fn insert_note_entry(&self, entry: NoteEntry) -> Result<()> {
        self.mutate(|data| {
            data.note_entries.retain(|e| e.id != entry.id);
            data.note_entries.push(entry);
            Ok(())
        })
        .await
    }

    /// Apply `change` to a copy of the data, persist the copy, and only then make it current.
    /// A failed change or write leaves memory as it was.
    async fn mutate<T>(&self, change: impl FnOnce(&mut StoreData) -> Result<T>) -> Result<T> {
        let mut data = self.data.write().await;
        let mut next = data.clone();
        let out = change(&mut next)?;
        self.persist(&next).await?;
        *data = next;
        Ok(out)
    }

    async fn persist(&self, data: &StoreData) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let txt = serde_json::to_string_pretty(data)?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, txt).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }
}

fn load_snapshot(path: &Path) -> Result<Option<StoreData>> {
    if !path.exists() {
        return Ok(None);
    }
    let txt = std::fs::read_to_string(path)?;
    if txt.trim().is_empty() {
        return Ok(None);
    }
    let data: StoreData = serde_json::from_str(&txt)?;
    Ok(Some(data))
}

fn find_task_mut<'a>(data: &'a mut StoreData, task_id: &str) -> Result<&'a mut Task> {
    data.tasks
        .iter_mut()
        .find(|t| t.id == task_id)
        .ok_or_else(|| Error::Store(format!("task {task_id} not found")))
}

fn newest_first<T>(items: &mut [T], created_at: impl Fn(&T) -> DateTime<Utc>) {
    items.sort_by_key(|item| std::cmp::Reverse(created_at(item)));
}

#[async_trait]
impl TaskStore for MemoryStore {
    async fn find_due_unsent_incomplete_tasks(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<ReminderCandidate>> {
        let data = self.data.read().await;
        let out = data
            .tasks
            .iter()
            .filter(|t| t.is_reminder_due(now))
            .filter_map(|t| {
                let owner = data.users.iter().find(|u| u.id == t.user_id)?;
                Some(ReminderCandidate {
                    task: t.clone(),
                    owner: owner.clone(),
                })
            })
            .collect();
        Ok(out)
    }

    async fn mark_notification_sent(&self, task_id: &str) -> Result<()> {
        self.mutate(|data| {
            let task = find_task_mut(data, task_id)?;
            task.notification_sent = true;
            Ok(())
        })
        .await
    }

    async fn find_user_by_chat_id(&self, chat_id: ChatId) -> Result<Option<User>> {
        let data = self.data.read().await;
        Ok(data
            .users
            .iter()
            .find(|u| u.telegram_chat_id == Some(chat_id))
            .cloned())
    }

    async fn find_user(&self, user_id: &str) -> Result<Option<User>> {
        let data = self.data.read().await;
        Ok(data.users.iter().find(|u| u.id == user_id).cloned())
    }

    async fn find_incomplete_tasks(&self, user_id: &str, limit: usize) -> Result<Vec<Task>> {
        let data = self.data.read().await;
        let mut tasks: Vec<Task> = data
            .tasks
            .iter()
            .filter(|t| t.user_id == user_id && !t.is_completed)
            .cloned()
            .collect();
        newest_first(&mut tasks, |t| t.created_at);
        tasks.truncate(limit);
        Ok(tasks)
    }

    async fn find_task(&self, task_id: &str) -> Result<Option<Task>> {
        let data = self.data.read().await;
        Ok(data.tasks.iter().find(|t| t.id == task_id).cloned())
    }

    async fn complete_task(&self, task_id: &str) -> Result<bool> {
        if self.find_task(task_id).await?.is_none() {
            return Ok(false);
        }
        self.mutate(|data| {
            find_task_mut(data, task_id)?.is_completed = true;
            Ok(true)
        })
        .await
    }

    async fn reschedule_task(
        &self,
        task_id: &str,
        notify_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        self.mutate(|data| {
            let task = find_task_mut(data, task_id)?;
            task.notify_at = notify_at;
            task.notification_sent = false;
            Ok(())
        })
        .await
    }

    async fn find_note_topics(&self, user_id: &str, limit: usize) -> Result<Vec<NoteTopic>> {
        let data = self.data.read().await;
        let mut topics: Vec<NoteTopic> = data
            .note_topics
            .iter()
            .filter(|t| t.user_id == user_id)
            .cloned()
            .collect();
        newest_first(&mut topics, |t| t.created_at);
        topics.truncate(limit);
        Ok(topics)
    }

    async fn find_note_topic(&self, topic_id: &str) -> Result<Option<NoteTopic>> {
        let data = self.data.read().await;
        Ok(data.note_topics.iter().find(|t| t.id == topic_id).cloned())
    }

    async fn find_note_entries(
        &self,
        topic_id: &str,
        page: u32,
        page_size: usize,
    ) -> Result<Vec<NoteEntry>> {
        let data = self.data.read().await;
        let mut entries: Vec<NoteEntry> = data
            .note_entries
            .iter()
            .filter(|e| e.topic_id == topic_id)
            .cloned()
            .collect();
        newest_first(&mut entries, |e| e.created_at);
        let skip = (page as usize).saturating_mul(page_size);
        Ok(entries.into_iter().skip(skip).take(page_size).collect())
    }

    async fn count_note_entries(&self, topic_id: &str) -> Result<usize> {
        let data = self.data.read().await;
        Ok(data
            .note_entries
            .iter()
            .filter(|e| e.topic_id == topic_id)
            .count())
    }

    async fn find_polling_credentials(&self) -> Result<Vec<BotCredential>> {
        let data = self.data.read().await;
        let mut out: Vec<BotCredential> = Vec::new();
        for (cred, _) in data.users.iter().filter_map(User::delivery_target) {
            if !out.contains(&cred) {
                out.push(cred);
            }
        }
        Ok(out)
    }

    async fn update_telegram_settings(
        &self,
        user_id: &str,
        token: Option<BotCredential>,
        chat_id: Option<ChatId>,
    ) -> Result<User> {
        self.mutate(|data| {
            let user = data
                .users
                .iter_mut()
                .find(|u| u.id == user_id)
                .ok_or_else(|| Error::Store(format!("user {user_id} not found")))?;
            user.telegram_bot_token = token;
            user.telegram_chat_id = chat_id;
            Ok(user.clone())
        })
        .await
    }
}
