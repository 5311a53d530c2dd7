//! Menu screens: text + keyboard for every navigation state, and their delivery.
//!
//! Rendering is pure ([`Renderer`]); [`MenuService`] loads the data, renders, and delivers,
//! editing the source message in place when a callback triggered the navigation.

use std::sync::Arc;

use chrono::{FixedOffset, Offset, Utc};

use crate::{
    callback::CallbackAction,
    domain::{BotCredential, ChatId, MessageRef, NoteEntry, NoteTopic, Task, User},
    formatting::{escape_html_capped, format_date, format_datetime, split_message},
    messaging::{
        port::BotGateway,
        types::{InlineButton, InlineKeyboard, Markup, ReplyKeyboard},
    },
    store::TaskStore,
    utils::truncate_text,
    Result,
};

/// Reply-keyboard label that opens the task list.
pub const MENU_TASKS: &str = "📋 My tasks";
/// Reply-keyboard label that opens the note topics.
pub const MENU_NOTES: &str = "📝 Notes";

const WEBSITE_LABEL: &str = "🌐 Open website";
const BACK_LABEL: &str = "🔙 Back";
const DONE_LABEL: &str = "✅ Done";

#[derive(Clone, Debug)]
pub struct MenuConfig {
    pub website_url: String,
    pub task_list_limit: usize,
    pub topic_list_limit: usize,
    pub note_page_size: usize,
    /// Button titles longer than this get cut and suffixed with `...`.
    pub title_max_chars: usize,
    pub message_limit: usize,
    /// Offset used for every rendered date.
    pub offset: FixedOffset,
}

impl Default for MenuConfig {
    fn default() -> Self {
        Self {
            website_url: "http://localhost:9002".to_string(),
            task_list_limit: 20,
            topic_list_limit: 20,
            note_page_size: 5,
            title_max_chars: 25,
            message_limit: 4096,
            offset: Utc.fix(),
        }
    }
}

/// A rendered screen.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Screen {
    pub text: String,
    pub markup: Option<Markup>,
}

impl Screen {
    fn plain(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            markup: None,
        }
    }

    fn inline(text: impl Into<String>, keyboard: InlineKeyboard) -> Self {
        Self {
            text: text.into(),
            markup: Some(Markup::Inline(keyboard)),
        }
    }

    pub fn keyboard(&self) -> Option<&InlineKeyboard> {
        self.markup.as_ref().and_then(Markup::as_inline)
    }
}

/// Page window over a topic's entries. `page` is zero-based.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Pagination {
    pub page: u32,
    pub page_size: usize,
    pub total: usize,
}

impl Pagination {
    pub fn total_pages(&self) -> usize {
        if self.page_size == 0 {
            return 0;
        }
        self.total.div_ceil(self.page_size)
    }

    /// Target of the "prev" button; clamped to the last real page for out-of-range requests.
    pub fn prev_page(&self) -> Option<u32> {
        if self.page == 0 || self.total_pages() == 0 {
            return None;
        }
        let last = (self.total_pages() - 1) as u32;
        Some((self.page - 1).min(last))
    }

    pub fn next_page(&self) -> Option<u32> {
        let next = self.page.checked_add(1)?;
        ((next as usize) < self.total_pages()).then_some(next)
    }

    /// One-based number of the first entry on this page.
    pub fn first_number(&self) -> usize {
        (self.page as usize).saturating_mul(self.page_size) + 1
    }
}

/// Pure screen builders.
#[derive(Clone, Debug, Default)]
pub struct Renderer {
    cfg: MenuConfig,
}

impl Renderer {
    pub fn new(cfg: MenuConfig) -> Self {
        Self { cfg }
    }

    /// User text shown inside markup on one line (titles, names). Capped so the line always fits
    /// in one message, leaving the split point outside the tags.
    fn inline_field(&self, text: &str) -> String {
        escape_html_capped(text, self.cfg.message_limit / 4)
    }

    /// Free text shown on its own lines (descriptions, note entries).
    fn block_field(&self, text: &str) -> String {
        escape_html_capped(text, self.cfg.message_limit / 2)
    }

    fn website(&self) -> InlineButton {
        InlineButton::url(WEBSITE_LABEL, self.cfg.website_url.clone())
    }

    fn main_menu() -> Markup {
        Markup::Reply(ReplyKeyboard {
            rows: vec![vec![MENU_TASKS.to_string(), MENU_NOTES.to_string()]],
            resize: true,
        })
    }

    pub fn welcome(&self, name: &str) -> Screen {
        let text = format!(
            "👋 <b>Hello {}!</b>\n\n🎉 Welcome to the task list bot!\n\n\
             With this bot you can:\n\
             • receive task reminders\n\
             • view and complete tasks\n\
             • browse your notes\n\n\
             👇 Use the menu below:",
            self.inline_field(name)
        );
        Screen {
            text,
            markup: Some(Self::main_menu()),
        }
    }

    pub fn connection_check(&self, name: &str) -> Screen {
        let text = format!(
            "✅ <b>Connection works!</b>\n\n\
             Hello {}, this chat is linked to your account. Task reminders will arrive here.\n\n\
             👇 Use the menu below:",
            self.inline_field(name)
        );
        Screen {
            text,
            markup: Some(Self::main_menu()),
        }
    }

    pub fn task_list(&self, tasks: &[Task]) -> Result<Screen> {
        if tasks.is_empty() {
            return Ok(Screen::inline(
                "📋 <b>Your tasks</b>\n\n✅ Well done! All your tasks are completed.",
                InlineKeyboard::new().single(self.website()),
            ));
        }

        let mut kb = InlineKeyboard::new();
        for t in tasks {
            let label = format!(
                "{} {}",
                t.priority.glyph(),
                truncate_text(&t.title, self.cfg.title_max_chars)
            );
            let data = CallbackAction::ViewTask(t.id.clone()).encode()?;
            kb = kb.single(InlineButton::callback(label, data));
        }
        kb = kb.single(self.website());

        let text = format!(
            "📋 <b>Open tasks ({})</b>\n\n👆 Tap a task to see its details:",
            tasks.len()
        );
        Ok(Screen::inline(text, kb))
    }

    pub fn task_detail(&self, task: &Task) -> Result<Screen> {
        let off = self.cfg.offset;
        let mut text = format!(
            "{} <b>Task details ({})</b>\n\n🎯 <b>{}</b>\n",
            task.priority.glyph(),
            task.priority.label(),
            self.inline_field(&task.title)
        );
        if let Some(desc) = task.description.as_deref().filter(|d| !d.trim().is_empty()) {
            text.push_str(&format!("\n📝 <b>Description:</b>\n{}\n", self.block_field(desc)));
        }
        if let Some(due) = task.due_date {
            text.push_str(&format!("📅 <b>Due:</b> {}\n", format_date(due, off)));
        }
        if let Some(at) = task.notify_at {
            text.push_str(&format!("🔔 <b>Reminder:</b> {}\n", format_datetime(at, off)));
        }
        let status = if task.is_completed {
            "✅ Done"
        } else {
            "⏳ In progress"
        };
        text.push_str(&format!(
            "\n📊 <b>Status:</b> {status}\n📅 <b>Created:</b> {}",
            format_date(task.created_at, off)
        ));

        let mut kb = InlineKeyboard::new();
        if !task.is_completed {
            let data = CallbackAction::CompleteTask(task.id.clone()).encode()?;
            kb = kb.single(InlineButton::callback(DONE_LABEL, data));
        }
        kb = kb
            .single(InlineButton::callback(
                BACK_LABEL,
                CallbackAction::BackToTasks.encode()?,
            ))
            .single(self.website());

        Ok(Screen::inline(text, kb))
    }

    pub fn task_completed(&self, task: &Task) -> Result<Screen> {
        let text = format!(
            "✅ <b>Task completed!</b>\n\n🎯 <b>{}</b>\n\n🎉 Nice work, the task is done.",
            self.inline_field(&task.title)
        );
        let kb = InlineKeyboard::new()
            .single(InlineButton::callback(
                "🔙 Back to tasks",
                CallbackAction::BackToTasks.encode()?,
            ))
            .single(self.website());
        Ok(Screen::inline(text, kb))
    }

    pub fn task_already_completed(&self) -> Screen {
        Screen::plain("✅ This task is already completed.")
    }

    pub fn task_not_found(&self) -> Screen {
        Screen::plain("❌ Task not found.")
    }

    pub fn note_topics(&self, topics: &[NoteTopic]) -> Result<Screen> {
        if topics.is_empty() {
            return Ok(Screen::inline(
                "📝 <b>Notes</b>\n\n❌ No notes yet.\nCreate one on the website.",
                InlineKeyboard::new().single(self.website()),
            ));
        }

        let mut kb = InlineKeyboard::new();
        for t in topics {
            let label = format!("📄 {}", truncate_text(&t.topic, self.cfg.title_max_chars));
            let data = CallbackAction::ViewTopic {
                topic_id: t.id.clone(),
                page: 0,
            }
            .encode()?;
            kb = kb.single(InlineButton::callback(label, data));
        }
        kb = kb.single(self.website());

        let text = format!(
            "📝 <b>Your notes ({})</b>\n\n👆 Tap a note to see its entries:",
            topics.len()
        );
        Ok(Screen::inline(text, kb))
    }

    pub fn topic_not_found(&self) -> Screen {
        Screen::plain("❌ Note not found.")
    }

    /// One page of a topic. An out-of-range page renders an empty page, never an error.
    pub fn note_entries(
        &self,
        topic: &NoteTopic,
        entries: &[NoteEntry],
        pages: Pagination,
    ) -> Result<Screen> {
        let back = InlineButton::callback(BACK_LABEL, CallbackAction::BackToNotes.encode()?);
        let title = self.inline_field(&topic.topic);

        if pages.total == 0 {
            return Ok(Screen::inline(
                format!("📄 <b>{title}</b>\n\n❌ This note is empty."),
                InlineKeyboard::new().single(back).single(self.website()),
            ));
        }

        let mut text = format!(
            "📄 <b>{title}</b>\n📊 Page {} of {} ({} entries)\n",
            pages.page as u64 + 1,
            pages.total_pages(),
            pages.total
        );
        if entries.is_empty() {
            text.push_str("\nNothing on this page.");
        }
        for (i, e) in entries.iter().enumerate() {
            text.push_str(&format!(
                "\n{}. {}\n📅 {}\n",
                pages.first_number() + i,
                self.block_field(&e.content),
                format_date(e.created_at, self.cfg.offset)
            ));
        }

        let mut nav = Vec::new();
        if let Some(prev) = pages.prev_page() {
            let data = CallbackAction::ViewTopic {
                topic_id: topic.id.clone(),
                page: prev,
            }
            .encode()?;
            nav.push(InlineButton::callback("⬅️ Prev", data));
        }
        if let Some(next) = pages.next_page() {
            let data = CallbackAction::ViewTopic {
                topic_id: topic.id.clone(),
                page: next,
            }
            .encode()?;
            nav.push(InlineButton::callback("Next ➡️", data));
        }

        let kb = InlineKeyboard::new()
            .row(nav)
            .single(back)
            .single(self.website());
        Ok(Screen::inline(text, kb))
    }

    pub fn reminder(&self, task: &Task) -> Result<Screen> {
        let mut text = format!(
            "{} <b>Reminder ({})</b>\n\n🎯 <b>{}</b>\n",
            task.priority.glyph(),
            task.priority.label(),
            self.inline_field(&task.title)
        );
        if let Some(desc) = task.description.as_deref().filter(|d| !d.trim().is_empty()) {
            text.push_str(&format!("\n📝 {}\n", self.block_field(desc)));
        }
        if let Some(due) = task.due_date {
            text.push_str(&format!(
                "📅 <b>Due:</b> {}\n",
                format_date(due, self.cfg.offset)
            ));
        }
        text.push_str("\n⏰ It is time to work on this task!\n\n👆 Tap the button below when it is done:");

        let kb = InlineKeyboard::new()
            .single(InlineButton::callback(
                DONE_LABEL,
                CallbackAction::CompleteTask(task.id.clone()).encode()?,
            ))
            .single(self.website());
        Ok(Screen::inline(text, kb))
    }

    pub fn failure(&self) -> Screen {
        Screen::plain("❌ Could not complete the operation.")
    }
}

/// Where a screen goes: the bot to act as, the chat, and the message to edit (if any).
#[derive(Clone, Debug)]
pub struct Destination {
    pub cred: BotCredential,
    pub chat_id: ChatId,
    pub source: Option<MessageRef>,
}

impl Destination {
    pub fn new(cred: BotCredential, chat_id: ChatId) -> Self {
        Self {
            cred,
            chat_id,
            source: None,
        }
    }

    pub fn editing(mut self, source: Option<MessageRef>) -> Self {
        self.source = source;
        self
    }
}

/// Deliver a screen, editing `dest.source` in place when possible.
///
/// In-place edits need a source message, an inline (or no) keyboard and a text that fits in one
/// message. Everything else is sent as new messages, split on line boundaries, with the keyboard
/// on the last chunk. Stops at the first failed chunk so no keyboard is attached to a partial
/// render. The chunk size is the smaller of `max_len` and the gateway's own limit.
pub async fn deliver(
    gateway: &dyn BotGateway,
    dest: &Destination,
    screen: &Screen,
    max_len: usize,
) -> Result<bool> {
    let caps = gateway.capabilities();
    let chunks = split_message(&screen.text, caps.max_message_len.min(max_len));
    let Some(last) = chunks.len().checked_sub(1) else {
        return Ok(false);
    };

    let reply_markup = matches!(screen.markup, Some(Markup::Reply(_)));
    if let (Some(source), true, true, false) =
        (dest.source, caps.supports_edit, last == 0, reply_markup)
    {
        return gateway
            .edit(&dest.cred, source, &chunks[0], screen.keyboard())
            .await;
    }

    for (i, chunk) in chunks.iter().enumerate() {
        let markup = if i == last { screen.markup.as_ref() } else { None };
        if !gateway.send(&dest.cred, dest.chat_id, chunk, markup).await? {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Menu entry points used by the dispatcher, the scheduler and the settings service.
pub struct MenuService {
    store: Arc<dyn TaskStore>,
    gateway: Arc<dyn BotGateway>,
    renderer: Renderer,
}

impl MenuService {
    pub fn new(store: Arc<dyn TaskStore>, gateway: Arc<dyn BotGateway>, cfg: MenuConfig) -> Self {
        Self {
            store,
            gateway,
            renderer: Renderer::new(cfg),
        }
    }

    async fn deliver(&self, dest: &Destination, screen: Screen) -> Result<bool> {
        deliver(
            self.gateway.as_ref(),
            dest,
            &screen,
            self.renderer.cfg.message_limit,
        )
        .await
    }

    pub async fn show_welcome(&self, dest: &Destination, user: &User) -> Result<bool> {
        self.deliver(dest, self.renderer.welcome(&user.name)).await
    }

    pub async fn show_tasks(&self, dest: &Destination, user: &User) -> Result<bool> {
        let tasks = self
            .store
            .find_incomplete_tasks(&user.id, self.renderer.cfg.task_list_limit)
            .await?;
        let screen = self.renderer.task_list(&tasks)?;
        self.deliver(dest, screen).await
    }

    async fn owned_task(&self, user: &User, task_id: &str) -> Result<Option<Task>> {
        let task = self.store.find_task(task_id).await?;
        Ok(task.filter(|t| t.user_id == user.id))
    }

    pub async fn show_task(&self, dest: &Destination, user: &User, task_id: &str) -> Result<bool> {
        let screen = match self.owned_task(user, task_id).await? {
            Some(task) => self.renderer.task_detail(&task)?,
            None => self.renderer.task_not_found(),
        };
        self.deliver(dest, screen).await
    }

    /// Complete a task. Already-completed tasks get an informational screen and no store write.
    pub async fn complete_task(
        &self,
        dest: &Destination,
        user: &User,
        task_id: &str,
    ) -> Result<bool> {
        let screen = match self.owned_task(user, task_id).await? {
            None => self.renderer.task_not_found(),
            Some(task) if task.is_completed => self.renderer.task_already_completed(),
            Some(task) => {
                if self.store.complete_task(&task.id).await? {
                    tracing::info!(task_id = %task.id, user_id = %user.id, "task completed from chat");
                    self.renderer.task_completed(&task)?
                } else {
                    self.renderer.task_not_found()
                }
            }
        };
        self.deliver(dest, screen).await
    }

    pub async fn show_topics(&self, dest: &Destination, user: &User) -> Result<bool> {
        let topics = self
            .store
            .find_note_topics(&user.id, self.renderer.cfg.topic_list_limit)
            .await?;
        let screen = self.renderer.note_topics(&topics)?;
        self.deliver(dest, screen).await
    }

    pub async fn show_topic(
        &self,
        dest: &Destination,
        user: &User,
        topic_id: &str,
        page: u32,
    ) -> Result<bool> {
        let topic = self
            .store
            .find_note_topic(topic_id)
            .await?
            .filter(|t| t.user_id == user.id);
        let Some(topic) = topic else {
            return self.deliver(dest, self.renderer.topic_not_found()).await;
        };

        let page_size = self.renderer.cfg.note_page_size;
        let total = self.store.count_note_entries(&topic.id).await?;
        let entries = self
            .store
            .find_note_entries(&topic.id, page, page_size)
            .await?;
        let pages = Pagination {
            page,
            page_size,
            total,
        };
        let screen = self.renderer.note_entries(&topic, &entries, pages)?;
        self.deliver(dest, screen).await
    }

    pub async fn send_reminder(&self, dest: &Destination, task: &Task) -> Result<bool> {
        let screen = self.renderer.reminder(task)?;
        self.deliver(dest, screen).await
    }

    pub async fn send_connection_check(&self, dest: &Destination, user: &User) -> Result<bool> {
        self.deliver(dest, self.renderer.connection_check(&user.name))
            .await
    }

    /// Short error text in place of the intended screen.
    pub async fn report_failure(&self, dest: &Destination) -> Result<bool> {
        self.deliver(dest, self.renderer.failure()).await
    }
}
