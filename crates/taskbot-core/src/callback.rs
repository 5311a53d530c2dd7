//! Callback tokens: the navigation state carried by inline buttons.
//!
//! Telegram echoes a button's `callback_data` (1–64 bytes) back when it is pressed. The token is
//! the only navigation state; nothing is kept server-side between presses.
//!
//! Vocabulary:
//! - `complete_task_<id>`
//! - `view_task_<id>`
//! - `back_to_tasks`
//! - `view_notes`
//! - `view_topic_<id>` (page 0) / `view_topic_<id>_<page>`
//! - `back_to_notes`
//!
//! Topic ids must not contain `_`: the page is split off at the last delimiter.

use crate::{errors::Error, Result};

/// Telegram's limit for `callback_data`, in bytes.
pub const MAX_CALLBACK_DATA_LEN: usize = 64;

const COMPLETE_TASK: &str = "complete_task_";
const VIEW_TASK: &str = "view_task_";
const BACK_TO_TASKS: &str = "back_to_tasks";
const VIEW_NOTES: &str = "view_notes";
const VIEW_TOPIC: &str = "view_topic_";
const BACK_TO_NOTES: &str = "back_to_notes";
const DELIMITER: char = '_';

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CallbackAction {
    CompleteTask(String),
    ViewTask(String),
    BackToTasks,
    ViewNotes,
    ViewTopic { topic_id: String, page: u32 },
    BackToNotes,
    Unknown(String),
}

impl CallbackAction {
    /// Decode a token. Anything outside the vocabulary becomes `Unknown`; this never fails.
    pub fn parse(raw: &str) -> Self {
        match raw {
            BACK_TO_TASKS => return CallbackAction::BackToTasks,
            VIEW_NOTES => return CallbackAction::ViewNotes,
            BACK_TO_NOTES => return CallbackAction::BackToNotes,
            _ => {}
        }

        if let Some(id) = raw.strip_prefix(COMPLETE_TASK).filter(|id| !id.is_empty()) {
            return CallbackAction::CompleteTask(id.to_string());
        }
        if let Some(id) = raw.strip_prefix(VIEW_TASK).filter(|id| !id.is_empty()) {
            return CallbackAction::ViewTask(id.to_string());
        }
        if let Some(rest) = raw.strip_prefix(VIEW_TOPIC) {
            let (topic_id, page) = match rest.rsplit_once(DELIMITER) {
                Some((id, page)) => match page.parse::<u32>() {
                    Ok(p) => (id, p),
                    Err(_) => (rest, 0),
                },
                None => (rest, 0),
            };
            if !topic_id.is_empty() {
                return CallbackAction::ViewTopic {
                    topic_id: topic_id.to_string(),
                    page,
                };
            }
        }

        CallbackAction::Unknown(raw.to_string())
    }

    /// Encode into `callback_data`.
    ///
    /// Fails for `Unknown`, empty ids, topic ids containing the delimiter, and tokens over
    /// [`MAX_CALLBACK_DATA_LEN`] bytes.
    pub fn encode(&self) -> Result<String> {
        let token = match self {
            CallbackAction::CompleteTask(id) => format!("{COMPLETE_TASK}{}", non_empty(id)?),
            CallbackAction::ViewTask(id) => format!("{VIEW_TASK}{}", non_empty(id)?),
            CallbackAction::BackToTasks => BACK_TO_TASKS.to_string(),
            CallbackAction::ViewNotes => VIEW_NOTES.to_string(),
            CallbackAction::ViewTopic { topic_id, page } => {
                let id = non_empty(topic_id)?;
                if id.contains(DELIMITER) {
                    return Err(Error::InvalidInput(format!(
                        "topic id {id:?} contains the token delimiter '{DELIMITER}'"
                    )));
                }
                if *page == 0 {
                    format!("{VIEW_TOPIC}{id}")
                } else {
                    format!("{VIEW_TOPIC}{id}{DELIMITER}{page}")
                }
            }
            CallbackAction::BackToNotes => BACK_TO_NOTES.to_string(),
            CallbackAction::Unknown(raw) => {
                return Err(Error::InvalidInput(format!(
                    "cannot encode unknown callback token {raw:?}"
                )))
            }
        };

        if token.len() > MAX_CALLBACK_DATA_LEN {
            return Err(Error::InvalidInput(format!(
                "callback token is {} bytes (max {MAX_CALLBACK_DATA_LEN})",
                token.len()
            )));
        }
        Ok(token)
    }
}

fn non_empty(id: &str) -> Result<&str> {
    if id.is_empty() {
        return Err(Error::InvalidInput("empty entity id in callback token".to_string()));
    }
    Ok(id)
}
