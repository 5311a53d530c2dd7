//! Failure audit: the single emission point for "attempted but failed" outcomes.
//!
//! Delivery failures never propagate as errors. Each one is recorded here as a `tracing`
//! warning and a per-category counter (read by tests and `/health`), plus a line in the audit
//! file when one is configured.

use std::{
    collections::HashMap,
    fs::OpenOptions,
    io::Write,
    path::PathBuf,
    sync::Mutex,
};

use serde::Serialize;

use crate::{
    domain::{BotCredential, ChatId},
    utils::{iso_timestamp_utc, truncate_text},
    Result,
};

const AUDIT_MAX_TEXT: usize = 500;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Network error or non-2xx transport outcome.
    Transport,
    /// Provider answered with `ok: false`.
    Api,
    /// Provider asked us to back off.
    RateLimited,
    /// Inbound payload that could not be normalized.
    MalformedUpdate,
    /// Callback token outside the known vocabulary.
    UnknownToken,
    /// No user or no credential for an inbound chat.
    LookupMiss,
    /// A menu or reminder could not be built or delivered.
    Render,
    /// Persistence collaborator failed.
    Store,
}

impl FailureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FailureKind::Transport => "transport",
            FailureKind::Api => "api",
            FailureKind::RateLimited => "rate_limited",
            FailureKind::MalformedUpdate => "malformed_update",
            FailureKind::UnknownToken => "unknown_token",
            FailureKind::LookupMiss => "lookup_miss",
            FailureKind::Render => "render",
            FailureKind::Store => "store",
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct AuditEvent {
    pub timestamp: String,
    pub category: FailureKind,
    pub operation: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chat_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,

    pub detail: String,
}

impl AuditEvent {
    pub fn new(category: FailureKind, operation: &str, detail: impl Into<String>) -> Self {
        Self {
            timestamp: iso_timestamp_utc(),
            category,
            operation: operation.to_string(),
            credential: None,
            chat_id: None,
            task_id: None,
            detail: detail.into(),
        }
    }

    pub fn credential(mut self, cred: &BotCredential) -> Self {
        self.credential = Some(cred.fingerprint());
        self
    }

    pub fn chat(mut self, chat_id: ChatId) -> Self {
        self.chat_id = Some(chat_id.0);
        self
    }

    pub fn task(mut self, task_id: &str) -> Self {
        self.task_id = Some(task_id.to_string());
        self
    }
}

#[derive(Debug, Default)]
pub struct AuditLogger {
    path: Option<PathBuf>,
    json: bool,
    counts: Mutex<HashMap<FailureKind, u64>>,
}

impl AuditLogger {
    /// Counters and tracing only, no audit file.
    pub fn in_memory() -> Self {
        Self::default()
    }

    pub fn with_file(path: impl Into<PathBuf>, json: bool) -> Self {
        Self {
            path: Some(path.into()),
            json,
            counts: Mutex::new(HashMap::new()),
        }
    }

    pub fn record(&self, mut event: AuditEvent) {
        event.detail = truncate_text(&event.detail, AUDIT_MAX_TEXT);

        tracing::warn!(
            category = event.category.as_str(),
            operation = %event.operation,
            credential = event.credential.as_deref().unwrap_or("-"),
            chat_id = event.chat_id.unwrap_or_default(),
            task_id = event.task_id.as_deref().unwrap_or("-"),
            "{}",
            event.detail
        );

        if let Ok(mut counts) = self.counts.lock() {
            *counts.entry(event.category).or_insert(0) += 1;
        }

        if let Err(e) = self.append(&event) {
            tracing::error!("failed to write audit record: {e}");
        }
    }

    pub fn count(&self, kind: FailureKind) -> u64 {
        self.counts
            .lock()
            .map(|c| c.get(&kind).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    pub fn snapshot(&self) -> HashMap<FailureKind, u64> {
        self.counts.lock().map(|c| c.clone()).unwrap_or_default()
    }

    fn append(&self, event: &AuditEvent) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let mut file = OpenOptions::new().create(true).append(true).open(path)?;

        if self.json {
            let line = serde_json::to_string(event)?;
            writeln!(file, "{line}")?;
            return Ok(());
        }

        // Plain text format for readability.
        let mut out = String::new();
        out.push('\n');
        out.push_str(&"=".repeat(60));
        out.push_str(&format!("\ntimestamp: {}", event.timestamp));
        out.push_str(&format!("\ncategory: {}", event.category.as_str()));
        out.push_str(&format!("\noperation: {}", event.operation));
        if let Some(c) = &event.credential {
            out.push_str(&format!("\ncredential: {c}"));
        }
        if let Some(c) = event.chat_id {
            out.push_str(&format!("\nchat_id: {c}"));
        }
        if let Some(t) = &event.task_id {
            out.push_str(&format!("\ntask_id: {t}"));
        }
        out.push_str(&format!("\ndetail: {}\n", event.detail));

        file.write_all(out.as_bytes())?;
        Ok(())
    }
}
