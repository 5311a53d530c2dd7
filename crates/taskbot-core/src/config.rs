use std::{
    env, fs,
    net::SocketAddr,
    path::{Path, PathBuf},
    time::Duration,
};

use chrono::FixedOffset;
use regex::Regex;

use crate::{
    errors::Error, menu::MenuConfig, notifier::SchedulerConfig, polling::PollingConfig, Result,
};

/// Typed configuration for the bot service.
///
/// Every field has a default, so an empty environment yields a runnable local setup.
#[derive(Clone, Debug)]
pub struct Config {
    // HTTP
    pub bind_addr: SocketAddr,
    pub backend_url: String,
    pub frontend_url: String,
    pub http_timeout: Duration,

    // Store
    pub store_path: PathBuf,

    // Polling
    pub polling_enabled: bool,
    pub poll_interval: Duration,
    pub poll_limit: u8,
    pub poll_timeout: Duration,
    pub polling_start_delay: Duration,

    // Reminders
    pub notify_interval: Duration,
    pub notify_send_delay: Duration,

    // Rendering
    pub telegram_message_limit: usize,
    pub task_list_limit: usize,
    pub topic_list_limit: usize,
    pub note_page_size: usize,
    pub button_title_max_chars: usize,
    pub display_utc_offset_minutes: i32,

    // Audit
    pub audit_log_path: Option<PathBuf>,
    pub audit_log_json: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 3001)),
            backend_url: "http://localhost:3001".to_string(),
            frontend_url: "http://localhost:9002".to_string(),
            http_timeout: Duration::from_secs(10),
            store_path: PathBuf::from("./taskbot-store.json"),
            polling_enabled: true,
            poll_interval: Duration::from_millis(3000),
            poll_limit: 10,
            poll_timeout: Duration::from_secs(1),
            polling_start_delay: Duration::from_millis(2000),
            notify_interval: Duration::from_millis(60_000),
            notify_send_delay: Duration::from_millis(1000),
            telegram_message_limit: 4096,
            task_list_limit: 20,
            topic_list_limit: 20,
            note_page_size: 5,
            button_title_max_chars: 25,
            display_utc_offset_minutes: 0,
            audit_log_path: None,
            audit_log_json: false,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));
        Self::from_lookup(env_str)
    }

    /// Build from an arbitrary key lookup (the environment in production, a map in tests).
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let d = Config::default();

        let bind_addr = match get("BIND_ADDR").and_then(non_empty) {
            Some(raw) => raw
                .trim()
                .parse::<SocketAddr>()
                .map_err(|e| Error::Config(format!("BIND_ADDR {raw:?}: {e}")))?,
            None => match get("PORT").and_then(non_empty) {
                Some(raw) => {
                    let port = raw
                        .trim()
                        .parse::<u16>()
                        .map_err(|e| Error::Config(format!("PORT {raw:?}: {e}")))?;
                    SocketAddr::new(d.bind_addr.ip(), port)
                }
                None => d.bind_addr,
            },
        };

        let backend_url = get("BACKEND_URL")
            .and_then(non_empty)
            .map(|s| s.trim().trim_end_matches('/').to_string())
            .unwrap_or(d.backend_url);
        let frontend_url = get("FRONTEND_URL")
            .and_then(non_empty)
            .map(|s| s.trim().to_string())
            .unwrap_or(d.frontend_url);
        for (key, url) in [("BACKEND_URL", &backend_url), ("FRONTEND_URL", &frontend_url)] {
            if !is_absolute_http_url(url) {
                return Err(Error::Config(format!(
                    "{key} must be an absolute http(s) URL, got {url:?}"
                )));
            }
        }

        let cfg = Config {
            bind_addr,
            backend_url,
            frontend_url,
            http_timeout: parse_u64(&get, "HTTP_TIMEOUT_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(d.http_timeout),
            store_path: get("STORE_PATH")
                .and_then(non_empty)
                .map(PathBuf::from)
                .unwrap_or(d.store_path),
            polling_enabled: get("TELEGRAM_POLLING")
                .map(|s| parse_bool(&s))
                .unwrap_or(d.polling_enabled),
            poll_interval: parse_u64(&get, "POLL_INTERVAL_MS")?
                .map(Duration::from_millis)
                .unwrap_or(d.poll_interval),
            poll_limit: parse_u64(&get, "POLL_LIMIT")?
                .map(|n| n.clamp(1, 100) as u8)
                .unwrap_or(d.poll_limit),
            poll_timeout: parse_u64(&get, "POLL_TIMEOUT_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(d.poll_timeout),
            polling_start_delay: parse_u64(&get, "POLLING_START_DELAY_MS")?
                .map(Duration::from_millis)
                .unwrap_or(d.polling_start_delay),
            notify_interval: parse_u64(&get, "NOTIFY_INTERVAL_MS")?
                .map(Duration::from_millis)
                .unwrap_or(d.notify_interval),
            notify_send_delay: parse_u64(&get, "NOTIFY_SEND_DELAY_MS")?
                .map(Duration::from_millis)
                .unwrap_or(d.notify_send_delay),
            telegram_message_limit: parse_usize(&get, "TELEGRAM_MESSAGE_LIMIT")?
                .unwrap_or(d.telegram_message_limit),
            task_list_limit: parse_usize(&get, "TASK_LIST_LIMIT")?.unwrap_or(d.task_list_limit),
            topic_list_limit: parse_usize(&get, "TOPIC_LIST_LIMIT")?
                .unwrap_or(d.topic_list_limit),
            note_page_size: parse_usize(&get, "NOTE_PAGE_SIZE")?.unwrap_or(d.note_page_size),
            button_title_max_chars: parse_usize(&get, "BUTTON_TITLE_MAX_CHARS")?
                .unwrap_or(d.button_title_max_chars),
            display_utc_offset_minutes: match get("DISPLAY_UTC_OFFSET_MINUTES").and_then(non_empty)
            {
                Some(raw) => raw.trim().parse::<i32>().map_err(|e| {
                    Error::Config(format!("DISPLAY_UTC_OFFSET_MINUTES {raw:?}: {e}"))
                })?,
                None => d.display_utc_offset_minutes,
            },
            audit_log_path: get("AUDIT_LOG_PATH").and_then(non_empty).map(PathBuf::from),
            audit_log_json: get("AUDIT_LOG_JSON")
                .map(|s| parse_bool(&s))
                .unwrap_or(d.audit_log_json),
        };

        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<()> {
        if self.note_page_size == 0 {
            return Err(Error::Config("NOTE_PAGE_SIZE must be at least 1".to_string()));
        }
        if self.telegram_message_limit == 0 {
            return Err(Error::Config(
                "TELEGRAM_MESSAGE_LIMIT must be at least 1".to_string(),
            ));
        }
        if self.http_timeout <= self.poll_timeout {
            return Err(Error::Config(format!(
                "HTTP_TIMEOUT_SECS ({}s) must exceed POLL_TIMEOUT_SECS ({}s)",
                self.http_timeout.as_secs(),
                self.poll_timeout.as_secs()
            )));
        }
        self.display_offset()?;
        Ok(())
    }

    pub fn webhook_url(&self) -> String {
        format!("{}/api/telegram/webhook", self.backend_url)
    }

    pub fn display_offset(&self) -> Result<FixedOffset> {
        FixedOffset::east_opt(self.display_utc_offset_minutes.saturating_mul(60)).ok_or_else(
            || {
                Error::Config(format!(
                    "DISPLAY_UTC_OFFSET_MINUTES {} is out of range",
                    self.display_utc_offset_minutes
                ))
            },
        )
    }

    pub fn menu(&self) -> Result<MenuConfig> {
        Ok(MenuConfig {
            website_url: self.frontend_url.clone(),
            task_list_limit: self.task_list_limit,
            topic_list_limit: self.topic_list_limit,
            note_page_size: self.note_page_size,
            title_max_chars: self.button_title_max_chars,
            message_limit: self.telegram_message_limit,
            offset: self.display_offset()?,
        })
    }

    pub fn polling(&self) -> PollingConfig {
        PollingConfig {
            interval: self.poll_interval,
            limit: self.poll_limit,
            timeout: self.poll_timeout,
        }
    }

    pub fn scheduler(&self) -> SchedulerConfig {
        SchedulerConfig {
            interval: self.notify_interval,
            send_delay: self.notify_send_delay,
        }
    }
}

fn env_str(key: &str) -> Option<String> {
    env::var(key).ok()
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for (key, val) in parse_dotenv(&contents) {
        if env::var_os(&key).is_some() {
            continue; // do not override existing env
        }
        env::set_var(key, val);
    }
}

fn parse_dotenv(contents: &str) -> Vec<(String, String)> {
    let mut out = Vec::new();
    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim();
        if key.is_empty() {
            continue;
        }

        let mut val = v.trim().to_string();
        // Strip optional surrounding quotes.
        if val.len() >= 2
            && ((val.starts_with('"') && val.ends_with('"'))
                || (val.starts_with('\'') && val.ends_with('\'')))
        {
            val = val[1..val.len() - 1].to_string();
        }

        out.push((key.to_string(), val));
    }
    out
}

fn parse_bool(s: &str) -> bool {
    matches!(
        s.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn parse_u64(get: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<u64>> {
    match get(key).and_then(non_empty) {
        Some(raw) => raw
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|e| Error::Config(format!("{key} {raw:?}: {e}"))),
        None => Ok(None),
    }
}

fn parse_usize(get: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<usize>> {
    Ok(parse_u64(get, key)?.map(|n| n as usize))
}

fn is_absolute_http_url(s: &str) -> bool {
    Regex::new(r"^https?://[^\s/]+(/\S*)?$")
        .map(|re| re.is_match(s))
        .unwrap_or(false)
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from_pairs(pairs: &[(&str, &str)]) -> Result<Config> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn empty_environment_uses_defaults() {
        let cfg = from_pairs(&[]).unwrap();
        assert_eq!(cfg.bind_addr.port(), 3001);
        assert_eq!(cfg.poll_interval, Duration::from_secs(3));
        assert_eq!(cfg.poll_limit, 10);
        assert_eq!(cfg.notify_interval, Duration::from_secs(60));
        assert_eq!(cfg.note_page_size, 5);
        assert!(cfg.polling_enabled);
        assert_eq!(cfg.webhook_url(), "http://localhost:3001/api/telegram/webhook");
    }

    #[test]
    fn overrides_are_applied() {
        let cfg = from_pairs(&[
            ("PORT", "8080"),
            ("BACKEND_URL", "https://bot.example.com/"),
            ("TELEGRAM_POLLING", "off"),
            ("NOTE_PAGE_SIZE", "3"),
            ("DISPLAY_UTC_OFFSET_MINUTES", "210"),
        ])
        .unwrap();
        assert_eq!(cfg.bind_addr.port(), 8080);
        assert_eq!(cfg.webhook_url(), "https://bot.example.com/api/telegram/webhook");
        assert!(!cfg.polling_enabled);
        assert_eq!(cfg.menu().unwrap().note_page_size, 3);
        assert_eq!(cfg.display_offset().unwrap().local_minus_utc(), 210 * 60);
    }

    #[test]
    fn invalid_values_are_config_errors() {
        for pairs in [
            vec![("BIND_ADDR", "not-an-addr")],
            vec![("FRONTEND_URL", "example.com")],
            vec![("NOTE_PAGE_SIZE", "0")],
            vec![("POLL_INTERVAL_MS", "soon")],
            vec![("HTTP_TIMEOUT_SECS", "1"), ("POLL_TIMEOUT_SECS", "1")],
        ] {
            assert!(
                matches!(from_pairs(&pairs), Err(Error::Config(_))),
                "{pairs:?}"
            );
        }
    }

    #[test]
    fn dotenv_lines_strip_quotes_and_comments() {
        let parsed = parse_dotenv("# comment\nA=1\nB = \"two words\"\n\nbroken\nC='x'\n");
        assert_eq!(
            parsed,
            vec![
                ("A".to_string(), "1".to_string()),
                ("B".to_string(), "two words".to_string()),
                ("C".to_string(), "x".to_string()),
            ]
        );
    }
}
