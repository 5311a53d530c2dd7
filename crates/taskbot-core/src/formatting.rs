//! Formatting utilities (Telegram HTML escaping, message splitting, dates).

use chrono::{DateTime, FixedOffset, Utc};

/// Escape HTML special characters for Telegram HTML parse mode.
pub fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Escape `text` and keep the result within `max_units` UTF-16 units, cutting between escaped
/// characters (never inside an entity) and appending `...` when anything was dropped.
pub fn escape_html_capped(text: &str, max_units: usize) -> String {
    let escaped = escape_html(text);
    if utf16_len(&escaped) <= max_units {
        return escaped;
    }

    let budget = max_units.saturating_sub(3);
    let mut out = String::new();
    let mut used = 0usize;
    let mut buf = [0u8; 4];
    for c in text.chars() {
        let piece = escape_html(c.encode_utf8(&mut buf));
        let w = utf16_len(&piece);
        if used + w > budget {
            break;
        }
        out.push_str(&piece);
        used += w;
    }
    out.push_str("...");
    out
}

/// Length as Telegram counts it (UTF-16 code units).
pub fn utf16_len(s: &str) -> usize {
    s.encode_utf16().count()
}

/// Split `text` into as few chunks as possible, each at most `max_units` UTF-16 code units.
///
/// Splits only on line boundaries: a line goes into the current chunk if it fits, otherwise the
/// chunk is flushed first. A single line longer than the limit is the one exception and gets
/// cut, but never inside an HTML tag or entity. Chunks that would be blank are dropped
/// (Telegram rejects them).
pub fn split_message(text: &str, max_units: usize) -> Vec<String> {
    let max = max_units.max(1);
    if utf16_len(text) <= max {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut current: Option<(String, usize)> = None;

    for line in text.split('\n') {
        let line_len = utf16_len(line);

        if let Some((buf, len)) = current.as_mut() {
            if *len + 1 + line_len <= max {
                buf.push('\n');
                buf.push_str(line);
                *len += 1 + line_len;
                continue;
            }
        }

        if let Some((buf, _)) = current.take() {
            chunks.push(buf);
        }

        if line_len <= max {
            current = Some((line.to_string(), line_len));
            continue;
        }

        let mut pieces = split_long_line(line, max);
        let tail = pieces.pop();
        chunks.extend(pieces);
        current = tail.map(|s| {
            let len = utf16_len(&s);
            (s, len)
        });
    }

    if let Some((buf, _)) = current {
        chunks.push(buf);
    }

    chunks.retain(|c| !c.trim().is_empty());
    chunks
}

/// Cut one line into pieces of at most `max` units. A cut goes at the last position outside any
/// entity, tag or open element (`<b>...</b>`); only markup longer than `max` is cut through.
fn split_long_line(line: &str, max: usize) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut start = 0usize;
    let mut units = 0usize;
    // Last safe cut inside the current piece: (byte index, units before it).
    let mut safe: Option<(usize, usize)> = None;
    let mut in_tag = false;
    let mut closing_tag = false;
    let mut prev = '\0';
    let mut open_elements = 0usize;
    let mut in_entity = false;

    for (i, c) in line.char_indices() {
        if !in_tag && !in_entity && open_elements == 0 && i > start {
            safe = Some((i, units));
        }

        let w = c.len_utf16();
        if units + w > max {
            let (cut, before) = match safe.take() {
                Some(point) => point,
                None => (i, units),
            };
            if cut > start {
                pieces.push(line[start..cut].to_string());
                start = cut;
                units -= before;
            }
            if units + w > max && i > start {
                pieces.push(line[start..i].to_string());
                start = i;
                units = 0;
            }
        }
        units += w;

        match c {
            '<' => {
                in_tag = true;
                closing_tag = false;
            }
            '/' if in_tag && prev == '<' => closing_tag = true,
            '>' if in_tag => {
                in_tag = false;
                if closing_tag {
                    open_elements = open_elements.saturating_sub(1);
                } else {
                    open_elements += 1;
                }
            }
            '&' if !in_tag => in_entity = true,
            ';' => in_entity = false,
            c if c.is_whitespace() => in_entity = false,
            _ => {}
        }
        prev = c;
    }

    if start < line.len() {
        pieces.push(line[start..].to_string());
    }
    pieces
}

/// Calendar date in the display offset (`2025-03-14`).
pub fn format_date(at: DateTime<Utc>, offset: FixedOffset) -> String {
    at.with_timezone(&offset).format("%Y-%m-%d").to_string()
}

/// Date and minute in the display offset (`2025-03-14 09:30`).
pub fn format_datetime(at: DateTime<Utc>, offset: FixedOffset) -> String {
    at.with_timezone(&offset).format("%Y-%m-%d %H:%M").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn escapes_html() {
        assert_eq!(escape_html("<b>&\"</b>"), "&lt;b&gt;&amp;&quot;&lt;/b&gt;");
    }

    #[test]
    fn short_text_is_one_chunk() {
        assert_eq!(split_message("a\nb", 10), vec!["a\nb".to_string()]);
    }

    #[test]
    fn splits_on_line_boundaries_into_minimum_chunks() {
        let lines: Vec<String> = (0..5).map(|i| format!("line-{i:04}")).collect();
        let text = lines.join("\n");

        // Each line is 9 chars: two lines plus the newline make 19, a third would make 29.
        let chunks = split_message(&text, 25);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0], "line-0000\nline-0001");
        assert_eq!(chunks[2], "line-0004");
        assert!(chunks.iter().all(|c| c.chars().count() <= 25));
        assert_eq!(chunks.join("\n"), text);
    }

    #[test]
    fn flushes_before_a_line_that_would_overflow() {
        let text = format!("{}\n{}", "a".repeat(8), "b".repeat(8));
        let chunks = split_message(&text, 10);
        assert_eq!(chunks, vec!["a".repeat(8), "b".repeat(8)]);
    }

    #[test]
    fn hard_splits_only_an_oversized_line() {
        let text = format!("head\n{}\ntail", "x".repeat(23));
        let chunks = split_message(&text, 10);
        assert_eq!(chunks[0], "head");
        assert_eq!(chunks[1], "x".repeat(10));
        assert_eq!(chunks[2], "x".repeat(10));
        assert_eq!(chunks[3], "xxx\ntail");
        assert!(chunks.iter().all(|c| c.chars().count() <= 10));
    }

    #[test]
    fn hard_split_never_cuts_an_entity_or_tag() {
        assert_eq!(
            split_message("aaaaaaaa&amp;tail", 10),
            vec!["aaaaaaaa".to_string(), "&amp;tail".to_string()]
        );

        let line = format!("{}<b>bold</b>", "x".repeat(8));
        let chunks = split_message(&line, 12);
        assert_eq!(chunks, vec!["x".repeat(8), "<b>bold</b>".to_string()]);
    }

    #[test]
    fn limit_counts_utf16_units() {
        // Each emoji is one char but two UTF-16 units.
        let text = "😀".repeat(6);
        let chunks = split_message(&text, 4);
        assert_eq!(chunks, vec!["😀😀".to_string(); 3]);
        assert!(chunks.iter().all(|c| utf16_len(c) <= 4));
    }

    #[test]
    fn capped_escape_stops_between_entities() {
        assert_eq!(escape_html_capped("a&b", 20), "a&amp;b");
        // Seven units are left for text once the ellipsis is reserved.
        assert_eq!(escape_html_capped("a&b&c", 10), "a&amp;b...");
        assert!(utf16_len(&escape_html_capped(&"\"".repeat(100), 40)) <= 40);
    }

    #[test]
    fn drops_blank_chunks() {
        let text = format!("{}\n\n\n{}", "a".repeat(10), "b".repeat(10));
        let chunks = split_message(&text, 10);
        assert_eq!(chunks, vec!["a".repeat(10), "b".repeat(10)]);
    }

    #[test]
    fn dates_use_display_offset() {
        let at = Utc.with_ymd_and_hms(2025, 3, 14, 22, 45, 0).unwrap();
        let tehran = FixedOffset::east_opt(3 * 3600 + 1800).unwrap();
        assert_eq!(format_date(at, tehran), "2025-03-15");
        assert_eq!(format_datetime(at, tehran), "2025-03-15 02:15");
        let utc = FixedOffset::east_opt(0).unwrap();
        assert_eq!(format_datetime(at, utc), "2025-03-14 22:45");
    }
}
