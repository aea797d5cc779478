// Display grouping: decide per message whether the UI repeats the author
// header (avatar + name) and timestamp, or collapses it into the run above.
// Pure functions over an ascending timeline; recomputed freely on render.

use chrono::{DateTime, Utc};

use crate::models::Message;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupFlags {
    pub show_header: bool,
    pub show_timestamp: bool,
}

const MINUTE: i64 = 60;
const HOUR: i64 = 60 * MINUTE;
const DAY: i64 = 24 * HOUR;
const MONTH: i64 = 30 * DAY;
const YEAR: i64 = 365 * DAY;

/// Coarse human-readable age bucket of `t` relative to `now`, at the
/// granularity the timestamp is rendered with. Two messages whose buckets
/// are equal would display the same label, so repeating it carries no
/// information. Timestamps ahead of `now` (clock skew) clamp to "just now".
pub fn relative_bucket(t: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let secs = (now - t).num_seconds().max(0);
    if secs < MINUTE {
        "just now".to_string()
    } else if secs < HOUR {
        let n = secs / MINUTE;
        format!("{} minute{} ago", n, if n == 1 { "" } else { "s" })
    } else if secs < DAY {
        let n = secs / HOUR;
        format!("{} hour{} ago", n, if n == 1 { "" } else { "s" })
    } else if secs < MONTH {
        let n = secs / DAY;
        format!("{} day{} ago", n, if n == 1 { "" } else { "s" })
    } else if secs < YEAR {
        let n = secs / MONTH;
        format!("{} month{} ago", n, if n == 1 { "" } else { "s" })
    } else {
        let n = secs / YEAR;
        format!("{} year{} ago", n, if n == 1 { "" } else { "s" })
    }
}

/// The label the UI renders next to a shown timestamp, capitalized.
pub fn relative_label(t: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let bucket = relative_bucket(t, now);
    let mut chars = bucket.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => bucket,
    }
}

/// Compute grouping flags for a timeline sorted ascending by `created_at`.
///
/// Index 0 always shows. A later message collapses iff it has the same
/// author as the message directly above it AND both fall into the same
/// relative-time bucket; an author change or a bucket boundary between the
/// two forces the header back on. Input is never mutated.
pub fn grouping_flags(messages: &[Message], now: DateTime<Utc>) -> Vec<GroupFlags> {
    messages
        .iter()
        .enumerate()
        .map(|(i, message)| {
            let show = if i == 0 {
                true
            } else {
                let prev = &messages[i - 1];
                prev.author_id != message.author_id
                    || relative_bucket(prev.created_at, now)
                        != relative_bucket(message.created_at, now)
            };
            GroupFlags {
                show_header: show,
                show_timestamp: show,
            }
        })
        .collect()
}
