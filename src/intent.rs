//! Detects whether a chat message is asking for a reminder.
//!
//! A message counts as a reminder request when it contains a time
//! expression of the form `[今天|明天|後天]? [早上|中午|下午|晚上]? N點[M分?]?`.
//! Everything left over after removing the time expression and the common
//! trigger phrases ("提醒我", "幫我", ...) becomes the task text.

use std::sync::LazyLock;

use regex::Regex;

/// Task text used when the message is nothing but a time expression.
pub const DEFAULT_TASK_LABEL: &str = "提醒事項";

static TIME_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(今天|明天|後天)?\s*(早上|中午|下午|晚上)?\s*(\d{1,2})點(?:\s*(\d{1,2})分?)?")
        .expect("Hard-coded pattern is valid.")
});

static TRIGGER_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    // 請幫我 must come before 幫我 so the whole phrase is stripped.
    Regex::new(r"提醒我|請幫我|幫我|設定|叫我").expect("Hard-coded pattern is valid.")
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReminderIntent {
    pub task: String,
    pub time_text: String,
}

/// Returns `None` when the text carries no recognizable time expression,
/// which means it is ordinary conversation and not a reminder request.
pub fn detect(text: &str) -> Option<ReminderIntent> {
    let clean = normalize_punctuation(text);
    let matched = TIME_PATTERN.find(&clean)?;

    let time_text = matched.as_str().trim().to_owned();

    let mut remainder = String::with_capacity(clean.len());
    remainder.push_str(&clean[..matched.start()]);
    remainder.push_str(&clean[matched.end()..]);

    let task = TRIGGER_PATTERN.replace_all(&remainder, "");
    let task = task.trim();
    let task = if task.is_empty() {
        DEFAULT_TASK_LABEL.to_owned()
    } else {
        task.to_owned()
    };

    Some(ReminderIntent { task, time_text })
}

/// Sentence-terminating and comma-like marks would otherwise split the
/// time expression mid-match.
fn normalize_punctuation(text: &str) -> String {
    text.replace(['，', ',', '。', '.', '!', '！', '?', '？'], " ")
}
