//! Resolves a natural-language time expression into a concrete future
//! instant.
//!
//! The grammar is deliberately small: an optional day word (今天/明天/後天),
//! an optional period-of-day word (早上/中午/下午/晚上) and an `N點[M分?]?`
//! clock reading. Anything outside it is rejected with `None` so the caller
//! can ask the user to restate the time.

use std::sync::LazyLock;

use chrono::{DateTime, Duration, NaiveDateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use regex::Regex;

static CLOCK_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d{1,2})點(?:\s*(\d{1,2})分?)?").expect("Hard-coded pattern is valid.")
});

/// Resolves `time_text` against the civil time `now`.
///
/// Returns `None` for malformed expressions (no clock reading, or an hour
/// or minute outside the valid range). The returned instant is always
/// strictly later than `now`: a wall-clock time that already passed today
/// rolls forward by exactly one day.
pub fn resolve(time_text: &str, now: NaiveDateTime) -> Option<NaiveDateTime> {
    let caps = CLOCK_PATTERN.captures(time_text)?;

    let mut hour: u32 = caps[1].parse().ok()?;
    let minute: u32 = match caps.get(2) {
        Some(m) => m.as_str().parse().ok()?,
        None => 0,
    };

    if is_afternoon_or_evening(time_text) && hour < 12 {
        hour += 12;
    }

    // Out-of-range hour or minute means the expression is malformed,
    // not that the process should panic.
    let time = NaiveTime::from_hms_opt(hour, minute, 0)?;
    let date = now
        .date()
        .checked_add_signed(Duration::days(day_offset(time_text)))?;

    let mut candidate = date.and_time(time);
    if candidate <= now {
        candidate = candidate.checked_add_signed(Duration::days(1))?;
    }

    Some(candidate)
}

/// Resolves `time_text` against the current moment in `tz`.
pub fn resolve_in_zone(time_text: &str, tz: Tz) -> Option<DateTime<Tz>> {
    let now = Utc::now().with_timezone(&tz);
    let resolved = resolve(time_text, now.naive_local())?;

    match tz.from_local_datetime(&resolved) {
        chrono::LocalResult::Single(instant) => Some(instant),
        chrono::LocalResult::Ambiguous(earliest, _) => Some(earliest),
        // The resolved wall-clock time falls into a DST gap.
        chrono::LocalResult::None => Option::None,
    }
}

fn day_offset(time_text: &str) -> i64 {
    if time_text.contains("後天") {
        2
    } else if time_text.contains("明天") {
        1
    } else {
        0
    }
}

fn is_afternoon_or_evening(time_text: &str) -> bool {
    time_text.contains("下午") || time_text.contains("晚上")
}
