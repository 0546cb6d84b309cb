//! Period label handling.
//!
//! A period is an opaque label of the form `start~end`, e.g.
//! `2024-01-01~2024-01-07`. Only the start date takes part in ordering and
//! monthly bucketing; the label itself is always kept verbatim.
//!
//! # Ordering
//!
//! Labels are ordered by their parsed start date. A label whose start cannot
//! be parsed (including the empty label) has no date and sorts before every
//! dated label. Callers sort stably, so undated labels keep their relative
//! order.
//!
//! ```
//! use querytrend_core::period;
//!
//! assert!(period::start_date("").is_none());
//! assert_eq!(period::month_key("2024-03-25~2024-03-31"), "2024-03");
//! ```

use std::cmp::Ordering;

use time::{Date, Month};

/// Separator between the start and end of a period label.
pub const SEPARATOR: char = '~';

/// The raw start portion of a period label (text before the first `~`), trimmed.
pub fn start_str(label: &str) -> &str {
    label.split(SEPARATOR).next().unwrap_or("").trim()
}

/// Parse the start date of a period label.
///
/// Accepts `YYYY-MM-DD`, `YYYY/MM/DD` and `YYYY.MM.DD` with or without zero
/// padding. Anything after the first whitespace (a time component) is ignored.
pub fn start_date(label: &str) -> Option<Date> {
    let start = start_str(label).split_whitespace().next()?;

    let mut parts = start.split(['-', '/', '.']);
    let year: i32 = parts.next()?.parse().ok()?;
    let month: u8 = parts.next()?.parse().ok()?;
    let day: u8 = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }

    let month = Month::try_from(month).ok()?;
    Date::from_calendar_date(year, month, day).ok()
}

/// Compare two labels chronologically by start date (undated first).
pub fn compare(a: &str, b: &str) -> Ordering {
    start_date(a).cmp(&start_date(b))
}

/// Calendar month bucket (`YYYY-MM`) of a period.
///
/// Labels with an unparseable start fall back to the first seven characters
/// of the raw start string.
pub fn month_key(label: &str) -> String {
    match start_date(label) {
        Some(date) => format!("{:04}-{:02}", date.year(), u8::from(date.month())),
        None => start_str(label).chars().take(7).collect(),
    }
}

/// Stable permutation that puts `labels` in chronological order.
///
/// `order[i]` is the index of the label that belongs at position `i`.
pub(crate) fn chronological_order<S: AsRef<str>>(labels: &[S]) -> Vec<usize> {
    let keys: Vec<Option<Date>> = labels.iter().map(|l| start_date(l.as_ref())).collect();
    let mut order: Vec<usize> = (0..labels.len()).collect();
    order.sort_by_key(|&i| keys[i]);
    order
}
