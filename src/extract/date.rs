//! Multi-format publication date parsing.
//!
//! Accepts RFC 3339 / ISO-8601, RFC 2822 and the common human-readable
//! listing formats. Text matching none of them is kept as
//! [`PublishedAt::Unparsed`], never discarded.

use std::sync::LazyLock;

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use regex::Regex;

use crate::article::PublishedAt;

/// Date-time formats without offset; interpreted as UTC.
const DATETIME_FORMATS: [&str; 6] = [
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
    "%B %d, %Y %I:%M %p",
    "%B %d, %Y, %I:%M %p",
];

/// Date-only formats; interpreted as midnight UTC.
const DATE_FORMATS: [&str; 7] = [
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%B %d, %Y",
    "%B %d %Y",
    "%d %B %Y",
    "%d %B, %Y",
    "%m/%d/%Y",
];

/// "4th" -> "4".
#[allow(clippy::expect_used)]
static ORDINAL_SUFFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(\d{1,2})(?:st|nd|rd|th)\b").expect("ordinal regex is valid") // Static pattern, safe to panic
});

/// "Published on:", "Updated", ...
#[allow(clippy::expect_used)]
static LABEL_PREFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?:published|updated|posted)(?:\s+on)?\s*:?\s*")
        .expect("date label regex is valid") // Static pattern, safe to panic
});

/// Parses listing date text.
///
/// # Examples
///
/// ```
/// use newswire::article::PublishedAt;
/// use newswire::extract::parse_published;
///
/// assert!(parse_published("2025-03-04T10:00:00Z").is_parsed());
/// assert!(parse_published("March 4th, 2025").is_parsed());
/// assert_eq!(parse_published("  "), PublishedAt::Unknown);
/// assert_eq!(
///     parse_published("yesterday-ish"),
///     PublishedAt::Unparsed("yesterday-ish".to_string())
/// );
/// ```
#[must_use]
pub fn parse_published(raw: &str) -> PublishedAt {
    let text = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    if text.is_empty() {
        return PublishedAt::Unknown;
    }
    match parse_timestamp(&text) {
        Some(ts) => PublishedAt::Parsed(ts),
        None => PublishedAt::Unparsed(text),
    }
}

/// Interprets a unix timestamp in seconds.
#[must_use]
pub fn from_unix_seconds(seconds: i64) -> PublishedAt {
    match Utc.timestamp_opt(seconds, 0).single() {
        Some(ts) => PublishedAt::Parsed(ts),
        None => PublishedAt::Unparsed(seconds.to_string()),
    }
}

fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(text) {
        return Some(ts.with_timezone(&Utc));
    }
    if let Ok(ts) = DateTime::parse_from_rfc2822(text) {
        return Some(ts.with_timezone(&Utc));
    }

    let cleaned = clean(text);

    if let Ok(ts) = DateTime::parse_from_rfc3339(&cleaned) {
        return Some(ts.with_timezone(&Utc));
    }
    if let Ok(ts) = DateTime::parse_from_str(&cleaned, "%Y-%m-%dT%H:%M:%S%z") {
        return Some(ts.with_timezone(&Utc));
    }
    for format in DATETIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(&cleaned, format) {
            return Some(naive.and_utc());
        }
    }
    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(&cleaned, format) {
            return date.and_hms_opt(0, 0, 0).map(|naive| naive.and_utc());
        }
    }
    if (9..=11).contains(&cleaned.len()) && cleaned.bytes().all(|b| b.is_ascii_digit()) {
        return cleaned.parse::<i64>().ok().and_then(|s| Utc.timestamp_opt(s, 0).single());
    }
    None
}

/// Strips "Published:"-style labels, ordinal suffixes and a trailing period
/// after abbreviated months.
fn clean(text: &str) -> String {
    let out = LABEL_PREFIX.replace(text.trim(), "");
    let mut out = ORDINAL_SUFFIX.replace_all(&out, "$1").into_owned();
    // "Mar. 4, 2025" -> "Mar 4, 2025"
    if let Some((month, rest)) = out.split_once(". ")
        && month.len() <= 5
        && month.chars().all(char::is_alphabetic)
    {
        out = format!("{month} {rest}");
    }
    out
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn ymd(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
    }

    // ==================== Accepted Formats ====================

    #[test]
    fn test_rfc3339_with_offset() {
        assert_eq!(
            parse_published("2025-03-04T10:00:00+02:00"),
            PublishedAt::Parsed(Utc.with_ymd_and_hms(2025, 3, 4, 8, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_rfc2822() {
        assert_eq!(
            parse_published("Tue, 04 Mar 2025 10:00:00 GMT"),
            PublishedAt::Parsed(Utc.with_ymd_and_hms(2025, 3, 4, 10, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_naive_datetime_is_utc() {
        assert_eq!(
            parse_published("2025-03-04 10:30:00"),
            PublishedAt::Parsed(Utc.with_ymd_and_hms(2025, 3, 4, 10, 30, 0).unwrap())
        );
    }

    #[test]
    fn test_human_readable_dates() {
        for text in [
            "March 4, 2025",
            "Mar 4, 2025",
            "Mar. 4, 2025",
            "4 March 2025",
            "March 4th, 2025",
            "03/04/2025",
            "2025-03-04",
            "Published: March 4, 2025",
            "Updated on 2025/03/04",
        ] {
            assert_eq!(parse_published(text), PublishedAt::Parsed(ymd(2025, 3, 4)), "{text}");
        }
    }

    #[test]
    fn test_human_readable_with_time() {
        assert_eq!(
            parse_published("March 4, 2025 3:15 PM"),
            PublishedAt::Parsed(Utc.with_ymd_and_hms(2025, 3, 4, 15, 15, 0).unwrap())
        );
    }

    #[test]
    fn test_unix_seconds_text() {
        assert_eq!(
            parse_published("1741046400"),
            PublishedAt::Parsed(ymd(2025, 3, 4))
        );
        assert_eq!(from_unix_seconds(1_741_046_400), PublishedAt::Parsed(ymd(2025, 3, 4)));
    }

    // ==================== Rejected / Absent ====================

    #[test]
    fn test_empty_is_unknown() {
        assert_eq!(parse_published(""), PublishedAt::Unknown);
        assert_eq!(parse_published(" \n\t "), PublishedAt::Unknown);
    }

    #[test]
    fn test_unrecognized_is_kept_verbatim() {
        assert_eq!(
            parse_published("  2 hours   ago "),
            PublishedAt::Unparsed("2 hours ago".to_string())
        );
    }

    #[test]
    fn test_parsing_is_deterministic() {
        let a = parse_published("March 4, 2025");
        let b = parse_published("March 4, 2025");
        assert_eq!(a, b);
    }
}
