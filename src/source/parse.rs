use std::sync::LazyLock;

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, TimeDelta, Utc};
use regex::Regex;

use crate::app::{CatalogError, Result};

static RELATIVE_DATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(\d+)\s*(sec|second|min|minute|hour|day|week|month|year)s?\s*ago")
        .expect("relative date regex is valid")
});

const DATE_TIME_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M", "%Y/%m/%d %H:%M"];

const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%d/%m/%Y",
    "%B %d, %Y",
    "%b %d, %Y",
    "%d %B %Y",
    "%d %b %Y",
    "%Y年%m月%d日",
];

/// Run a CPU-bound parse on the blocking pool.
pub async fn off_thread<T, F>(parse: F) -> Result<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(parse)
        .await
        .map_err(|e| CatalogError::Other(format!("parser task failed: {}", e)))
}

/// Milliseconds since the epoch for a date as printed on a site, 0 when unknown.
pub fn parse_date_millis(text: &str) -> i64 {
    parse_date_at(text, Utc::now())
}

pub fn parse_date_at(text: &str, now: DateTime<Utc>) -> i64 {
    let text = text.trim();
    if text.is_empty() {
        return 0;
    }

    let lower = text.to_lowercase();
    if lower.contains("just now") || lower == "today" {
        return now.timestamp_millis();
    }
    if lower == "yesterday" {
        return (now - Duration::days(1)).timestamp_millis();
    }

    if let Some(caps) = RELATIVE_DATE.captures(&lower) {
        return match relative_delta(&caps[1], &caps[2]).and_then(|delta| now.checked_sub_signed(delta)) {
            Some(date) => date.timestamp_millis(),
            None => {
                tracing::trace!(text, "Relative date out of range");
                0
            }
        };
    }

    if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
        return parsed.timestamp_millis();
    }
    for format in DATE_TIME_FORMATS {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(text, format) {
            return parsed.and_utc().timestamp_millis();
        }
    }
    for format in DATE_FORMATS {
        if let Ok(parsed) = NaiveDate::parse_from_str(text, format) {
            if let Some(midnight) = parsed.and_hms_opt(0, 0, 0) {
                return midnight.and_utc().timestamp_millis();
            }
        }
    }

    tracing::trace!(text, "Unrecognised date");
    0
}

/// `amount unit` as a duration, `None` when it does not fit.
fn relative_delta(amount: &str, unit: &str) -> Option<TimeDelta> {
    let amount: i64 = amount.parse().ok()?;
    match unit {
        "sec" | "second" => TimeDelta::try_seconds(amount),
        "min" | "minute" => TimeDelta::try_minutes(amount),
        "hour" => TimeDelta::try_hours(amount),
        "day" => TimeDelta::try_days(amount),
        "week" => TimeDelta::try_weeks(amount),
        "month" => TimeDelta::try_days(amount.checked_mul(30)?),
        _ => TimeDelta::try_days(amount.checked_mul(365)?),
    }
}

/// Split genre strings on the separators sites commonly use.
pub fn split_genres(values: Vec<String>) -> Vec<String> {
    let mut genres: Vec<String> = Vec::new();
    for value in values {
        for genre in value.split([',', '、', '|', '/']) {
            let genre = genre.trim();
            if !genre.is_empty() && !genres.iter().any(|g| g.eq_ignore_ascii_case(genre)) {
                genres.push(genre.to_string());
            }
        }
    }
    genres
}
