//! Textual field coercion for raw source cells.
//!
//! # Responsibility
//! - Convert raw text into typed column values.
//! - Act as the single place where raw field text is parsed.
//!
//! # Invariants
//! - Every function is total: unparseable input yields `None`, never an error.
//! - `parse_bool` maps only a missing cell to `None`; an empty cell is `false`.

use chrono::{NaiveDate, NaiveDateTime};
use once_cell::sync::Lazy;
use regex::Regex;

const DATE_FORMAT: &str = "%Y-%m-%d";
const DATETIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";
const TRUTHY_VALUES: &[&str] = &["true", "1", "yes", "oui", "o"];

static DATE_SHAPE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[0-9]{4}-[0-9]{2}-[0-9]{2}$").expect("valid date regex"));
static DATETIME_SHAPE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[0-9]{4}-[0-9]{2}-[0-9]{2}T[0-9]{2}:[0-9]{2}:[0-9]{2}$")
        .expect("valid datetime regex")
});

/// Parses a `YYYY-MM-DD` calendar date.
///
/// Any other shape, including the empty string, yields `None`.
pub fn parse_date(value: &str) -> Option<NaiveDate> {
    if !DATE_SHAPE_RE.is_match(value) {
        return None;
    }
    NaiveDate::parse_from_str(value, DATE_FORMAT).ok()
}

/// Parses a `YYYY-MM-DDTHH:MM:SS` timestamp without zone.
pub fn parse_datetime(value: &str) -> Option<NaiveDateTime> {
    if !DATETIME_SHAPE_RE.is_match(value) {
        return None;
    }
    NaiveDateTime::parse_from_str(value, DATETIME_FORMAT).ok()
}

/// Parses a base-10 integer, tolerating surrounding whitespace.
pub fn parse_int(value: &str) -> Option<i64> {
    value.trim().parse::<i64>().ok()
}

/// Parses a yes/no flag.
///
/// `None` only when the cell itself is missing. Otherwise matches
/// `true|1|yes|oui|o` case-insensitively; every other string, including
/// the empty one, is `false`.
pub fn parse_bool(value: Option<&str>) -> Option<bool> {
    let value = value?;
    let lowered = value.to_lowercase();
    Some(TRUTHY_VALUES.contains(&lowered.as_str()))
}

/// Formats a date the way it is stored and serialized (`YYYY-MM-DD`).
pub fn format_date(value: &NaiveDate) -> String {
    value.format(DATE_FORMAT).to_string()
}

/// Formats a timestamp the way it is stored and serialized.
///
/// Sub-second precision is only emitted when present.
pub fn format_datetime(value: &NaiveDateTime) -> String {
    value.format("%Y-%m-%dT%H:%M:%S%.f").to_string()
}

#[cfg(test)]
mod tests {
    use super::{format_date, format_datetime, parse_bool, parse_date, parse_datetime, parse_int};
    use chrono::NaiveDate;

    #[test]
    fn parse_date_accepts_only_iso_dates() {
        assert_eq!(
            parse_date("2022-01-01"),
            NaiveDate::from_ymd_opt(2022, 1, 1)
        );
        assert_eq!(parse_date("01/01/2022"), None);
        assert_eq!(parse_date(""), None);
        assert_eq!(parse_date("2022-1-1"), None);
        assert_eq!(parse_date("2022-02-30"), None);
        assert_eq!(parse_date("2022-01-01T00:00:00"), None);
    }

    #[test]
    fn parse_datetime_requires_t_separator_and_seconds() {
        let parsed = parse_datetime("2023-05-17T08:30:15").expect("valid datetime");
        assert_eq!(format_datetime(&parsed), "2023-05-17T08:30:15");

        assert_eq!(parse_datetime("2023-05-17 08:30:15"), None);
        assert_eq!(parse_datetime("2023-05-17T08:30"), None);
        assert_eq!(parse_datetime("2023-05-17"), None);
        assert_eq!(parse_datetime(""), None);
    }

    #[test]
    fn parse_int_returns_none_for_empty_or_garbage() {
        assert_eq!(parse_int("42"), Some(42));
        assert_eq!(parse_int("-7"), Some(-7));
        assert_eq!(parse_int(" 12 "), Some(12));
        assert_eq!(parse_int(""), None);
        assert_eq!(parse_int("NN"), None);
        assert_eq!(parse_int("1.5"), None);
    }

    #[test]
    fn parse_bool_distinguishes_missing_from_empty() {
        assert_eq!(parse_bool(None), None);
        assert_eq!(parse_bool(Some("")), Some(false));
        assert_eq!(parse_bool(Some("OUI")), Some(true));
        assert_eq!(parse_bool(Some("o")), Some(true));
        assert_eq!(parse_bool(Some("True")), Some(true));
        assert_eq!(parse_bool(Some("1")), Some(true));
        assert_eq!(parse_bool(Some("nope")), Some(false));
        assert_eq!(parse_bool(Some("false")), Some(false));
    }

    #[test]
    fn format_date_does_not_append_time() {
        let date = NaiveDate::from_ymd_opt(2022, 1, 1).expect("valid date");
        assert_eq!(format_date(&date), "2022-01-01");
    }
}
