//! Day-granularity date helpers.
//!
//! Every key in the record and image caches is a `YYYY-MM-DD` day string in
//! UTC.

use chrono::{NaiveDate, Utc};

pub const DAY_FORMAT: &str = "%Y-%m-%d";

/// Today's date in UTC
pub fn today_utc() -> NaiveDate {
    Utc::now().date_naive()
}

pub fn parse_day(day: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(day, DAY_FORMAT).ok()
}

/// Whether a day string parses and falls inside `[first, today]`
pub fn is_valid_date(day: &str, first: NaiveDate) -> bool {
    match parse_day(day) {
        Some(date) => date >= first && date <= today_utc(),
        None => false,
    }
}

/// A uniformly random day in `[first, today]`
pub fn random_date(first: NaiveDate) -> NaiveDate {
    let today = today_utc();
    let span = (today - first).num_days().max(0) as u64;
    first + chrono::Duration::days(fastrand::u64(0..=span) as i64)
}
