//! Timestamp utilities
//!
//! The engine never reads the system clock or sleeps directly; it goes
//! through [`Clock`] so cycles can be simulated without real time passing.

use crate::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Local, NaiveDate, NaiveDateTime, Utc};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// DICOM DA format
pub const DICOM_DATE_FORMAT: &str = "%Y%m%d";

/// Source of "now" and of suspension between polls and cycles
#[async_trait]
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    async fn sleep(&self, duration: Duration);

    /// Wall-clock time in the local timezone, which is how archives stamp studies
    fn local_now(&self) -> NaiveDateTime {
        self.now().with_timezone(&Local).naive_local()
    }
}

/// Real clock backed by `chrono::Utc` and `tokio::time::sleep`
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Virtual clock: `sleep` advances time instantly and records the request
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
    sleeps: Arc<Mutex<Vec<Duration>>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
            sleeps: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn advance(&self, duration: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now = *now + ChronoDuration::from_std(duration).unwrap_or(ChronoDuration::zero());
    }

    /// Every sleep requested so far, in order
    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn sleep(&self, duration: Duration) {
        self.sleeps
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(duration);
        self.advance(duration);
        tokio::task::yield_now().await;
    }

    /// The manual instant doubles as local wall time so tests ignore the host timezone
    fn local_now(&self) -> NaiveDateTime {
        self.now().naive_utc()
    }
}

/// Format a date as DICOM DA (YYYYMMDD)
pub fn format_dicom_date(date: NaiveDate) -> String {
    date.format(DICOM_DATE_FORMAT).to_string()
}

/// Parse a DICOM DA value
pub fn parse_dicom_date(value: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), DICOM_DATE_FORMAT).ok()
}

/// Combine StudyDate and StudyTime into a timestamp.
///
/// Time separators (`.`, `:`) are stripped and short values are right-padded
/// with zeros to HHMMSS; fractional seconds are ignored.
pub fn study_datetime(date: &str, time: &str) -> Option<NaiveDateTime> {
    let mut clean: String = time.chars().filter(|c| *c != '.' && *c != ':').collect();
    while clean.len() < 6 {
        clean.push('0');
    }
    let stamp = format!("{}{}", date.get(..8)?, clean.get(..6)?);
    NaiveDateTime::parse_from_str(&stamp, "%Y%m%d%H%M%S").ok()
}

/// True when the study was acquired no earlier than `hours` before `now`.
///
/// Studies with an unparsable date or time are excluded.
pub fn is_within_last_hours(date: &str, time: &str, now: NaiveDateTime, hours: u32) -> bool {
    match study_datetime(date, time) {
        Some(acquired) => acquired >= hours_before(now, hours),
        None => false,
    }
}

/// Start of a window of `hours` ending at `now`, saturating at the earliest
/// representable time
pub fn hours_before(now: NaiveDateTime, hours: u32) -> NaiveDateTime {
    now.checked_sub_signed(ChronoDuration::hours(i64::from(hours)))
        .unwrap_or(NaiveDateTime::MIN)
}

/// Resolve a day specifier: `today`, `yesterday` or `YYYYMMDD`
pub fn parse_day_keyword(keyword: &str, today: NaiveDate) -> Result<NaiveDate> {
    match keyword.trim().to_lowercase().as_str() {
        "today" => Ok(today),
        "yesterday" => today
            .pred_opt()
            .ok_or_else(|| Error::InvalidScope("no day before today".to_string())),
        other => parse_dicom_date(other).ok_or_else(|| {
            Error::InvalidScope(format!(
                "Invalid day keyword: '{}'. Use 'today', 'yesterday', or YYYYMMDD format",
                keyword
            ))
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(date: &str, time: &str) -> NaiveDateTime {
        study_datetime(date, time).unwrap()
    }

    #[test]
    fn test_study_datetime_normalises_time() {
        assert_eq!(at("20240105", "1230"), at("20240105", "123000"));
        assert_eq!(at("20240105", "12:30:15"), at("20240105", "123015"));
        assert_eq!(at("20240105", "123015.123456"), at("20240105", "123015"));
        assert_eq!(at("20240105", ""), at("20240105", "000000"));
    }

    #[test]
    fn test_study_datetime_rejects_bad_dates() {
        assert!(study_datetime("2024", "120000").is_none());
        assert!(study_datetime("20241399", "120000").is_none());
        assert!(study_datetime("20240105", "2561").is_none());
    }

    #[test]
    fn test_is_within_last_hours() {
        let now = at("20240105", "120000");
        assert!(is_within_last_hours("20240105", "100000", now, 3));
        assert!(is_within_last_hours("20240105", "090000", now, 3));
        assert!(!is_within_last_hours("20240105", "085959", now, 3));
        assert!(is_within_last_hours("20240104", "230000", now, 14));
        assert!(!is_within_last_hours("", "100000", now, 3));
    }

    #[test]
    fn test_oversized_window_includes_everything() {
        let now = at("20240105", "120000");
        assert_eq!(hours_before(now, u32::MAX), NaiveDateTime::MIN);
        assert!(is_within_last_hours("19000101", "000000", now, u32::MAX));
        assert_eq!(hours_before(now, 2), at("20240105", "100000"));
    }

    #[test]
    fn test_parse_day_keyword() {
        let today = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        assert_eq!(parse_day_keyword("today", today).unwrap(), today);
        assert_eq!(
            parse_day_keyword("Yesterday", today).unwrap(),
            NaiveDate::from_ymd_opt(2024, 2, 29).unwrap()
        );
        assert_eq!(
            parse_day_keyword("20231225", today).unwrap(),
            NaiveDate::from_ymd_opt(2023, 12, 25).unwrap()
        );
        assert!(matches!(
            parse_day_keyword("last-week", today),
            Err(Error::InvalidScope(_))
        ));
    }

    #[tokio::test]
    async fn test_manual_clock_sleep_advances_time() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let clock = ManualClock::new(start);
        clock.sleep(Duration::from_secs(60)).await;
        clock.sleep(Duration::from_secs(5)).await;
        assert_eq!(clock.now(), start + ChronoDuration::seconds(65));
        assert_eq!(
            clock.sleeps(),
            vec![Duration::from_secs(60), Duration::from_secs(5)]
        );
    }
}
