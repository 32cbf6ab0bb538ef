//! Comment timestamp parsing
//!
//! Comment screenshots show times the way the source platform renders
//! them: "昨天 21:58", "3小时前", "11月1日", "2 days ago" and so on. All of
//! them are read as civil time in one fixed UTC offset (UTC+8 by default),
//! independent of the host timezone.

use std::sync::Arc;

use chrono::{
    DateTime, Datelike, Duration, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, TimeZone,
};
use lazy_static::lazy_static;
use regex::Regex;

use crate::clock::Clock;
use crate::error::{AppError, Result};

lazy_static! {
    static ref CLOCK_TIME: Regex = Regex::new(r"(\d{1,2}):(\d{2})").expect("valid regex");
    static ref BARE_CLOCK_TIME: Regex = Regex::new(r"^\d{1,2}:\d{2}$").expect("valid regex");
    static ref DAYS_AGO: Regex =
        Regex::new(r"(?i)(\d+)\s*(?:天前|days?\s+ago)").expect("valid regex");
    static ref HOURS_AGO: Regex =
        Regex::new(r"(?i)(\d+)\s*(?:小时前|(?:hours?|hrs?)\s+ago)").expect("valid regex");
    static ref MINUTES_AGO: Regex =
        Regex::new(r"(?i)(\d+)\s*(?:分钟前|(?:minutes?|mins?)\s+ago)").expect("valid regex");
    static ref FULL_DATE: Regex = Regex::new(
        r"(\d{4})\s*(?:年\s*(\d{1,2})\s*月\s*(\d{1,2})\s*日|/(\d{1,2})/(\d{1,2}))"
    )
    .expect("valid regex");
    static ref MONTH_DAY: Regex =
        Regex::new(r"(\d{1,2})\s*月\s*(\d{1,2})\s*日").expect("valid regex");
    static ref MONTH_NAME_DAY: Regex = Regex::new(
        r"(?i)\b(jan|feb|mar|apr|may|jun|jul|aug|sep|oct|nov|dec)[a-z]*\.?\s+(\d{1,2})\b"
    )
    .expect("valid regex");
    static ref ISO_DATE: Regex =
        Regex::new(r"(\d{4})-(\d{1,2})-(\d{1,2})").expect("valid regex");
}

const MONTHS: [&str; 12] = [
    "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
];

/// Outcome of checking a comment time against the recency window
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recency {
    /// Expression could not be read; recency is not enforced
    Unknown,
    /// Inside the window
    Recent(DateTime<FixedOffset>),
    /// Older than the window; `age` is human-readable ("3 days ago")
    Stale {
        at: DateTime<FixedOffset>,
        age: String,
    },
    /// Claims to be from the future
    Future(DateTime<FixedOffset>),
}

/// Parses and checks comment timestamps in a fixed civil timezone
#[derive(Debug, Clone)]
pub struct CommentTimeValidator {
    offset: FixedOffset,
    clock: Arc<dyn Clock>,
}

impl CommentTimeValidator {
    pub fn new(offset_hours: i32, clock: Arc<dyn Clock>) -> Result<Self> {
        let offset = FixedOffset::east_opt(offset_hours * 3600).ok_or_else(|| {
            AppError::Config(format!("invalid timezone offset: {} hours", offset_hours))
        })?;
        Ok(Self { offset, clock })
    }

    /// Current instant in the reference timezone
    pub fn now(&self) -> DateTime<FixedOffset> {
        self.clock.now().with_timezone(&self.offset)
    }

    /// Read a free-form time expression; `None` when nothing matches
    pub fn parse(&self, expression: &str) -> Option<DateTime<FixedOffset>> {
        parse_at(expression, self.now())
    }

    /// True iff `0 <= now - at <= max_days` days
    pub fn is_recent(&self, at: DateTime<FixedOffset>, max_days: i64) -> bool {
        is_within(self.now(), at, max_days)
    }

    /// "N days ago" / "N hours ago" / "N minutes ago" / "just now"
    pub fn format_age(&self, at: DateTime<FixedOffset>) -> String {
        format_age(self.now() - at)
    }

    pub fn check(&self, expression: &str, max_days: i64) -> Recency {
        let now = self.now();
        let Some(at) = parse_at(expression, now) else {
            return Recency::Unknown;
        };

        if at > now {
            Recency::Future(at)
        } else if is_within(now, at, max_days) {
            Recency::Recent(at)
        } else {
            Recency::Stale {
                at,
                age: format_age(now - at),
            }
        }
    }
}

fn is_within(now: DateTime<FixedOffset>, at: DateTime<FixedOffset>, max_days: i64) -> bool {
    let age = now - at;
    let Some(window) = Duration::try_days(max_days) else {
        return age >= Duration::zero();
    };
    age >= Duration::zero() && age <= window
}

fn format_age(age: Duration) -> String {
    let plural = |n: i64, unit: &str| {
        if n == 1 {
            format!("1 {} ago", unit)
        } else {
            format!("{} {}s ago", n, unit)
        }
    };

    if age.num_days() > 0 {
        plural(age.num_days(), "day")
    } else if age.num_hours() > 0 {
        plural(age.num_hours(), "hour")
    } else if age.num_minutes() > 0 {
        plural(age.num_minutes(), "minute")
    } else {
        "just now".to_string()
    }
}

/// Parse `expression` relative to `now`, in `now`'s offset.
pub fn parse_at(expression: &str, now: DateTime<FixedOffset>) -> Option<DateTime<FixedOffset>> {
    let text = expression.split_whitespace().collect::<Vec<_>>().join(" ");
    if text.is_empty() {
        return None;
    }
    let lower = text.to_lowercase();
    let offset = *now.offset();

    let local = |date: NaiveDate, time: NaiveTime| {
        offset.from_local_datetime(&date.and_time(time)).single()
    };
    let clock_time = || {
        CLOCK_TIME.captures(&text).and_then(|c| {
            NaiveTime::from_hms_opt(c[1].parse().ok()?, c[2].parse().ok()?, 0)
        })
    };
    let relative_day = |days_back: i64| {
        let date = now.date_naive().checked_sub_signed(Duration::days(days_back))?;
        local(date, clock_time().unwrap_or(NaiveTime::MIN))
    };

    // "day before yesterday" contains "yesterday", so it goes first
    if text.contains("前天") || lower.contains("day before yesterday") {
        return relative_day(2);
    }
    if text.contains("昨天") || lower.contains("yesterday") {
        return relative_day(1);
    }
    if text.contains("今天") || lower.contains("today") || BARE_CLOCK_TIME.is_match(&text) {
        return relative_day(0);
    }

    if let Some(c) = DAYS_AGO.captures(&text) {
        let days = Duration::try_days(c[1].parse().ok()?)?;
        let midnight = local(now.date_naive(), NaiveTime::MIN)?;
        return midnight.checked_sub_signed(days);
    }
    if let Some(c) = HOURS_AGO.captures(&text) {
        return now.checked_sub_signed(Duration::try_hours(c[1].parse().ok()?)?);
    }
    if let Some(c) = MINUTES_AGO.captures(&text) {
        return now.checked_sub_signed(Duration::try_minutes(c[1].parse().ok()?)?);
    }
    if text.contains("刚刚") || lower.contains("just now") {
        return Some(now);
    }

    // Full dates before month/day, otherwise "2024年10月1日" loses its year
    if let Some(c) = FULL_DATE.captures(&text) {
        let year = c[1].parse().ok()?;
        let month = c.get(2).or(c.get(4))?.as_str().parse().ok()?;
        let day = c.get(3).or(c.get(5))?.as_str().parse().ok()?;
        return local(NaiveDate::from_ymd_opt(year, month, day)?, NaiveTime::MIN);
    }
    if let Some(c) = MONTH_DAY.captures(&text) {
        return month_day(now, c[1].parse().ok()?, c[2].parse().ok()?, clock_time());
    }
    if let Some(c) = MONTH_NAME_DAY.captures(&text) {
        let abbrev = c[1].to_lowercase();
        let month = MONTHS.iter().position(|m| *m == abbrev)? as u32 + 1;
        return month_day(now, month, c[2].parse().ok()?, clock_time());
    }
    // A complete timestamp carries its own offset
    if let Ok(at) = DateTime::parse_from_rfc3339(&text) {
        return Some(at.with_timezone(&offset));
    }
    if let Some(c) = ISO_DATE.captures(&text) {
        let date = NaiveDate::from_ymd_opt(
            c[1].parse().ok()?,
            c[2].parse().ok()?,
            c[3].parse().ok()?,
        )?;
        let rest = &text[c.get(0)?.end()..];
        let time = CLOCK_TIME
            .captures(rest)
            .and_then(|t| NaiveTime::from_hms_opt(t[1].parse().ok()?, t[2].parse().ok()?, 0))
            .unwrap_or(NaiveTime::MIN);
        return local(date, time);
    }

    parse_generic(&text, offset)
}

/// Month/day without a year: this year, or last year if that would be in
/// the future.
fn month_day(
    now: DateTime<FixedOffset>,
    month: u32,
    day: u32,
    time: Option<NaiveTime>,
) -> Option<DateTime<FixedOffset>> {
    let offset = *now.offset();
    let time = time.unwrap_or(NaiveTime::MIN);
    let this_year = NaiveDate::from_ymd_opt(now.year(), month, day)
        .and_then(|d| offset.from_local_datetime(&d.and_time(time)).single());

    match this_year {
        Some(at) if at <= now => Some(at),
        _ => {
            let date = NaiveDate::from_ymd_opt(now.year() - 1, month, day)?;
            offset.from_local_datetime(&date.and_time(time)).single()
        }
    }
}

fn parse_generic(text: &str, offset: FixedOffset) -> Option<DateTime<FixedOffset>> {
    if let Ok(at) = DateTime::parse_from_rfc3339(text) {
        return Some(at.with_timezone(&offset));
    }
    if let Ok(at) = DateTime::parse_from_rfc2822(text) {
        return Some(at.with_timezone(&offset));
    }

    const NAIVE_FORMATS: [&str; 4] = [
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S",
        "%Y/%m/%d %H:%M:%S",
        "%Y.%m.%d %H:%M",
    ];
    NAIVE_FORMATS.iter().find_map(|format| {
        let naive = NaiveDateTime::parse_from_str(text, format).ok()?;
        offset.from_local_datetime(&naive).single()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::Utc;

    fn utc8() -> FixedOffset {
        FixedOffset::east_opt(8 * 3600).unwrap()
    }

    /// 2026-10-18 12:00 in UTC+8
    fn now() -> DateTime<FixedOffset> {
        utc8().with_ymd_and_hms(2026, 10, 18, 12, 0, 0).unwrap()
    }

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<FixedOffset> {
        utc8().with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    fn validator() -> CommentTimeValidator {
        let clock = Arc::new(ManualClock::new(now().with_timezone(&Utc)));
        CommentTimeValidator::new(8, clock).unwrap()
    }

    #[test]
    fn relative_days_with_clock_time() {
        assert_eq!(parse_at("今天 10:00", now()), Some(at(2026, 10, 18, 10, 0)));
        assert_eq!(parse_at("昨天 21:58", now()), Some(at(2026, 10, 17, 21, 58)));
        assert_eq!(parse_at("前天", now()), Some(at(2026, 10, 16, 0, 0)));
        assert_eq!(parse_at("09:15", now()), Some(at(2026, 10, 18, 9, 15)));
        assert_eq!(
            parse_at("Day before yesterday 08:30", now()),
            Some(at(2026, 10, 16, 8, 30))
        );
        assert_eq!(parse_at("yesterday", now()), Some(at(2026, 10, 17, 0, 0)));
    }

    #[test]
    fn relative_offsets() {
        assert_eq!(parse_at("2天前", now()), Some(at(2026, 10, 16, 0, 0)));
        assert_eq!(parse_at("3 days ago", now()), Some(at(2026, 10, 15, 0, 0)));
        assert_eq!(parse_at("5小时前", now()), Some(at(2026, 10, 18, 7, 0)));
        assert_eq!(parse_at("1 hour ago", now()), Some(at(2026, 10, 18, 11, 0)));
        assert_eq!(parse_at("30分钟前", now()), Some(at(2026, 10, 18, 11, 30)));
        assert_eq!(parse_at("刚刚", now()), Some(now()));
        assert_eq!(parse_at("just now", now()), Some(now()));
    }

    #[test]
    fn month_day_rolls_back_a_year_when_in_future() {
        assert_eq!(parse_at("10月17日", now()), Some(at(2026, 10, 17, 0, 0)));
        assert_eq!(parse_at("12月25日", now()), Some(at(2025, 12, 25, 0, 0)));
        assert_eq!(parse_at("Oct 1", now()), Some(at(2026, 10, 1, 0, 0)));
    }

    #[test]
    fn full_dates_keep_their_year() {
        assert_eq!(parse_at("2024年10月1日", now()), Some(at(2024, 10, 1, 0, 0)));
        assert_eq!(parse_at("2026/10/17", now()), Some(at(2026, 10, 17, 0, 0)));
        assert_eq!(parse_at("2026-10-17", now()), Some(at(2026, 10, 17, 0, 0)));
        assert_eq!(
            parse_at("2026-10-17 20:45", now()),
            Some(at(2026, 10, 17, 20, 45))
        );
    }

    #[test]
    fn generic_fallback_and_garbage() {
        assert_eq!(
            parse_at("2026-10-17T12:00:00Z", now()),
            Some(at(2026, 10, 17, 20, 0))
        );
        assert_eq!(parse_at("sometime last week", now()), None);
        assert_eq!(parse_at("   ", now()), None);
        assert_eq!(parse_at("99999999999999999999 days ago", now()), None);
    }

    #[test]
    fn independent_of_host_timezone() {
        // 23:30 UTC on the 17th is already the 18th in UTC+8
        let late = Utc.with_ymd_and_hms(2026, 10, 17, 23, 30, 0).unwrap();
        let validator =
            CommentTimeValidator::new(8, Arc::new(ManualClock::new(late))).unwrap();
        assert_eq!(validator.parse("今天 07:00"), Some(at(2026, 10, 18, 7, 0)));
    }

    #[test]
    fn recency_window_boundaries() {
        let validator = validator();
        let exactly_two_days = now() - Duration::days(2);
        assert!(validator.is_recent(exactly_two_days, 2));
        assert!(!validator.is_recent(exactly_two_days - Duration::seconds(1), 2));
        assert!(!validator.is_recent(now() + Duration::seconds(1), 2));
        assert!(!validator.is_recent(now() + Duration::days(400), 2));
        assert!(validator.is_recent(now(), 2));
    }

    #[test]
    fn check_classifies_expressions() {
        let validator = validator();
        assert!(matches!(validator.check("今天 10:00", 2), Recency::Recent(_)));
        assert!(matches!(validator.check("no idea", 2), Recency::Unknown));
        assert!(matches!(validator.check("今天 23:00", 2), Recency::Future(_)));
        assert_eq!(
            validator.check("5天前", 2),
            Recency::Stale {
                at: at(2026, 10, 13, 0, 0),
                age: "5 days ago".to_string(),
            }
        );
    }

    #[test]
    fn age_formatting() {
        assert_eq!(format_age(Duration::days(3) + Duration::hours(5)), "3 days ago");
        assert_eq!(format_age(Duration::days(1)), "1 day ago");
        assert_eq!(format_age(Duration::hours(2)), "2 hours ago");
        assert_eq!(format_age(Duration::minutes(1)), "1 minute ago");
        assert_eq!(format_age(Duration::seconds(20)), "just now");
    }
}
