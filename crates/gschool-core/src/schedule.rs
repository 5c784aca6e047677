use chrono::{Datelike, NaiveDateTime, Timelike, Weekday};
use gschool_storage::Schedule;

/// Hour and minute of a schedule bound, after clamping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ClockTime {
    hour: u32,
    minute: u32,
}

impl ClockTime {
    const START_OF_DAY: Self = Self { hour: 0, minute: 0 };
    const END_OF_DAY: Self = Self {
        hour: 23,
        minute: 59,
    };

    /// Parse `H[:M]`, clamping into range. Empty or unparsable input yields `fallback`.
    fn parse_or(raw: Option<&str>, fallback: Self) -> Self {
        let Some(raw) = raw.filter(|s| !s.is_empty()) else {
            return fallback;
        };
        let mut parts = raw.splitn(2, ':');
        let hour = parts.next().map(|h| h.trim().parse::<i64>());
        let minute = parts.next().map(|m| m.trim().parse::<i64>());
        match (hour, minute) {
            (Some(Ok(h)), None) => Self::clamped(h, 0),
            (Some(Ok(h)), Some(Ok(m))) => Self::clamped(h, m),
            _ => fallback,
        }
    }

    fn clamped(hour: i64, minute: i64) -> Self {
        // Both values are clamped into small non-negative ranges first
        Self {
            hour: u32::try_from(hour.clamp(0, 23)).unwrap_or(0),
            minute: u32::try_from(minute.clamp(0, 59)).unwrap_or(0),
        }
    }

    const fn minute_of_day(self) -> u32 {
        self.hour * 60 + self.minute
    }
}

/// Whether `schedule` is active at local wall-clock time `now`.
///
/// Equal start and end never match. A start later than the end wraps past midnight.
#[must_use]
pub fn is_active(schedule: &Schedule, now: NaiveDateTime) -> bool {
    if !schedule.enabled {
        return false;
    }
    if schedule.weekdays_only && matches!(now.weekday(), Weekday::Sat | Weekday::Sun) {
        return false;
    }

    let start = ClockTime::parse_or(schedule.start.as_deref(), ClockTime::START_OF_DAY);
    let end = ClockTime::parse_or(schedule.end.as_deref(), ClockTime::END_OF_DAY);
    let (start, end) = (start.minute_of_day(), end.minute_of_day());
    let current = now.hour() * 60 + now.minute();

    if start == end {
        false
    } else if start < end {
        start <= current && current < end
    } else {
        !(end <= current && current < start)
    }
}

/// Effective block flag for a category: a present schedule replaces the static flag
#[must_use]
pub fn effective_block(static_flag: bool, schedule: Option<&Schedule>, now: NaiveDateTime) -> bool {
    schedule.map_or(static_flag, |s| is_active(s, now))
}
