//! Next-occurrence calculation for recurrence rules and snooze presets.
//!
//! Everything here is pure: callers pass "now" as a zoned [`DateTime`] and
//! get back the next matching instant in the same zone. Wall-clock times
//! that fall into a DST gap resolve to the first valid local minute after
//! the gap; times repeated by a DST fall-back resolve to the earlier instant.

use crate::scheduler::records::{RecurrenceRule, TimeOfDay, WeekdaySet};
use chrono::{
    DateTime, Datelike, Days, LocalResult, NaiveDate, TimeDelta, TimeZone, Weekday,
};
use std::fmt;
use std::str::FromStr;

/// Upper bound on the minute-by-minute scan out of a DST gap.
const MAX_GAP_SCAN_MINUTES: u32 = 24 * 60;

/// Resolve a local calendar date + time of day to an instant in `tz`.
///
/// Returns `None` only if no valid local time exists within a day of the
/// requested one, which no real zone produces.
pub fn resolve_local<Z: TimeZone>(tz: &Z, date: NaiveDate, time: TimeOfDay) -> Option<DateTime<Z>> {
    let mut naive = date.and_time(time.naive());
    for _ in 0..=MAX_GAP_SCAN_MINUTES {
        match tz.from_local_datetime(&naive) {
            LocalResult::Single(dt) => return Some(dt),
            LocalResult::Ambiguous(earliest, _) => return Some(earliest),
            LocalResult::None => naive = naive.checked_add_signed(TimeDelta::minutes(1))?,
        }
    }
    None
}

/// Soonest instant strictly after `now` that falls on a selected weekday at `time`.
///
/// If today is selected but `time` has already passed, today counts as a
/// week away. Returns `None` when no weekday is selected.
pub fn next_weekly<Z: TimeZone>(
    now: &DateTime<Z>,
    days: &WeekdaySet,
    time: TimeOfDay,
) -> Option<DateTime<Z>> {
    let tz = now.timezone();
    let today = now.date_naive();
    let today_idx = today.weekday().num_days_from_sunday();

    let mut soonest: Option<DateTime<Z>> = None;
    for day in days.days() {
        let mut offset = u64::from((day.num_days_from_sunday() + 7 - today_idx) % 7);
        let mut candidate = resolve_local(&tz, today.checked_add_days(Days::new(offset))?, time)?;
        if candidate <= *now {
            offset += 7;
            candidate = resolve_local(&tz, today.checked_add_days(Days::new(offset))?, time)?;
        }
        if soonest.as_ref().is_none_or(|best| candidate < *best) {
            soonest = Some(candidate);
        }
    }
    soonest
}

/// Next instant strictly after `now` on `day_of_month` at `time`.
///
/// A day past the end of a month clamps to that month's last day. If this
/// month's (clamped) occurrence is not in the future, next month's is used,
/// re-clamped for that month. Returns `None` for a day outside `1..=31`.
pub fn next_monthly<Z: TimeZone>(
    now: &DateTime<Z>,
    day_of_month: u8,
    time: TimeOfDay,
) -> Option<DateTime<Z>> {
    if !(1..=31).contains(&day_of_month) {
        return None;
    }
    let tz = now.timezone();
    let local = now.date_naive();

    let this_month = resolve_local(&tz, clamped_date(local.year(), local.month(), day_of_month)?, time)?;
    if this_month > *now {
        return Some(this_month);
    }

    let (year, month) = if local.month() == 12 {
        (local.year() + 1, 1)
    } else {
        (local.year(), local.month() + 1)
    };
    resolve_local(&tz, clamped_date(year, month, day_of_month)?, time)
}

/// Next instant for any rule. `None` when the rule selects nothing valid.
pub fn next_occurrence<Z: TimeZone>(rule: &RecurrenceRule, now: &DateTime<Z>) -> Option<DateTime<Z>> {
    match rule {
        RecurrenceRule::Weekly { days, time } => next_weekly(now, days, *time),
        RecurrenceRule::Monthly { day, time } => next_monthly(now, *day, *time),
    }
}

/// `time` today, or tomorrow if today's has already passed.
pub fn today_or_tomorrow<Z: TimeZone>(now: &DateTime<Z>, time: TimeOfDay) -> Option<DateTime<Z>> {
    let tz = now.timezone();
    let today = now.date_naive();
    let candidate = resolve_local(&tz, today, time)?;
    if candidate > *now {
        return Some(candidate);
    }
    resolve_local(&tz, today.succ_opt()?, time)
}

/// `time` on the calendar day `days` days from today.
///
/// Calendar days are added before the time is applied, so a DST change in
/// between does not shift the wall-clock result.
pub fn days_from_now<Z: TimeZone>(now: &DateTime<Z>, time: TimeOfDay, days: u32) -> Option<DateTime<Z>> {
    let date = now.date_naive().checked_add_days(Days::new(u64::from(days)))?;
    resolve_local(&now.timezone(), date, time)
}

/// Next `weekday` at `time`, strictly in the future.
pub fn next_day_of_week<Z: TimeZone>(
    now: &DateTime<Z>,
    weekday: Weekday,
    time: TimeOfDay,
) -> Option<DateTime<Z>> {
    next_weekly(now, &WeekdaySet::from_days(&[weekday]), time)
}

fn clamped_date(year: i32, month: u32, day: u8) -> Option<NaiveDate> {
    let last = last_day_of_month(year, month)?;
    NaiveDate::from_ymd_opt(year, month, u32::from(day).min(last))
}

fn last_day_of_month(year: i32, month: u32) -> Option<u32> {
    let (next_year, next_month) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
    NaiveDate::from_ymd_opt(next_year, next_month, 1)?
        .pred_opt()
        .map(|d| d.day())
}

/// Quick snooze choices offered next to the custom picker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Preset {
    /// One hour from now.
    OneHour,
    /// 17:00 today, or tomorrow if already past.
    FivePmToday,
    /// 06:00 tomorrow.
    SixAmTomorrow,
    /// 06:00 next Saturday.
    SixAmSaturday,
    /// 09:00 next Monday.
    NineAmMonday,
    /// 06:00, thirty days from today.
    ThirtyDays,
}

impl Preset {
    /// All presets in menu order.
    pub const ALL: [Preset; 6] = [
        Preset::OneHour,
        Preset::FivePmToday,
        Preset::SixAmTomorrow,
        Preset::SixAmSaturday,
        Preset::NineAmMonday,
        Preset::ThirtyDays,
    ];

    /// Menu label.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::OneHour => "1 hour",
            Self::FivePmToday => "5pm today",
            Self::SixAmTomorrow => "6am tomorrow",
            Self::SixAmSaturday => "6am Saturday",
            Self::NineAmMonday => "9am Monday",
            Self::ThirtyDays => "30 days",
        }
    }

    /// Stable machine name (`one-hour`, `5pm-today`, ...).
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::OneHour => "one-hour",
            Self::FivePmToday => "5pm-today",
            Self::SixAmTomorrow => "6am-tomorrow",
            Self::SixAmSaturday => "6am-saturday",
            Self::NineAmMonday => "9am-monday",
            Self::ThirtyDays => "30-days",
        }
    }

    /// When this preset fires, relative to `now`.
    pub fn fire_at<Z: TimeZone>(self, now: &DateTime<Z>) -> Option<DateTime<Z>> {
        let at = |hour: u8| TimeOfDay::new(hour, 0).ok();
        match self {
            Self::OneHour => now.clone().checked_add_signed(TimeDelta::hours(1)),
            Self::FivePmToday => today_or_tomorrow(now, at(17)?),
            Self::SixAmTomorrow => days_from_now(now, at(6)?, 1),
            Self::SixAmSaturday => next_day_of_week(now, Weekday::Sat, at(6)?),
            Self::NineAmMonday => next_day_of_week(now, Weekday::Mon, at(9)?),
            Self::ThirtyDays => days_from_now(now, at(6)?, 30),
        }
    }
}

impl fmt::Display for Preset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Preset {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|p| p.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| {
                let names: Vec<&str> = Self::ALL.iter().map(|p| p.name()).collect();
                format!("unknown preset '{s}' (expected one of: {})", names.join(", "))
            })
    }
}
