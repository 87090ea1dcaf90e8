//! Occurrence and schedule records.
//!
//! Defines the id newtypes (with their store-key prefixes), [`TimeOfDay`],
//! [`WeekdaySet`], the [`RecurrenceRule`] variant, and the two record types
//! the engine keeps in the durable store.

use crate::error::{Result, SnoozeError};
use chrono::{NaiveTime, Weekday};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Store-key prefix for occurrence records (also their timer names).
pub const OCCURRENCE_PREFIX: &str = "snoozedTab_";

/// Store-key prefix for schedule records.
pub const SCHEDULE_PREFIX: &str = "recurringSnooze_";

/// Which kind of record a store key addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    Occurrence,
    Schedule,
}

impl RecordKind {
    /// Classify a store key by prefix. `None` for keys the engine does not own.
    #[must_use]
    pub fn of_key(key: &str) -> Option<Self> {
        if key.starts_with(OCCURRENCE_PREFIX) {
            Some(Self::Occurrence)
        } else if key.starts_with(SCHEDULE_PREFIX) {
            Some(Self::Schedule)
        } else {
            None
        }
    }
}

macro_rules! prefixed_id {
    ($(#[$meta:meta])* $name:ident, $prefix:expr) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Mint a fresh random id.
            #[must_use]
            pub fn generate() -> Self {
                Self(format!("{}{}", $prefix, uuid::Uuid::new_v4()))
            }

            /// Wrap an existing key, rejecting keys without the right prefix.
            #[must_use]
            pub fn parse(key: &str) -> Option<Self> {
                let rest = key.strip_prefix($prefix)?;
                if rest.is_empty() {
                    return None;
                }
                Some(Self(key.to_owned()))
            }

            /// The full store key.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

prefixed_id!(
    /// Identifier of an [`Occurrence`]; doubles as its timer name.
    OccurrenceId,
    OCCURRENCE_PREFIX
);

prefixed_id!(
    /// Identifier of a [`Schedule`].
    ScheduleId,
    SCHEDULE_PREFIX
);

/// Wall-clock time of day, serialized as `"HH:MM"` (24-hour).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TimeOfDay {
    hour: u8,
    minute: u8,
}

impl TimeOfDay {
    /// Build a time of day, validating ranges.
    ///
    /// # Errors
    ///
    /// Returns [`SnoozeError::InvalidRule`] when `hour > 23` or `minute > 59`.
    pub fn new(hour: u8, minute: u8) -> Result<Self> {
        if hour > 23 || minute > 59 {
            return Err(SnoozeError::InvalidRule(format!(
                "time {hour:02}:{minute:02} is out of range"
            )));
        }
        Ok(Self { hour, minute })
    }

    #[must_use]
    pub fn hour(self) -> u8 {
        self.hour
    }

    #[must_use]
    pub fn minute(self) -> u8 {
        self.minute
    }

    /// As a [`NaiveTime`] with zero seconds.
    #[must_use]
    pub fn naive(self) -> NaiveTime {
        NaiveTime::from_hms_opt(u32::from(self.hour), u32::from(self.minute), 0)
            .unwrap_or(NaiveTime::MIN)
    }
}

impl FromStr for TimeOfDay {
    type Err = SnoozeError;

    fn from_str(s: &str) -> Result<Self> {
        let bad = || SnoozeError::InvalidRule(format!("time '{s}' is not HH:MM"));
        let (h, m) = s.trim().split_once(':').ok_or_else(bad)?;
        if h.is_empty() || m.len() != 2 {
            return Err(bad());
        }
        let hour = h.parse::<u8>().map_err(|_| bad())?;
        let minute = m.parse::<u8>().map_err(|_| bad())?;
        Self::new(hour, minute)
    }
}

impl TryFrom<String> for TimeOfDay {
    type Error = SnoozeError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<TimeOfDay> for String {
    fn from(value: TimeOfDay) -> Self {
        value.to_string()
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

/// Selected weekdays as a 7-element vector, index 0 = Sunday .. 6 = Saturday.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WeekdaySet([bool; 7]);

impl WeekdaySet {
    /// Wrap a raw Sunday-first selection vector.
    #[must_use]
    pub fn from_flags(flags: [bool; 7]) -> Self {
        Self(flags)
    }

    /// Build from a list of weekdays.
    #[must_use]
    pub fn from_days(days: &[Weekday]) -> Self {
        let mut flags = [false; 7];
        for day in days {
            flags[day.num_days_from_sunday() as usize] = true;
        }
        Self(flags)
    }

    #[must_use]
    pub fn contains(&self, day: Weekday) -> bool {
        self.0[day.num_days_from_sunday() as usize]
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        !self.0.iter().any(|selected| *selected)
    }

    /// Selected weekdays, Sunday first.
    pub fn days(&self) -> impl Iterator<Item = Weekday> + '_ {
        const SUNDAY_FIRST: [Weekday; 7] = [
            Weekday::Sun,
            Weekday::Mon,
            Weekday::Tue,
            Weekday::Wed,
            Weekday::Thu,
            Weekday::Fri,
            Weekday::Sat,
        ];
        SUNDAY_FIRST
            .into_iter()
            .zip(self.0.iter())
            .filter(|(_, selected)| **selected)
            .map(|(day, _)| day)
    }

    #[must_use]
    pub fn flags(&self) -> [bool; 7] {
        self.0
    }
}

/// A recurring rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum RecurrenceRule {
    /// Fire on each selected weekday at `time`.
    Weekly {
        #[serde(rename = "selectedDays")]
        days: WeekdaySet,
        time: TimeOfDay,
    },
    /// Fire on `day` of every month at `time`, clamped to the month's last day.
    Monthly { day: u8, time: TimeOfDay },
}

impl RecurrenceRule {
    /// Check the selection is usable.
    ///
    /// # Errors
    ///
    /// Returns [`SnoozeError::InvalidRule`] for an empty weekday set or a
    /// day-of-month outside `1..=31`.
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::Weekly { days, .. } if days.is_empty() => Err(SnoozeError::InvalidRule(
                "select at least one weekday".to_owned(),
            )),
            Self::Monthly { day, .. } if !(1..=31).contains(day) => Err(
                SnoozeError::InvalidRule(format!("day of month {day} is not in 1..=31")),
            ),
            _ => Ok(()),
        }
    }

    #[must_use]
    pub fn time(&self) -> TimeOfDay {
        match self {
            Self::Weekly { time, .. } | Self::Monthly { time, .. } => *time,
        }
    }
}

impl fmt::Display for RecurrenceRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Weekly { days, time } => {
                let names: Vec<String> = days.days().map(|d| d.to_string()).collect();
                write!(f, "weekly on {} at {time}", names.join(", "))
            }
            Self::Monthly { day, time } => write!(f, "monthly on day {day} at {time}"),
        }
    }
}

/// One scheduled firing of the reopen action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Occurrence {
    pub id: OccurrenceId,
    /// Resource to reopen.
    pub url: String,
    /// Presentation-only title.
    pub title: Option<String>,
    /// Epoch milliseconds.
    pub fires_at: i64,
    /// Owning schedule, present iff this occurrence belongs to a recurring series.
    pub schedule_id: Option<ScheduleId>,
}

impl Occurrence {
    /// New one-off occurrence with a fresh id.
    #[must_use]
    pub fn one_off(url: impl Into<String>, title: Option<String>, fires_at: i64) -> Self {
        Self {
            id: OccurrenceId::generate(),
            url: url.into(),
            title,
            fires_at,
            schedule_id: None,
        }
    }

    /// New occurrence materialized from `schedule` at `fires_at`.
    #[must_use]
    pub fn for_schedule(schedule: &Schedule, fires_at: i64) -> Self {
        Self {
            id: OccurrenceId::generate(),
            url: schedule.url.clone(),
            title: schedule.title.clone(),
            fires_at,
            schedule_id: Some(schedule.id.clone()),
        }
    }

    #[must_use]
    pub fn is_recurring(&self) -> bool {
        self.schedule_id.is_some()
    }

    #[must_use]
    pub fn is_due(&self, now_ms: i64) -> bool {
        self.fires_at <= now_ms
    }
}

/// A recurring rule that produces one occurrence at a time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schedule {
    pub id: ScheduleId,
    pub url: String,
    pub title: Option<String>,
    pub rule: RecurrenceRule,
    /// Cached next firing (epoch ms); re-derivable from `rule` when stale.
    pub next_occurrence_at: Option<i64>,
}

impl Schedule {
    /// New schedule with a fresh id and no cached next occurrence.
    #[must_use]
    pub fn new(url: impl Into<String>, title: Option<String>, rule: RecurrenceRule) -> Self {
        Self {
            id: ScheduleId::generate(),
            url: url.into(),
            title,
            rule,
            next_occurrence_at: None,
        }
    }
}
