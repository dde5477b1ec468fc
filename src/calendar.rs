use std::collections::BTreeSet;
use std::path::Path;

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc, Weekday};
use serde::{Deserialize, Serialize};

use crate::error::SchedulingError;
use crate::limits::*;
use crate::model::Span;
use crate::time::{parse_clock_time, parse_weekday, ClockTime, LocalInstant, ShopZone, MINUTES_PER_DAY};

/// Inclusive range of calendar dates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }
}

/// The shop's schedule document, as stored by the configuration owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShopConfig {
    pub opening_time: String,
    pub closing_time: String,
    pub slot_minutes: u32,
    pub working_days: Vec<String>,
    pub vacations: Vec<DateRange>,
    pub closed_dates: Vec<NaiveDate>,
}

impl Default for ShopConfig {
    fn default() -> Self {
        Self {
            opening_time: "08:00".into(),
            closing_time: "17:00".into(),
            slot_minutes: 60,
            working_days: ["monday", "tuesday", "wednesday", "thursday", "friday", "saturday"]
                .into_iter()
                .map(String::from)
                .collect(),
            vacations: Vec::new(),
            closed_dates: Vec::new(),
        }
    }
}

impl ShopConfig {
    pub fn from_json_file(path: &Path) -> std::io::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        serde_json::from_str(&text)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }
}

/// Parsed, validated form of [`ShopConfig`] bound to the shop zone.
#[derive(Debug, Clone)]
pub struct ShopCalendar {
    zone: ShopZone,
    open: ClockTime,
    close: ClockTime,
    slot_minutes: u32,
    working_days: BTreeSet<u8>,
    vacations: Vec<DateRange>,
    closed_dates: BTreeSet<NaiveDate>,
}

impl ShopCalendar {
    pub fn new(config: &ShopConfig, zone: ShopZone) -> Result<Self, SchedulingError> {
        let open = ClockTime::from_minutes(parse_clock_time(&config.opening_time)?);
        let close = ClockTime::from_minutes(parse_clock_time(&config.closing_time)?);
        if open >= close {
            return Err(SchedulingError::InvalidConfig(format!(
                "opening time {open} must be before closing time {close}"
            )));
        }
        if !(MIN_SLOT_MINUTES..=MAX_SLOT_MINUTES).contains(&config.slot_minutes) {
            return Err(SchedulingError::InvalidConfig(format!(
                "slot length {} min out of range",
                config.slot_minutes
            )));
        }
        if config.vacations.len() > MAX_VACATION_RANGES {
            return Err(SchedulingError::InvalidConfig("too many vacation ranges".into()));
        }
        if config.closed_dates.len() > MAX_CLOSED_DATES {
            return Err(SchedulingError::InvalidConfig("too many closed dates".into()));
        }
        if let Some(bad) = config.vacations.iter().find(|v| v.start > v.end) {
            return Err(SchedulingError::InvalidConfig(format!(
                "vacation range {} to {} ends before it starts",
                bad.start, bad.end
            )));
        }
        let working_days = config
            .working_days
            .iter()
            .map(|name| parse_weekday(name).map(|d| d.num_days_from_monday() as u8))
            .collect::<Result<BTreeSet<_>, _>>()?;

        Ok(Self {
            zone,
            open,
            close,
            slot_minutes: config.slot_minutes,
            working_days,
            vacations: config.vacations.clone(),
            closed_dates: config.closed_dates.iter().copied().collect(),
        })
    }

    pub fn zone(&self) -> ShopZone {
        self.zone
    }

    pub fn opening(&self) -> ClockTime {
        self.open
    }

    pub fn closing(&self) -> ClockTime {
        self.close
    }

    pub fn works_on(&self, weekday: Weekday) -> bool {
        self.working_days.contains(&(weekday.num_days_from_monday() as u8))
    }

    /// Date-level checks: vacations, closed dates, weekday policy, in that order.
    pub fn check_date(&self, date: NaiveDate) -> Result<(), SchedulingError> {
        if let Some(v) = self.vacations.iter().find(|v| v.contains(date)) {
            return Err(SchedulingError::ShopOnVacation {
                start: v.start,
                end: v.end,
            });
        }
        if self.closed_dates.contains(&date) {
            return Err(SchedulingError::ShopClosed(date));
        }
        let weekday = date.weekday();
        if !self.works_on(weekday) {
            return Err(SchedulingError::NonWorkingWeekday(weekday));
        }
        Ok(())
    }

    /// Whether `[start, start + duration)` fits inside business hours.
    pub fn check_hours(&self, start: ClockTime, duration_minutes: u32) -> Result<(), SchedulingError> {
        let end = ClockTime::from_minutes(start.minutes() + duration_minutes);
        if start < self.open || end > self.close || end.minutes() > MINUTES_PER_DAY {
            return Err(SchedulingError::OutsideBusinessHours {
                start,
                end,
                open: self.open,
                close: self.close,
            });
        }
        Ok(())
    }

    /// Full admission check for a proposed start, independent of bookings.
    pub fn check(&self, start: &LocalInstant, duration_minutes: u32) -> Result<(), SchedulingError> {
        self.check_date(start.calendar_date())?;
        self.check_hours(start.clock_time(), duration_minutes)
    }

    /// Slot starts on `date`, at slot granularity from opening, that pass the
    /// calendar and do not overlap any `busy` span.
    pub fn open_slots(&self, date: NaiveDate, duration_minutes: u32, busy: &[Span]) -> Vec<DateTime<Utc>> {
        if self.check_date(date).is_err() {
            return Vec::new();
        }
        let mut slots = Vec::new();
        let mut minute = self.open.minutes();
        while minute + duration_minutes <= self.close.minutes() {
            let start = self.zone.at(date, ClockTime::from_minutes(minute));
            let local = self.zone.localize(start);
            // DST shifts can push a wall-clock slot onto a different minute.
            if local.calendar_date() == date && self.check(&local, duration_minutes).is_ok() {
                let span = Span::new(start, start + Duration::minutes(i64::from(duration_minutes)));
                if !busy.iter().any(|b| b.overlaps(&span)) {
                    slots.push(start);
                }
            }
            minute += self.slot_minutes;
        }
        slots.dedup();
        slots
    }
}
