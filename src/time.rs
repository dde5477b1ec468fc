//! Wall-clock helpers for the shop's single local time zone.
//!
//! Instants are stored as `DateTime<Utc>`. Every calendar computation goes
//! through [`ShopZone::localize`], which yields a [`LocalInstant`]; nothing
//! else in the crate reads hours, minutes or dates off a UTC value.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, TimeZone, Timelike, Utc, Weekday};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::error::SchedulingError;

pub const MINUTES_PER_DAY: u32 = 24 * 60;

/// Minutes since local midnight. May exceed 24:00 when used as an end bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClockTime(u32);

impl ClockTime {
    pub const fn from_minutes(minutes: u32) -> Self {
        Self(minutes)
    }

    pub fn minutes(self) -> u32 {
        self.0
    }
}

impl fmt::Display for ClockTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.0 / 60, self.0 % 60)
    }
}

impl FromStr for ClockTime {
    type Err = SchedulingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_clock_time(s).map(ClockTime)
    }
}

/// Parse strict 24h `HH:MM` into minutes since midnight.
pub fn parse_clock_time(text: &str) -> Result<u32, SchedulingError> {
    let invalid = |reason| SchedulingError::InvalidFormat {
        input: text.to_string(),
        reason,
    };
    let bytes = text.as_bytes();
    if bytes.len() != 5 || bytes[2] != b':' {
        return Err(invalid("expected HH:MM"));
    }
    let digits = [bytes[0], bytes[1], bytes[3], bytes[4]];
    if !digits.iter().all(u8::is_ascii_digit) {
        return Err(invalid("expected HH:MM"));
    }
    let hour = u32::from(digits[0] - b'0') * 10 + u32::from(digits[1] - b'0');
    let minute = u32::from(digits[2] - b'0') * 10 + u32::from(digits[3] - b'0');
    if hour > 23 || minute > 59 {
        return Err(invalid("hour or minute out of range"));
    }
    Ok(hour * 60 + minute)
}

/// The one time zone all shop calendar math happens in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShopZone(Tz);

impl ShopZone {
    pub const fn new(tz: Tz) -> Self {
        Self(tz)
    }

    pub fn tz(&self) -> Tz {
        self.0
    }

    pub fn localize(&self, instant: DateTime<Utc>) -> LocalInstant {
        LocalInstant(instant.with_timezone(&self.0))
    }

    /// Local midnight of `date` as a UTC instant.
    ///
    /// On a day whose midnight falls into a DST gap the first valid local
    /// instant of the day is used.
    pub fn start_of_day(&self, date: NaiveDate) -> DateTime<Utc> {
        self.at(date, ClockTime::from_minutes(0))
    }

    /// UTC instant for a local wall-clock time on `date`.
    pub fn at(&self, date: NaiveDate, time: ClockTime) -> DateTime<Utc> {
        let naive = date.and_time(NaiveTime::MIN) + Duration::minutes(i64::from(time.minutes()));
        let mut probe = naive;
        // Step forward out of a DST gap; a gap never exceeds a few hours.
        for _ in 0..(4 * 60) {
            if let Some(local) = self.0.from_local_datetime(&probe).earliest() {
                return local.with_timezone(&Utc);
            }
            probe += Duration::minutes(1);
        }
        Utc.from_utc_datetime(&naive)
    }
}

impl Default for ShopZone {
    fn default() -> Self {
        Self(chrono_tz::America::Argentina::Buenos_Aires)
    }
}

impl FromStr for ShopZone {
    type Err = SchedulingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<Tz>()
            .map(ShopZone)
            .map_err(|_| SchedulingError::InvalidFormat {
                input: s.to_string(),
                reason: "unknown IANA time zone",
            })
    }
}

/// An instant already projected into the shop zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct LocalInstant(DateTime<Tz>);

impl LocalInstant {
    pub fn minutes_since_midnight(&self) -> u32 {
        self.0.hour() * 60 + self.0.minute()
    }

    pub fn clock_time(&self) -> ClockTime {
        ClockTime(self.minutes_since_midnight())
    }

    pub fn calendar_date(&self) -> NaiveDate {
        self.0.date_naive()
    }

    pub fn weekday(&self) -> Weekday {
        self.0.weekday()
    }

    pub fn same_calendar_day(&self, other: &LocalInstant) -> bool {
        self.calendar_date() == other.calendar_date()
    }

    pub fn to_utc(&self) -> DateTime<Utc> {
        self.0.with_timezone(&Utc)
    }
}

/// Half-open overlap test: back-to-back intervals do not overlap.
pub fn intervals_overlap<T: PartialOrd>(start_a: T, end_a: T, start_b: T, end_b: T) -> bool {
    start_a < end_b && start_b < end_a
}

/// Parse a weekday name in English or Spanish, with or without accents.
pub fn parse_weekday(name: &str) -> Result<Weekday, SchedulingError> {
    let lower = name.trim().to_lowercase();
    let day = match lower.as_str() {
        "monday" | "mon" | "lunes" => Weekday::Mon,
        "tuesday" | "tue" | "martes" => Weekday::Tue,
        "wednesday" | "wed" | "miercoles" | "miércoles" => Weekday::Wed,
        "thursday" | "thu" | "jueves" => Weekday::Thu,
        "friday" | "fri" | "viernes" => Weekday::Fri,
        "saturday" | "sat" | "sabado" | "sábado" => Weekday::Sat,
        "sunday" | "sun" | "domingo" => Weekday::Sun,
        _ => {
            return Err(SchedulingError::InvalidFormat {
                input: name.to_string(),
                reason: "unknown weekday name",
            });
        }
    };
    Ok(day)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utc(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn parse_clock_time_accepts_strict_format() {
        assert_eq!(parse_clock_time("00:00").unwrap(), 0);
        assert_eq!(parse_clock_time("08:30").unwrap(), 510);
        assert_eq!(parse_clock_time("23:59").unwrap(), 1439);
    }

    #[test]
    fn parse_clock_time_rejects_bad_input() {
        for bad in ["8:00", "24:00", "12:60", "12-00", "ab:cd", "", "12:000", " 8:00"] {
            let err = parse_clock_time(bad).unwrap_err();
            assert!(
                matches!(err, SchedulingError::InvalidFormat { .. }),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn clock_time_display() {
        assert_eq!(ClockTime::from_minutes(545).to_string(), "09:05");
        assert_eq!("17:00".parse::<ClockTime>().unwrap().minutes(), 1020);
    }

    #[test]
    fn localize_uses_shop_zone_not_utc() {
        // 2024-01-15T02:30Z is still Sunday 23:30 in Buenos Aires (UTC-3).
        let zone = ShopZone::default();
        let local = zone.localize(utc("2024-01-15T02:30:00Z"));
        assert_eq!(local.minutes_since_midnight(), 23 * 60 + 30);
        assert_eq!(local.calendar_date(), NaiveDate::from_ymd_opt(2024, 1, 14).unwrap());
        assert_eq!(local.weekday(), Weekday::Sun);
    }

    #[test]
    fn same_calendar_day_in_local_zone() {
        let zone = ShopZone::default();
        let a = zone.localize(utc("2024-01-15T12:00:00Z"));
        let b = zone.localize(utc("2024-01-16T02:59:00Z"));
        let c = zone.localize(utc("2024-01-16T03:00:00Z"));
        assert!(a.same_calendar_day(&b));
        assert!(!a.same_calendar_day(&c));
    }

    #[test]
    fn at_round_trips_through_localize() {
        let zone = ShopZone::default();
        let date = NaiveDate::from_ymd_opt(2024, 1, 15).unwrap();
        let instant = zone.at(date, ClockTime::from_minutes(9 * 60));
        assert_eq!(instant, utc("2024-01-15T12:00:00Z"));
        let local = zone.localize(instant);
        assert_eq!(local.calendar_date(), date);
        assert_eq!(local.minutes_since_midnight(), 540);
        assert_eq!(zone.start_of_day(date), utc("2024-01-15T03:00:00Z"));
    }

    #[test]
    fn at_skips_dst_gap() {
        // New York springs forward at 02:00 on 2024-03-10.
        let zone: ShopZone = "America/New_York".parse().unwrap();
        let date = NaiveDate::from_ymd_opt(2024, 3, 10).unwrap();
        let instant = zone.at(date, ClockTime::from_minutes(2 * 60 + 30));
        assert_eq!(zone.localize(instant).minutes_since_midnight(), 3 * 60);
    }

    #[test]
    fn overlap_is_half_open() {
        assert!(!intervals_overlap(540, 600, 600, 660));
        assert!(intervals_overlap(540, 600, 570, 630));
        assert!(intervals_overlap(540, 660, 570, 600)); // containment
    }

    #[test]
    fn overlap_is_symmetric() {
        let spans = [(0, 10), (5, 15), (10, 20), (0, 30), (25, 26), (9, 10)];
        for &(a0, a1) in &spans {
            for &(b0, b1) in &spans {
                assert_eq!(
                    intervals_overlap(a0, a1, b0, b1),
                    intervals_overlap(b0, b1, a0, a1),
                    "[{a0},{a1}) vs [{b0},{b1})"
                );
            }
        }
    }

    #[test]
    fn weekday_names_in_both_languages() {
        assert_eq!(parse_weekday("lunes").unwrap(), Weekday::Mon);
        assert_eq!(parse_weekday("Miércoles").unwrap(), Weekday::Wed);
        assert_eq!(parse_weekday("saturday").unwrap(), Weekday::Sat);
        assert!(parse_weekday("someday").is_err());
    }

    #[test]
    fn unknown_zone_rejected() {
        assert!("Mars/Olympus_Mons".parse::<ShopZone>().is_err());
    }
}
