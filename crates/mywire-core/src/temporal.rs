//! Calendar and clock values with explicit fractional-second precision.
//!
//! MySQL temporal columns carry a declared number of fractional digits
//! (`DATETIME(3)`, `TIME(6)`, ...). A value decoded from such a column keeps
//! that precision and renders exactly that many digits, so a value read back
//! from the server prints the same text the server would. Zero dates
//! (`0000-00-00`) and TIME values outside a single day (up to `838:59:59`)
//! are representable; converting them to `chrono` types fails with a
//! [`TypeError`] instead of silently clamping.

#![allow(clippy::cast_possible_truncation)]

use crate::Result;
use crate::error::{Error, TypeError};
use chrono::{
    Datelike, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, TimeDelta, TimeZone, Timelike,
};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Maximum number of fractional-second digits MySQL stores.
pub const MAX_PRECISION: u8 = 6;

/// Largest TIME magnitude MySQL accepts, in hours.
pub const MAX_TIME_HOURS: u32 = 838;

/// A DATE value. All-zero fields represent MySQL's zero date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Date {
    pub year: u16,
    pub month: u8,
    pub day: u8,
}

/// A DATETIME or TIMESTAMP value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct DateTime {
    pub date: Date,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
    pub micros: u32,
    /// Fractional digits rendered (0..=6)
    pub precision: u8,
}

/// A TIME value: a signed duration, not a time of day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Time {
    pub negative: bool,
    pub hours: u32,
    pub minutes: u8,
    pub seconds: u8,
    pub micros: u32,
    /// Fractional digits rendered (0..=6)
    pub precision: u8,
}

/// Any MySQL temporal value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Temporal {
    Date(Date),
    DateTime(DateTime),
    Time(Time),
}

fn parse_error(expected: &'static str, text: &str) -> Error {
    Error::Type(TypeError {
        expected,
        actual: format!("'{}'", text),
        column: None,
    })
}

fn parse_num<T: std::str::FromStr>(part: &str, expected: &'static str, text: &str) -> Result<T> {
    if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
        return Err(parse_error(expected, text));
    }
    part.parse().map_err(|_| parse_error(expected, text))
}

/// Parse `.ffffff`-style fraction digits into microseconds and a digit count.
fn parse_fraction(digits: &str, expected: &'static str, text: &str) -> Result<(u32, u8)> {
    if digits.len() > usize::from(MAX_PRECISION) || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(parse_error(expected, text));
    }
    let mut micros = 0u32;
    for (i, b) in digits.bytes().enumerate() {
        micros += u32::from(b - b'0') * 10u32.pow(5 - i as u32);
    }
    Ok((micros, digits.len() as u8))
}

fn write_fraction(f: &mut fmt::Formatter<'_>, micros: u32, precision: u8) -> fmt::Result {
    let precision = precision.min(MAX_PRECISION);
    if precision == 0 {
        return Ok(());
    }
    let digits = format!("{:06}", micros);
    write!(f, ".{}", &digits[..usize::from(precision)])
}

impl Date {
    pub const ZERO: Date = Date {
        year: 0,
        month: 0,
        day: 0,
    };

    pub fn new(year: u16, month: u8, day: u8) -> Self {
        Self { year, month, day }
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }

    /// Parse `YYYY-MM-DD`.
    pub fn parse(text: &str) -> Result<Self> {
        const EXPECTED: &str = "DATE (YYYY-MM-DD)";
        let mut parts = text.splitn(3, '-');
        let (Some(y), Some(m), Some(d)) = (parts.next(), parts.next(), parts.next()) else {
            return Err(parse_error(EXPECTED, text));
        };
        let date = Date {
            year: parse_num(y, EXPECTED, text)?,
            month: parse_num(m, EXPECTED, text)?,
            day: parse_num(d, EXPECTED, text)?,
        };
        if date.month > 12 || date.day > 31 {
            return Err(parse_error(EXPECTED, text));
        }
        Ok(date)
    }

    pub fn to_naive(&self) -> Result<NaiveDate> {
        NaiveDate::from_ymd_opt(
            i32::from(self.year),
            u32::from(self.month),
            u32::from(self.day),
        )
        .ok_or_else(|| {
            Error::Type(TypeError {
                expected: "calendar date",
                actual: self.to_string(),
                column: None,
            })
        })
    }
}

impl DateTime {
    pub fn new(date: Date, hour: u8, minute: u8, second: u8, micros: u32, precision: u8) -> Self {
        Self {
            date,
            hour,
            minute,
            second,
            micros,
            precision: precision.min(MAX_PRECISION),
        }
    }

    pub fn is_zero(&self) -> bool {
        self.date.is_zero()
            && self.hour == 0
            && self.minute == 0
            && self.second == 0
            && self.micros == 0
    }

    /// Parse `YYYY-MM-DD HH:MM:SS[.f...]`.
    ///
    /// The precision is the number of fraction digits present in the text.
    pub fn parse(text: &str) -> Result<Self> {
        const EXPECTED: &str = "DATETIME (YYYY-MM-DD HH:MM:SS[.ffffff])";
        let (date_part, time_part) = text
            .split_once([' ', 'T'])
            .ok_or_else(|| parse_error(EXPECTED, text))?;
        let date = Date::parse(date_part).map_err(|_| parse_error(EXPECTED, text))?;
        let (clock, fraction) = match time_part.split_once('.') {
            Some((clock, fraction)) => (clock, Some(fraction)),
            None => (time_part, None),
        };
        let mut parts = clock.splitn(3, ':');
        let (Some(h), Some(m), Some(s)) = (parts.next(), parts.next(), parts.next()) else {
            return Err(parse_error(EXPECTED, text));
        };
        let (micros, precision) = match fraction {
            Some(digits) => parse_fraction(digits, EXPECTED, text)?,
            None => (0, 0),
        };
        let value = DateTime {
            date,
            hour: parse_num(h, EXPECTED, text)?,
            minute: parse_num(m, EXPECTED, text)?,
            second: parse_num(s, EXPECTED, text)?,
            micros,
            precision,
        };
        if value.hour > 23 || value.minute > 59 || value.second > 59 {
            return Err(parse_error(EXPECTED, text));
        }
        Ok(value)
    }

    /// Same instant rendered with a different number of fraction digits.
    pub fn with_precision(mut self, precision: u8) -> Self {
        self.precision = precision.min(MAX_PRECISION);
        self
    }

    pub fn to_naive(&self) -> Result<NaiveDateTime> {
        let date = self.date.to_naive()?;
        date.and_hms_micro_opt(
            u32::from(self.hour),
            u32::from(self.minute),
            u32::from(self.second),
            self.micros,
        )
        .ok_or_else(|| {
            Error::Type(TypeError {
                expected: "calendar datetime",
                actual: self.to_string(),
                column: None,
            })
        })
    }
}

impl DateTime {
    /// Read this wall-clock value as local time at `offset`.
    ///
    /// DATETIME and TIMESTAMP columns carry no zone; the connection's
    /// configured offset says where they were written.
    pub fn to_offset(&self, offset: FixedOffset) -> Result<chrono::DateTime<FixedOffset>> {
        let naive = self.to_naive()?;
        offset.from_local_datetime(&naive).single().ok_or_else(|| {
            Error::Type(TypeError {
                expected: "datetime representable at the configured offset",
                actual: self.to_string(),
                column: None,
            })
        })
    }

    /// Wall-clock reading of `instant` at `offset`, ready to be sent to the
    /// server.
    pub fn at_offset<Tz: TimeZone>(
        instant: &chrono::DateTime<Tz>,
        offset: FixedOffset,
    ) -> Result<Self> {
        instant.with_timezone(&offset).naive_local().try_into()
    }
}

impl Time {
    pub fn new(
        negative: bool,
        hours: u32,
        minutes: u8,
        seconds: u8,
        micros: u32,
        precision: u8,
    ) -> Self {
        let zero = hours == 0 && minutes == 0 && seconds == 0 && micros == 0;
        Self {
            negative: negative && !zero,
            hours,
            minutes,
            seconds,
            micros,
            precision: precision.min(MAX_PRECISION),
        }
    }

    pub fn is_zero(&self) -> bool {
        self.hours == 0 && self.minutes == 0 && self.seconds == 0 && self.micros == 0
    }

    /// Parse `[-]H...H:MM:SS[.f...]`, accepting up to `838:59:59`.
    pub fn parse(text: &str) -> Result<Self> {
        const EXPECTED: &str = "TIME ([-]HHH:MM:SS[.ffffff])";
        let (negative, body) = match text.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, text),
        };
        let (clock, fraction) = match body.split_once('.') {
            Some((clock, fraction)) => (clock, Some(fraction)),
            None => (body, None),
        };
        let mut parts = clock.splitn(3, ':');
        let (Some(h), Some(m), Some(s)) = (parts.next(), parts.next(), parts.next()) else {
            return Err(parse_error(EXPECTED, text));
        };
        let (micros, precision) = match fraction {
            Some(digits) => parse_fraction(digits, EXPECTED, text)?,
            None => (0, 0),
        };
        let hours: u32 = parse_num(h, EXPECTED, text)?;
        let minutes: u8 = parse_num(m, EXPECTED, text)?;
        let seconds: u8 = parse_num(s, EXPECTED, text)?;
        if hours > MAX_TIME_HOURS || minutes > 59 || seconds > 59 {
            return Err(parse_error(EXPECTED, text));
        }
        Ok(Time::new(negative, hours, minutes, seconds, micros, precision))
    }

    pub fn with_precision(mut self, precision: u8) -> Self {
        self.precision = precision.min(MAX_PRECISION);
        self
    }

    /// The signed duration this value represents.
    pub fn to_duration(&self) -> TimeDelta {
        let magnitude = TimeDelta::hours(i64::from(self.hours))
            + TimeDelta::minutes(i64::from(self.minutes))
            + TimeDelta::seconds(i64::from(self.seconds))
            + TimeDelta::microseconds(i64::from(self.micros));
        if self.negative { -magnitude } else { magnitude }
    }

    /// Time of day; fails for negative values or values of 24 hours or more.
    pub fn to_naive_time(&self) -> Result<NaiveTime> {
        if self.negative || self.hours >= 24 {
            return Err(Error::Type(TypeError {
                expected: "time of day (00:00:00 to 23:59:59)",
                actual: self.to_string(),
                column: None,
            }));
        }
        NaiveTime::from_hms_micro_opt(
            self.hours,
            u32::from(self.minutes),
            u32::from(self.seconds),
            self.micros,
        )
        .ok_or_else(|| {
            Error::Type(TypeError {
                expected: "time of day",
                actual: self.to_string(),
                column: None,
            })
        })
    }
}

impl Temporal {
    pub fn precision(&self) -> u8 {
        match self {
            Temporal::Date(_) => 0,
            Temporal::DateTime(dt) => dt.precision,
            Temporal::Time(t) => t.precision,
        }
    }

    pub fn is_zero(&self) -> bool {
        match self {
            Temporal::Date(d) => d.is_zero(),
            Temporal::DateTime(dt) => dt.is_zero(),
            Temporal::Time(t) => t.is_zero(),
        }
    }

    pub const fn type_name(&self) -> &'static str {
        match self {
            Temporal::Date(_) => "DATE",
            Temporal::DateTime(_) => "DATETIME",
            Temporal::Time(_) => "TIME",
        }
    }
}

impl fmt::Display for Date {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}-{:02}", self.year, self.month, self.day)
    }
}

impl fmt::Display for DateTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {:02}:{:02}:{:02}",
            self.date, self.hour, self.minute, self.second
        )?;
        write_fraction(f, self.micros, self.precision)
    }
}

impl fmt::Display for Time {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.negative {
            f.write_str("-")?;
        }
        write!(
            f,
            "{:02}:{:02}:{:02}",
            self.hours, self.minutes, self.seconds
        )?;
        write_fraction(f, self.micros, self.precision)
    }
}

impl fmt::Display for Temporal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Temporal::Date(d) => d.fmt(f),
            Temporal::DateTime(dt) => dt.fmt(f),
            Temporal::Time(t) => t.fmt(f),
        }
    }
}

/// Sub-second part of a chrono value in microseconds. A leap second's
/// nanoseconds run past one second; they are held at the last microsecond.
fn chrono_micros(nanosecond: u32) -> u32 {
    (nanosecond / 1_000).min(999_999)
}

impl TryFrom<NaiveDate> for Date {
    type Error = Error;

    fn try_from(d: NaiveDate) -> Result<Self> {
        let year = u16::try_from(d.year())
            .ok()
            .filter(|y| *y <= 9999)
            .ok_or_else(|| {
                Error::Type(TypeError {
                    expected: "DATE with year 0000 to 9999",
                    actual: d.to_string(),
                    column: None,
                })
            })?;
        Ok(Date {
            year,
            month: d.month() as u8,
            day: d.day() as u8,
        })
    }
}

impl TryFrom<NaiveDateTime> for DateTime {
    type Error = Error;

    fn try_from(dt: NaiveDateTime) -> Result<Self> {
        let micros = chrono_micros(dt.nanosecond());
        Ok(DateTime {
            date: dt.date().try_into()?,
            hour: dt.hour() as u8,
            minute: dt.minute() as u8,
            second: dt.second() as u8,
            micros,
            precision: if micros == 0 { 0 } else { MAX_PRECISION },
        })
    }
}

impl From<NaiveTime> for Time {
    fn from(t: NaiveTime) -> Self {
        let micros = chrono_micros(t.nanosecond());
        Time::new(
            false,
            t.hour(),
            t.minute() as u8,
            t.second() as u8,
            micros,
            if micros == 0 { 0 } else { MAX_PRECISION },
        )
    }
}

impl TryFrom<TimeDelta> for Time {
    type Error = Error;

    fn try_from(delta: TimeDelta) -> Result<Self> {
        let negative = delta < TimeDelta::zero();
        let magnitude = delta.abs();
        let total_seconds = magnitude.num_seconds();
        let micros = magnitude.subsec_nanos() as u32 / 1_000;
        let hours = total_seconds / 3_600;
        if hours > i64::from(MAX_TIME_HOURS) {
            return Err(Error::Type(TypeError {
                expected: "TIME within -838:59:59 to 838:59:59",
                actual: format!("{} hours", hours),
                column: None,
            }));
        }
        Ok(Time::new(
            negative,
            hours as u32,
            ((total_seconds / 60) % 60) as u8,
            (total_seconds % 60) as u8,
            micros,
            if micros == 0 { 0 } else { MAX_PRECISION },
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_declared_precision() {
        let dt = DateTime::parse("2011-11-20 21:27:37.123456").unwrap();
        assert_eq!(dt.precision, 6);
        assert_eq!(dt.with_precision(0).to_string(), "2011-11-20 21:27:37");
        assert_eq!(dt.with_precision(1).to_string(), "2011-11-20 21:27:37.1");
        assert_eq!(dt.with_precision(3).to_string(), "2011-11-20 21:27:37.123");
        assert_eq!(dt.to_string(), "2011-11-20 21:27:37.123456");
    }

    #[test]
    fn parses_short_fractions() {
        let dt = DateTime::parse("2011-11-20 21:27:37.1").unwrap();
        assert_eq!(dt.micros, 100_000);
        assert_eq!(dt.precision, 1);
        assert_eq!(dt.to_string(), "2011-11-20 21:27:37.1");
    }

    #[test]
    fn zero_values_render_literally() {
        assert_eq!(Date::ZERO.to_string(), "0000-00-00");
        let dt = DateTime::parse("0000-00-00 00:00:00").unwrap();
        assert!(dt.is_zero());
        assert_eq!(dt.to_string(), "0000-00-00 00:00:00");
        assert_eq!(dt.with_precision(6).to_string(), "0000-00-00 00:00:00.000000");
        assert!(Date::ZERO.to_naive().is_err());
    }

    #[test]
    fn time_range_and_sign() {
        let max = Time::parse("838:59:59").unwrap();
        assert_eq!(max.to_string(), "838:59:59");
        let min = Time::parse("-838:59:59").unwrap();
        assert_eq!(min.to_string(), "-838:59:59");
        assert!(Time::parse("839:00:00").is_err());

        let t = Time::parse("-12:34:56.7").unwrap();
        assert_eq!(t.with_precision(2).to_string(), "-12:34:56.70");
        assert_eq!(
            t.to_duration(),
            -(TimeDelta::hours(12)
                + TimeDelta::minutes(34)
                + TimeDelta::seconds(56)
                + TimeDelta::milliseconds(700))
        );
    }

    #[test]
    fn negative_zero_time_is_normalized() {
        let t = Time::new(true, 0, 0, 0, 0, 0);
        assert!(!t.negative);
        assert_eq!(t.to_string(), "00:00:00");
    }

    #[test]
    fn time_of_day_conversion_is_checked() {
        let t = Time::parse("25:00:00").unwrap();
        assert!(t.to_naive_time().is_err());
        assert_eq!(t.to_string(), "25:00:00");

        let t = Time::parse("13:14:15.000016").unwrap();
        assert_eq!(
            t.to_naive_time().unwrap(),
            NaiveTime::from_hms_micro_opt(13, 14, 15, 16).unwrap()
        );
    }

    #[test]
    fn chrono_round_trip() {
        let naive = NaiveDate::from_ymd_opt(2024, 2, 29)
            .unwrap()
            .and_hms_micro_opt(23, 59, 58, 250_000)
            .unwrap();
        let dt = DateTime::try_from(naive).unwrap();
        assert_eq!(dt.to_string(), "2024-02-29 23:59:58.250000");
        assert_eq!(dt.to_naive().unwrap(), naive);
    }

    #[test]
    fn chrono_years_outside_mysql_range_fail() {
        let ancient = NaiveDate::from_ymd_opt(-44, 3, 15).unwrap();
        assert!(Date::try_from(ancient).is_err());
        let far = NaiveDate::from_ymd_opt(10_000, 1, 1).unwrap();
        assert!(Date::try_from(far).is_err());
        assert!(DateTime::try_from(far.and_hms_opt(0, 0, 0).unwrap()).is_err());
        let last = NaiveDate::from_ymd_opt(9999, 12, 31).unwrap();
        assert_eq!(Date::try_from(last).unwrap().to_string(), "9999-12-31");
    }

    #[test]
    fn leap_second_holds_last_microsecond() {
        let leap = NaiveTime::from_hms_nano_opt(23, 59, 59, 1_500_000_000).unwrap();
        let t = Time::from(leap);
        assert_eq!(t.micros, 999_999);
        assert_eq!(t.to_string(), "23:59:59.999999");

        let dt = DateTime::try_from(
            NaiveDate::from_ymd_opt(2016, 12, 31)
                .unwrap()
                .and_time(leap),
        )
        .unwrap();
        assert_eq!(dt.to_string(), "2016-12-31 23:59:59.999999");
    }

    #[test]
    fn offset_conversions() {
        let plus_two = FixedOffset::east_opt(2 * 3_600).unwrap();
        let dt = DateTime::parse("2024-06-01 12:30:00").unwrap();
        let zoned = dt.to_offset(plus_two).unwrap();
        assert_eq!(zoned.to_rfc3339(), "2024-06-01T12:30:00+02:00");
        assert_eq!(zoned.naive_utc().to_string(), "2024-06-01 10:30:00");

        let utc = chrono::Utc.with_ymd_and_hms(2024, 6, 1, 10, 30, 0).unwrap();
        assert_eq!(DateTime::at_offset(&utc, plus_two).unwrap(), dt);

        assert!(DateTime::parse("0000-00-00 00:00:00")
            .unwrap()
            .to_offset(plus_two)
            .is_err());
    }

    #[test]
    fn delta_out_of_range_fails() {
        assert!(Time::try_from(TimeDelta::hours(839)).is_err());
        let t = Time::try_from(TimeDelta::seconds(-61)).unwrap();
        assert_eq!(t.to_string(), "-00:01:01");
    }

    #[test]
    fn rejects_garbage() {
        assert!(Date::parse("2024-13-01").is_err());
        assert!(Date::parse("yesterday").is_err());
        assert!(DateTime::parse("2024-01-01").is_err());
        assert!(DateTime::parse("2024-01-01 10:00:00.1234567").is_err());
        assert!(Time::parse("10:61:00").is_err());
    }
}
