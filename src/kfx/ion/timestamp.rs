//! Ion timestamps.
//!
//! Binary layout: offset (VarInt minutes, `0xC0` = unknown), year, month,
//! day, hour + minute, second (VarUInts), then fractional seconds as a
//! VarInt exponent and Int coefficient. Any trailing field may be absent;
//! the last field present sets the precision.

use num_bigint::BigUint;
use num_traits::{One, Zero};

use super::IonError;
use super::cursor::Cursor;
use super::decimal::Decimal;

/// Finest calendar field present in a timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Precision {
    Year,
    Month,
    Day,
    Minute,
    Second,
    Fraction,
}

/// Timestamp fields as stored (UTC components plus the local offset).
///
/// Fields finer than `precision` are left at their defaults
/// (month/day = 1, time = 0).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Timestamp {
    pub precision: Precision,
    /// Local offset in minutes; `None` is the unknown offset (`-00:00`).
    pub offset: Option<i32>,
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
    pub fraction: Option<Decimal>,
}

impl Timestamp {
    /// A year-precision timestamp with unknown offset.
    pub fn year(year: u16) -> Self {
        Self {
            precision: Precision::Year,
            offset: None,
            year,
            month: 1,
            day: 1,
            hour: 0,
            minute: 0,
            second: 0,
            fraction: None,
        }
    }

    /// Decode a timestamp payload. The cursor must span exactly the payload.
    pub fn decode(cur: &mut Cursor<'_>) -> Result<Self, IonError> {
        let start = cur.offset();
        if cur.is_empty() {
            return Err(IonError::malformed(start, "timestamp", "empty payload"));
        }

        let (minutes, negative) = cur.read_var_int_parts()?;
        let offset = if minutes == 0 && negative {
            None
        } else {
            let minutes = i32::try_from(minutes).map_err(|_| IonError::Overflow {
                offset: start,
                what: "timestamp offset",
                target: "i32",
            })?;
            Some(if negative { -minutes } else { minutes })
        };

        if cur.is_empty() {
            return Err(IonError::malformed(start, "timestamp", "missing year"));
        }
        let year = cur.read_var_uint32()?;
        let mut ts = Timestamp::year(u16::try_from(year).unwrap_or(u16::MAX));
        ts.offset = offset;
        if !(1..=9999).contains(&year) {
            return Err(IonError::malformed(
                start,
                "timestamp",
                format!("year {year} out of range"),
            ));
        }

        if !cur.is_empty() {
            ts.month = calendar_field(cur, start, "month", 1..=12)?;
            ts.precision = Precision::Month;
        }
        if !cur.is_empty() {
            ts.day = calendar_field(cur, start, "day", 1..=31)?;
            if !check_day(ts.year, ts.month, ts.day) {
                return Err(IonError::malformed(
                    start,
                    "timestamp",
                    format!("day {} invalid for {}-{:02}", ts.day, ts.year, ts.month),
                ));
            }
            ts.precision = Precision::Day;
        }
        if !cur.is_empty() {
            ts.hour = calendar_field(cur, start, "hour", 0..=23)?;
            if cur.is_empty() {
                return Err(IonError::malformed(start, "timestamp", "hour without minute"));
            }
            ts.minute = calendar_field(cur, start, "minute", 0..=59)?;
            ts.precision = Precision::Minute;
        }
        if !cur.is_empty() {
            ts.second = calendar_field(cur, start, "second", 0..=59)?;
            ts.precision = Precision::Second;
        }
        if !cur.is_empty() {
            let (coefficient, negative, exponent) = cur.read_decimal_parts()?;
            ts.fraction = fraction(start, coefficient, negative, exponent)?;
            if ts.fraction.is_some() {
                ts.precision = Precision::Fraction;
            }
        }

        Ok(ts)
    }
}

/// Whether `day` exists in the given month, leap years included.
pub fn check_day(year: u16, month: u8, day: u8) -> bool {
    day >= 1 && day <= days_in_month(year, month)
}

pub fn is_leap_year(year: u16) -> bool {
    (year % 4 == 0 && year % 100 != 0) || year % 400 == 0
}

fn days_in_month(year: u16, month: u8) -> u8 {
    match month {
        1 | 3 | 5 | 7 | 8 | 10 | 12 => 31,
        4 | 6 | 9 | 11 => 30,
        2 if is_leap_year(year) => 29,
        2 => 28,
        _ => 0,
    }
}

fn calendar_field(
    cur: &mut Cursor<'_>,
    start: usize,
    name: &str,
    range: std::ops::RangeInclusive<u32>,
) -> Result<u8, IonError> {
    let value = cur.read_var_uint32()?;
    if !range.contains(&value) {
        return Err(IonError::malformed(
            start,
            "timestamp",
            format!("{name} {value} out of range"),
        ));
    }
    // every range above fits in a byte
    Ok(value as u8)
}

/// Validate fractional seconds. A zero coefficient with a non-negative
/// exponent means no fraction at all.
fn fraction(
    start: usize,
    coefficient: BigUint,
    negative: bool,
    exponent: i32,
) -> Result<Option<Decimal>, IonError> {
    if coefficient.is_zero() && exponent >= 0 {
        return Ok(None);
    }
    if negative {
        return Err(IonError::malformed(start, "timestamp", "negative fraction"));
    }
    if !coefficient.is_zero() && !(-6..=-1).contains(&exponent) {
        return Err(IonError::malformed(
            start,
            "timestamp",
            format!("fraction exponent out of bounds ({exponent}) coefficient ({coefficient})"),
        ));
    }
    if exponent < 0 {
        let limit = (0..-exponent).fold(BigUint::one(), |acc, _| acc * 10u32);
        if coefficient >= limit {
            return Err(IonError::malformed(
                start,
                "timestamp",
                format!("fraction {coefficient}d{exponent} is not below one second"),
            ));
        }
    }
    Ok(Some(Decimal::new(false, coefficient, exponent)))
}
