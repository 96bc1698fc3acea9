use anyhow::{bail, Result};
use chrono::{DateTime, Datelike, Duration, Months, NaiveDate, TimeZone, Timelike, Utc, Weekday};
use serde::Deserialize;
use std::str::FromStr;

use crate::error::PipelineError;
use crate::parser;
use crate::stats::tick_step;

const SECOND: f64 = 1000.0;
const MINUTE: f64 = SECOND * 60.0;
const HOUR: f64 = MINUTE * 60.0;
const DAY: f64 = HOUR * 24.0;
const WEEK: f64 = DAY * 7.0;
const MONTH: f64 = DAY * 30.0;
const YEAR: f64 = DAY * 365.0;

/// A regular partition of a continuous domain. Temporal intervals operate on
/// epoch milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(try_from = "IntervalRepr")]
pub enum Interval {
    Number(NumberInterval),
    Utc(UtcInterval),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum IntervalRepr {
    Period(f64),
    Name(String),
}

impl TryFrom<IntervalRepr> for Interval {
    type Error = anyhow::Error;

    fn try_from(repr: IntervalRepr) -> Result<Self> {
        match repr {
            IntervalRepr::Period(p) => Ok(Interval::Number(NumberInterval::new(p)?)),
            IntervalRepr::Name(name) => name.parse(),
        }
    }
}

impl FromStr for Interval {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().parse::<f64>() {
            Ok(p) => Ok(Interval::Number(NumberInterval::new(p)?)),
            Err(_) => Ok(Interval::Utc(s.parse()?)),
        }
    }
}

impl Interval {
    pub fn is_temporal(&self) -> bool {
        matches!(self, Interval::Utc(_))
    }

    pub fn floor(&self, x: f64) -> f64 {
        match self {
            Interval::Number(i) => i.floor(x),
            Interval::Utc(i) => i.floor(x),
        }
    }

    pub fn offset(&self, x: f64, k: i64) -> f64 {
        match self {
            Interval::Number(i) => i.offset(x, k),
            Interval::Utc(i) => i.offset(x, k),
        }
    }

    /// The least interval boundary greater than or equal to `x`.
    pub fn ceil(&self, x: f64) -> f64 {
        match self {
            Interval::Number(i) => i.ceil(x),
            Interval::Utc(i) => i.floor(i.offset(i.floor(x - 1.0), 1)),
        }
    }

    /// Every boundary in `[start, stop)`.
    pub fn range(&self, start: f64, stop: f64) -> Vec<f64> {
        match self {
            Interval::Number(i) => i.range(start, stop),
            Interval::Utc(_) => {
                let mut out = Vec::new();
                let mut t = self.ceil(start);
                if !(t < stop) {
                    return out;
                }
                loop {
                    out.push(t);
                    let next = self.floor(self.offset(t, 1));
                    if !(t < next && next < stop) {
                        break;
                    }
                    t = next;
                }
                out
            }
        }
    }
}

/// Multiples of a numeric period. Periods of the form `1/n` are kept as
/// their inverse so boundaries stay exact.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NumberInterval {
    period: f64,
    inverse: bool,
}

impl NumberInterval {
    pub fn new(period: f64) -> Result<Self> {
        if !(period > 0.0 && period.is_finite()) {
            bail!(PipelineError::invalid("interval", period));
        }
        let n = 1.0 / period;
        if period < 1.0 && n == n.round() {
            return Ok(Self {
                period: n,
                inverse: true,
            });
        }
        Ok(Self {
            period,
            inverse: false,
        })
    }

    pub fn floor(&self, x: f64) -> f64 {
        if self.inverse {
            (x * self.period).floor() / self.period
        } else {
            (x / self.period).floor() * self.period
        }
    }

    pub fn offset(&self, x: f64, k: i64) -> f64 {
        if self.inverse {
            x + k as f64 / self.period
        } else {
            x + k as f64 * self.period
        }
    }

    pub fn ceil(&self, x: f64) -> f64 {
        if self.inverse {
            (x * self.period).ceil() / self.period
        } else {
            (x / self.period).ceil() * self.period
        }
    }

    pub fn range(&self, start: f64, stop: f64) -> Vec<f64> {
        if !(start.is_finite() && stop.is_finite()) {
            return Vec::new();
        }
        let (lo, hi) = if self.inverse {
            (start * self.period, stop * self.period)
        } else {
            (start / self.period, stop / self.period)
        };
        let mut out = Vec::new();
        let mut k = lo.ceil();
        while k < hi {
            out.push(if self.inverse {
                k / self.period
            } else {
                k * self.period
            });
            k += 1.0;
        }
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeUnit {
    Millisecond,
    Second,
    Minute,
    Hour,
    Day,
    /// Weeks starting on the given weekday.
    Week(Weekday),
    Month,
    Year,
}

/// A UTC calendar interval, optionally every `step` units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UtcInterval {
    unit: TimeUnit,
    step: u32,
}

impl FromStr for UtcInterval {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let Some((count, unit)) = parser::interval_name(s) else {
            bail!(PipelineError::invalid("interval", s));
        };
        let lower = unit.to_ascii_lowercase();
        let singular = lower.strip_suffix('s').unwrap_or(&lower);
        let (unit, multiple) = match singular {
            "millisecond" => (TimeUnit::Millisecond, 1),
            "second" => (TimeUnit::Second, 1),
            "minute" => (TimeUnit::Minute, 1),
            "hour" => (TimeUnit::Hour, 1),
            "day" => (TimeUnit::Day, 1),
            "week" | "sunday" => (TimeUnit::Week(Weekday::Sun), 1),
            "monday" => (TimeUnit::Week(Weekday::Mon), 1),
            "tuesday" => (TimeUnit::Week(Weekday::Tue), 1),
            "wednesday" => (TimeUnit::Week(Weekday::Wed), 1),
            "thursday" => (TimeUnit::Week(Weekday::Thu), 1),
            "friday" => (TimeUnit::Week(Weekday::Fri), 1),
            "saturday" => (TimeUnit::Week(Weekday::Sat), 1),
            "month" => (TimeUnit::Month, 1),
            "quarter" => (TimeUnit::Month, 3),
            "half" => (TimeUnit::Month, 6),
            "year" => (TimeUnit::Year, 1),
            _ => bail!(PipelineError::invalid("interval", s)),
        };
        UtcInterval::every(unit, count * multiple)
    }
}

fn to_date(ms: f64) -> Option<DateTime<Utc>> {
    if !ms.is_finite() {
        return None;
    }
    Utc.timestamp_millis_opt(ms.floor() as i64).single()
}

fn to_ms(date: Option<DateTime<Utc>>) -> f64 {
    date.map(|d| d.timestamp_millis() as f64).unwrap_or(f64::NAN)
}

fn midnight(date: NaiveDate) -> Option<DateTime<Utc>> {
    date.and_hms_opt(0, 0, 0).map(|n| Utc.from_utc_datetime(&n))
}

fn add_months(date: DateTime<Utc>, k: i64) -> Option<DateTime<Utc>> {
    let months = Months::new(u32::try_from(k.unsigned_abs()).ok()?);
    if k >= 0 {
        date.checked_add_months(months)
    } else {
        date.checked_sub_months(months)
    }
}

impl UtcInterval {
    pub fn every(unit: TimeUnit, step: u32) -> Result<Self> {
        if step == 0 {
            bail!(PipelineError::invalid("interval", "0"));
        }
        Ok(Self { unit, step })
    }

    pub fn unit(&self) -> TimeUnit {
        self.unit
    }

    pub fn step(&self) -> u32 {
        self.step
    }

    fn unit_ms(&self) -> Option<f64> {
        match self.unit {
            TimeUnit::Millisecond => Some(1.0),
            TimeUnit::Second => Some(SECOND),
            TimeUnit::Minute => Some(MINUTE),
            TimeUnit::Hour => Some(HOUR),
            TimeUnit::Day => Some(DAY),
            TimeUnit::Week(_) => Some(WEEK),
            TimeUnit::Month | TimeUnit::Year => None,
        }
    }

    fn unit_floor(&self, d: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self.unit {
            TimeUnit::Millisecond => Some(d),
            TimeUnit::Second | TimeUnit::Minute | TimeUnit::Hour => {
                let size = self.unit_ms()? as i64;
                let ms = d.timestamp_millis().div_euclid(size) * size;
                Utc.timestamp_millis_opt(ms).single()
            }
            TimeUnit::Day => midnight(d.date_naive()),
            TimeUnit::Week(start) => {
                let back = (d.weekday().num_days_from_sunday() + 7
                    - start.num_days_from_sunday())
                    % 7;
                midnight(d.date_naive() - Duration::days(i64::from(back)))
            }
            TimeUnit::Month => midnight(NaiveDate::from_ymd_opt(d.year(), d.month(), 1)?),
            TimeUnit::Year => midnight(NaiveDate::from_ymd_opt(d.year(), 1, 1)?),
        }
    }

    fn unit_offset(&self, d: DateTime<Utc>, k: i64) -> Option<DateTime<Utc>> {
        match self.unit {
            TimeUnit::Month => add_months(d, k),
            TimeUnit::Year => add_months(d, k.checked_mul(12)?),
            _ => {
                let ms = (self.unit_ms()? as i64).checked_mul(k)?;
                d.checked_add_signed(Duration::milliseconds(ms))
            }
        }
    }

    /// The calendar field that must be a multiple of `step` at a boundary.
    fn field(&self, d: DateTime<Utc>) -> i64 {
        match self.unit {
            TimeUnit::Second => i64::from(d.second()),
            TimeUnit::Minute => i64::from(d.minute()),
            TimeUnit::Hour => i64::from(d.hour()),
            TimeUnit::Day => i64::from(d.day0()),
            TimeUnit::Week(_) => {
                let epoch = Utc.timestamp_millis_opt(0).single().and_then(|e| self.unit_floor(e));
                epoch.map(|e| (d - e).num_weeks()).unwrap_or(0)
            }
            TimeUnit::Month => i64::from(d.month0()),
            TimeUnit::Millisecond | TimeUnit::Year => 0,
        }
    }

    fn accepts(&self, d: DateTime<Utc>) -> bool {
        self.field(d) % i64::from(self.step) == 0
    }

    pub fn floor(&self, ms: f64) -> f64 {
        let step = f64::from(self.step);
        match self.unit {
            TimeUnit::Millisecond => (ms / step).floor() * step,
            TimeUnit::Year => to_ms(to_date(ms).and_then(|d| {
                let year = d.year() - d.year().rem_euclid(self.step as i32);
                midnight(NaiveDate::from_ymd_opt(year, 1, 1)?)
            })),
            _ => to_ms(to_date(ms).and_then(|d| {
                let mut d = self.unit_floor(d)?;
                while !self.accepts(d) {
                    d = self.unit_floor(d - Duration::milliseconds(1))?;
                }
                Some(d)
            })),
        }
    }

    pub fn offset(&self, ms: f64, k: i64) -> f64 {
        let step = i64::from(self.step);
        match self.unit {
            TimeUnit::Millisecond => ms + (k * step) as f64,
            TimeUnit::Year => to_ms(to_date(ms).and_then(|d| add_months(d, k * step * 12))),
            _ if step == 1 => to_ms(to_date(ms).and_then(|d| self.unit_offset(d, k))),
            _ => to_ms(to_date(ms).and_then(|mut d| {
                let sign = k.signum();
                for _ in 0..k.unsigned_abs() {
                    loop {
                        d = self.unit_offset(d, sign)?;
                        if self.accepts(d) {
                            break;
                        }
                    }
                }
                Some(d)
            })),
        }
    }
}

const TICK_INTERVALS: [(TimeUnit, u32, f64); 18] = [
    (TimeUnit::Second, 1, SECOND),
    (TimeUnit::Second, 5, 5.0 * SECOND),
    (TimeUnit::Second, 15, 15.0 * SECOND),
    (TimeUnit::Second, 30, 30.0 * SECOND),
    (TimeUnit::Minute, 1, MINUTE),
    (TimeUnit::Minute, 5, 5.0 * MINUTE),
    (TimeUnit::Minute, 15, 15.0 * MINUTE),
    (TimeUnit::Minute, 30, 30.0 * MINUTE),
    (TimeUnit::Hour, 1, HOUR),
    (TimeUnit::Hour, 3, 3.0 * HOUR),
    (TimeUnit::Hour, 6, 6.0 * HOUR),
    (TimeUnit::Hour, 12, 12.0 * HOUR),
    (TimeUnit::Day, 1, DAY),
    (TimeUnit::Day, 2, 2.0 * DAY),
    (TimeUnit::Week(Weekday::Sun), 1, WEEK),
    (TimeUnit::Month, 1, MONTH),
    (TimeUnit::Month, 3, 3.0 * MONTH),
    (TimeUnit::Year, 1, YEAR),
];

/// The calendar interval yielding about `count` ticks over `[start, stop]`
/// (epoch milliseconds).
pub fn utc_tick_interval(start: f64, stop: f64, count: f64) -> UtcInterval {
    let target = (stop - start).abs() / count;
    let i = TICK_INTERVALS.partition_point(|&(_, _, duration)| duration <= target);
    if i == TICK_INTERVALS.len() {
        let step = tick_step(start / YEAR, stop / YEAR, count).abs().round().max(1.0);
        return UtcInterval {
            unit: TimeUnit::Year,
            step: step as u32,
        };
    }
    if i == 0 {
        let step = tick_step(start, stop, count).abs().round().max(1.0);
        return UtcInterval {
            unit: TimeUnit::Millisecond,
            step: step as u32,
        };
    }
    let (lower, upper) = (TICK_INTERVALS[i - 1], TICK_INTERVALS[i]);
    let (unit, step, _) = if target / lower.2 < upper.2 / target {
        lower
    } else {
        upper
    };
    UtcInterval { unit, step }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(s: &str) -> f64 {
        DateTime::parse_from_rfc3339(s).unwrap().timestamp_millis() as f64
    }

    #[test]
    fn test_number_interval() {
        let i: Interval = "5".parse().unwrap();
        assert_eq!(i.floor(12.0), 10.0);
        assert_eq!(i.offset(10.0, 2), 20.0);
        assert_eq!(i.range(3.0, 21.0), vec![5.0, 10.0, 15.0, 20.0]);
        assert!(!i.is_temporal());
    }

    #[test]
    fn test_fractional_period_is_exact() {
        let i = Interval::Number(NumberInterval::new(0.1).unwrap());
        assert_eq!(i.floor(0.35), 0.3);
        assert_eq!(i.range(0.0, 0.3), vec![0.0, 0.1, 0.2]);
    }

    #[test]
    fn test_invalid_intervals() {
        assert!(NumberInterval::new(0.0).is_err());
        assert!(NumberInterval::new(f64::NAN).is_err());
        assert!("fortnight".parse::<Interval>().is_err());
        assert!("0 days".parse::<Interval>().is_err());
    }

    #[test]
    fn test_utc_floor_and_offset() {
        let day: Interval = "day".parse().unwrap();
        assert_eq!(day.floor(ms("2024-03-05T13:20:00Z")), ms("2024-03-05T00:00:00Z"));
        assert_eq!(day.offset(ms("2024-03-05T00:00:00Z"), 1), ms("2024-03-06T00:00:00Z"));

        let month: Interval = "month".parse().unwrap();
        assert_eq!(month.floor(ms("2024-03-05T13:20:00Z")), ms("2024-03-01T00:00:00Z"));
        assert_eq!(month.offset(ms("2024-12-01T00:00:00Z"), 1), ms("2025-01-01T00:00:00Z"));

        // 2024-03-05 is a Tuesday.
        let week: Interval = "week".parse().unwrap();
        assert_eq!(week.floor(ms("2024-03-05T13:20:00Z")), ms("2024-03-03T00:00:00Z"));
        let monday: Interval = "monday".parse().unwrap();
        assert_eq!(monday.floor(ms("2024-03-05T13:20:00Z")), ms("2024-03-04T00:00:00Z"));
    }

    #[test]
    fn test_utc_every() {
        let quarter: Interval = "quarter".parse().unwrap();
        assert_eq!(quarter.floor(ms("2024-05-17T00:00:00Z")), ms("2024-04-01T00:00:00Z"));
        assert_eq!(quarter.offset(ms("2024-04-01T00:00:00Z"), 1), ms("2024-07-01T00:00:00Z"));

        let decade: Interval = "10 years".parse().unwrap();
        assert_eq!(decade.floor(ms("2024-05-17T00:00:00Z")), ms("2020-01-01T00:00:00Z"));
    }

    #[test]
    fn test_utc_range() {
        let month: Interval = "month".parse().unwrap();
        let r = month.range(ms("2024-01-15T00:00:00Z"), ms("2024-04-01T00:00:00Z"));
        assert_eq!(
            r,
            vec![ms("2024-02-01T00:00:00Z"), ms("2024-03-01T00:00:00Z")]
        );
    }

    #[test]
    fn test_tick_interval() {
        let start = ms("2024-01-01T00:00:00Z");
        let i = utc_tick_interval(start, start + 10.0 * DAY, 10.0);
        assert_eq!((i.unit(), i.step()), (TimeUnit::Day, 1));
        let i = utc_tick_interval(start, start + 10.0 * YEAR, 10.0);
        assert_eq!(i.unit(), TimeUnit::Year);
        let i = utc_tick_interval(start, start + 50.0, 10.0);
        assert_eq!((i.unit(), i.step()), (TimeUnit::Millisecond, 5));
    }
}
