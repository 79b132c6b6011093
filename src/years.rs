//! years.rs
//!
//! Calendar windows used when talking to the GitHub API:
//!     * one window per calendar year for `contributionsCollection`
//!     * a `since`/`until` window for commit listings
//!
//! GitHub accepts ISO-8601 instants, so every window is expressed in UTC
//! and covers whole days:
//!   • a window starts at 00:00:00 of its first day
//!   • a window ends at 23:59:59 of its last day
//!   • the year list includes the current year

use anyhow::{Result, bail};
use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, TimeZone, Utc};

/// An inclusive UTC time range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

impl Window {
    /// Window covering the whole days `first..=last`.
    pub fn days(first: NaiveDate, last: NaiveDate) -> Result<Self> {
        if first > last {
            bail!("window start {first} is after window end {last}");
        }
        Ok(Self {
            from: start_of(first),
            to: end_of(last),
        })
    }

    /// Window covering calendar year `year`.
    pub fn year(year: i32) -> Result<Self> {
        let (Some(first), Some(last)) = (
            NaiveDate::from_ymd_opt(year, 1, 1),
            NaiveDate::from_ymd_opt(year, 12, 31),
        ) else {
            bail!("year {year} is out of range");
        };
        Self::days(first, last)
    }

    /// `from` as GitHub expects it, e.g. `2017-01-01T00:00:00Z`.
    pub fn from_iso(&self) -> String {
        iso(self.from)
    }

    pub fn to_iso(&self) -> String {
        iso(self.to)
    }
}

/// Years from `start_year` up to and including the year of `today`.
pub fn years_through(start_year: i32, today: NaiveDate) -> Result<Vec<i32>> {
    let current = today.year();
    if start_year > current {
        bail!("start year {start_year} is after the current year {current}");
    }
    Ok((start_year..=current).collect())
}

fn start_of(day: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&day.and_time(NaiveTime::MIN))
}

fn end_of(day: NaiveDate) -> DateTime<Utc> {
    // 23:59:59 always exists
    let time = NaiveTime::from_hms_opt(23, 59, 59).unwrap_or(NaiveTime::MIN);
    Utc.from_utc_datetime(&day.and_time(time))
}

fn iso(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}
