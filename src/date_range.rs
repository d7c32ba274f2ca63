use anyhow::{anyhow, Result};
use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;

pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Calendar date range, both ends inclusive.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    /// January 1 to December 31 of `year`.
    pub fn year(year: i32) -> Result<Self> {
        let start = NaiveDate::from_ymd_opt(year, 1, 1).ok_or(anyhow!("Invalid year: {year}"))?;
        let end = NaiveDate::from_ymd_opt(year, 12, 31).ok_or(anyhow!("Invalid year: {year}"))?;
        Ok(Self::new(start, end))
    }

    pub fn parse(start: &str, end: &str) -> Result<Self> {
        Ok(Self::new(
            NaiveDate::parse_from_str(start, DATE_FORMAT)?,
            NaiveDate::parse_from_str(end, DATE_FORMAT)?,
        ))
    }

    /// First day after the range. Date filters on the platform exclude their upper bound.
    pub fn exclusive_end(self: &Self) -> Result<NaiveDate> {
        self.end
            .succ_opt()
            .ok_or(anyhow!("No date follows {}", self.end))
    }

    pub fn start_year(self: &Self) -> i32 {
        self.start.year()
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} to {}",
            self.start.format(DATE_FORMAT),
            self.end.format(DATE_FORMAT)
        )
    }
}

/// One-year ranges for each of the `years_back` full years preceding `current_year`, oldest
/// first.
pub fn previous_years(current_year: i32, years_back: u32) -> Result<Vec<DateRange>> {
    let years_back = i32::try_from(years_back)?;
    (1..=years_back)
        .rev()
        .map(|offset| {
            let year = current_year
                .checked_sub(offset)
                .ok_or(anyhow!("{offset} years before {current_year} is out of range"))?;
            DateRange::year(year)
        })
        .collect()
}
