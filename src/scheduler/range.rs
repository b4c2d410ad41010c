use chrono::NaiveDate;

use crate::error::{DispatchError, Result};
use crate::scheduler::job::WorkUnit;

/// Inclusive range of days to dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    start: NaiveDate,
    end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self> {
        if start > end {
            return Err(DispatchError::Config(format!(
                "start date {start} is after end date {end}"
            )));
        }
        Ok(Self { start, end })
    }

    /// Parse two dates given as `YYYYMMDD` or `YYYY-MM-DD`.
    pub fn parse(start: &str, end: &str) -> Result<Self> {
        Self::new(parse_date(start)?, parse_date(end)?)
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }

    /// Work units in calendar order, both ends included.
    pub fn units(&self) -> Vec<WorkUnit> {
        let end = self.end;
        self.start
            .iter_days()
            .take_while(|d| *d <= end)
            .map(WorkUnit::new)
            .collect()
    }
}

pub fn parse_date(input: &str) -> Result<NaiveDate> {
    let input = input.trim();
    let format = if input.contains('-') { "%Y-%m-%d" } else { "%Y%m%d" };
    NaiveDate::parse_from_str(input, format).map_err(|e| {
        DispatchError::Config(format!(
            "invalid date {input:?} (expected YYYYMMDD or YYYY-MM-DD): {e}"
        ))
    })
}
