use chrono::{Datelike, Days, Months, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::PortfolioError;

/// How far back price history reaches, in market-data notation
/// (`5d`, `2wk`, `6mo`, `1y`, `ytd`, `max`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum LookbackPeriod {
    Days(u32),
    Weeks(u32),
    Months(u32),
    Years(u32),
    YearToDate,
    Max,
}

impl Default for LookbackPeriod {
    fn default() -> Self {
        LookbackPeriod::Years(1)
    }
}

impl LookbackPeriod {
    /// First calendar date inside a window that ends on `end`.
    ///
    /// `None` means unbounded (`max`) or a date before chrono's range.
    pub fn start_date(&self, end: NaiveDate) -> Option<NaiveDate> {
        match *self {
            LookbackPeriod::Days(n) => end.checked_sub_days(Days::new(n as u64)),
            LookbackPeriod::Weeks(n) => end.checked_sub_days(Days::new(7 * u64::from(n))),
            LookbackPeriod::Months(n) => end.checked_sub_months(Months::new(n)),
            LookbackPeriod::Years(n) => end.checked_sub_months(Months::new(n.saturating_mul(12))),
            LookbackPeriod::YearToDate => NaiveDate::from_ymd_opt(end.year(), 1, 1),
            LookbackPeriod::Max => None,
        }
    }
}

impl FromStr for LookbackPeriod {
    type Err = PortfolioError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let text = s.trim().to_ascii_lowercase();
        match text.as_str() {
            "ytd" => return Ok(LookbackPeriod::YearToDate),
            "max" => return Ok(LookbackPeriod::Max),
            _ => {}
        }

        let split = text
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(text.len());
        let (digits, unit) = text.split_at(split);
        let count: u32 = digits.parse().map_err(|_| {
            PortfolioError::invalid(
                "lookback_period",
                format!("'{}' must look like 5d, 2wk, 6mo, 1y, ytd or max", s),
            )
        })?;
        if count == 0 {
            return Err(PortfolioError::invalid(
                "lookback_period",
                format!("'{}' must cover at least one unit", s),
            ));
        }

        match unit {
            "d" => Ok(LookbackPeriod::Days(count)),
            "w" | "wk" => Ok(LookbackPeriod::Weeks(count)),
            "m" | "mo" => Ok(LookbackPeriod::Months(count)),
            "y" => Ok(LookbackPeriod::Years(count)),
            other => Err(PortfolioError::invalid(
                "lookback_period",
                format!("unknown unit '{}' in '{}'", other, s),
            )),
        }
    }
}

impl TryFrom<String> for LookbackPeriod {
    type Error = PortfolioError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<LookbackPeriod> for String {
    fn from(value: LookbackPeriod) -> Self {
        value.to_string()
    }
}

impl fmt::Display for LookbackPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LookbackPeriod::Days(n) => write!(f, "{}d", n),
            LookbackPeriod::Weeks(n) => write!(f, "{}wk", n),
            LookbackPeriod::Months(n) => write!(f, "{}mo", n),
            LookbackPeriod::Years(n) => write!(f, "{}y", n),
            LookbackPeriod::YearToDate => write!(f, "ytd"),
            LookbackPeriod::Max => write!(f, "max"),
        }
    }
}
