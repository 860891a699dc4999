//! Mission time conversions. TT counts seconds since 2004-01-01T00:00:00 UTC
//! (MJD 53005); leap seconds are not applied.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeDelta, Utc};

use crate::error::AnalysisError;

pub const TT_EPOCH_MJD: f64 = 53005.0;
pub const SECONDS_PER_DAY: f64 = 86400.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeType {
    Tt,
    Mjd,
}

impl TimeType {
    pub fn to_tt(self, value: f64) -> f64 {
        match self {
            TimeType::Tt => value,
            TimeType::Mjd => mjd_to_tt(value),
        }
    }
}

impl fmt::Display for TimeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeType::Tt => write!(f, "TT"),
            TimeType::Mjd => write!(f, "MJD"),
        }
    }
}

impl FromStr for TimeType {
    type Err = AnalysisError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_uppercase().as_str() {
            "TT" => Ok(TimeType::Tt),
            "MJD" => Ok(TimeType::Mjd),
            _ => Err(AnalysisError::InvalidTimeType(value.to_string())),
        }
    }
}

pub fn mjd_to_tt(mjd: f64) -> f64 {
    (mjd - TT_EPOCH_MJD) * SECONDS_PER_DAY
}

pub fn tt_to_mjd(tt: f64) -> f64 {
    tt / SECONDS_PER_DAY + TT_EPOCH_MJD
}

fn epoch() -> DateTime<Utc> {
    NaiveDate::from_ymd_opt(2004, 1, 1)
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
        .unwrap_or_default()
}

/// `YYYY-MM-DDTHH:MM:SS[.fff]`, UTC.
pub fn tt_to_utc_iso(tt: f64) -> String {
    let offset = TimeDelta::milliseconds((tt * 1000.0).round() as i64);
    (epoch() + offset).format("%Y-%m-%dT%H:%M:%S%.3f").to_string()
}

pub fn utc_iso_to_tt(iso: &str) -> Result<f64, AnalysisError> {
    let trimmed = iso.trim().trim_end_matches('Z');
    let naive = NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%d %H:%M:%S%.f"))
        .map_err(|err| AnalysisError::InvalidTimeType(format!("{iso}: {err}")))?;
    let elapsed = naive.and_utc() - epoch();
    Ok(elapsed.num_milliseconds() as f64 / 1000.0)
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn epoch_is_zero_in_every_scale() {
        assert_eq!(mjd_to_tt(53005.0), 0.0);
        assert_eq!(tt_to_mjd(0.0), 53005.0);
        assert_eq!(tt_to_utc_iso(0.0), "2004-01-01T00:00:00.000");
        assert_eq!(utc_iso_to_tt("2004-01-01T00:00:00").unwrap(), 0.0);
    }

    #[test]
    fn one_day_after_epoch() {
        assert_eq!(mjd_to_tt(53006.5), 129600.0);
        assert_eq!(utc_iso_to_tt("2004-01-02 12:00:00").unwrap(), 129600.0);
        assert_eq!(TimeType::Mjd.to_tt(53006.0), 86400.0);
    }

    #[test]
    fn time_type_parsing() {
        assert_eq!("mjd".parse::<TimeType>().unwrap(), TimeType::Mjd);
        assert_matches!("UTC".parse::<TimeType>(), Err(AnalysisError::InvalidTimeType(_)));
    }
}
