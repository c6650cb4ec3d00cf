//! Night and exposure identifiers
//!
//! A night is an eight-digit `YYYYMMDD` string whose lexical order matches
//! chronological order. An exposure is an integer id, always rendered as
//! eight zero-padded digits on disk and in the status ledger.

use chrono::{DateTime, Duration, Local, NaiveDate, TimeZone};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IdentifierError {
    #[error("Invalid night '{0}', expected YYYYMMDD")]
    InvalidNight(String),

    #[error("Invalid exposure '{0}', expected up to 8 digits")]
    InvalidExposure(String),

    #[error("Malformed exposure path: {0}")]
    MalformedPath(String),
}

fn is_eight_digits(s: &str) -> bool {
    s.len() == 8 && s.bytes().all(|b| b.is_ascii_digit())
}

/// Observing night in `YYYYMMDD` form
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Night(String);

impl Night {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Calendar year of the night; selects the ledger document
    pub fn year(&self) -> i32 {
        // Validated on construction, the prefix is always four digits.
        self.0[..4].parse().unwrap_or_default()
    }

    /// The night before the local calendar day containing `now`
    pub fn yesterday<Tz: TimeZone>(now: DateTime<Tz>) -> Self {
        let local = now.with_timezone(&Local) - Duration::days(1);
        Night(local.format("%Y%m%d").to_string())
    }

    /// The night in progress at `now`; it rolls over at 19:00 local time
    pub fn tonight<Tz: TimeZone>(now: DateTime<Tz>) -> Self {
        let local = now.with_timezone(&Local) - Duration::hours(19);
        Night(local.format("%Y%m%d").to_string())
    }
}

impl FromStr for Night {
    type Err = IdentifierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if !is_eight_digits(s) || NaiveDate::parse_from_str(s, "%Y%m%d").is_err() {
            return Err(IdentifierError::InvalidNight(s.to_string()));
        }
        Ok(Night(s.to_string()))
    }
}

impl TryFrom<String> for Night {
    type Error = IdentifierError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Night> for String {
    fn from(night: Night) -> Self {
        night.0
    }
}

impl fmt::Display for Night {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Exposure id within a night
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Exposure(u32);

impl Exposure {
    pub fn new(id: u32) -> Self {
        Exposure(id)
    }

    pub fn id(&self) -> u32 {
        self.0
    }
}

impl FromStr for Exposure {
    type Err = IdentifierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() || s.len() > 8 || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(IdentifierError::InvalidExposure(s.to_string()));
        }
        s.parse::<u32>()
            .map(Exposure)
            .map_err(|_| IdentifierError::InvalidExposure(s.to_string()))
    }
}

impl TryFrom<String> for Exposure {
    type Error = IdentifierError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Exposure> for String {
    fn from(exposure: Exposure) -> Self {
        exposure.to_string()
    }
}

impl fmt::Display for Exposure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08}", self.0)
    }
}

/// Parse a remote link path ending in `<night>/<exposure>`
///
/// Both components must be exactly eight digits; anything else (temporary
/// suffixes, short ids) is rejected so the caller can log and skip it.
pub fn parse_exposure_link(link: &str) -> Result<(Night, Exposure), IdentifierError> {
    let malformed = || IdentifierError::MalformedPath(link.to_string());
    let mut parts = link.trim_end_matches('/').rsplit('/');
    let exposure = parts.next().filter(|p| is_eight_digits(p)).ok_or_else(malformed)?;
    let night = parts.next().filter(|p| is_eight_digits(p)).ok_or_else(malformed)?;

    let night = night.parse::<Night>().map_err(|_| malformed())?;
    let exposure = exposure.parse::<Exposure>().map_err(|_| malformed())?;
    Ok((night, exposure))
}

/// Expand a `{night}`/`{exposure}` filename template
pub fn expand_template(template: &str, night: &Night, exposure: &Exposure) -> String {
    template
        .replace("{night}", night.as_str())
        .replace("{exposure}", &exposure.to_string())
}
