//! Human-readable interval parsing and formatting

use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("Invalid interval format: {0}")]
    InvalidFormat(String),

    #[error("Invalid number: {0}")]
    InvalidNumber(#[from] std::num::ParseIntError),

    #[error("Invalid unit: {0}")]
    InvalidUnit(String),

    #[error("Interval too large: {0}")]
    Overflow(String),
}

/// Time interval accepting `"90s"`, `"10m"`, `"1h"` or plain seconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Interval(pub Duration);

impl Interval {
    pub fn from_secs(secs: u64) -> Self {
        Interval(Duration::from_secs(secs))
    }

    pub fn from_mins(mins: u64) -> Self {
        Interval(Duration::from_secs(mins * 60))
    }

    pub fn as_duration(&self) -> Duration {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    pub fn to_human_readable(&self) -> String {
        const UNITS: &[(&str, u64)] = &[("d", 86400), ("h", 3600), ("m", 60)];

        let secs = self.0.as_secs();
        for &(unit, divisor) in UNITS {
            if secs >= divisor && secs % divisor == 0 {
                return format!("{}{}", secs / divisor, unit);
            }
        }
        format!("{}s", secs)
    }
}

impl Serialize for Interval {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_human_readable())
    }
}

impl<'de> Deserialize<'de> for Interval {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct IntervalVisitor;

        impl<'de> serde::de::Visitor<'de> for IntervalVisitor {
            type Value = Interval;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("an interval as string (e.g., \"10m\", \"1h\") or seconds")
            }

            fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                Ok(Interval::from_secs(v))
            }

            fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                u64::try_from(v)
                    .map(Interval::from_secs)
                    .map_err(|_| E::custom(format!("negative interval: {}", v)))
            }

            fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                v.parse::<Interval>().map_err(serde::de::Error::custom)
            }
        }

        deserializer.deserialize_any(IntervalVisitor)
    }
}

impl FromStr for Interval {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_lowercase();

        if let Ok(num) = s.parse::<u64>() {
            return Ok(Interval::from_secs(num));
        }

        let (num_str, unit) = match s.find(|c: char| !c.is_ascii_digit()) {
            Some(0) | None => return Err(ParseError::InvalidFormat(s.to_string())),
            Some(pos) => (&s[..pos], &s[pos..]),
        };

        let num: u64 = num_str.parse()?;

        let multiplier = match unit.trim() {
            "s" | "sec" | "secs" => 1,
            "m" | "min" | "mins" => 60,
            "h" | "hr" | "hrs" => 3600,
            "d" | "day" | "days" => 86400,
            _ => return Err(ParseError::InvalidUnit(unit.to_string())),
        };

        let secs = num
            .checked_mul(multiplier)
            .ok_or_else(|| ParseError::Overflow(s.to_string()))?;
        Ok(Interval::from_secs(secs))
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_human_readable())
    }
}
