//! Poll watermarks
//!
//! A watermark is the instant a project was last confirmed built. The
//! directory may hand it over as epoch milliseconds or as a timestamp string;
//! outbound requests need it both as an ISO-8601 instant and as an HTTP-date.

use chrono::{DateTime, SecondsFormat, SubsecRound, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// A watermark could not be interpreted as an absolute instant
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid watermark: {0}")]
pub struct WatermarkError(pub String);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Watermark(DateTime<Utc>);

impl Watermark {
    pub fn new(at: DateTime<Utc>) -> Self {
        Self(at)
    }

    /// The current instant, truncated to the millisecond precision watermarks are stored with
    pub fn now() -> Self {
        Self(Utc::now().trunc_subsecs(3))
    }

    pub fn from_millis(millis: i64) -> Result<Self, WatermarkError> {
        Utc.timestamp_millis_opt(millis)
            .single()
            .map(Self)
            .ok_or_else(|| WatermarkError(format!("{} is out of range", millis)))
    }

    /// Parses epoch milliseconds, RFC 3339 or RFC 2822 text.
    pub fn parse(raw: &str) -> Result<Self, WatermarkError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(WatermarkError("`last_polled_at` must be given".to_string()));
        }

        if raw.bytes().all(|b| b.is_ascii_digit()) {
            let millis = raw
                .parse::<i64>()
                .map_err(|e| WatermarkError(format!("{}: {}", raw, e)))?;
            return Self::from_millis(millis);
        }

        DateTime::parse_from_rfc3339(raw)
            .or_else(|_| DateTime::parse_from_rfc2822(raw))
            .map(|dt| Self(dt.with_timezone(&Utc)))
            .map_err(|_| WatermarkError(format!("unrecognized timestamp {:?}", raw)))
    }

    pub fn as_datetime(&self) -> DateTime<Utc> {
        self.0
    }

    /// ISO-8601 instant with millisecond precision, e.g. `2017-08-03T12:13:20.000Z`
    pub fn to_iso8601(&self) -> String {
        self.0.to_rfc3339_opts(SecondsFormat::Millis, true)
    }

    /// RFC-1123 HTTP-date, e.g. `Thu, 03 Aug 2017 12:13:20 GMT`
    pub fn to_http_date(&self) -> String {
        self.0.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
    }
}

impl fmt::Display for Watermark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_iso8601())
    }
}

impl FromStr for Watermark {
    type Err = WatermarkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl From<DateTime<Utc>> for Watermark {
    fn from(at: DateTime<Utc>) -> Self {
        Self(at)
    }
}

impl Serialize for Watermark {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_iso8601())
    }
}

impl<'de> Deserialize<'de> for Watermark {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Millis(i64),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Millis(millis) => Watermark::from_millis(millis),
            Raw::Text(text) => Watermark::parse(&text),
        }
        .map_err(serde::de::Error::custom)
    }
}
