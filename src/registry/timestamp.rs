//! Registry timestamp format
//!
//! The registry is shared with the extraction and API layers, which write
//! naive UTC timestamps such as `2024-03-01 12:00:00.123456`. Parsing also
//! accepts a missing fraction and the `T` separator; anything else is an
//! error rather than a silently dropped value.

use chrono::{NaiveDateTime, Utc};

const WRITE_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";
const READ_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"];

/// Current time in the registry's clock (naive UTC)
pub fn now() -> NaiveDateTime {
    Utc::now().naive_utc()
}

pub fn format(ts: &NaiveDateTime) -> String {
    ts.format(WRITE_FORMAT).to_string()
}

pub fn parse(value: &str) -> Option<NaiveDateTime> {
    let value = value.trim();
    READ_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
}

/// Serde adapter for optional registry timestamps
///
/// `null` and `""` decode as `None`.
pub mod optional {
    use chrono::NaiveDateTime;
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &Option<NaiveDateTime>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(ts) => serializer.serialize_str(&super::format(ts)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<NaiveDateTime>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        match raw {
            None => Ok(None),
            Some(s) if s.trim().is_empty() => Ok(None),
            Some(s) => super::parse(&s)
                .map(Some)
                .ok_or_else(|| de::Error::custom(format!("invalid timestamp '{}'", s))),
        }
    }
}
