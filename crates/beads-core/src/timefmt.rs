//! RFC 3339 timestamp serialisation with fixed nanosecond precision.
//!
//! The manifest must be byte-stable, so every timestamp is written with
//! exactly nine fractional digits and a literal `Z`. Parsing accepts any
//! RFC 3339 offset and normalises to UTC.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{self, Deserialize, Deserializer, Serializer};

/// Formats a timestamp in the canonical manifest form.
pub fn format_ts(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

/// Parses an RFC 3339 timestamp, normalising to UTC.
pub fn parse_ts(s: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(s).map(|dt| dt.with_timezone(&Utc))
}

pub fn serialize<S: Serializer>(dt: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&format_ts(dt))
}

pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
    let s = String::deserialize(deserializer)?;
    parse_ts(&s).map_err(serde::de::Error::custom)
}

/// Same format for `Option<DateTime<Utc>>` fields.
pub mod opt {
    use super::*;

    pub fn serialize<S: Serializer>(
        dt: &Option<DateTime<Utc>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match dt {
            Some(dt) => serializer.serialize_str(&format_ts(dt)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<DateTime<Utc>>, D::Error> {
        let s = Option::<String>::deserialize(deserializer)?;
        match s {
            Some(s) if !s.is_empty() => parse_ts(&s)
                .map(Some)
                .map_err(serde::de::Error::custom),
            _ => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn fixed_nanosecond_width() {
        let dt = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let s = format_ts(&dt);
        assert_eq!(s, "2024-03-01T12:00:00.000000000Z");
    }

    #[test]
    fn parse_accepts_offsets() {
        let dt = parse_ts("2024-03-01T13:00:00.5+01:00").unwrap();
        assert_eq!(format_ts(&dt), "2024-03-01T12:00:00.500000000Z");
    }

    #[test]
    fn format_parse_roundtrip() {
        let now = Utc::now();
        let back = parse_ts(&format_ts(&now)).unwrap();
        assert_eq!(now, back);
    }
}
