//! Wire representation of absolute timestamps.
//!
//! Timestamps travel as RFC 3339 strings with an explicit numeric offset
//! (`2025-06-21T08:20:19.595875+00:00`). Sub-second digits are emitted only
//! when present, so decoding yields the exact instant that was encoded.
//!
//! Use as `#[serde(with = "finshared_core::timestamp")]`.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serializer};

/// Render an instant in the wire format.
pub fn to_wire(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::AutoSi, false)
}

/// Parse any RFC 3339 timestamp (any offset) back into an instant.
pub fn from_wire(s: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(s).map(|ts| ts.with_timezone(&Utc))
}

pub fn serialize<S>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&to_wire(ts))
}

pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    from_wire(&raw).map_err(serde::de::Error::custom)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    #[test]
    fn renders_numeric_offset() {
        let ts = Utc.with_ymd_and_hms(2025, 6, 21, 8, 20, 19).unwrap();
        assert_eq!(to_wire(&ts), "2025-06-21T08:20:19+00:00");
    }

    #[test]
    fn accepts_foreign_offsets() {
        let parsed = from_wire("2025-06-21T10:20:19+02:00").unwrap();
        assert_eq!(parsed, Utc.with_ymd_and_hms(2025, 6, 21, 8, 20, 19).unwrap());
    }

    #[test]
    fn rejects_naive_timestamps() {
        assert!(from_wire("2025-06-21T08:20:19").is_err());
    }

    proptest! {
        #[test]
        fn wire_form_preserves_the_instant(secs in 0i64..4_102_444_800, nanos in 0u32..1_000_000_000) {
            let ts = Utc.timestamp_opt(secs, nanos).unwrap();
            prop_assert_eq!(from_wire(&to_wire(&ts)).unwrap(), ts);
        }
    }
}
