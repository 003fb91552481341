//! Event-time (de)serialization helpers.
//!
//! Upstream producers emit timestamps in three shapes: RFC 3339 strings,
//! naive ISO 8601 strings (assumed UTC), and epoch-millisecond numbers.
//! All are accepted on ingress; serialization always emits RFC 3339 with
//! second precision so message payloads stay byte-stable.

use chrono::{DateTime, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use serde::de::{self, Deserializer, Visitor};
use serde::Serializer;

pub fn serialize<S>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&ts.to_rfc3339_opts(SecondsFormat::Secs, true))
}

pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    deserializer.deserialize_any(TimestampVisitor)
}

struct TimestampVisitor;

impl Visitor<'_> for TimestampVisitor {
    type Value = DateTime<Utc>;

    fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
        formatter.write_str("an ISO-8601 timestamp string or epoch milliseconds")
    }

    fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        parse_iso8601(value).ok_or_else(|| E::custom(format!("invalid timestamp '{value}'")))
    }

    fn visit_i64<E>(self, value: i64) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        from_epoch_millis(value).ok_or_else(|| E::custom(format!("epoch ms out of range: {value}")))
    }

    fn visit_u64<E>(self, value: u64) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        let millis = i64::try_from(value)
            .map_err(|_| E::custom(format!("epoch ms out of range: {value}")))?;
        self.visit_i64(millis)
    }

    fn visit_f64<E>(self, value: f64) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        self.visit_i64(value as i64)
    }
}

/// Parse an RFC 3339 string, falling back to naive ISO 8601 interpreted as UTC.
pub fn parse_iso8601(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Some(ts.with_timezone(&Utc));
    }
    let naive = NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f").ok()?;
    Some(Utc.from_utc_datetime(&naive))
}

/// Convert epoch milliseconds to a UTC timestamp.
pub fn from_epoch_millis(millis: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis)
}

/// Support for `Option<DateTime<Utc>>` fields using the same flexible parsing.
pub mod optional {
    use super::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(ts: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match ts {
            Some(ts) => super::serialize(ts, serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct Wrapper(#[serde(with = "super")] DateTime<Utc>);

        let value = Option::<Wrapper>::deserialize(deserializer)?;
        Ok(value.map(|Wrapper(ts)| ts))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Deserialize)]
    struct Holder {
        #[serde(with = "super")]
        ts: DateTime<Utc>,
    }

    #[test]
    fn parses_rfc3339() {
        let h: Holder = serde_json::from_str(r#"{"ts":"2024-01-01T00:05:30Z"}"#).unwrap();
        assert_eq!(h.ts.timestamp(), 1_704_067_530);
    }

    #[test]
    fn parses_naive_iso_as_utc() {
        let h: Holder = serde_json::from_str(r#"{"ts":"2024-01-01T00:05:30"}"#).unwrap();
        assert_eq!(h.ts.timestamp(), 1_704_067_530);
    }

    #[test]
    fn parses_epoch_millis() {
        let h: Holder = serde_json::from_str(r#"{"ts":1704067530000}"#).unwrap();
        assert_eq!(h.ts.timestamp(), 1_704_067_530);
    }

    #[test]
    fn rejects_garbage() {
        let result: Result<Holder, _> = serde_json::from_str(r#"{"ts":"yesterday"}"#);
        assert!(result.is_err());
    }
}
