use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::ops::Deref;

/// Absolute point in time as carried by a JWT `exp` claim.
///
/// Wraps `chrono::DateTime<Utc>` and (de)serializes as seconds since the
/// Unix epoch, accepting both integer and fractional values on input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(pub DateTime<Utc>);

/// Wire representation of a NumericDate
#[derive(Deserialize)]
#[serde(untagged)]
enum NumericDate {
    Whole(i64),
    Fractional(f64),
}

impl Timestamp {
    /// Create a new Timestamp from a DateTime
    pub fn new(dt: DateTime<Utc>) -> Self {
        Timestamp(dt)
    }

    /// Create a Timestamp from whole seconds since the epoch.
    /// Returns `None` when the value is outside chrono's range.
    pub fn from_unix(secs: i64) -> Option<Self> {
        Utc.timestamp_opt(secs, 0).single().map(Timestamp)
    }

    /// Create a Timestamp from fractional seconds since the epoch
    pub fn from_unix_f64(secs: f64) -> Option<Self> {
        if !secs.is_finite() {
            return None;
        }
        let whole = secs.floor();
        let nanos = ((secs - whole) * 1_000_000_000.0) as u32;
        Utc.timestamp_opt(whole as i64, nanos).single().map(Timestamp)
    }

    /// The current wall-clock time
    pub fn now() -> Self {
        Timestamp(Utc::now())
    }

    /// Get the unix timestamp in seconds
    pub fn unix(&self) -> i64 {
        self.0.timestamp()
    }

    /// Whether this instant lies strictly after `now`.
    /// An expiry equal to `now` counts as already expired.
    pub fn is_after(&self, now: DateTime<Utc>) -> bool {
        self.0 > now
    }
}

impl Deref for Timestamp {
    type Target = DateTime<Utc>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(dt: DateTime<Utc>) -> Self {
        Timestamp(dt)
    }
}

impl From<Timestamp> for DateTime<Utc> {
    fn from(t: Timestamp) -> Self {
        t.0
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.to_rfc3339())
    }
}

impl Serialize for Timestamp {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_i64(self.unix())
    }
}

impl<'de> Deserialize<'de> for Timestamp {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let parsed = match NumericDate::deserialize(deserializer)? {
            NumericDate::Whole(secs) => Timestamp::from_unix(secs),
            NumericDate::Fractional(secs) => Timestamp::from_unix_f64(secs),
        };
        parsed.ok_or_else(|| serde::de::Error::custom("timestamp out of range"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json;

    #[test]
    fn test_timestamp_serialization() {
        let ts = Timestamp::from_unix(1597242491).unwrap();
        let json = serde_json::to_string(&ts).unwrap();
        assert_eq!(json, "1597242491");
    }

    #[test]
    fn test_timestamp_deserialization() {
        let ts: Timestamp = serde_json::from_str("1597242491").unwrap();
        assert_eq!(ts.unix(), 1597242491);

        let ts: Timestamp = serde_json::from_str("1597242491.5").unwrap();
        assert_eq!(ts.unix(), 1597242491);
        assert_eq!(ts.timestamp_subsec_millis(), 500);
    }

    #[test]
    fn test_timestamp_rejects_strings() {
        let result: Result<Timestamp, _> = serde_json::from_str("\"tomorrow\"");
        assert!(result.is_err());
    }

    #[test]
    fn test_is_after_is_exclusive() {
        let ts = Timestamp::from_unix(1_700_000_000).unwrap();
        assert!(!ts.is_after(ts.0));
        assert!(ts.is_after(ts.0 - chrono::Duration::seconds(1)));
        assert!(!ts.is_after(ts.0 + chrono::Duration::seconds(1)));
    }
}
