//! Unix timestamp handling for payment authorization validity windows.
//!
//! `validAfter` and `validBefore` travel the wire as JSON strings (not numbers) so that
//! clients with 53-bit-safe-integer JSON parsers never lose precision on far-future values.

use std::fmt;
use std::ops::Add;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Seconds since the Unix epoch.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UnixTimestamp(u64);

impl UnixTimestamp {
    pub fn from_secs(secs: u64) -> Self {
        Self(secs)
    }

    pub fn as_secs(&self) -> u64 {
        self.0
    }

    /// Current wall-clock time. Panics if the system clock is set before 1970,
    /// which is the same failure mode as every other `SystemTime::now()` caller.
    pub fn now() -> Self {
        let secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock is before the Unix epoch")
            .as_secs();
        Self(secs)
    }

    pub fn saturating_sub(&self, secs: u64) -> Self {
        Self(self.0.saturating_sub(secs))
    }
}

impl Add<u64> for UnixTimestamp {
    type Output = UnixTimestamp;

    fn add(self, rhs: u64) -> Self::Output {
        Self(self.0.saturating_add(rhs))
    }
}

impl fmt::Display for UnixTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for UnixTimestamp {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

impl From<u64> for UnixTimestamp {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl Serialize for UnixTimestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for UnixTimestamp {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum StringOrNumber {
            String(String),
            Number(u64),
        }
        let value = StringOrNumber::deserialize(deserializer)?;
        match value {
            StringOrNumber::String(s) => s.parse().map(UnixTimestamp).map_err(serde::de::Error::custom),
            StringOrNumber::Number(n) => Ok(UnixTimestamp(n)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_as_string() {
        let ts = UnixTimestamp::from_secs(1_700_000_000);
        assert_eq!(serde_json::to_string(&ts).unwrap(), "\"1700000000\"");
    }

    #[test]
    fn deserializes_string_and_number() {
        let from_str: UnixTimestamp = serde_json::from_str("\"1700000000\"").unwrap();
        let from_num: UnixTimestamp = serde_json::from_str("1700000000").unwrap();
        assert_eq!(from_str, from_num);
    }

    #[test]
    fn add_is_saturating() {
        let ts = UnixTimestamp::from_secs(u64::MAX - 1);
        assert_eq!((ts + 5).as_secs(), u64::MAX);
    }
}
