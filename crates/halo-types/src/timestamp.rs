//! Unix timestamps for payment authorization windows.
//!
//! A signed `TransferWithAuthorization` is only valid between its
//! `validAfter` and `validBefore` bounds. Both bounds are whole seconds since
//! the Unix epoch and travel as decimal strings.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt::{Display, Formatter};
use std::ops::Add;
use std::time::{SystemTime, SystemTimeError};

/// Seconds since the Unix epoch (1970-01-01T00:00:00Z).
///
/// Serialized as a stringified integer, since JSON numbers cannot safely
/// carry every 64-bit value:
///
/// ```json
/// "1699999999"
/// ```
///
/// # Example
///
/// ```
/// use halo_types::timestamp::UnixTimestamp;
///
/// let issued = UnixTimestamp::from_secs(1699999999);
/// let expires = issued + 3600;
/// assert_eq!(expires.as_secs(), 1700003599);
/// assert_eq!(issued.saturating_sub(60).as_secs(), 1699999939);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Ord, Eq, Hash)]
pub struct UnixTimestamp(u64);

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
        let s = String::deserialize(deserializer)?;
        let ts = s
            .parse::<u64>()
            .map_err(|_| serde::de::Error::custom("timestamp must be a non-negative integer"))?;
        Ok(UnixTimestamp(ts))
    }
}

impl Display for UnixTimestamp {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Add<u64> for UnixTimestamp {
    type Output = Self;

    fn add(self, rhs: u64) -> Self::Output {
        UnixTimestamp(self.0.saturating_add(rhs))
    }
}

impl UnixTimestamp {
    pub fn from_secs(secs: u64) -> Self {
        Self(secs)
    }

    /// Reads the system clock.
    ///
    /// Fails only when the clock is set before the Unix epoch.
    pub fn try_now() -> Result<Self, SystemTimeError> {
        let now = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)?
            .as_secs();
        Ok(Self(now))
    }

    /// Moves the timestamp `secs` seconds into the past, stopping at the epoch.
    pub fn saturating_sub(self, secs: u64) -> Self {
        Self(self.0.saturating_sub(secs))
    }

    pub fn as_secs(&self) -> u64 {
        self.0
    }
}
