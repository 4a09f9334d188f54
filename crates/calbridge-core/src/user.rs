//! User identity.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Opaque stable identifier for an end user.
///
/// This is the primary key for persisted credentials, cached timezones and
/// in-flight authorization state. The numeric value comes from the chat
/// front-end's account id and carries no meaning inside calbridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(i64);

impl UserId {
    /// Creates a user id from a raw account number.
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    /// Returns the raw account number.
    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for UserId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl FromStr for UserId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<i64>().map(Self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_matches_raw_value() {
        let user = UserId::new(123456789);
        assert_eq!(user.to_string(), "123456789");
        assert_eq!(user.as_i64(), 123456789);
    }

    #[test]
    fn parses_from_string() {
        let user: UserId = "42".parse().unwrap();
        assert_eq!(user, UserId::new(42));
        assert!("not-a-number".parse::<UserId>().is_err());
    }

    #[test]
    fn serializes_transparently() {
        let user = UserId::new(7);
        assert_eq!(serde_json::to_string(&user).unwrap(), "7");
        let back: UserId = serde_json::from_str("7").unwrap();
        assert_eq!(back, user);
    }
}
