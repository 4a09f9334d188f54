//! Per-user timezone cache.
//!
//! Event extraction needs a timezone to resolve relative expressions, and
//! the consumer asks for it on almost every message. The value comes from
//! the user's primary calendar once and is cached here for the coordinator's
//! lifetime; revocation drops the entry.

use std::collections::HashMap;
use std::sync::Mutex;

use calbridge_core::UserId;

/// In-memory timezone cache keyed by user.
#[derive(Debug)]
pub struct TimezoneCache {
    default_timezone: String,
    cache: Mutex<HashMap<UserId, String>>,
}

impl TimezoneCache {
    /// Creates a cache that falls back to `default_timezone`.
    pub fn new(default_timezone: impl Into<String>) -> Self {
        Self {
            default_timezone: default_timezone.into(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the cached timezone for a user, if any.
    pub fn get(&self, user: UserId) -> Option<String> {
        self.cache
            .lock()
            .expect("timezone cache poisoned")
            .get(&user)
            .cloned()
    }

    /// Caches a timezone for a user.
    pub fn set(&self, user: UserId, timezone: impl Into<String>) {
        self.cache
            .lock()
            .expect("timezone cache poisoned")
            .insert(user, timezone.into());
    }

    /// Drops the cached entry for a user.
    pub fn clear(&self, user: UserId) {
        self.cache
            .lock()
            .expect("timezone cache poisoned")
            .remove(&user);
    }

    /// The timezone used when nothing better is known for a user.
    pub fn default_timezone(&self) -> &str {
        &self.default_timezone
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_get_clear() {
        let cache = TimezoneCache::new("UTC");
        let user = UserId::new(1);

        assert!(cache.get(user).is_none());

        cache.set(user, "Asia/Almaty");
        assert_eq!(cache.get(user), Some("Asia/Almaty".to_string()));

        cache.clear(user);
        assert!(cache.get(user).is_none());
    }

    #[test]
    fn default_timezone_is_exposed() {
        let cache = TimezoneCache::new("Europe/Paris");
        assert_eq!(cache.default_timezone(), "Europe/Paris");
    }
}
