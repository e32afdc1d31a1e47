//! In-memory access-token representation.

use chrono::{DateTime, Duration, Utc};

/// Seconds before the recorded expiry at which a token stops being served
/// from cache. Covers clock skew and in-flight request time.
const EXPIRY_SKEW_SECONDS: i64 = 60;

/// A cached bearer token with its expiry, if one is known.
///
/// A token without an expiry never goes stale locally; upstream manages its
/// lifetime (service-account tokens persisted by another process).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessToken {
    pub token: String,
    pub expires_at: Option<DateTime<Utc>>,
}

impl AccessToken {
    pub fn new(token: impl Into<String>, expires_at: Option<DateTime<Utc>>) -> Self {
        Self {
            token: token.into(),
            expires_at,
        }
    }

    /// Whether the token can still be served from cache.
    pub fn is_valid(&self) -> bool {
        match self.expires_at {
            None => true,
            Some(expires_at) => Utc::now() < expires_at - Duration::seconds(EXPIRY_SKEW_SECONDS),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_without_expiry_is_always_valid() {
        assert!(AccessToken::new("t", None).is_valid());
    }

    #[test]
    fn token_far_from_expiry_is_valid() {
        let token = AccessToken::new("t", Some(Utc::now() + Duration::hours(1)));
        assert!(token.is_valid());
    }

    #[test]
    fn token_inside_skew_window_is_invalid() {
        let token = AccessToken::new("t", Some(Utc::now() + Duration::seconds(30)));
        assert!(!token.is_valid());
    }

    #[test]
    fn expired_token_is_invalid() {
        let token = AccessToken::new("t", Some(Utc::now() - Duration::minutes(5)));
        assert!(!token.is_valid());
    }
}
