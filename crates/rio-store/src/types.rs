//! Records persisted in the store.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A short-lived bearer credential issued by the platform login endpoint.
///
/// Only one credential is cached per store, under [`crate::keys::CREDENTIAL`].
/// It is overwritten in place whenever a new one is issued.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    /// Opaque bearer token.
    pub token: String,
    /// When the token was issued.
    pub issued_at: DateTime<Utc>,
    /// When the token stops being accepted.
    pub expires_at: DateTime<Utc>,
}

impl Credential {
    /// Returns true if the credential can still be used at `now`.
    #[must_use]
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }

    /// Returns true if the credential can still be used.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.is_valid_at(Utc::now())
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("token", &"<redacted>")
            .field("issued_at", &self.issued_at)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn credential(expires_in: Duration) -> Credential {
        let now = Utc::now();
        Credential {
            token: "secret-token".to_string(),
            issued_at: now,
            expires_at: now + expires_in,
        }
    }

    #[test]
    fn validity_follows_expiry() {
        let cred = credential(Duration::minutes(5));
        assert!(cred.is_valid());
        assert!(!cred.is_valid_at(cred.expires_at));
        assert!(!cred.is_valid_at(cred.expires_at + Duration::seconds(1)));
    }

    #[test]
    fn debug_redacts_token() {
        let cred = credential(Duration::minutes(5));
        let debug = format!("{cred:?}");
        assert!(!debug.contains("secret-token"));
        assert!(debug.contains("<redacted>"));
    }
}
