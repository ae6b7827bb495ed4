//! In-memory storage implementation.

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::error::Result;
use crate::Store;

/// A `Store` backed by a `HashMap`, for tests and runs that need no durability.
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys currently stored.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.read().len()
    }

    /// Returns true if nothing has been stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.read().is_empty()
    }
}

impl Store for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.values.read().get(key).cloned())
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        self.values.write().insert(key.to_string(), value.to_vec());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Credential, StoreExt};
    use chrono::{Duration, Utc};

    #[test]
    fn set_overwrites() {
        let store = MemoryStore::new();
        assert!(store.is_empty());

        store.set("a", b"1").unwrap();
        store.set("a", b"2").unwrap();

        assert_eq!(store.get("a").unwrap(), Some(b"2".to_vec()));
        assert_eq!(store.len(), 1);
        assert_eq!(store.get("b").unwrap(), None);
    }

    #[test]
    fn credential_roundtrip() {
        let store = MemoryStore::new();
        assert!(store.load_credential().unwrap().is_none());

        let now = Utc::now();
        let credential = Credential {
            token: "t".to_string(),
            issued_at: now,
            expires_at: now + Duration::hours(1),
        };
        store.save_credential(&credential).unwrap();

        assert_eq!(store.load_credential().unwrap(), Some(credential));
    }

    #[test]
    fn corrupt_record_is_an_error() {
        let store = MemoryStore::new();
        store.set(crate::keys::CREDENTIAL, b"\xff\xff").unwrap();
        assert!(store.load_credential().is_err());
    }
}
