//! Durable small-value storage for rio-ctl.
//!
//! The session layer needs exactly one thing to survive process restarts:
//! the cached bearer credential. This crate provides a minimal key/value
//! [`Store`] with a `RocksDB` implementation for durability and an in-memory
//! one for tests and ephemeral runs.
//!
//! # Architecture
//!
//! - `kv` column family: values addressed by namespaced string keys
//!   (see [`keys`]), typed records encoded as CBOR (see [`codec`])
//!
//! # Example
//!
//! ```no_run
//! use rio_store::{RocksStore, StoreExt};
//!
//! let store = RocksStore::open("/tmp/rio-ctl-db").unwrap();
//!
//! if let Some(credential) = store.load_credential().unwrap() {
//!     println!("cached credential expires at {}", credential.expires_at);
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod codec;
pub mod error;
pub mod keys;
pub mod memory;
pub mod rocks;
pub mod schema;
pub mod types;

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use rocks::RocksStore;
pub use types::Credential;

/// The storage trait: a durable map from string keys to byte values.
///
/// Implementations must make a single `set` atomic with respect to `get`;
/// callers that need read-check-write atomicity serialise it themselves.
pub trait Store: Send + Sync {
    /// Get the value stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Store `value` under `key`, overwriting any previous value.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn set(&self, key: &str, value: &[u8]) -> Result<()>;
}

/// Typed helpers on top of any [`Store`].
pub trait StoreExt: Store {
    /// Read and decode a CBOR record.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails or the stored bytes do not decode.
    fn get_record<T: serde::de::DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        self.get(key)?.map(|data| codec::decode(&data)).transpose()
    }

    /// Encode and write a CBOR record.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding or the write fails.
    fn put_record<T: serde::Serialize>(&self, key: &str, value: &T) -> Result<()> {
        self.set(key, &codec::encode(value)?)
    }

    /// Read the cached credential.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails or the record is corrupt.
    fn load_credential(&self) -> Result<Option<Credential>> {
        self.get_record(keys::CREDENTIAL)
    }

    /// Overwrite the cached credential.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    fn save_credential(&self, credential: &Credential) -> Result<()> {
        self.put_record(keys::CREDENTIAL, credential)
    }
}

impl<S: Store + ?Sized> StoreExt for S {}

impl<S: Store + ?Sized> Store for std::sync::Arc<S> {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        (**self).set(key, value)
    }
}
