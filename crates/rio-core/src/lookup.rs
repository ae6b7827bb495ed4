//! The result of fetching a resource by identity.
//!
//! A lookup either finds the resource or reports that it does not exist.
//! Failures travel separately as `Err`, so callers see three distinct
//! outcomes: `Ok(Found(_))`, `Ok(NotFound)` and `Err(_)`. An empty document
//! is still `Found`.

use serde::{Deserialize, Serialize};

/// Outcome of looking a resource up by identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "value", rename_all = "snake_case")]
pub enum Lookup<T> {
    /// The resource exists.
    Found(T),
    /// The resource does not exist.
    NotFound,
}

impl<T> Lookup<T> {
    /// Returns true if the resource was found.
    #[must_use]
    pub const fn is_found(&self) -> bool {
        matches!(self, Self::Found(_))
    }

    /// Convert into an `Option`.
    #[must_use]
    pub fn found(self) -> Option<T> {
        match self {
            Self::Found(value) => Some(value),
            Self::NotFound => None,
        }
    }

    /// Map the found value.
    pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> Lookup<U> {
        match self {
            Self::Found(value) => Lookup::Found(f(value)),
            Self::NotFound => Lookup::NotFound,
        }
    }
}

impl<T> From<Option<T>> for Lookup<T> {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::NotFound, Self::Found)
    }
}
