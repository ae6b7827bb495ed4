//! Identifier types for platform resources.
//!
//! The platform addresses every object with an opaque string (`pkg-…`,
//! `net-…`, `dep-…`, device UUIDs). Each kind gets its own newtype so a
//! package GUID can never be passed where a deployment ID is expected.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

macro_rules! platform_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            /// Create an identifier, rejecting empty or whitespace-only input.
            ///
            /// # Errors
            ///
            /// Returns `IdError::Empty` if the value is blank.
            pub fn new(value: impl Into<String>) -> Result<Self, IdError> {
                let value = value.into();
                if value.trim().is_empty() {
                    return Err(IdError::Empty(stringify!($name)));
                }
                Ok(Self(value))
            }

            /// Borrow the raw identifier.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $name {
            type Err = IdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::new(s)
            }
        }

        impl TryFrom<String> for $name {
            type Error = IdError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::new(value)
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

platform_id! {
    /// The project scope every API call is made in.
    ProjectId
}

platform_id! {
    /// The catalogue GUID of a package (`pkg-…`).
    PackageGuid
}

platform_id! {
    /// The GUID of a routed network.
    NetworkGuid
}

platform_id! {
    /// The ID of a deployment (service instance).
    DeploymentId
}

platform_id! {
    /// The UUID of a registered device.
    DeviceId
}

/// A package addressed by name and version instead of GUID.
///
/// Versions are compared with and without a leading `v`, so `v1.0.0` and
/// `1.0.0` address the same package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageRef {
    /// Package name.
    pub name: String,
    /// Package version, with or without a leading `v`.
    pub version: String,
}

impl PackageRef {
    /// Create a reference from a name and version.
    #[must_use]
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }

    /// Returns true if `name` and `version` address this package.
    #[must_use]
    pub fn matches(&self, name: &str, version: &str) -> bool {
        self.name == name && normalize_version(&self.version) == normalize_version(version)
    }
}

impl fmt::Display for PackageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.name, self.version)
    }
}

/// Strip a single leading `v` from a version string.
#[must_use]
pub fn normalize_version(version: &str) -> &str {
    version.strip_prefix('v').unwrap_or(version)
}

/// Errors that can occur when parsing identifiers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdError {
    /// The identifier was empty.
    #[error("{0} must not be empty")]
    Empty(&'static str),
}
