//! Core types and document utilities for rio-ctl.
//!
//! This crate provides the foundational, I/O-free pieces shared by the
//! session and reconciliation layers:
//!
//! - **Identifiers**: strongly-typed IDs for projects, packages, networks,
//!   deployments and devices
//! - **Lookup**: the `Found` / `NotFound` outcome of fetching by identity
//! - **Diff/Merge**: structural comparison and recursive merge of JSON
//!   documents
//!
//! # Example
//!
//! ```
//! use rio_core::{diff, merge};
//! use serde_json::json;
//!
//! let observed = json!({"name": "grafana", "parameters": {"x": 1}});
//! let patch = json!({"parameters": {"x": 2}});
//!
//! let desired = merge::merged(&observed, &patch);
//! let changes = diff::recursive_diff(&observed, &desired);
//!
//! assert_eq!(changes, json!({"parameters": {"x": {"old": 1, "new": 2}}}));
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod diff;
pub mod error;
pub mod ids;
pub mod lookup;
pub mod merge;

pub use error::{CoreError, Result};
pub use ids::{
    normalize_version, DeploymentId, DeviceId, IdError, NetworkGuid, PackageGuid, PackageRef,
    ProjectId,
};
pub use lookup::Lookup;
