//! Declarative reconciliation of platform resources for rio-ctl.
//!
//! This crate compares desired packages, routed networks, deployments and
//! device labels with what the platform reports and performs the minimal
//! mutation to converge them. Every call goes through an authenticated
//! [`rio_auth::Session`].
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  rioctl apply <state file>                  │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         Reconciler                          │
//! │  ┌─────────────┐ ┌─────────────┐ ┌─────────────────────┐    │
//! │  │  Identity   │ │  Diff /     │ │    Provisioning     │    │
//! │  │  Resolution │ │  Merge      │ │    State Machine    │    │
//! │  └─────────────┘ └─────────────┘ └─────────────────────┘    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//!                     ┌──────────────────┐
//!                     │   PlatformApi    │
//!                     │ (HTTP via        │
//!                     │  Session)        │
//!                     └──────────────────┘
//! ```
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use rio_auth::{PlatformConfig, ReqwestTransport, Session};
//! use rio_control::{HttpPlatformClient, ReconcileOptions, Reconciler};
//! use rio_store::MemoryStore;
//! use serde_json::json;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = PlatformConfig::from_env()?;
//! let session = Session::new(
//!     Arc::new(ReqwestTransport::new(config.request_timeout())),
//!     Arc::new(MemoryStore::new()),
//!     Arc::new(config.clone()),
//!     &config.session_settings(),
//! );
//! let platform = HttpPlatformClient::new(Arc::new(session), &config);
//! let reconciler = Reconciler::new(Arc::new(platform));
//!
//! let manifest = json!({"name": "grafana", "packageVersion": "v2", "plans": []});
//! let outcome = reconciler
//!     .package_present(&manifest, ReconcileOptions::dry_run())
//!     .await?;
//!
//! println!("{}: {}", outcome.name, outcome.message);
//! # Ok(())
//! # }
//! ```
//!
//! # Outcomes
//!
//! Every operation returns a [`ReconcileOutcome`]. Only configuration errors
//! (no project, no credentials) are returned as `Err`; remote failures,
//! unmet preconditions and failed provisioning are reported as outcomes
//! with `succeeded == false`.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod identity;
pub mod lifecycle;
pub mod manifest;
pub mod platform;
pub mod reconcile;
pub mod types;

pub use error::{ControlError, Result};
pub use lifecycle::{wait_for_deployment, Phase, PollConfig, ProvisioningOutcome, POSITIVE_PHASES};
pub use manifest::{load_manifest, load_state};
pub use platform::{HttpPlatformClient, PlatformApi};
pub use reconcile::{NameMatcher, Reconciler, TargetMatcher};
pub use types::{
    DeploymentSpec, Ensure, LabelSpec, NetworkSpec, ReconcileOptions, ReconcileOutcome, StateEntry,
};

#[cfg(any(test, feature = "test-utils"))]
pub use platform::MockPlatform;
