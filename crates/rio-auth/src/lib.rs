//! Authenticated platform session for rio-ctl.
//!
//! This crate owns everything between "call this platform endpoint" and the
//! bytes on the wire:
//!
//! - Bearer credential caching in a durable store, with expiry
//! - Transparent re-login when the platform rejects a cached token
//! - Project scoping from per-call overrides or configuration
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐     ┌──────────────────┐
//! │   Reconciler     │────▶│     Session      │──────┐
//! │   (rio-control)  │     │ (cache + retry)  │      │ ConfigSource
//! └──────────────────┘     └───┬──────────┬───┘      ▼
//!                              │          │   ┌──────────────────┐
//!                 ┌────────────▼───┐  ┌───▼───┤  PlatformConfig  │
//!                 │  LoginClient   │  │ Store │  (env / file)     │
//!                 └────────┬───────┘  └───────┴──────────────────┘
//!                          │
//!                 ┌────────▼─────────┐
//!                 │  HttpTransport   │
//!                 │  (reqwest)       │
//!                 └──────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use rio_auth::{Method, PlatformConfig, ReqwestTransport, RequestScope, Session};
//! use rio_store::MemoryStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = PlatformConfig::from_env()?;
//! let transport = Arc::new(ReqwestTransport::new(config.request_timeout()));
//! let settings = config.session_settings();
//! let catalog = format!("{}/v2/catalog", config.catalog_host);
//!
//! let session = Session::new(
//!     transport,
//!     Arc::new(MemoryStore::new()),
//!     Arc::new(config),
//!     &settings,
//! );
//!
//! let packages = session
//!     .authenticated_request(Method::GET, &catalog, None, &[], &RequestScope::ambient())
//!     .await?;
//! println!("{packages}");
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod client;
pub mod config;
pub mod error;
pub mod session;
pub mod transport;

pub use client::{LoginClient, LoginRequest};
pub use config::{ConfigSource, PlatformConfig, SessionSettings, StaticConfig};
pub use error::{AuthError, Result};
pub use session::{RequestScope, Session};
pub use transport::{HttpRequest, HttpResponse, HttpTransport, Method, ReqwestTransport};

#[cfg(any(test, feature = "test-utils"))]
pub use transport::MockTransport;
