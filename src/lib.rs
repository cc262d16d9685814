//! # Abacus Signed-URL Service
//!
//! A small HTTP service that issues time-limited V4 signed download URLs for
//! objects in a Google Cloud Storage bucket, authorized by the ambient
//! platform-attached service identity.
//!
//! ## Modules
//!
//! - [`config`] - Environment-profile settings resolution
//! - [`logging`] - Tracing setup emitting Google structured-log JSON
//! - [`trace`] - Per-request trace/span context and the trace middleware
//! - [`web`] - HTTP server, routes, and error mapping
//! - [`gcp`] - Credential and object-storage capabilities
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `ENVIRONMENT` | Settings profile (`local`, `development`, `test`, `staging`, `production`) | `local` |
//! | `LOG_LEVEL` | Root log level (invalid values fall back to `INFO`) | profile default |
//! | `GCP_PROJECT` | Google Cloud project id, used for trace correlation | profile default |
//! | `GCS_BUCKET_NAME` | Bucket served by the signed-URL endpoint | profile default |
//! | `DEBUG` | Debug flag surfaced via `/echo/` | profile default |
//! | `BIND_ADDRESS` | Explicit HTTP bind address | `0.0.0.0:<PORT>` |
//! | `PORT` | Listen port when `BIND_ADDRESS` is unset | `8000` |
//! | `RUST_LOG` | Overrides the log filter derived from settings | (unset) |
//!
//! An optional `.env` file plus a `.env.<environment>` override file are
//! loaded before settings resolution.

use std::env;
use std::sync::LazyLock;

/// Environment-profile settings resolution.
pub mod config;

/// Google Cloud capabilities: credentials, object storage, URL signing.
pub mod gcp;

/// Logging and tracing infrastructure.
pub mod logging;

/// Per-request trace context and middleware.
pub mod trace;

/// HTTP server, routes, and error mapping.
pub mod web;

/// Application version, typically injected by CI builds via `APP_VERSION`.
pub static APP_VERSION: LazyLock<String> =
    LazyLock::new(|| env::var("APP_VERSION").unwrap_or(env!("CARGO_PKG_VERSION").to_string()));
