//! HTTP layer built on the Warp framework.
//!
//! Provides the route factories, the error responder, and the server loop.
//! Use [`warp::run_webserver`] to start a server with trace middleware and
//! graceful shutdown.

pub mod echo_service;
pub mod error;
pub mod signed_url_service;
pub mod warp;
