//! Service introspection endpoint.
//!
//! Exposes `GET /echo/` returning the active settings profile and a current
//! server timestamp. Useful for health checks and deployment verification.

use crate::config::Settings;
use crate::web::warp::with_cloneable;
use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use warp::Filter;
use warp::filters::BoxedFilter;

/// Creates the `/echo/` route returning the active configuration as JSON.
pub fn get_echo_route(settings: Arc<Settings>) -> BoxedFilter<(impl warp::Reply,)> {
    warp::path!("echo")
        .and(warp::get())
        .and(with_cloneable(settings))
        .and_then(handle_echo)
        .boxed()
}

#[tracing::instrument(level = "debug", name = "GET /echo", skip_all)]
async fn handle_echo(settings: Arc<Settings>) -> Result<impl warp::Reply, warp::Rejection> {
    Ok(warp::reply::json(&json!({
        "Project Name": settings.project_name,
        "Environment": settings.environment,
        "API Version": settings.api_prefix,
        "Bucket Name": settings.bucket_name,
        "Debug Mode": settings.debug,
        "Timestamp": Utc::now(),
    })))
}
