//! Per-request trace context and the middleware that manages it.
//!
//! Every inbound request gets a fresh [`TraceContext`] (UUID trace id plus an
//! 8-byte hex span id) bound to a tokio task-local cell for the duration of
//! the request future. The log formatter reads the cell, so every log line
//! emitted while handling a request carries that request's identifiers
//! without explicit parameter threading. Task-locals are scoped per future,
//! which structurally guarantees that concurrent requests never observe each
//! other's identifiers.

use hyper::{Body, Request};
use rand::Rng;
use std::convert::Infallible;
use std::pin::Pin;
use std::task::Poll;
use std::time::Instant;
use tower::Service;
use uuid::Uuid;
use warp::http::HeaderValue;
use warp::reply::Response;

tokio::task_local! {
    static TRACE_CONTEXT: TraceContext;
    static REQUEST_PATH: String;
}

/// The URI path of the request currently being handled, if any.
///
/// Bound by the [`TraceMiddleware`] for the duration of each request so
/// error logs emitted deep in the handler stack can name the path without
/// threading it through every call.
pub fn current_request_path() -> Option<String> {
    REQUEST_PATH.try_with(Clone::clone).ok()
}

/// Correlation identifiers for one in-flight request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TraceContext {
    /// Random 128-bit value rendered as a UUID string.
    pub trace_id: String,
    /// Random 64-bit value rendered as hex.
    pub span_id: String,
}

impl TraceContext {
    /// Generates a fresh context with random identifiers.
    pub fn generate() -> TraceContext {
        let span_bytes: [u8; 8] = rand::rng().random();

        TraceContext {
            trace_id: Uuid::new_v4().to_string(),
            span_id: hex::encode(span_bytes),
        }
    }

    /// Returns the context bound to the current task, if any.
    ///
    /// Outside of a request scope (startup, background tasks, tests without
    /// a scope) this returns `None` and log records simply omit the
    /// correlation fields.
    pub fn current() -> Option<TraceContext> {
        TRACE_CONTEXT.try_with(Clone::clone).ok()
    }

    /// Runs `future` with this context bound to the current task.
    ///
    /// The binding is dropped when the future completes, regardless of
    /// outcome, so no identifier leaks into subsequently handled requests.
    pub async fn scope<F: Future>(self, future: F) -> F::Output {
        TRACE_CONTEXT.scope(self, future).await
    }
}

/// Tower middleware wrapping the entire warp service.
///
/// Establishes the trace context, times the request, logs start and
/// completion, and stamps `X-Trace-ID`, `X-Span-ID` and `X-Process-Time`
/// onto every response. Handler failures surface as 5xx responses through
/// warp's rejection recovery rather than as service errors, so completion
/// logging keys off the response status.
#[derive(Clone)]
pub struct TraceMiddleware<S> {
    inner: S,
}

impl<S> TraceMiddleware<S> {
    pub fn new(inner: S) -> TraceMiddleware<S> {
        TraceMiddleware { inner }
    }
}

impl<S> Service<Request<Body>> for TraceMiddleware<S>
where
    S: Service<Request<Body>, Response = Response, Error = Infallible> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut std::task::Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let context = TraceContext::generate();
        let method = req.method().clone();
        let path = req.uri().path().to_string();
        let scope_path = path.clone();
        let mut inner = self.inner.clone();

        let fut = async move {
            let start = Instant::now();
            tracing::info!("Request started: {} {}", method, path);

            let mut response = inner.call(req).await?;

            let process_time = start.elapsed().as_secs_f64();
            let status = response.status();
            stamp_headers(&mut response, process_time);

            if status.is_server_error() {
                tracing::error!(
                    request_path = %path,
                    "Request failed: Status {} ({:.4}s)",
                    status.as_u16(),
                    process_time
                );
            } else {
                tracing::info!(
                    "Request finished: Status {} ({:.4}s)",
                    status.as_u16(),
                    process_time
                );
            }

            Ok(response)
        };

        Box::pin(context.scope(REQUEST_PATH.scope(scope_path, fut)))
    }
}

fn stamp_headers(response: &mut Response, process_time: f64) {
    let Some(context) = TraceContext::current() else {
        return;
    };

    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(&context.trace_id) {
        headers.insert("X-Trace-ID", value);
    }
    if let Ok(value) = HeaderValue::from_str(&context.span_id) {
        headers.insert("X-Span-ID", value);
    }
    if let Ok(value) = HeaderValue::from_str(&format!("{:.4}", process_time)) {
        headers.insert("X-Process-Time", value);
    }
}
