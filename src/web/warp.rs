//! Warp plumbing: filters, response mapping, rejection recovery, and the
//! server loop.
//!
//! The server wraps the whole warp service in the
//! [`TraceMiddleware`](crate::trace::TraceMiddleware), so trace headers and
//! request logging apply to every response, including recovered errors.

use crate::trace::{TraceMiddleware, current_request_path};
use crate::web::error::{ApiError, codes};
use anyhow::Context;
use hyper::Server;
use serde::Serialize;
use std::convert::Infallible;
use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use tokio::signal::ctrl_c;
use tokio::signal::unix::{SignalKind, signal};
use tower::ServiceBuilder;
use warp::http::header::CONTENT_TYPE;
use warp::http::{HeaderValue, StatusCode};
use warp::reply::Response;
use warp::{Filter, Rejection, Reply, reply};

/// Provides a cloneable value to a warp filter chain.
pub fn with_cloneable<C: Clone + Send>(
    value: C,
) -> impl Filter<Extract = (C,), Error = Infallible> + Clone {
    warp::any().map(move || value.clone())
}

/// Converts a handler result into a JSON response with status 200.
pub fn into_response<S: Serialize>(result: anyhow::Result<S>) -> Result<impl Reply, Rejection> {
    into_response_with_status(result.map(|data| (StatusCode::OK, data)))
}

/// Converts a handler result into a JSON response with an explicit status.
pub fn into_response_with_status<S: Serialize>(
    response: anyhow::Result<(StatusCode, S)>,
) -> Result<impl Reply, Rejection> {
    let response = response.and_then(|(status_code, data)| {
        match serde_json::to_vec(&data).context("Failed to serialize data") {
            Ok(data) => Ok((status_code, data)),
            Err(err) => Err(err),
        }
    });

    match response {
        Ok((status, data)) => {
            let mut res = Response::new(data.into());
            *res.status_mut() = status;
            res.headers_mut()
                .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
            Ok(res)
        }
        Err(err) => Err(into_rejection(err)),
    }
}

/// Converts an `anyhow` error into a warp rejection.
///
/// Known [`ApiError`]s pass through with their status and code. Anything
/// else is logged at ERROR with its full chain and degraded to the generic
/// server error so internal detail never reaches the client.
pub fn into_rejection(err: anyhow::Error) -> Rejection {
    match err.downcast_ref::<ApiError>() {
        Some(api_error) => api_error.clone().into(),
        None => {
            tracing::error!(
                request_path = %current_request_path().unwrap_or_default(),
                "Unhandled error while processing request: {:#}",
                err
            );
            ApiError::unexpected().into()
        }
    }
}

/// Outermost error responder: turns every rejection into the structured
/// `{code, message, details}` error body.
pub async fn handle_rejection(err: Rejection) -> Result<impl Reply, Infallible> {
    let api_error = if let Some(api_error) = err.find::<ApiError>() {
        api_error.clone()
    } else if err.is_not_found() {
        ApiError::new(
            StatusCode::NOT_FOUND,
            codes::NOT_FOUND,
            "The requested resource does not exist.",
        )
    } else if let Some(invalid) = err.find::<warp::reject::InvalidQuery>() {
        ApiError::new(
            StatusCode::BAD_REQUEST,
            codes::INVALID_REQUEST,
            format!("Invalid query parameters: {}", invalid),
        )
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        ApiError::new(
            StatusCode::METHOD_NOT_ALLOWED,
            codes::INVALID_REQUEST,
            "Method not allowed.",
        )
    } else {
        tracing::error!(
            request_path = %current_request_path().unwrap_or_default(),
            "Unhandled rejection: {:?}",
            err
        );
        ApiError::unexpected()
    };

    Ok(reply::with_status(reply::json(&api_error), api_error.status))
}

/// Combines multiple routes with [`warp::Filter::or`].
#[macro_export]
macro_rules! routes {
    [$route:expr] => {
        $route
    };
    [$route:expr, $($rest:expr),+] => {
        warp::Filter::or($route, routes![$($rest),+])
    };
}

/// Runs the HTTP server with the trace middleware and graceful shutdown.
///
/// Binds to `BIND_ADDRESS` when set, otherwise `0.0.0.0:<PORT>` with a
/// default port of 8000.
pub async fn run_webserver<F>(routes: F) -> anyhow::Result<()>
where
    F: Filter + Clone + Send + Sync + 'static,
    F::Extract: Reply,
    F::Error: Into<Rejection> + 'static,
{
    let bind_address = resolve_bind_address()?;

    tracing::info!("Starting server at {}", bind_address);

    let filter = routes.boxed().recover(handle_rejection);

    let svc = warp::service(filter);
    let traced_svc = ServiceBuilder::new()
        .layer_fn(TraceMiddleware::new)
        .service(svc);

    let server = Server::try_bind(&bind_address)
        .with_context(|| format!("Failed to bind HTTP server to {}", bind_address))?
        .serve(hyper::service::make_service_fn(move |_| {
            let svc = traced_svc.clone();
            async move { Ok::<_, Infallible>(svc) }
        }));

    tracing::info!(
        "Running HTTP server at effective address {}",
        server.local_addr()
    );

    server
        .with_graceful_shutdown(await_termination())
        .await
        .context("HTTP server terminated abnormally")?;

    tracing::info!("HTTP server has been stopped.");

    Ok(())
}

fn resolve_bind_address() -> anyhow::Result<SocketAddr> {
    let bind_address = match env::var("BIND_ADDRESS") {
        Ok(address) => address,
        Err(_) => {
            let port = env::var("PORT").unwrap_or("8000".to_string());
            format!("0.0.0.0:{}", port)
        }
    };

    SocketAddr::from_str(&bind_address)
        .with_context(|| format!("Failed to parse bind address '{}'", bind_address))
}

async fn await_termination() {
    let ctrl_c = ctrl_c();
    if let Ok(mut sig_term) = signal(SignalKind::terminate()) {
        tokio::select! {
            _ = ctrl_c => {
                tracing::info!("Received CTRL-C. Shutting down...");
            },
            _ = sig_term.recv() => {
                tracing::info!("Received SIGTERM. Shutting down...");
            }
        }
    } else {
        let _ = ctrl_c.await;
        tracing::info!("Received CTRL-C. Shutting down...");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::StackdriverLogFormat;
    use hyper::{Body, Request};
    use serde_json::Value;
    use std::io;
    use std::sync::{Arc, Mutex};
    use tower::Service;
    use tracing::Subscriber;
    use tracing_subscriber::fmt::MakeWriter;
    use tracing_subscriber::layer::SubscriberExt;

    fn body_json(body: &[u8]) -> Value {
        serde_json::from_slice(body).unwrap()
    }

    #[derive(Clone, Default)]
    struct Capture(Arc<Mutex<Vec<u8>>>);

    impl Capture {
        fn records(&self) -> Vec<Value> {
            let buffer = self.0.lock().unwrap();
            String::from_utf8(buffer.clone())
                .unwrap()
                .lines()
                .map(|line| serde_json::from_str(line).unwrap())
                .collect()
        }
    }

    impl io::Write for Capture {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl<'a> MakeWriter<'a> for Capture {
        type Writer = Capture;

        fn make_writer(&'a self) -> Capture {
            self.clone()
        }
    }

    fn capture_subscriber(capture: Capture) -> impl Subscriber + Send + Sync {
        tracing_subscriber::registry::Registry::default().with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .event_format(StackdriverLogFormat::new(None))
                .with_writer(capture),
        )
    }

    fn failing_route() -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
        warp::path!("boom").and_then(|| async {
            let result: anyhow::Result<String> =
                Err(anyhow::anyhow!("database password is hunter2"));
            result.map_err(into_rejection)
        })
    }

    #[tokio::test]
    async fn unexpected_errors_yield_the_generic_shape() {
        let route = failing_route().recover(handle_rejection);

        let response = warp::test::request().path("/boom").reply(&route).await;

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(response.body());
        assert_eq!(body["code"], codes::UNEXPECTED_ERROR);
        // Internal error text must never leak into the response body.
        assert!(!body["message"].as_str().unwrap().contains("hunter2"));
    }

    #[tokio::test]
    async fn unhandled_errors_are_logged_with_the_request_path() {
        let capture = Capture::default();
        let _guard = tracing::subscriber::set_default(capture_subscriber(capture.clone()));

        let filter = failing_route().recover(handle_rejection);
        let mut service = TraceMiddleware::new(warp::service(filter));

        let request = Request::builder().uri("/boom").body(Body::empty()).unwrap();
        let response = service.call(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let records = capture.records();
        let error_record = records
            .iter()
            .find(|record| {
                record["severity"] == "ERROR"
                    && record["message"]
                        .as_str()
                        .unwrap()
                        .starts_with("Unhandled error")
            })
            .unwrap();
        assert_eq!(error_record["request_path"], "/boom");

        // The middleware's completion log names the path as well.
        let failed_record = records
            .iter()
            .find(|record| {
                record["message"]
                    .as_str()
                    .unwrap()
                    .starts_with("Request failed")
            })
            .unwrap();
        assert_eq!(failed_record["request_path"], "/boom");
    }

    #[tokio::test]
    async fn unmatched_routes_yield_not_found() {
        let route = failing_route().recover(handle_rejection);

        let response = warp::test::request().path("/nowhere").reply(&route).await;

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = body_json(response.body());
        assert_eq!(body["code"], codes::NOT_FOUND);
    }

    #[tokio::test]
    async fn api_errors_pass_through_with_their_status() {
        let route = warp::path!("teapot")
            .and_then(|| async {
                Err::<String, Rejection>(
                    ApiError::new(StatusCode::IM_A_TEAPOT, "TEAPOT", "short and stout").into(),
                )
            })
            .recover(handle_rejection);

        let response = warp::test::request().path("/teapot").reply(&route).await;

        assert_eq!(response.status(), StatusCode::IM_A_TEAPOT);
        let body = body_json(response.body());
        assert_eq!(body["code"], "TEAPOT");
        assert_eq!(body["message"], "short and stout");
    }
}
