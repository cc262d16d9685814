//! Signed-URL endpoint.
//!
//! `GET /v1/url/?filename=<key>&expires_in=<seconds>` orchestrates the one
//! real operation of the service: validate input, acquire and validate the
//! ambient credentials, resolve the signing identity, check that the object
//! exists, and ask the storage capability for a signed URL. Every failure
//! mode maps to the structured error shape before it leaves this module.

use crate::config::Settings;
use crate::gcp::CLOUD_PLATFORM_SCOPE;
use crate::gcp::auth::{CredentialSource, Credentials};
use crate::gcp::storage::{ObjectStore, SignRequest};
use crate::web::error::codes;
use crate::web::warp::{into_response, with_cloneable};
use crate::{client_bail, status_bail};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use warp::Filter;
use warp::filters::BoxedFilter;
use warp::http::StatusCode;

/// Expiry bounds in seconds, inclusive. The floor follows the documented
/// minimum of one minute.
pub const MIN_EXPIRY_SECS: i64 = 60;
pub const MAX_EXPIRY_SECS: i64 = 3600;

const DEFAULT_EXPIRY_SECS: i64 = 300;

/// Dependencies of the signed-URL handler, injected at startup.
#[derive(Clone)]
pub struct SignedUrlService {
    settings: Arc<Settings>,
    credentials: Arc<dyn CredentialSource>,
    store: Arc<dyn ObjectStore>,
}

impl SignedUrlService {
    pub fn new(
        settings: Arc<Settings>,
        credentials: Arc<dyn CredentialSource>,
        store: Arc<dyn ObjectStore>,
    ) -> SignedUrlService {
        SignedUrlService {
            settings,
            credentials,
            store,
        }
    }
}

#[derive(Debug, Deserialize)]
struct SignedUrlParams {
    filename: Option<String>,
    #[serde(default = "default_expiry")]
    expires_in: i64,
}

fn default_expiry() -> i64 {
    DEFAULT_EXPIRY_SECS
}

#[derive(Serialize)]
struct SignedUrlResponse {
    signed_url: String,
}

/// Creates the `/v1/url` route.
pub fn signed_url_route(service: SignedUrlService) -> BoxedFilter<(impl warp::Reply,)> {
    warp::path!("v1" / "url")
        .and(warp::get())
        .and(warp::query::<SignedUrlParams>())
        .and(with_cloneable(service))
        .and_then(handle_generate_signed_url)
        .boxed()
}

#[tracing::instrument(level = "debug", name = "GET /v1/url", skip_all)]
async fn handle_generate_signed_url(
    params: SignedUrlParams,
    service: SignedUrlService,
) -> Result<impl warp::Reply, warp::Rejection> {
    into_response(generate_signed_url(params, service).await)
}

async fn generate_signed_url(
    params: SignedUrlParams,
    service: SignedUrlService,
) -> anyhow::Result<SignedUrlResponse> {
    let Some(filename) = params.filename.filter(|name| !name.is_empty()) else {
        client_bail!("'filename' must not be empty");
    };
    if !(MIN_EXPIRY_SECS..=MAX_EXPIRY_SECS).contains(&params.expires_in) {
        client_bail!(
            "'expires_in' must be between {} and {} seconds",
            MIN_EXPIRY_SECS,
            MAX_EXPIRY_SECS
        );
    }

    tracing::info!(
        "Received request to generate signed URL for filename: '{}' (expiry: {}s)",
        filename,
        params.expires_in
    );

    let credentials = acquire_valid_credentials(service.credentials.as_ref()).await?;

    tracing::info!(
        "Using ambient service-identity credentials (scope '{}').",
        CLOUD_PLATFORM_SCOPE
    );
    tracing::info!(
        "Credentials token: {}",
        if credentials.access_token.is_empty() {
            "does not exist"
        } else {
            "exists"
        }
    );
    tracing::info!(
        "Configured project: {}",
        service.settings.gcp_project.as_deref().unwrap_or("(none)")
    );

    let Some(identity) = credentials.signing_identity() else {
        tracing::error!("Could not determine service account email for signing the URL.");
        status_bail!(
            StatusCode::INTERNAL_SERVER_ERROR,
            codes::SIGNING_IDENTITY_UNKNOWN,
            "Could not determine the service account identity for URL signing. Check the service account configuration.",
        );
    };
    tracing::info!(
        "Signing as service account: {}",
        identity.service_account_email
    );

    if !service
        .store
        .object_exists(&filename, &credentials.access_token)
        .await?
    {
        tracing::warn!(
            "File not found in bucket for signed URL generation: '{}'",
            filename
        );
        status_bail!(
            StatusCode::NOT_FOUND,
            codes::FILE_NOT_FOUND,
            "File not found in Google Cloud Storage.",
        );
    }

    let signed_url = service
        .store
        .signed_download_url(SignRequest {
            object: filename.clone(),
            expires_in: Duration::from_secs(params.expires_in as u64),
            identity,
        })
        .await?;

    tracing::info!("Successfully generated signed URL for filename: '{}'", filename);

    Ok(SignedUrlResponse { signed_url })
}

/// Acquires credentials for the cloud-platform scope, refreshing exactly
/// once if the cached ones are invalid.
async fn acquire_valid_credentials(
    source: &dyn CredentialSource,
) -> anyhow::Result<Credentials> {
    if let Some(credentials) = source.current().await {
        if credentials.is_valid() {
            return Ok(credentials);
        }
    }

    tracing::error!(
        "Invalid Google Cloud credentials detected for scope '{}'. Attempting refresh.",
        CLOUD_PLATFORM_SCOPE
    );

    match source.refresh().await {
        Ok(credentials) if credentials.is_valid() => Ok(credentials),
        Ok(_) => {
            tracing::error!("Credentials remain invalid after refresh.");
            status_bail!(
                StatusCode::INTERNAL_SERVER_ERROR,
                codes::GCP_AUTH_FAILED,
                "Invalid Google Cloud credentials. Please check the service account configuration and permissions.",
            );
        }
        Err(err) => {
            tracing::error!("Failed to refresh Google Cloud credentials: {:#}", err);
            status_bail!(
                StatusCode::INTERNAL_SERVER_ERROR,
                codes::GCP_AUTH_FAILED,
                "Authentication to Google Cloud failed. Please check the service account permissions.",
            );
        }
    }
}
