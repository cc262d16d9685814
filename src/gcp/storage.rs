//! Object storage capability.
//!
//! [`ObjectStore`] is the seam between the signed-URL handler and the cloud:
//! an existence check plus the signed-URL entry point. The production
//! [`GcsStore`] talks to the GCS JSON API directly and signs via the IAM
//! `signBlob` API.

use crate::gcp::auth::SigningIdentity;
use crate::gcp::signer::{BlobSigner, IamBlobSigner, v4_download_url};
use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};
use reqwest::StatusCode;
use std::sync::Arc;
use std::time::Duration;

const GCS_API_BASE: &str = "https://storage.googleapis.com/storage/v1";

/// Everything needed to produce one signed download URL.
#[derive(Clone, Debug)]
pub struct SignRequest {
    pub object: String,
    pub expires_in: Duration,
    pub identity: SigningIdentity,
}

/// Storage operations required by the signed-URL handler.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Whether the object exists in the configured bucket.
    async fn object_exists(&self, object: &str, access_token: &str) -> anyhow::Result<bool>;

    /// Produces a time-limited authorized download URL for the object.
    async fn signed_download_url(&self, request: SignRequest) -> anyhow::Result<String>;
}

/// Production store backed by the GCS JSON API.
pub struct GcsStore {
    client: reqwest::Client,
    bucket: String,
    signer: Arc<dyn BlobSigner>,
}

impl GcsStore {
    pub fn new(bucket: String) -> GcsStore {
        let client = reqwest::Client::new();

        GcsStore {
            signer: Arc::new(IamBlobSigner::new(client.clone())),
            client,
            bucket,
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }
}

#[async_trait]
impl ObjectStore for GcsStore {
    async fn object_exists(&self, object: &str, access_token: &str) -> anyhow::Result<bool> {
        // Object names are a single path component in the JSON API, so
        // slashes must be escaped as well.
        let url = format!(
            "{}/b/{}/o/{}",
            GCS_API_BASE,
            self.bucket,
            utf8_percent_encode(object, NON_ALPHANUMERIC)
        );

        let response = self
            .client
            .get(&url)
            .bearer_auth(access_token)
            .send()
            .await
            .with_context(|| format!("Failed to query metadata of object '{}'", object))?;

        match response.status() {
            StatusCode::OK => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => anyhow::bail!(
                "Unexpected status {} while checking object '{}' in bucket '{}'",
                status,
                object,
                self.bucket
            ),
        }
    }

    async fn signed_download_url(&self, request: SignRequest) -> anyhow::Result<String> {
        v4_download_url(
            self.signer.as_ref(),
            &request.identity,
            &self.bucket,
            &request.object,
            request.expires_in,
            Utc::now(),
        )
        .await
    }
}
