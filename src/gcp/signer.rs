//! V4 signed-URL construction.
//!
//! Builds the canonical request and string-to-sign for the `GOOG4-RSA-SHA256`
//! query-string scheme and delegates the actual signature to a
//! [`BlobSigner`]. The production signer calls the IAM credentials
//! `signBlob` API with the identity's access token, which is how a
//! platform-attached identity signs without holding a private key.

use crate::gcp::auth::SigningIdentity;
use anyhow::Context;
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, Utc};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use serde::Deserialize;
use serde_json::json;
use sha2::{Digest, Sha256};
use std::time::Duration;

/// Virtual host serving signed downloads.
pub const STORAGE_HOST: &str = "storage.googleapis.com";

const ALGORITHM: &str = "GOOG4-RSA-SHA256";

/// Everything except unreserved characters is escaped in query values.
const QUERY_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// Path segments additionally keep `/` literal.
const PATH_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~')
    .remove(b'/');

/// Produces a raw signature over a payload on behalf of a signing identity.
#[async_trait]
pub trait BlobSigner: Send + Sync {
    async fn sign_blob(
        &self,
        identity: &SigningIdentity,
        payload: &[u8],
    ) -> anyhow::Result<Vec<u8>>;
}

/// Signer backed by the IAM credentials `signBlob` API.
pub struct IamBlobSigner {
    client: reqwest::Client,
}

impl IamBlobSigner {
    pub fn new(client: reqwest::Client) -> IamBlobSigner {
        IamBlobSigner { client }
    }
}

#[derive(Deserialize)]
struct SignBlobResponse {
    #[serde(rename = "signedBlob")]
    signed_blob: String,
}

#[async_trait]
impl BlobSigner for IamBlobSigner {
    async fn sign_blob(
        &self,
        identity: &SigningIdentity,
        payload: &[u8],
    ) -> anyhow::Result<Vec<u8>> {
        let url = format!(
            "https://iamcredentials.googleapis.com/v1/projects/-/serviceAccounts/{}:signBlob",
            identity.service_account_email
        );

        let response = self
            .client
            .post(&url)
            .bearer_auth(&identity.access_token)
            .json(&json!({ "payload": BASE64.encode(payload) }))
            .send()
            .await
            .context("Failed to reach the IAM credentials API")?
            .error_for_status()
            .context("IAM signBlob request was rejected")?;

        let body: SignBlobResponse = response
            .json()
            .await
            .context("Failed to decode the IAM signBlob response")?;

        BASE64
            .decode(&body.signed_blob)
            .context("IAM signBlob returned an invalid signature")
    }
}

/// Builds a V4 signed GET URL for one object.
///
/// The URL instructs clients to treat the response as a file attachment
/// named after the object key.
pub async fn v4_download_url(
    signer: &dyn BlobSigner,
    identity: &SigningIdentity,
    bucket: &str,
    object: &str,
    expires_in: Duration,
    now: DateTime<Utc>,
) -> anyhow::Result<String> {
    let timestamp = now.format("%Y%m%dT%H%M%SZ").to_string();
    let scope = format!("{}/auto/storage/goog4_request", now.format("%Y%m%d"));
    let credential = format!("{}/{}", identity.service_account_email, scope);
    let disposition = format!("attachment; filename={}", object);

    let mut params = vec![
        ("X-Goog-Algorithm", ALGORITHM.to_string()),
        ("X-Goog-Credential", credential),
        ("X-Goog-Date", timestamp.clone()),
        ("X-Goog-Expires", expires_in.as_secs().to_string()),
        ("X-Goog-SignedHeaders", "host".to_string()),
        ("response-content-disposition", disposition),
    ];
    params.sort_by(|a, b| a.0.cmp(b.0));

    let canonical_query = params
        .iter()
        .map(|(name, value)| format!("{}={}", encode_query(name), encode_query(value)))
        .collect::<Vec<_>>()
        .join("&");
    let canonical_uri = format!("/{}/{}", bucket, encode_path(object));
    let canonical_request = format!(
        "GET\n{}\n{}\nhost:{}\n\nhost\nUNSIGNED-PAYLOAD",
        canonical_uri, canonical_query, STORAGE_HOST
    );

    let string_to_sign = format!(
        "{}\n{}\n{}\n{}",
        ALGORITHM,
        timestamp,
        scope,
        hex::encode(Sha256::digest(canonical_request.as_bytes()))
    );

    let signature = signer
        .sign_blob(identity, string_to_sign.as_bytes())
        .await
        .context("Failed to sign the download URL")?;

    Ok(format!(
        "https://{}{}?{}&X-Goog-Signature={}",
        STORAGE_HOST,
        canonical_uri,
        canonical_query,
        hex::encode(signature)
    ))
}

fn encode_query(value: &str) -> String {
    utf8_percent_encode(value, QUERY_ENCODE_SET).to_string()
}

fn encode_path(value: &str) -> String {
    utf8_percent_encode(value, PATH_ENCODE_SET).to_string()
}
