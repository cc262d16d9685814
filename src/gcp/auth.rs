//! Ambient service-identity credentials.
//!
//! The production [`MetadataCredentialSource`] obtains access tokens from
//! the GCE/Cloud Run metadata server, the only credential kind that exposes
//! a usable service-account email without an extra private key. Whether a
//! credential can sign is a capability check
//! ([`Credentials::signing_identity`]), not a type check, so tests can
//! substitute their own sources.

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use tokio::sync::RwLock;

const METADATA_BASE: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default";

/// Tokens are treated as expired slightly early so an in-flight request
/// never presents a token that lapses mid-call.
const EXPIRY_SAFETY_MARGIN_SECS: i64 = 30;

/// The identity and token used to authorize URL signing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SigningIdentity {
    pub service_account_email: String,
    pub access_token: String,
}

/// A point-in-time snapshot of the ambient credentials.
#[derive(Clone, Debug)]
pub struct Credentials {
    pub access_token: String,
    pub expires_at: DateTime<Utc>,
    /// Present only for platform-attached compute identities.
    pub service_account_email: Option<String>,
}

impl Credentials {
    /// Whether the token can still be presented, with a safety margin.
    pub fn is_valid(&self) -> bool {
        !self.access_token.is_empty()
            && Utc::now() + Duration::seconds(EXPIRY_SAFETY_MARGIN_SECS) < self.expires_at
    }

    /// The signing capability: `Some` only when the credential kind exposes
    /// a service-account email that can authorize IAM blob signing.
    pub fn signing_identity(&self) -> Option<SigningIdentity> {
        let email = self.service_account_email.as_ref()?;
        if email.is_empty() {
            return None;
        }

        Some(SigningIdentity {
            service_account_email: email.clone(),
            access_token: self.access_token.clone(),
        })
    }
}

/// Source of ambient cloud credentials.
#[async_trait]
pub trait CredentialSource: Send + Sync {
    /// Returns the currently cached credentials without refreshing.
    async fn current(&self) -> Option<Credentials>;

    /// Fetches fresh credentials from the underlying provider.
    async fn refresh(&self) -> anyhow::Result<Credentials>;
}

/// Credentials from the GCE/Cloud Run metadata server.
pub struct MetadataCredentialSource {
    client: reqwest::Client,
    scopes: String,
    cache: RwLock<Option<Credentials>>,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

impl MetadataCredentialSource {
    pub fn new(scopes: &[&str]) -> MetadataCredentialSource {
        MetadataCredentialSource {
            client: reqwest::Client::new(),
            scopes: scopes.join(","),
            cache: RwLock::new(None),
        }
    }

    async fn fetch_token(&self) -> anyhow::Result<TokenResponse> {
        let url = format!("{}/token?scopes={}", METADATA_BASE, self.scopes);
        let response = self
            .client
            .get(&url)
            .header("Metadata-Flavor", "Google")
            .send()
            .await
            .context("Failed to reach the metadata server")?
            .error_for_status()
            .context("Metadata server rejected the token request")?;

        response
            .json()
            .await
            .context("Failed to decode the metadata token response")
    }

    async fn fetch_email(&self) -> Option<String> {
        let url = format!("{}/email", METADATA_BASE);
        let response = self
            .client
            .get(&url)
            .header("Metadata-Flavor", "Google")
            .send()
            .await
            .ok()?
            .error_for_status()
            .ok()?;

        let email = response.text().await.ok()?;
        let email = email.trim().to_string();
        if email.is_empty() { None } else { Some(email) }
    }
}

#[async_trait]
impl CredentialSource for MetadataCredentialSource {
    async fn current(&self) -> Option<Credentials> {
        self.cache.read().await.clone()
    }

    async fn refresh(&self) -> anyhow::Result<Credentials> {
        let token = self.fetch_token().await?;
        // A missing email is not fatal here; it only disqualifies the
        // credentials from signing, which the handler reports separately.
        let service_account_email = self.fetch_email().await;

        let credentials = Credentials {
            access_token: token.access_token,
            expires_at: Utc::now() + Duration::seconds(token.expires_in),
            service_account_email,
        };

        *self.cache.write().await = Some(credentials.clone());

        Ok(credentials)
    }
}
