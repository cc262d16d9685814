//! Google Cloud capabilities.
//!
//! Credential acquisition and object storage are modeled as traits so the
//! request handlers depend on capabilities ("can this credential source
//! produce a signing identity?") rather than concrete providers. Production
//! implementations talk to the metadata server and the GCS/IAM REST APIs.

pub mod auth;
pub mod signer;
pub mod storage;

/// OAuth scope requested for all storage and signing operations.
pub const CLOUD_PLATFORM_SCOPE: &str = "https://www.googleapis.com/auth/cloud-platform";
