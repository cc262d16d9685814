//! Environment-profile settings.
//!
//! Settings are resolved once at startup from a fixed profile selected by the
//! `ENVIRONMENT` variable, then overridden by `.env` files and finally by the
//! process environment. Unknown environment names fall back to the `local`
//! profile instead of failing; malformed values (e.g. a `DEBUG` flag that is
//! neither true nor false) are fatal because a service with unusable
//! configuration must not accept traffic.

use anyhow::Context;
use serde::Serialize;
use std::env;
use std::fmt::{Display, Formatter};
use std::path::Path;

/// Human-readable service name, surfaced via `/echo/` and startup logs.
pub const PROJECT_NAME: &str = "Abacus Signed URL Generator";

/// URL prefix of the current API version.
pub const API_V1_STR: &str = "/v1";

/// The deployment environment a settings profile belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Local,
    Development,
    Test,
    Staging,
    Production,
}

impl Environment {
    /// Resolves an environment by name, falling back to [`Environment::Local`]
    /// for anything unrecognized.
    pub fn from_name(name: &str) -> Environment {
        match name.to_lowercase().as_str() {
            "development" => Environment::Development,
            "test" => Environment::Test,
            "staging" => Environment::Staging,
            "production" => Environment::Production,
            _ => Environment::Local,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Local => "local",
            Environment::Development => "development",
            Environment::Test => "test",
            Environment::Staging => "staging",
            Environment::Production => "production",
        }
    }
}

impl Display for Environment {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Per-environment defaults applied before any override.
struct Profile {
    log_level: &'static str,
    debug: bool,
    bucket_name: &'static str,
    gcp_project: Option<&'static str>,
}

fn profile(environment: Environment) -> Profile {
    match environment {
        Environment::Local => Profile {
            log_level: "DEBUG",
            debug: true,
            bucket_name: "abacus-claims",
            gcp_project: Some("grpit-cds-sandpit-dev"),
        },
        Environment::Development => Profile {
            log_level: "INFO",
            debug: false,
            bucket_name: "abacus-claims-dev",
            gcp_project: None,
        },
        Environment::Test => Profile {
            log_level: "WARNING",
            debug: false,
            bucket_name: "abacus-claims-test",
            gcp_project: None,
        },
        Environment::Staging => Profile {
            log_level: "INFO",
            debug: false,
            bucket_name: "abacus-claims-staging",
            gcp_project: None,
        },
        Environment::Production => Profile {
            log_level: "WARNING",
            debug: false,
            bucket_name: "abacus-claims",
            gcp_project: None,
        },
    }
}

/// Immutable application settings, resolved once per process lifetime.
#[derive(Clone, Debug)]
pub struct Settings {
    pub project_name: String,
    pub environment: Environment,
    pub log_level: String,
    pub debug: bool,
    pub bucket_name: String,
    pub gcp_project: Option<String>,
    pub api_prefix: String,
}

impl Settings {
    /// Resolves the full settings from `.env` files and the process
    /// environment. Failure here is the one non-recoverable startup
    /// condition; callers are expected to terminate the process.
    pub fn resolve() -> anyhow::Result<Settings> {
        load_env_files();
        Settings::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Settings> {
        let environment =
            Environment::from_name(&lookup("ENVIRONMENT").unwrap_or("local".to_string()));
        let profile = profile(environment);

        let debug = match lookup("DEBUG") {
            Some(value) => parse_bool(&value)
                .with_context(|| format!("Invalid value for DEBUG: '{}'", value))?,
            None => profile.debug,
        };

        Ok(Settings {
            project_name: PROJECT_NAME.to_string(),
            environment,
            log_level: lookup("LOG_LEVEL").unwrap_or(profile.log_level.to_string()),
            debug,
            bucket_name: lookup("GCS_BUCKET_NAME").unwrap_or(profile.bucket_name.to_string()),
            gcp_project: lookup("GCP_PROJECT").or(profile.gcp_project.map(str::to_string)),
            api_prefix: API_V1_STR.to_string(),
        })
    }
}

/// The minimal settings needed before logging can be configured.
///
/// Logging needs the project id to format trace correlation fields, but the
/// full settings are only validated after logging is up. This lightweight
/// path resolves just enough to break that cycle and never fails.
#[derive(Clone, Debug)]
pub struct BootstrapSettings {
    pub log_level: String,
    pub gcp_project: Option<String>,
}

impl BootstrapSettings {
    pub fn resolve() -> BootstrapSettings {
        load_env_files();
        let environment =
            Environment::from_name(&env::var("ENVIRONMENT").unwrap_or("local".to_string()));
        let profile = profile(environment);

        BootstrapSettings {
            log_level: env::var("LOG_LEVEL").unwrap_or(profile.log_level.to_string()),
            gcp_project: env::var("GCP_PROJECT")
                .ok()
                .or(profile.gcp_project.map(str::to_string)),
        }
    }
}

/// Loads `.env` and then the `.env.<environment>` override file, if present.
fn load_env_files() {
    let _ = dotenvy::dotenv();

    let environment = env::var("ENVIRONMENT").unwrap_or("local".to_string()).to_lowercase();
    let override_file = format!(".env.{}", environment);
    if Path::new(&override_file).exists() {
        let _ = dotenvy::from_path_override(&override_file);
    }
}

fn parse_bool(value: &str) -> anyhow::Result<bool> {
    match value.to_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => anyhow::bail!("not a boolean"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn unknown_environment_falls_back_to_local() {
        let settings = Settings::from_lookup(lookup(&[("ENVIRONMENT", "outer-space")])).unwrap();

        assert_eq!(settings.environment, Environment::Local);
        assert_eq!(settings.log_level, "DEBUG");
        assert!(settings.debug);
        assert_eq!(settings.bucket_name, "abacus-claims");
    }

    #[test]
    fn development_profile_applies_defaults() {
        let settings = Settings::from_lookup(lookup(&[("ENVIRONMENT", "development")])).unwrap();

        assert_eq!(settings.environment, Environment::Development);
        assert_eq!(settings.log_level, "INFO");
        assert!(!settings.debug);
        assert_eq!(settings.bucket_name, "abacus-claims-dev");
    }

    #[test]
    fn environment_variables_override_profile_defaults() {
        let settings = Settings::from_lookup(lookup(&[
            ("ENVIRONMENT", "production"),
            ("LOG_LEVEL", "DEBUG"),
            ("GCS_BUCKET_NAME", "custom-bucket"),
            ("GCP_PROJECT", "my-project"),
            ("DEBUG", "true"),
        ]))
        .unwrap();

        assert_eq!(settings.environment, Environment::Production);
        assert_eq!(settings.log_level, "DEBUG");
        assert_eq!(settings.bucket_name, "custom-bucket");
        assert_eq!(settings.gcp_project.as_deref(), Some("my-project"));
        assert!(settings.debug);
    }

    #[test]
    fn malformed_debug_flag_is_fatal() {
        let result = Settings::from_lookup(lookup(&[("DEBUG", "maybe")]));

        assert!(result.is_err());
    }

    #[test]
    fn environment_name_matching_is_case_insensitive() {
        assert_eq!(Environment::from_name("PRODUCTION"), Environment::Production);
        assert_eq!(Environment::from_name("Staging"), Environment::Staging);
    }
}
