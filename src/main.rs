use abacus_url::config::{BootstrapSettings, Settings};
use abacus_url::gcp::CLOUD_PLATFORM_SCOPE;
use abacus_url::gcp::auth::{CredentialSource, MetadataCredentialSource};
use abacus_url::gcp::storage::{GcsStore, ObjectStore};
use abacus_url::logging;
use abacus_url::web::echo_service::get_echo_route;
use abacus_url::web::signed_url_service::{SignedUrlService, signed_url_route};
use abacus_url::web::warp::run_webserver;
use abacus_url::{APP_VERSION, routes};
use std::sync::Arc;

#[tokio::main]
async fn main() {
    // Bootstrap settings break the cycle between logging (which wants the
    // project id) and full settings validation (which wants logging).
    let bootstrap = BootstrapSettings::resolve();
    logging::setup_tracing(&bootstrap.log_level, bootstrap.gcp_project.as_deref());

    let settings = match Settings::resolve() {
        Ok(settings) => Arc::new(settings),
        Err(err) => {
            tracing::error!("Failed to load critical application settings: {:#}", err);
            std::process::exit(1);
        }
    };

    tracing::info!(
        "Starting up {} v{} in {} mode.",
        settings.project_name,
        *APP_VERSION,
        settings.environment
    );
    tracing::info!(
        "Settings loaded for environment {}: LOG_LEVEL={}, DEBUG={}, GCP_PROJECT={}",
        settings.environment,
        settings.log_level,
        settings.debug,
        settings.gcp_project.as_deref().unwrap_or("(none)")
    );

    let credentials: Arc<dyn CredentialSource> =
        Arc::new(MetadataCredentialSource::new(&[CLOUD_PLATFORM_SCOPE]));
    let store: Arc<dyn ObjectStore> = Arc::new(GcsStore::new(settings.bucket_name.clone()));
    let service = SignedUrlService::new(settings.clone(), credentials, store);

    let routes = routes![signed_url_route(service), get_echo_route(settings.clone())];

    if let Err(err) = run_webserver(routes).await {
        tracing::error!("Web server terminated abnormally: {:#}", err);
        std::process::exit(1);
    }
}
