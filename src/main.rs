//! Control-plane daemon entry point.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use control_plane::api::{self, AppState};
use control_plane::certs::CertificateManager;
use control_plane::config::loader::{load_settings, ServerSettings};
use control_plane::orchestrator::process::ProcessHandle;
use control_plane::orchestrator::NodeOrchestrator;
use control_plane::store::persist::FilePersistence;
use control_plane::store::ConfigStore;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "control_plane=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("control-plane v0.1.0 starting");

    let settings = match std::env::args().nth(1) {
        Some(path) => load_settings(Path::new(&path))?,
        None => ServerSettings::default(),
    };

    tracing::info!(
        bind_address = %settings.bind_address,
        data_dir = %settings.data_dir.display(),
        request_timeout_secs = settings.request_timeout_secs,
        "configuration loaded"
    );
    if settings.api_key == "CHANGE_ME_IN_PRODUCTION" {
        tracing::warn!("api_key is the placeholder; set a real key before exposing the API");
    }

    std::fs::create_dir_all(&settings.data_dir)?;
    let store = Arc::new(ConfigStore::open(Box::new(FilePersistence::new(
        settings.data_dir.join("store.json"),
    )))?);
    let certs = Arc::new(CertificateManager::new(settings.data_dir.join("certs"))?);

    let node1 = Arc::new(ProcessHandle::new(
        &settings.proxy_binary,
        settings.data_dir.join("node1.json"),
    ));
    let node2 = Arc::new(ProcessHandle::new(
        &settings.proxy_binary,
        settings.data_dir.join("node2.json"),
    ));
    let orchestrator = Arc::new(NodeOrchestrator::new(Arc::clone(&store), node1, node2));
    orchestrator.spawn_change_listener(store.subscribe());

    // Bring every enabled node up with its last-committed configuration.
    // A failed node is disabled and reported; the daemon still serves.
    if let Err(e) = orchestrator.restart().await {
        tracing::error!(error = %e, "initial node start failed");
    }

    let state = AppState {
        store,
        certs,
        orchestrator,
        api_key: settings.api_key.clone(),
    };
    let app = api::router(state, Duration::from_secs(settings.request_timeout_secs));

    let addr: std::net::SocketAddr = settings.bind_address.parse()?;
    match &settings.tls {
        Some(tls) => {
            let tls_config = axum_server::tls_rustls::RustlsConfig::from_pem_file(
                &tls.cert_path,
                &tls.key_path,
            )
            .await?;
            tracing::info!(address = %addr, "listening with tls");
            axum_server::bind_rustls(addr, tls_config)
                .serve(app.into_make_service())
                .await?;
        }
        None => {
            let listener = tokio::net::TcpListener::bind(addr).await?;
            tracing::info!(address = %addr, "listening");
            axum::serve(listener, app)
                .with_graceful_shutdown(shutdown_signal())
                .await?;
        }
    }

    tracing::info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to install ctrl-c handler");
        return;
    }
    tracing::info!("shutdown signal received");
}
