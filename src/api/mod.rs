//! HTTP control surface.
//!
//! Every mutating route goes through the same pipeline: authenticate,
//! deserialize, validate, commit to the store. Configuration application
//! to the proxy processes is driven by store change notifications, not
//! by the handlers themselves, so the API stays a thin facade.
//!
//! `/healthz` is the only unauthenticated route.

pub mod auth;
pub mod handlers;

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::DefaultBodyLimit;
use axum::http::{HeaderValue, Request};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use axum::Router;
use tower::ServiceBuilder;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::certs::CertificateManager;
use crate::orchestrator::NodeOrchestrator;
use crate::store::ConfigStore;

/// Body cap for the whole surface; per-upload caps are tighter.
const MAX_BODY_BYTES: usize = 4 * 1024 * 1024;

/// Shared context handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<ConfigStore>,
    pub certs: Arc<CertificateManager>,
    pub orchestrator: Arc<NodeOrchestrator>,
    pub api_key: String,
}

/// Build the full route tree with middleware applied.
pub fn router(state: AppState, request_timeout: Duration) -> Router {
    let protected = Router::new()
        .route(
            "/api/config",
            get(handlers::list_config).put(handlers::update_configs),
        )
        .route("/api/config/{key}", get(handlers::get_config))
        .route(
            "/api/hysteria2",
            get(handlers::get_hysteria2).put(handlers::update_hysteria2),
        )
        .route(
            "/api/hysteria2/node2",
            get(handlers::get_node2).put(handlers::update_node2),
        )
        .route("/api/hysteria2/acme-path", get(handlers::acme_path))
        .route(
            "/api/socks5",
            get(handlers::get_socks5).put(handlers::update_socks5),
        )
        .route("/api/export/full", get(handlers::export_full))
        .route("/api/export/{key}", get(handlers::export_single))
        .route("/api/import", post(handlers::import_single))
        .route("/api/import/full", post(handlers::import_full))
        .route("/api/certs", post(handlers::upload_cert))
        .route("/api/nodes", get(handlers::all_nodes))
        .route("/api/nodes/{node}", get(handlers::node_status))
        .route("/api/nodes/{node}/toggle", post(handlers::toggle_node))
        .route("/api/server/restart", post(handlers::restart_server))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_api_key,
        ));

    Router::new()
        .route("/healthz", get(handlers::healthz))
        .merge(protected)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(middleware::from_fn(attach_request_id))
                .layer(TimeoutLayer::new(request_timeout))
                .layer(DefaultBodyLimit::max(MAX_BODY_BYTES)),
        )
        .with_state(state)
}

/// Tag request and response with a correlation id for log stitching.
async fn attach_request_id(mut request: Request<Body>, next: Next) -> Response {
    let id = Uuid::new_v4().to_string();
    match HeaderValue::from_str(&id) {
        Ok(value) => {
            request.headers_mut().insert("x-request-id", value.clone());
            let mut response = next.run(request).await;
            response.headers_mut().insert("x-request-id", value);
            response
        }
        Err(_) => next.run(request).await,
    }
}
