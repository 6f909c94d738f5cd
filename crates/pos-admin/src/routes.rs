//! Route configuration for the admin API and the admission chain.

use std::sync::Arc;

use axum::Router;
use axum::middleware::{from_fn, from_fn_with_state};
use axum::routing::{get, post};
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::AdminConfig;
use crate::error::panic_response;
use crate::handlers::{
    block_ip, cleanup, get_stats, health_check, list_blocked, request_info, unblock_ip,
};
use crate::middleware::{admission, compression_layer, honor_no_compression, security_headers};
use crate::state::AppState;

/// Prefix of the security admin routes.
pub const ADMIN_PREFIX: &str = "/admin/security";

/// Create the router: health check and admin API behind the admission chain.
pub fn create_router(state: Arc<AppState>) -> Router {
    let admin_routes = Router::new()
        .route("/stats", get(get_stats))
        .route("/block-ip", post(block_ip))
        .route("/unblock-ip", post(unblock_ip))
        .route("/blocked-ips", get(list_blocked))
        .route("/cleanup", post(cleanup))
        .route("/request-info", get(request_info));

    let routes = Router::new()
        .route("/health", get(health_check))
        .nest(ADMIN_PREFIX, admin_routes);

    protect(routes, state)
}

/// Wrap routes in the admission chain.
///
/// Outermost first: tracing, CORS, compression opt-out, compression,
/// security headers, panic recovery, admission. Host applications pass their own API
/// routes here to share the same pipeline.
pub fn protect(routes: Router<Arc<AppState>>, state: Arc<AppState>) -> Router {
    let cors = build_cors_layer(state.config());

    routes
        .layer(from_fn_with_state(Arc::clone(&state), admission))
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(from_fn(security_headers))
        .layer(compression_layer())
        .layer(from_fn(honor_no_compression))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Build the CORS layer based on configuration.
fn build_cors_layer(config: &AdminConfig) -> CorsLayer {
    if config.cors_origins.is_empty() {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<_> = config
            .cors_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();

        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    }
}
