use std::sync::Arc;

use axum::{routing::get, Extension, Router};

use crate::entitlements::{self, EntitlementService};

pub async fn root() -> &'static str {
    "Entitlements API"
}

pub fn api_routes() -> Router {
    Router::new().merge(entitlements::api::routes())
}

/// Application router with the shared entitlement service injected. Metrics are layered
/// on by the binary since the Prometheus recorder is process-global.
pub fn app(service: Arc<EntitlementService>) -> Router {
    Router::new()
        .route("/", get(root))
        .merge(api_routes())
        .layer(Extension(service))
}
