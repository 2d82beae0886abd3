use std::net::SocketAddr;
use std::sync::Arc;

use axum::routing::get;
use axum_prometheus::PrometheusMetricLayer;
use sqlx::postgres::PgPoolOptions;
use tenant_entitlements::config::{self, UsageStoreDriver};
use tenant_entitlements::entitlements::{
    EntitlementGate, EntitlementService, InMemoryUsageStore, PgUsageStore, Presenter, UsageStore,
};
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .init();

    dotenvy::dotenv().ok();

    // Fail fast on a malformed catalog; monotonicity gaps are only reported.
    let catalog = config::load_plan_catalog()?;
    for violation in catalog.validate() {
        tracing::warn!(%violation, "plan catalog grants less at a higher tier");
    }
    let gate = EntitlementGate::new(Arc::new(catalog));
    let presenter = Presenter::new(config::thresholds(), config::UPGRADE_URL.as_str());

    let store: Arc<dyn UsageStore> = match *config::USAGE_STORE {
        UsageStoreDriver::Postgres => {
            let pool = PgPoolOptions::new()
                .max_connections(5)
                .connect(config::DATABASE_URL.as_str())
                .await?;

            if let Err(error) = sqlx::migrate!().run(&pool).await {
                if *config::ALLOW_MIGRATION_FAILURE {
                    tracing::warn!(
                        ?error,
                        "Database migrations failed but continuing due to ALLOW_MIGRATION_FAILURE"
                    );
                } else {
                    return Err(Box::new(error) as Box<dyn std::error::Error>);
                }
            }
            Arc::new(PgUsageStore::new(pool))
        }
        UsageStoreDriver::Memory => {
            tracing::warn!("using in-memory usage store; counters are lost on restart");
            Arc::new(InMemoryUsageStore::new())
        }
    };
    tracing::info!(usage_store = config::USAGE_STORE.as_str(), "usage store ready");

    let service = Arc::new(EntitlementService::new(gate, presenter, store));
    let (prometheus_layer, metrics_handle) = PrometheusMetricLayer::pair();
    let app = tenant_entitlements::app(service)
        .route(
            "/metrics",
            get(move || async move { metrics_handle.render() }),
        )
        .layer(prometheus_layer);

    let addr: SocketAddr =
        format!("{}:{}", config::BIND_ADDRESS.as_str(), *config::BIND_PORT).parse()?;
    tracing::info!(%addr, "Listening for incoming connections");
    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .await?;

    Ok(())
}
