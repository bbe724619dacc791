use anyhow::Result;
use std::net::SocketAddr;
use telemetry_service::{
    api::{self, AppState},
    config::AppConfig,
    metrics_server, observability,
    registry::AssociationRegistry,
    store,
};

#[tokio::main]
async fn main() -> Result<()> {
    observability::init_tracing();

    // Load configuration
    let cfg = AppConfig::load()?;

    // Start metrics server if configured
    if let Some(metrics_cfg) = &cfg.metrics {
        metrics_server::init(&metrics_cfg.bind_addr)?;
    }

    let store = store::open(&cfg.database).await?;

    let registered = AssociationRegistry::new(store.clone())
        .register_all(&cfg.vehicle_meter_mappings)
        .await?;
    tracing::info!(
        configured = cfg.vehicle_meter_mappings.len(),
        registered,
        "vehicle-meter mappings loaded"
    );

    let addr: SocketAddr = cfg
        .http
        .bind_addr
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid http.bind_addr: {e}"))?;

    let app = api::router(AppState::new(store, &cfg.analytics));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "telemetry service listening on /api");

    axum::serve(listener, app.into_make_service()).await?;

    Ok(())
}
