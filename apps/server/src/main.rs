#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use axum::{Router, middleware::from_fn, routing::get};
use neuroscan_api::{construct_router, state::State};
use neuroscan_vision::{ClassLabelTable, InferenceAdapter};
use std::{net::SocketAddr, sync::Arc};

mod config;
mod metrics;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();
    metrics::init_telemetry()?;

    tracing::info!("Starting NeuroScan server");

    let config = config::Config::from_env()?;
    let service = config.service.clone();

    let labels = match &service.labels_path {
        Some(path) => ClassLabelTable::from_json_file(path)?,
        None => ClassLabelTable::brain_mri_4class(),
    };
    tracing::info!(
        "Loaded configuration: label_table={}, min_confidence={}, database={}",
        labels.identity(),
        service.min_confidence,
        if service.database_url.is_some() {
            "configured"
        } else {
            "in-memory"
        }
    );

    let model_path = service.model_path.clone();
    let input_size = (service.input_size, service.input_size);
    let adapter = tokio::task::spawn_blocking(move || {
        InferenceAdapter::load_or_unavailable(model_path, input_size, labels)
    })
    .await??;

    let state = Arc::new(State::new(service, adapter).await);

    let app = Router::new()
        .merge(construct_router(state))
        .route("/metrics", get(metrics::handler))
        .layer(from_fn(metrics::metrics_middleware));

    let addr = format!("0.0.0.0:{}", config.port);
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
