//! examguardd: applicant face registration and verification daemon.
//!
//! Handlers parse uploads and decode images, then queue the work on the
//! engine thread, which owns the face models, registry and anomaly model.

use anyhow::{Context, Result};
use examguard_core::{AnomalyDetector, FaceAnalyzer, FaceRegistry, OnnxAnalyzer};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod config;
mod engine;
mod error;
mod routes;
mod upload;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "examguardd=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = config::Config::load()?;
    tracing::info!(
        bind = %config.bind_addr,
        models = %config.model_dir.display(),
        data = %config.data_dir.display(),
        "examguardd starting"
    );

    let analyzer: Option<Box<dyn FaceAnalyzer>> = match OnnxAnalyzer::load(&config.model_dir) {
        Ok(analyzer) => Some(Box::new(analyzer)),
        Err(e) => {
            tracing::warn!(error = %e, "face models unavailable; running degraded");
            None
        }
    };

    let registry = FaceRegistry::load_or_empty(config.registry_path())
        .with_tolerance(config.duplicate_tolerance);
    let anomaly = AnomalyDetector::load_or_unfit(config.anomaly_model_path());

    let engine = engine::Engine::new(
        analyzer,
        registry,
        anomaly,
        engine::EngineSettings {
            match_threshold: config.match_threshold,
            anomaly_threshold: config.anomaly_threshold,
            min_quality: config.min_quality,
        },
    );
    let handle = engine::spawn_engine(engine)?;

    let bind_addr = config.bind_addr;
    let app = routes::router(routes::AppState {
        engine: handle,
        config: Arc::new(config),
    });

    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("binding {bind_addr}"))?;
    tracing::info!("examguardd listening on http://{}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("examguardd shutting down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
    }
}
