//! stagefetch-pullserver binary - worker-resident shuffle service.

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::FmtSubscriber;

use stagefetch_pullserver::health::{health_router, HealthState};
use stagefetch_pullserver::{
    serialize_meta, AppRegistry, PullServer, PullServerConfig, ShuffleMetrics,
};

#[tokio::main]
async fn main() -> Result<()> {
    let config = PullServerConfig::from_env()?;

    let subscriber = FmtSubscriber::builder()
        .with_max_level(config.log_level)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!(
        "Starting stagefetch-pullserver (local dirs: {:?})",
        config.local_dirs
    );

    let apps = Arc::new(AppRegistry::new());
    if let Some(app_id) = &config.app_id {
        apps.init_app(&config.user, app_id);
    }
    let metrics = ShuffleMetrics::new();

    // Health/metrics server
    let health_state = Arc::new(HealthState {
        metrics: metrics.clone(),
        apps: apps.clone(),
    });
    let metrics_addr = format!("{}:{}", config.bind_host, config.metrics_port);
    let metrics_listener = tokio::net::TcpListener::bind(&metrics_addr)
        .await
        .with_context(|| format!("Failed to bind metrics server to {}", metrics_addr))?;
    info!("Metrics server listening on {}", metrics_addr);
    let router = health_router(health_state);
    tokio::spawn(async move {
        if let Err(e) = axum::serve(metrics_listener, router).await {
            error!("Metrics server failed: {}", e);
        }
    });

    let server = PullServer::from_config(&config, apps.clone(), metrics).await?;
    let port = server.local_addr()?.port();
    if let Some(path) = &config.meta_file {
        std::fs::write(path, serialize_meta(port))
            .with_context(|| format!("Failed to write port handshake to {}", path.display()))?;
        info!("Port handshake written to {}", path.display());
    }
    info!("Pull server ready on port {}", port);

    server
        .serve_with_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for shutdown signal: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await;

    if let Some(app_id) = &config.app_id {
        apps.stop_app(app_id);
    }
    Ok(())
}
