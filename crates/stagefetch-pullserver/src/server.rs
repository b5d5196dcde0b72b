//! Connection accept loop.
//!
//! Each accepted connection is served by its own task through hyper's
//! HTTP/1 connection builder, so a stalled or failing peer only holds its
//! own connection. Keep-alive follows the client unless disabled, and the
//! header-read timeout bounds idle connections.

use anyhow::{Context, Result};
use axum::Router;
use hyper::server::conn::http1;
use hyper_util::rt::{TokioIo, TokioTimer};
use hyper_util::service::TowerToHyperService;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use crate::app::AppRegistry;
use crate::config::PullServerConfig;
use crate::layout::OutputLayout;
use crate::metrics::ShuffleMetrics;
use crate::service::{pull_router, ShuffleState};

#[derive(Debug, Clone, Copy)]
pub struct ConnectionOptions {
    pub keep_alive: bool,
    pub idle_timeout: Duration,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            keep_alive: true,
            idle_timeout: Duration::from_secs(60),
        }
    }
}

pub struct PullServer {
    listener: TcpListener,
    router: Router,
    options: ConnectionOptions,
    metrics: ShuffleMetrics,
}

impl PullServer {
    pub async fn bind(
        addr: &str,
        router: Router,
        options: ConnectionOptions,
        metrics: ShuffleMetrics,
    ) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind pull server to {}", addr))?;
        Ok(Self {
            listener,
            router,
            options,
            metrics,
        })
    }

    /// Bind the fetch endpoint as described by `config`, serving the
    /// applications in `apps`.
    pub async fn from_config(
        config: &PullServerConfig,
        apps: Arc<AppRegistry>,
        metrics: ShuffleMetrics,
    ) -> Result<Self> {
        let state = Arc::new(ShuffleState {
            layout: OutputLayout::new(config.local_dirs.clone()),
            apps,
            metrics: metrics.clone(),
            buffer_size: config.buffer_size(),
        });
        let options = ConnectionOptions {
            keep_alive: config.keep_alive,
            idle_timeout: config.idle_timeout(),
        };
        Self::bind(&config.bind_addr(), pull_router(state), options, metrics).await
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener
            .local_addr()
            .context("Pull server listener has no local address")
    }

    pub async fn serve(self) {
        self.serve_with_shutdown(std::future::pending()).await
    }

    /// Accept connections until `shutdown` resolves. Connections already
    /// accepted run to completion on their own tasks.
    pub async fn serve_with_shutdown<F>(self, shutdown: F)
    where
        F: Future<Output = ()> + Send,
    {
        if let Ok(addr) = self.listener.local_addr() {
            info!("Pull server listening on {}", addr);
        }
        tokio::pin!(shutdown);

        loop {
            let (stream, peer) = tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        warn!("Accept failed: {}", e);
                        continue;
                    }
                },
                _ = &mut shutdown => break,
            };

            let service = TowerToHyperService::new(self.router.clone());
            let metrics = self.metrics.clone();
            let options = self.options;
            tokio::spawn(async move {
                metrics.connections.inc();
                let mut builder = http1::Builder::new();
                builder
                    .keep_alive(options.keep_alive)
                    .timer(TokioTimer::new())
                    .header_read_timeout(options.idle_timeout);
                if let Err(e) = builder
                    .serve_connection(TokioIo::new(stream), service)
                    .await
                {
                    if e.is_timeout() {
                        debug!("Connection from {} timed out: {}", peer, e);
                    } else {
                        warn!("Connection from {} failed: {}", peer, e);
                    }
                }
                metrics.connections.dec();
            });
        }

        info!("Pull server stopped accepting connections");
    }
}
