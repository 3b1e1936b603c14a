//! Relay server: wires configuration, delivery engine, HTTP routes and discovery

use crate::delivery::DeliveryEngine;
use crate::models::{RelayConfig, MISSING_CHAT_GUIDANCE};
use crate::server::discovery::DiscoveryResponder;
use crate::server::providers::{CommandSource, NotificationSink};
use anyhow::{Context, Result};
use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use warp::Filter;

/// Time given to open requests after shutdown before the process exits.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Main pingme relay server
pub struct RelayServer {
    config: Arc<RelayConfig>,
    sink: Arc<dyn NotificationSink>,
    command_source: Option<Arc<dyn CommandSource>>,
    shutdown: CancellationToken,
}

/// A relay bound to its listening socket but not yet serving
pub struct BoundRelay {
    local_addr: SocketAddr,
    shutdown: CancellationToken,
    server: Pin<Box<dyn Future<Output = ()> + Send>>,
    discovery: Option<JoinHandle<()>>,
}

impl RelayServer {
    /// Create a new relay delivering through `sink`
    pub fn new(config: RelayConfig, sink: Arc<dyn NotificationSink>) -> Self {
        Self {
            config: Arc::new(config),
            sink,
            command_source: None,
            shutdown: CancellationToken::new(),
        }
    }

    /// Answer chat id discovery commands read from `source`.
    pub fn with_discovery(mut self, source: Arc<dyn CommandSource>) -> Self {
        self.command_source = Some(source);
        self
    }

    /// Token that stops the server, discovery and pending retry loops.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Bind the HTTP listener and spawn discovery.
    pub fn bind(self) -> Result<BoundRelay> {
        let engine = DeliveryEngine::new(Arc::clone(&self.sink), self.config.retry_interval)
            .with_cancellation(self.shutdown.clone());

        match &self.config.destination {
            Some(destination) => tracing::info!(
                destination = %destination,
                path = %format!("/{}", self.config.ingest_path),
                "Forwarding notifications"
            ),
            None => tracing::warn!("{}", MISSING_CHAT_GUIDANCE),
        }

        let routes = crate::server::api::create_api_routes(&self.config, engine)
            .with(warp::trace::request());

        let shutdown_signal = self.shutdown.clone();
        let (local_addr, server) = warp::serve(routes)
            .try_bind_with_graceful_shutdown(self.config.listen_addr, async move {
                shutdown_signal.cancelled().await;
            })
            .context(format!("Failed to bind to {}", self.config.listen_addr))?;

        let discovery = self.command_source.map(|source| {
            let responder = DiscoveryResponder::new(source, self.config.discovery_command.clone())
                .with_cancellation(self.shutdown.clone());
            tokio::spawn(responder.run())
        });

        Ok(BoundRelay {
            local_addr,
            shutdown: self.shutdown,
            server: Box::pin(server),
            discovery,
        })
    }

    /// Serve until Ctrl+C.
    pub async fn start(self) -> Result<()> {
        let relay = self.bind()?;
        let shutdown = relay.shutdown_token();
        tracing::info!(address = %relay.local_addr(), "listening on {}", relay.local_addr().port());

        let run = relay.run();
        tokio::pin!(run);

        tokio::select! {
            _ = &mut run => {}
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutting down relay");
                shutdown.cancel();
                if tokio::time::timeout(SHUTDOWN_GRACE, run).await.is_err() {
                    // Interrupted batches are never answered; exiting drops their connections
                    tracing::warn!(
                        grace_ms = SHUTDOWN_GRACE.as_millis() as u64,
                        "Closing connections of undelivered batches"
                    );
                }
            }
        }

        Ok(())
    }
}

impl BoundRelay {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Serve requests until the shutdown token fires and open requests finish.
    ///
    /// Requests for interrupted batches are never answered, so this only
    /// returns once their callers hang up.
    pub async fn run(self) {
        self.server.await;
        if let Some(discovery) = self.discovery {
            // Discovery watches the same token
            let _ = discovery.await;
        }
    }
}
