//! Server - TCP accept loop with bounded workers and graceful shutdown
//!
//! Provides:
//! - TCP listener and accept loop
//! - Fixed-size worker pool (admission control)
//! - Action registry consulted by every worker
//! - Shutdown that closes live connections and bounds the wait for workers

pub mod active;
pub mod registry;
mod worker;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;

use crate::error::{Result, WireError};
use crate::wire::DEFAULT_MAX_FRAME_BYTES;

pub use active::ActiveConnections;
pub use registry::{ActionHandler, ActionRegistry, FnHandler, StubHandler};

use worker::Worker;

/// Default listening port.
pub const DEFAULT_PORT: u16 = 2005;

const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(150);

/// Configuration for the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Interface to bind
    pub host: String,
    /// Port to bind (0 picks an ephemeral port)
    pub port: u16,
    /// Maximum number of concurrently served connections
    pub max_workers: usize,
    /// Per-read timeout after which a connection is considered dead
    pub read_timeout_ms: u64,
    /// How long shutdown waits for workers before aborting them
    pub shutdown_grace_ms: u64,
    /// Largest single value accepted on the wire
    pub max_frame_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            max_workers: 50,
            read_timeout_ms: 5 * 60 * 1000,
            shutdown_grace_ms: 5000,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
        }
    }
}

impl ServerConfig {
    /// Config bound to loopback on an ephemeral port
    pub fn local() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 0,
            ..Default::default()
        }
    }

    /// Set max workers
    pub fn with_max_workers(mut self, max: usize) -> Self {
        self.max_workers = max;
        self
    }

    /// Set per-read timeout
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Set shutdown grace period
    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace_ms = grace.as_millis() as u64;
        self
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

/// Cloneable trigger for server shutdown.
#[derive(Debug, Clone, Default)]
pub struct ShutdownHandle {
    token: CancellationToken,
}

impl ShutdownHandle {
    /// Ask the server to stop. Idempotent.
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Server accepting connections and serving actions
pub struct Server {
    config: ServerConfig,
    listener: TcpListener,
    registry: Arc<ActionRegistry>,
    active: ActiveConnections,
    shutdown: ShutdownHandle,
}

impl Server {
    /// Bind the listening socket.
    pub async fn bind(config: ServerConfig, registry: ActionRegistry) -> Result<Self> {
        if config.max_workers == 0 {
            return Err(WireError::Config("max_workers must be at least 1".into()));
        }

        let listener = TcpListener::bind((config.host.as_str(), config.port)).await?;
        Ok(Self {
            config,
            listener,
            registry: Arc::new(registry),
            active: ActiveConnections::new(),
            shutdown: ShutdownHandle::default(),
        })
    }

    /// Address the listener is bound to
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn registry(&self) -> Arc<ActionRegistry> {
        Arc::clone(&self.registry)
    }

    /// View of the live connections, valid after `run` consumes the server.
    pub fn active_connections(&self) -> ActiveConnections {
        self.active.clone()
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Accept and serve connections until shutdown is requested, then drain.
    pub async fn run(self) -> Result<()> {
        let Server {
            config,
            listener,
            registry,
            active,
            shutdown,
        } = self;

        let slots = Arc::new(Semaphore::new(config.max_workers));
        let mut workers = JoinSet::new();

        tracing::info!(
            addr = %listener.local_addr()?,
            max_workers = config.max_workers,
            actions = registry.len(),
            "Server accepting connections"
        );

        loop {
            // A slot is taken before accepting: when all workers are busy new
            // connections wait in the listen backlog instead of being refused.
            let permit = tokio::select! {
                _ = shutdown.token.cancelled() => break,
                permit = Arc::clone(&slots).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            while let Some(result) = workers.try_join_next() {
                log_worker_exit(result);
            }

            let accepted = tokio::select! {
                _ = shutdown.token.cancelled() => break,
                accepted = listener.accept() => accepted,
            };

            let (stream, peer) = match accepted {
                Ok(pair) => pair,
                Err(e) => {
                    if !shutdown.is_shutting_down() {
                        tracing::warn!(error = %e, "Error accepting client");
                        tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                    }
                    continue;
                }
            };

            let guard = active.register(peer);
            let worker = Worker::new(stream, peer, &guard, Arc::clone(&registry), &config);
            tracing::debug!(peer = %peer, active = active.len(), "Accepted connection");

            workers.spawn(async move {
                let _permit = permit;
                let _guard = guard;
                worker.run().await;
            });
        }

        drain(workers, &active, config.shutdown_grace()).await;
        drop(listener);
        tracing::info!("Server shutdown complete");
        Ok(())
    }
}

/// Close every live connection and wait, bounded, for the workers to finish.
async fn drain(mut workers: JoinSet<()>, active: &ActiveConnections, grace: Duration) {
    let closing = active.close_all();
    tracing::info!(connections = closing, "Shutting down server");

    let finished = tokio::time::timeout(grace, async {
        while let Some(result) = workers.join_next().await {
            log_worker_exit(result);
        }
    })
    .await;

    if finished.is_err() {
        tracing::warn!(
            remaining = workers.len(),
            grace_ms = grace.as_millis() as u64,
            "Workers still running after grace period, aborting"
        );
        workers.abort_all();
        while workers.join_next().await.is_some() {}
    }
}

fn log_worker_exit(result: std::result::Result<(), JoinError>) {
    if let Err(e) = result {
        if e.is_panic() {
            tracing::error!(error = ?e, "Connection worker panicked");
        }
    }
}
