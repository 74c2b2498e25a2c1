//! Daemon: Main runtime orchestrator.
//!
//! The Daemon ties together:
//! - Store (in-memory or PostgreSQL)
//! - Allocator (ordered-pool draw)
//! - API Server (HTTP endpoints)
//!
//! # Lifecycle
//!
//! 1. Load configuration
//! 2. Open the store (and migrate, for PostgreSQL)
//! 3. Seed pools and verify the priority list
//! 4. Start API server
//! 5. Graceful shutdown on SIGINT

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use coupon_engine::Allocator;
use coupon_store::{MemoryStore, Store};

use crate::api::{create_router, ApiState};
use crate::bootstrap::seed_pools;
use crate::config::Config;
use crate::error::{DaemonError, DaemonResult};

// =============================================================================
// Daemon
// =============================================================================

/// The coupon daemon.
pub struct Daemon<S: Store + 'static> {
    /// Configuration
    config: Config,
    /// Store
    store: Arc<S>,
    /// Allocator shared with the API handlers
    allocator: Arc<Allocator<S>>,
    /// Flipped to `true` to stop the API server
    shutdown_tx: watch::Sender<bool>,
    /// Running API server task
    server: Mutex<Option<JoinHandle<()>>>,
}

impl Daemon<MemoryStore> {
    /// Create a daemon backed by the in-memory store.
    pub fn new_memory(config: Config) -> DaemonResult<Self> {
        Self::new(config, Arc::new(MemoryStore::new()))
    }
}

#[cfg(feature = "postgres")]
impl Daemon<coupon_store::PgStore> {
    /// Connect to PostgreSQL and create a daemon backed by it.
    ///
    /// Runs migrations first when `database.run_migrations` is set.
    pub async fn connect(config: Config) -> DaemonResult<Self> {
        let url = config
            .database
            .url
            .clone()
            .ok_or_else(|| DaemonError::Config("DATABASE_URL is required".to_string()))?;

        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(config.database.max_connections)
            .connect(&url)
            .await
            .map_err(coupon_store::StoreError::from)?;
        info!(max_connections = config.database.max_connections, "Connected to PostgreSQL");

        if config.database.run_migrations {
            coupon_db::migrate(&pool).await.map_err(|e| {
                DaemonError::Store(coupon_store::StoreError::Database(format!(
                    "Migration failed: {}",
                    e
                )))
            })?;
        }

        Self::new(config, Arc::new(coupon_store::PgStore::new(pool)))
    }
}

impl<S: Store + 'static> Daemon<S> {
    /// Create a new daemon over the provided store.
    pub fn new(config: Config, store: Arc<S>) -> DaemonResult<Self> {
        let priority = config.allocation.draw_order()?;
        let allocator = Arc::new(Allocator::new(store.clone(), priority));

        let (shutdown_tx, _) = watch::channel(false);

        Ok(Self {
            config,
            store,
            allocator,
            shutdown_tx,
            server: Mutex::new(None),
        })
    }

    /// The allocator serving requests.
    pub fn allocator(&self) -> &Arc<Allocator<S>> {
        &self.allocator
    }

    /// Run the daemon.
    ///
    /// This method blocks until shutdown is requested (SIGINT).
    pub async fn run(self) -> DaemonResult<()> {
        info!(
            version = env!("CARGO_PKG_VERSION"),
            environment = %self.config.environment,
            priority = %self.allocator.priority(),
            "Starting coupon daemon"
        );

        // 1. Seed pools and check the draw order
        self.bootstrap().await?;

        // 2. Start API server
        let api_addr = self.start_api_server().await?;
        info!(%api_addr, "API server started");

        // 3. Wait for shutdown
        tokio::signal::ctrl_c()
            .await
            .map_err(|e| DaemonError::Server(format!("Failed to listen for shutdown: {}", e)))?;
        info!("Received shutdown signal");

        // 4. Graceful shutdown
        self.shutdown().await?;

        Ok(())
    }

    /// Seed configured pools (when enabled) and verify every priority pool exists.
    pub async fn bootstrap(&self) -> DaemonResult<()> {
        if self.config.allocation.bootstrap_enabled {
            seed_pools(self.store.pools(), &self.config.allocation.seeds).await?;
        } else {
            info!("Pool bootstrap disabled");
        }

        let pools = self.allocator.verify_pools().await.map_err(|e| {
            DaemonError::Config(format!("Pool priority cannot be satisfied: {}", e))
        })?;

        for pool in &pools {
            info!(pool = %pool.code, stock = pool.stock, "Pool ready");
        }

        Ok(())
    }

    /// Start the API server.
    pub async fn start_api_server(&self) -> DaemonResult<SocketAddr> {
        let state = Arc::new(ApiState {
            allocator: self.allocator.clone(),
        });

        let router = create_router(state);
        let addr = format!("{}:{}", self.config.api.host, self.config.api.port);

        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| DaemonError::Server(format!("Failed to bind to {}: {}", addr, e)))?;

        let local_addr = listener
            .local_addr()
            .map_err(|e| DaemonError::Server(format!("Failed to get local address: {}", e)))?;

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let stop = async move {
            let _ = shutdown_rx.wait_for(|stop| *stop).await;
        };

        // Spawn the server task
        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router).with_graceful_shutdown(stop).await {
                error!(error = %e, "API server error");
            }
        });
        *self.server.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);

        Ok(local_addr)
    }

    /// Graceful shutdown: stop accepting requests and drain in-flight ones.
    async fn shutdown(&self) -> DaemonResult<()> {
        info!("Initiating graceful shutdown");

        self.shutdown_tx.send_replace(true);
        let server = self.server.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(server) = server {
            if let Err(e) = server.await {
                warn!(error = %e, "API server task ended abnormally");
            }
        }

        let distribution = self.store.grants().count_by_pool().await?;
        let issued: u64 = distribution.values().sum();
        info!(issued, "Shutdown complete");

        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
