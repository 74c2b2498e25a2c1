//! Coupon Daemon
//!
//! # Usage
//!
//! ```bash
//! # Start with the in-memory store and default pools
//! cargo run -p couponsd
//!
//! # Start against PostgreSQL
//! DATABASE_URL=postgres://... cargo run -p couponsd --features postgres
//!
//! # Database maintenance
//! cargo run -p couponsd --features postgres -- db migrate
//! ```
//!
//! # Environment Variables
//!
//! - `COUPON_ENV`: Environment (test, development, production)
//! - `COUPON_API_HOST`: API host (default: 0.0.0.0)
//! - `COUPON_API_PORT`: API port (default: 8080)
//! - `COUPON_POOL_SEEDS`: Pools to seed (default: A=1,B=30,C=69)
//! - `COUPON_POOL_PRIORITY`: Draw order (default: seed codes, sorted)
//! - `COUPON_BOOTSTRAP_ENABLED`: Seed pools on start (default: true)
//! - `DATABASE_URL`: PostgreSQL URL (unset: in-memory store)
//! - `COUPON_DB_MAX_CONNECTIONS`: Pool size (default: 20)
//! - `COUPON_DB_MIGRATE`: Run migrations on start (default: true)

use couponsd::{Config, Daemon};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive("couponsd=info".parse()?))
        .init();

    let args: Vec<String> = std::env::args().collect();
    if args.get(1).map(String::as_str) == Some("db") {
        return run_db(args).await;
    }

    // Load configuration
    let config = Config::from_env()?;
    let backend = if config.database.url.is_some() { "postgres" } else { "memory" };

    info!(
        version = env!("CARGO_PKG_VERSION"),
        environment = %config.environment,
        api_host = %config.api.host,
        api_port = config.api.port,
        store = backend,
        "Coupon Daemon"
    );

    if config.database.url.is_some() {
        run_postgres(config).await
    } else {
        Daemon::new_memory(config)?.run().await?;
        Ok(())
    }
}

#[cfg(feature = "postgres")]
async fn run_db(args: Vec<String>) -> anyhow::Result<()> {
    couponsd::db::run_db_command(args).await
}

#[cfg(not(feature = "postgres"))]
async fn run_db(_args: Vec<String>) -> anyhow::Result<()> {
    Err(anyhow::anyhow!("db commands require couponsd built with --features postgres"))
}

#[cfg(feature = "postgres")]
async fn run_postgres(config: Config) -> anyhow::Result<()> {
    Daemon::connect(config).await?.run().await?;
    Ok(())
}

#[cfg(not(feature = "postgres"))]
async fn run_postgres(_config: Config) -> anyhow::Result<()> {
    Err(anyhow::anyhow!(
        "DATABASE_URL is set but couponsd was built without the postgres feature"
    ))
}
