//! Database CLI subcommands for couponsd.
//!
//! Provides `db migrate`, `db status`, and `db init` commands.

use anyhow::{anyhow, Result};
use std::env;
use tracing::info;

use coupon_db::{migrate, status};
use coupon_store::PgStore;

use crate::bootstrap::seed_pools;
use crate::config::Config;

/// Run database CLI subcommands.
///
/// Supported commands:
/// - `couponsd db migrate` - Run pending migrations
/// - `couponsd db status` - Check migration status
/// - `couponsd db init` - Seed the pools from `COUPON_POOL_SEEDS`
pub async fn run_db_command(args: Vec<String>) -> Result<()> {
    if args.len() < 3 {
        return Err(anyhow!("Usage: couponsd db <migrate|status|init>"));
    }

    let database_url = env::var("DATABASE_URL")
        .map_err(|_| anyhow!("DATABASE_URL environment variable is required for db commands"))?;

    let pool = sqlx::PgPool::connect(&database_url).await?;

    match args[2].as_str() {
        "migrate" => {
            migrate(&pool).await?;
        },
        "status" => {
            status(&pool).await?;
        },
        "init" => {
            let config = Config::from_env()?;
            let store = PgStore::new(pool);
            let outcomes = seed_pools(&store, &config.allocation.seeds).await?;
            info!(pools = outcomes.len(), "Pool initialization finished");
        },
        _ => {
            return Err(anyhow!("Unknown db command: {}. Use migrate, status, or init", args[2]));
        },
    }

    Ok(())
}
