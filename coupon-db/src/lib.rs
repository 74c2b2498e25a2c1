//! Database lifecycle for the coupon service.
//!
//! Embeds the workspace `migrations/` directory and reports schema status.

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use tracing::{info, warn};

/// Result type for DB operations.
pub type Result<T> = std::result::Result<T, anyhow::Error>;

/// Tables the coupon service reads and writes.
pub const COUPON_TABLES: [&str; 2] = ["coupon_pool", "coupon_grant"];

/// Run all pending migrations.
///
/// Idempotent: safe to run multiple times.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    info!("Running database migrations...");

    sqlx::migrate!("../migrations").run(pool).await?;

    info!("Migrations completed successfully");
    Ok(())
}

/// Check database connectivity, migration history and coupon tables.
pub async fn status(pool: &PgPool) -> Result<()> {
    let result: i32 = sqlx::query_scalar("SELECT 1").fetch_one(pool).await?;
    if result != 1 {
        return Err(anyhow::anyhow!("Database connectivity check failed"));
    }
    info!("Database connectivity: OK");

    let rows = sqlx::query(
        r#"
        SELECT version, description, installed_on, success
        FROM _sqlx_migrations
        ORDER BY version DESC
        LIMIT 10
        "#,
    )
    .fetch_all(pool)
    .await;

    match rows {
        Ok(migs) if !migs.is_empty() => {
            info!("Latest migrations:");
            for mig in migs {
                let version: i64 = mig.try_get("version")?;
                let description: String = mig.try_get("description")?;
                let installed_on: DateTime<Utc> = mig.try_get("installed_on")?;
                let success: bool = mig.try_get("success")?;

                let marker = if success { "ok" } else { "FAILED" };
                info!("  [{}] v{}: {} ({})", marker, version, description, installed_on);
            }
        },
        Ok(_) => {
            warn!("No migrations found in database (run `couponsd db migrate` first)");
        },
        Err(e) => {
            if e.to_string().contains("_sqlx_migrations") {
                warn!("Migration table not found (run `couponsd db migrate` first)");
                return Ok(());
            }
            return Err(e.into());
        },
    }

    for table in COUPON_TABLES {
        if table_exists(pool, table).await? {
            info!("Table {}: present", table);
        } else {
            warn!("Table {}: missing", table);
        }
    }

    Ok(())
}

/// Whether `table` exists in the current schema.
pub async fn table_exists(pool: &PgPool, table: &str) -> Result<bool> {
    let exists: bool = sqlx::query_scalar("SELECT to_regclass($1) IS NOT NULL")
        .bind(table)
        .fetch_one(pool)
        .await?;
    Ok(exists)
}

#[cfg(test)]
mod tests {
    use super::*;

    // Run with: `DATABASE_URL=... cargo test -p coupon-db -- --ignored`

    #[sqlx::test(migrations = false)]
    #[ignore = "requires DATABASE_URL"]
    async fn test_migrate_creates_coupon_tables(pool: PgPool) {
        assert!(!table_exists(&pool, "coupon_pool").await.unwrap());

        migrate(&pool).await.unwrap();
        // Second run is a no-op
        migrate(&pool).await.unwrap();

        for table in COUPON_TABLES {
            assert!(table_exists(&pool, table).await.unwrap(), "{table} missing");
        }
        status(&pool).await.unwrap();
    }

    #[sqlx::test(migrations = false)]
    #[ignore = "requires DATABASE_URL"]
    async fn test_status_before_migrate_is_not_an_error(pool: PgPool) {
        status(&pool).await.unwrap();
    }
}
