//! PostgreSQL store.
//!
//! This module provides:
//! - `PgStore` implementing the pool and grant repositories
//! - `PgDrawTransaction`, the sqlx transaction behind one pool draw
//!
//! This module uses dynamic queries (sqlx::query) instead of compile-time
//! checked macros (sqlx::query!) to allow compilation without DATABASE_URL.

use crate::error::StoreError;
use crate::repository::{DrawTransaction, GrantRepository, PoolRepository, Store};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use coupon_domain::{Grant, Pool, PoolCode, PoolId, PoolSeed, RequesterId, SeedOutcome};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};
use std::collections::BTreeMap;
use tracing::debug;
use uuid::Uuid;

/// Name of the unique constraint on `coupon_grant.requester_id`.
///
/// Must match `migrations/0001_coupon_schema.sql`.
pub const GRANT_REQUESTER_CONSTRAINT: &str = "uq_coupon_grant_requester";

/// PostgreSQL adapter for the coupon tables.
#[derive(Clone)]
pub struct PgStore {
    /// PostgreSQL connection pool
    pool: PgPool,
}

impl PgStore {
    /// Create a new PostgreSQL store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get a reference to the underlying pool (for testing).
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

// =============================================================================
// Row parsing
// =============================================================================

fn parse_pool_row(row: &PgRow) -> Result<Pool, StoreError> {
    let id: Uuid = row.try_get("pool_id")?;
    let code: String = row.try_get("code")?;
    let stock: i32 = row.try_get("stock")?;

    let code = PoolCode::new(&code)
        .map_err(|e| StoreError::Deserialization(format!("Invalid pool code {}: {}", code, e)))?;
    let stock = u32::try_from(stock)
        .map_err(|_| StoreError::Deserialization(format!("Negative stock {} for {}", stock, code)))?;

    Ok(Pool { id, code, stock })
}

fn parse_grant_row(row: &PgRow) -> Result<Grant, StoreError> {
    let code: String = row.try_get("code")?;
    let requester_id: i64 = row.try_get("requester_id")?;

    Ok(Grant {
        id: row.try_get("grant_id")?,
        pool_id: row.try_get("pool_id")?,
        pool_code: PoolCode::new(&code).map_err(|e| {
            StoreError::Deserialization(format!("Invalid pool code {}: {}", code, e))
        })?,
        requester_id: RequesterId::new(requester_id).map_err(|e| {
            StoreError::Deserialization(format!("Invalid requester {}: {}", requester_id, e))
        })?,
        created_at: row.try_get("created_at")?,
    })
}

/// Check if a database error is the requester uniqueness violation
fn is_requester_conflict(db_err: &dyn sqlx::error::DatabaseError) -> bool {
    db_err.code().as_deref() == Some("23505")
        && db_err.constraint() == Some(GRANT_REQUESTER_CONSTRAINT)
}

// =============================================================================
// Pool Repository Implementation
// =============================================================================

#[async_trait]
impl PoolRepository for PgStore {
    async fn seed_if_absent(&self, seed: &PoolSeed) -> Result<SeedOutcome, StoreError> {
        let stock = i32::try_from(seed.initial_stock).map_err(|_| {
            coupon_domain::DomainError::InvalidStock(format!(
                "Initial stock {} for {} exceeds {}",
                seed.initial_stock,
                seed.code,
                i32::MAX
            ))
        })?;

        let result = sqlx::query(
            r#"
            INSERT INTO coupon_pool (pool_id, code, stock)
            VALUES ($1, $2, $3)
            ON CONFLICT (code) DO NOTHING
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(seed.code.as_str())
        .bind(stock)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            Ok(SeedOutcome::Created)
        } else {
            Ok(SeedOutcome::AlreadyPresent)
        }
    }

    async fn find_by_code(&self, code: &PoolCode) -> Result<Option<Pool>, StoreError> {
        let row = sqlx::query("SELECT pool_id, code, stock FROM coupon_pool WHERE code = $1")
            .bind(code.as_str())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(parse_pool_row).transpose()
    }

    async fn list(&self) -> Result<Vec<Pool>, StoreError> {
        let rows = sqlx::query("SELECT pool_id, code, stock FROM coupon_pool ORDER BY code ASC")
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(parse_pool_row).collect()
    }
}

// =============================================================================
// Grant Repository Implementation
// =============================================================================

#[async_trait]
impl GrantRepository for PgStore {
    async fn find_by_requester(&self, requester: RequesterId) -> Result<Option<Grant>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT g.grant_id, g.pool_id, p.code, g.requester_id, g.created_at
            FROM coupon_grant g
            JOIN coupon_pool p ON p.pool_id = g.pool_id
            WHERE g.requester_id = $1
            "#,
        )
        .bind(requester.as_i64())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(parse_grant_row).transpose()
    }

    async fn list(&self) -> Result<Vec<Grant>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT g.grant_id, g.pool_id, p.code, g.requester_id, g.created_at
            FROM coupon_grant g
            JOIN coupon_pool p ON p.pool_id = g.pool_id
            ORDER BY g.created_at DESC, g.grant_id DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(parse_grant_row).collect()
    }

    async fn count_by_pool(&self) -> Result<BTreeMap<PoolCode, u64>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT p.code, COUNT(g.grant_id) AS granted
            FROM coupon_pool p
            LEFT JOIN coupon_grant g ON g.pool_id = p.pool_id
            GROUP BY p.code
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut counts = BTreeMap::new();
        for row in rows {
            let code: String = row.try_get("code")?;
            let granted: i64 = row.try_get("granted")?;
            let code = PoolCode::new(&code).map_err(|e| {
                StoreError::Deserialization(format!("Invalid pool code {}: {}", code, e))
            })?;
            counts.insert(code, u64::try_from(granted).unwrap_or(0));
        }
        Ok(counts)
    }
}

// =============================================================================
// Store Implementation
// =============================================================================

#[async_trait]
impl Store for PgStore {
    fn pools(&self) -> &dyn PoolRepository {
        self
    }

    fn grants(&self) -> &dyn GrantRepository {
        self
    }

    async fn begin<'a>(&'a self) -> Result<Box<dyn DrawTransaction + 'a>, StoreError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgDrawTransaction { tx: Some(tx) }))
    }
}

// =============================================================================
// Draw Transaction
// =============================================================================

/// A sqlx transaction scoped to one pool draw.
///
/// Dropping it without commit lets sqlx roll the transaction back.
pub struct PgDrawTransaction {
    tx: Option<Transaction<'static, Postgres>>,
}

impl PgDrawTransaction {
    fn active(&mut self) -> Result<&mut Transaction<'static, Postgres>, StoreError> {
        self.tx
            .as_mut()
            .ok_or_else(|| StoreError::invalid_state("transaction already finished"))
    }
}

#[async_trait]
impl DrawTransaction for PgDrawTransaction {
    async fn decrement_if_positive(&mut self, pool_id: PoolId) -> Result<u64, StoreError> {
        let tx = self.active()?;

        let result = sqlx::query(
            r#"
            UPDATE coupon_pool
            SET stock = stock - 1
            WHERE pool_id = $1 AND stock > 0
            "#,
        )
        .bind(pool_id)
        .execute(&mut **tx)
        .await?;

        Ok(result.rows_affected())
    }

    async fn insert_grant(
        &mut self,
        pool: &Pool,
        requester: RequesterId,
    ) -> Result<Grant, StoreError> {
        let tx = self.active()?;
        let grant_id = Uuid::now_v7();

        let inserted = sqlx::query_scalar::<_, DateTime<Utc>>(
            r#"
            INSERT INTO coupon_grant (grant_id, pool_id, requester_id)
            VALUES ($1, $2, $3)
            RETURNING created_at
            "#,
        )
        .bind(grant_id)
        .bind(pool.id)
        .bind(requester.as_i64())
        .fetch_one(&mut **tx)
        .await;

        match inserted {
            Ok(created_at) => {
                debug!(%grant_id, pool = %pool.code, %requester, "Grant row inserted");
                Ok(Grant {
                    id: grant_id,
                    pool_id: pool.id,
                    pool_code: pool.code.clone(),
                    requester_id: requester,
                    created_at,
                })
            },
            Err(sqlx::Error::Database(db_err)) if is_requester_conflict(db_err.as_ref()) => {
                Err(StoreError::duplicate("grant", requester.to_string()))
            },
            Err(e) => Err(e.into()),
        }
    }

    async fn commit(&mut self) -> Result<(), StoreError> {
        let tx = self
            .tx
            .take()
            .ok_or_else(|| StoreError::invalid_state("transaction already finished"))?;
        tx.commit().await?;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), StoreError> {
        let tx = self
            .tx
            .take()
            .ok_or_else(|| StoreError::invalid_state("transaction already finished"))?;
        tx.rollback().await?;
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    // Integration tests against PostgreSQL. `sqlx::test` creates a fresh
    // database per test and applies the workspace migrations.
    //
    // Run with: `DATABASE_URL=... cargo test -p coupon-store --features postgres -- --ignored`

    async fn seeded(pool: PgPool, seeds: &[(&str, u32)]) -> PgStore {
        let store = PgStore::new(pool);
        for (code, stock) in seeds {
            store
                .seed_if_absent(&PoolSeed::new(PoolCode::new(code).unwrap(), *stock))
                .await
                .expect("Failed to seed pool");
        }
        store
    }

    async fn find(store: &PgStore, code: &str) -> Pool {
        store
            .find_by_code(&PoolCode::new(code).unwrap())
            .await
            .expect("Failed to query pool")
            .expect("Pool should exist")
    }

    #[sqlx::test(migrations = "../migrations")]
    #[ignore = "requires DATABASE_URL"]
    async fn test_seed_if_absent_is_idempotent(pool: PgPool) {
        let store = PgStore::new(pool);
        let code = PoolCode::new("A").unwrap();

        let first = store.seed_if_absent(&PoolSeed::new(code.clone(), 1)).await.unwrap();
        let second = store.seed_if_absent(&PoolSeed::new(code.clone(), 50)).await.unwrap();

        assert_eq!(first, SeedOutcome::Created);
        assert_eq!(second, SeedOutcome::AlreadyPresent);

        let pools = PoolRepository::list(&store).await.unwrap();
        assert_eq!(pools.len(), 1);
        assert_eq!(pools[0].stock, 1);
    }

    #[sqlx::test(migrations = "../migrations")]
    #[ignore = "requires DATABASE_URL"]
    async fn test_decrement_never_goes_negative(pool: PgPool) {
        let store = seeded(pool, &[("A", 1)]).await;
        let a = find(&store, "A").await;

        let mut tx = store.begin().await.unwrap();
        assert_eq!(tx.decrement_if_positive(a.id).await.unwrap(), 1);
        assert_eq!(tx.decrement_if_positive(a.id).await.unwrap(), 0);
        tx.commit().await.unwrap();

        assert_eq!(find(&store, "A").await.stock, 0);
    }

    #[sqlx::test(migrations = "../migrations")]
    #[ignore = "requires DATABASE_URL"]
    async fn test_rollback_undoes_decrement_and_grant(pool: PgPool) {
        let store = seeded(pool, &[("A", 1)]).await;
        let a = find(&store, "A").await;
        let requester = RequesterId::new(1).unwrap();

        let mut tx = store.begin().await.unwrap();
        tx.decrement_if_positive(a.id).await.unwrap();
        tx.insert_grant(&a, requester).await.unwrap();
        tx.rollback().await.unwrap();

        assert_eq!(find(&store, "A").await.stock, 1);
        assert!(store.find_by_requester(requester).await.unwrap().is_none());
    }

    #[sqlx::test(migrations = "../migrations")]
    #[ignore = "requires DATABASE_URL"]
    async fn test_requester_conflict_maps_to_duplicate(pool: PgPool) {
        let store = seeded(pool, &[("A", 5)]).await;
        let a = find(&store, "A").await;
        let requester = RequesterId::new(42).unwrap();

        let mut tx = store.begin().await.unwrap();
        tx.decrement_if_positive(a.id).await.unwrap();
        let grant = tx.insert_grant(&a, requester).await.unwrap();
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        tx.decrement_if_positive(a.id).await.unwrap();
        let err = tx.insert_grant(&a, requester).await.unwrap_err();
        assert!(err.is_duplicate(), "expected Duplicate, got {:?}", err);
        tx.rollback().await.unwrap();

        assert_eq!(find(&store, "A").await.stock, 4);
        let stored = store.find_by_requester(requester).await.unwrap().unwrap();
        assert_eq!(stored.id, grant.id);
        assert_eq!(stored.pool_code.as_str(), "A");
    }

    #[sqlx::test(migrations = "../migrations")]
    #[ignore = "requires DATABASE_URL"]
    async fn test_schema_rejects_stock_increase(pool: PgPool) {
        let store = seeded(pool, &[("A", 1)]).await;

        let result = sqlx::query("UPDATE coupon_pool SET stock = stock + 1 WHERE code = 'A'")
            .execute(store.pool())
            .await;

        assert!(result.is_err(), "stock increase must be rejected by the schema");
    }

    #[sqlx::test(migrations = "../migrations")]
    #[ignore = "requires DATABASE_URL"]
    async fn test_count_by_pool_reports_every_pool(pool: PgPool) {
        let store = seeded(pool, &[("A", 1), ("B", 30)]).await;
        let b = find(&store, "B").await;

        let mut tx = store.begin().await.unwrap();
        tx.decrement_if_positive(b.id).await.unwrap();
        tx.insert_grant(&b, RequesterId::new(9).unwrap()).await.unwrap();
        tx.commit().await.unwrap();

        let counts = store.count_by_pool().await.unwrap();
        assert_eq!(counts.get(&PoolCode::new("A").unwrap()), Some(&0));
        assert_eq!(counts.get(&PoolCode::new("B").unwrap()), Some(&1));

        let grants = GrantRepository::list(&store).await.unwrap();
        assert_eq!(grants.len(), 1);
        assert_eq!(grants[0].requester_id.as_i64(), 9);
    }
}
