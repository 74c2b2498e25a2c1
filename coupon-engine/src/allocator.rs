//! Allocator: ordered-pool draw with at-most-one grant per requester.
//!
//! # Flow
//!
//! ```text
//! Start → DuplicateChecked → TryingPool(0) → TryingPool(1) → … → Exhausted
//!                                 │               │
//!                                 └─ Granted / AlreadyGranted
//! ```
//!
//! 1. Soft duplicate check against committed grants (short-circuit only)
//! 2. Resolve every priority pool by code (`UnknownPool` if one is missing)
//! 3. For each pool in order, run one `DrawTransaction`:
//!    - zero-row decrement → roll back, fail over to the next pool
//!    - decrement + grant insert → commit, return the grant
//!    - requester uniqueness violation → roll back, `AlreadyGranted`
//! 4. No pool had stock → `Exhausted`

use std::sync::Arc;

use coupon_domain::{Grant, Pool, PoolPriority, RequesterId};
use coupon_store::{DrawTransaction, Store, StoreError};
use tracing::{debug, info, instrument, warn};

use crate::error::{AllocationError, EngineResult};

/// Result of one pool attempt.
enum Draw {
    Granted(Grant),
    Empty,
}

/// Grants coupons from pools in a fixed priority order.
///
/// Holds no in-process locks; any number of `allocate` calls may run
/// concurrently against the same store.
pub struct Allocator<S: Store> {
    store: Arc<S>,
    priority: PoolPriority,
}

impl<S: Store> Allocator<S> {
    /// Create an allocator drawing from `priority` in order.
    pub fn new(store: Arc<S>, priority: PoolPriority) -> Self {
        Self { store, priority }
    }

    /// Draw order used by this allocator.
    pub fn priority(&self) -> &PoolPriority {
        &self.priority
    }

    /// The backing store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Resolve every priority pool, failing with `UnknownPool` on the first
    /// code missing from the store.
    pub async fn verify_pools(&self) -> EngineResult<Vec<Pool>> {
        self.resolve_pools().await
    }

    /// Grant one unit to `requester` from the first pool with stock.
    ///
    /// # Errors
    ///
    /// - `AlreadyGranted` if the requester holds a grant or loses a race for one
    /// - `Exhausted` if every pool is empty
    /// - `UnknownPool` if the priority list names a missing pool
    /// - `Store` for any other storage failure (not retried)
    #[instrument(name = "allocate", skip(self), fields(requester = %requester))]
    pub async fn allocate(&self, requester: RequesterId) -> EngineResult<Grant> {
        if let Some(existing) = self.store.grants().find_by_requester(requester).await? {
            debug!(
                grant_id = %existing.id,
                pool = %existing.pool_code,
                "Requester already holds a grant"
            );
            return Err(AllocationError::AlreadyGranted(requester));
        }

        let pools = self.resolve_pools().await?;

        for pool in &pools {
            match self.draw(pool, requester).await? {
                Draw::Granted(grant) => {
                    info!(grant_id = %grant.id, pool = %pool.code, "Coupon granted");
                    return Ok(grant);
                },
                Draw::Empty => {
                    debug!(pool = %pool.code, "Pool empty, failing over");
                },
            }
        }

        info!("All coupon pools exhausted");
        Err(AllocationError::Exhausted)
    }

    async fn resolve_pools(&self) -> EngineResult<Vec<Pool>> {
        let mut pools = Vec::with_capacity(self.priority.len());
        for code in self.priority.codes() {
            let pool = self
                .store
                .pools()
                .find_by_code(code)
                .await?
                .ok_or_else(|| AllocationError::UnknownPool(code.clone()))?;
            pools.push(pool);
        }
        Ok(pools)
    }

    /// One pool attempt inside its own unit of work.
    async fn draw(&self, pool: &Pool, requester: RequesterId) -> EngineResult<Draw> {
        let mut tx = self.store.begin().await?;

        match draw_within(tx.as_mut(), pool, requester).await {
            Ok(Draw::Granted(grant)) => {
                tx.commit().await.map_err(|e| commit_error(e, requester))?;
                Ok(Draw::Granted(grant))
            },
            Ok(Draw::Empty) => {
                tx.rollback().await?;
                Ok(Draw::Empty)
            },
            Err(err) => {
                if let Err(rollback_err) = tx.rollback().await {
                    warn!(pool = %pool.code, error = %rollback_err, "Rollback failed, discarding transaction");
                }
                Err(err)
            },
        }
    }
}

async fn draw_within(
    tx: &mut (dyn DrawTransaction + '_),
    pool: &Pool,
    requester: RequesterId,
) -> EngineResult<Draw> {
    match tx.decrement_if_positive(pool.id).await? {
        0 => return Ok(Draw::Empty),
        1 => {},
        n => {
            return Err(StoreError::invalid_state(format!(
                "Conditional decrement on pool {} changed {} rows",
                pool.code, n
            ))
            .into())
        },
    }

    match tx.insert_grant(pool, requester).await {
        Ok(grant) => Ok(Draw::Granted(grant)),
        Err(err) if err.is_duplicate() => {
            debug!(pool = %pool.code, "Grant insert lost the requester race, releasing unit");
            Err(AllocationError::AlreadyGranted(requester))
        },
        Err(err) => Err(err.into()),
    }
}

fn commit_error(err: StoreError, requester: RequesterId) -> AllocationError {
    if err.is_duplicate() {
        AllocationError::AlreadyGranted(requester)
    } else {
        AllocationError::Store(err)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use coupon_domain::{PoolCode, PoolSeed};
    use coupon_store::{GrantRepository, MemoryStore, PoolRepository};

    fn requester(id: i64) -> RequesterId {
        RequesterId::new(id).unwrap()
    }

    async fn create_allocator(seeds: &[(&str, u32)], priority: &str) -> Allocator<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        for (code, stock) in seeds {
            store
                .seed_if_absent(&PoolSeed::new(PoolCode::new(code).unwrap(), *stock))
                .await
                .unwrap();
        }
        Allocator::new(store, priority.parse().unwrap())
    }

    #[tokio::test]
    async fn test_draws_in_priority_order() {
        let allocator = create_allocator(&[("A", 1), ("B", 2)], "A,B").await;

        let first = allocator.allocate(requester(1)).await.unwrap();
        let second = allocator.allocate(requester(2)).await.unwrap();
        let third = allocator.allocate(requester(3)).await.unwrap();

        assert_eq!(first.pool_code.as_str(), "A");
        assert_eq!(second.pool_code.as_str(), "B");
        assert_eq!(third.pool_code.as_str(), "B");

        let err = allocator.allocate(requester(4)).await.unwrap_err();
        assert!(matches!(err, AllocationError::Exhausted));
        assert!(err.is_business_outcome());
    }

    #[tokio::test]
    async fn test_priority_is_not_lexical() {
        let allocator = create_allocator(&[("A", 5), ("B", 5)], "B,A").await;

        let grant = allocator.allocate(requester(1)).await.unwrap();
        assert_eq!(grant.pool_code.as_str(), "B");
    }

    #[tokio::test]
    async fn test_empty_pool_fails_over() {
        let allocator = create_allocator(&[("A", 0), ("B", 0), ("C", 1)], "A,B,C").await;

        let grant = allocator.allocate(requester(1)).await.unwrap();
        assert_eq!(grant.pool_code.as_str(), "C");
        assert_eq!(allocator.store().stock_of("A"), Some(0));
        assert_eq!(allocator.store().stock_of("C"), Some(0));
    }

    #[tokio::test]
    async fn test_second_request_is_already_granted() {
        let allocator = create_allocator(&[("A", 5)], "A").await;

        let grant = allocator.allocate(requester(7)).await.unwrap();
        let err = allocator.allocate(requester(7)).await.unwrap_err();

        assert!(matches!(err, AllocationError::AlreadyGranted(r) if r == requester(7)));
        assert_eq!(allocator.store().stock_of("A"), Some(4));
        assert_eq!(allocator.store().grant_count(), 1);

        let stored = allocator
            .store()
            .find_by_requester(requester(7))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.id, grant.id);
    }

    #[tokio::test]
    async fn test_exhausted_creates_no_grant() {
        let allocator = create_allocator(&[("A", 0)], "A").await;

        let err = allocator.allocate(requester(1)).await.unwrap_err();

        assert!(matches!(err, AllocationError::Exhausted));
        assert_eq!(allocator.store().grant_count(), 0);
    }

    #[tokio::test]
    async fn test_unknown_pool_consumes_nothing() {
        let allocator = create_allocator(&[("A", 3)], "A,Z").await;

        let err = allocator.allocate(requester(1)).await.unwrap_err();

        assert!(matches!(err, AllocationError::UnknownPool(ref code) if code.as_str() == "Z"));
        assert!(!err.is_business_outcome());
        assert_eq!(allocator.store().stock_of("A"), Some(3));
        assert_eq!(allocator.store().grant_count(), 0);
    }

    #[tokio::test]
    async fn test_verify_pools() {
        let allocator = create_allocator(&[("A", 1), ("B", 2)], "B,A").await;
        let pools = allocator.verify_pools().await.unwrap();
        let codes: Vec<&str> = pools.iter().map(|p| p.code.as_str()).collect();
        assert_eq!(codes, vec!["B", "A"]);

        let broken = create_allocator(&[("A", 1)], "A,B").await;
        assert!(matches!(
            broken.verify_pools().await,
            Err(AllocationError::UnknownPool(_))
        ));
    }

    #[tokio::test]
    async fn test_failed_grant_write_rolls_back_decrement() {
        let allocator = create_allocator(&[("A", 1)], "A").await;
        allocator.store().fail_next_grant_insert();

        let err = allocator.allocate(requester(1)).await.unwrap_err();

        assert!(matches!(err, AllocationError::Store(StoreError::Database(_))));
        assert_eq!(allocator.store().stock_of("A"), Some(1));
        assert_eq!(allocator.store().grant_count(), 0);

        // Nothing was consumed, so a retry succeeds
        let grant = allocator.allocate(requester(1)).await.unwrap();
        assert_eq!(grant.pool_code.as_str(), "A");
        assert_eq!(allocator.store().stock_of("A"), Some(0));
    }

    #[tokio::test]
    async fn test_late_duplicate_returns_unit_to_pool() {
        let allocator = create_allocator(&[("A", 2), ("B", 2)], "A").await;
        let store = allocator.store();
        let b = store.find_by_code(&PoolCode::new("B").unwrap()).await.unwrap().unwrap();

        // A concurrent attempt for the same requester is mid-flight: it has
        // decremented B and written its grant but not yet committed.
        let mut racing = store.begin().await.unwrap();
        racing.decrement_if_positive(b.id).await.unwrap();
        racing.insert_grant(&b, requester(1)).await.unwrap();

        // The soft check sees nothing committed, so this call reaches the insert.
        let err = allocator.allocate(requester(1)).await.unwrap_err();
        assert!(matches!(err, AllocationError::AlreadyGranted(_)));
        assert_eq!(store.stock_of("A"), Some(2));

        racing.commit().await.unwrap();

        assert_eq!(store.stock_of("A"), Some(2));
        assert_eq!(store.stock_of("B"), Some(1));
        assert_eq!(store.grant_count(), 1);
        let grants = GrantRepository::list(store).await.unwrap();
        assert_eq!(grants[0].requester_id, requester(1));
    }

    #[tokio::test]
    async fn test_draw_waits_for_in_flight_unit_instead_of_exhausting() {
        let store = Arc::new(MemoryStore::new());
        for (code, stock) in [("A", 1), ("B", 0)] {
            store
                .seed_if_absent(&PoolSeed::new(PoolCode::new(code).unwrap(), stock))
                .await
                .unwrap();
        }
        let allocator = Arc::new(Allocator::new(store.clone(), "A,B".parse().unwrap()));
        let a = store.find_by_code(&PoolCode::new("A").unwrap()).await.unwrap().unwrap();

        // Another draw holds the last unit of A but has not committed
        let mut in_flight = store.begin().await.unwrap();
        assert_eq!(in_flight.decrement_if_positive(a.id).await.unwrap(), 1);

        let waiting = tokio::spawn({
            let allocator = Arc::clone(&allocator);
            async move { allocator.allocate(requester(2)).await }
        });
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(!waiting.is_finished());

        in_flight.rollback().await.unwrap();
        drop(in_flight);

        let grant = waiting.await.unwrap().unwrap();
        assert_eq!(grant.pool_code.as_str(), "A");
        assert_eq!(store.stock_of("A"), Some(0));
        assert_eq!(store.grant_count(), 1);
    }

    #[tokio::test]
    async fn test_grant_timestamp_and_pool_reference() {
        let allocator = create_allocator(&[("A", 1)], "A").await;
        let a = allocator
            .store()
            .find_by_code(&PoolCode::new("A").unwrap())
            .await
            .unwrap()
            .unwrap();

        let before = chrono::Utc::now();
        let grant = allocator.allocate(requester(3)).await.unwrap();

        assert_eq!(grant.pool_id, a.id);
        assert_eq!(grant.requester_id, requester(3));
        assert!(grant.created_at >= before);
    }
}
