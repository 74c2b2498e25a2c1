//! Repository trait definitions (Ports)
//!
//! These traits define the storage interface the allocator depends on.
//! Implementations can be PostgreSQL, in-memory, or mock for testing.

use crate::error::StoreError;
use async_trait::async_trait;
use coupon_domain::{Grant, Pool, PoolCode, PoolId, PoolSeed, RequesterId, SeedOutcome};
use std::collections::BTreeMap;

/// Repository for Pool entities (the Pool Store)
///
/// Stock has no setter here. The only mutator is
/// [`DrawTransaction::decrement_if_positive`].
#[async_trait]
pub trait PoolRepository: Send + Sync {
    /// Insert the pool if no pool with this code exists
    async fn seed_if_absent(&self, seed: &PoolSeed) -> Result<SeedOutcome, StoreError>;

    /// Resolve a pool code to its current row
    async fn find_by_code(&self, code: &PoolCode) -> Result<Option<Pool>, StoreError>;

    /// List all pools ordered by code (reporting only)
    async fn list(&self) -> Result<Vec<Pool>, StoreError>;
}

/// Repository for Grant entities (the Grant Ledger)
#[async_trait]
pub trait GrantRepository: Send + Sync {
    /// Find the committed grant for a requester, if any
    async fn find_by_requester(&self, requester: RequesterId) -> Result<Option<Grant>, StoreError>;

    /// List all committed grants, newest first
    async fn list(&self) -> Result<Vec<Grant>, StoreError>;

    /// Count committed grants per pool code; every pool is present
    async fn count_by_pool(&self) -> Result<BTreeMap<PoolCode, u64>, StoreError>;
}

/// One unit of work for a single pool draw
///
/// The decrement and the grant insert either both commit or both roll back.
/// Dropping an unfinished transaction rolls it back.
#[async_trait]
pub trait DrawTransaction: Send {
    /// Atomically decrement stock by one where stock > 0
    ///
    /// Returns the number of rows changed (0 = pool empty, 1 = unit taken).
    async fn decrement_if_positive(&mut self, pool_id: PoolId) -> Result<u64, StoreError>;

    /// Insert the grant for `requester` drawn from `pool`
    ///
    /// # Errors
    /// `StoreError::Duplicate` if the requester already holds a grant
    /// (including one still pending in a concurrent transaction).
    async fn insert_grant(&mut self, pool: &Pool, requester: RequesterId)
        -> Result<Grant, StoreError>;

    /// Make the unit of work durable
    async fn commit(&mut self) -> Result<(), StoreError>;

    /// Undo every effect of the unit of work
    async fn rollback(&mut self) -> Result<(), StoreError>;
}

/// Combined store interface
#[async_trait]
pub trait Store: Send + Sync {
    /// Get pool repository
    fn pools(&self) -> &dyn PoolRepository;

    /// Get grant repository
    fn grants(&self) -> &dyn GrantRepository;

    /// Begin a draw transaction
    async fn begin<'a>(&'a self) -> Result<Box<dyn DrawTransaction + 'a>, StoreError>;
}
