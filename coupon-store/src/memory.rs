//! In-memory store implementation
//!
//! Used for testing and development without a database.
//! All state sits behind one mutex. Each pool also carries an async row lock
//! that a transaction holds from its first decrement of that pool until it
//! commits or rolls back, so a concurrent draw on the same pool waits and then
//! re-checks committed stock. Decrements stay private to the transaction until
//! commit.

use crate::error::StoreError;
use crate::repository::{DrawTransaction, GrantRepository, PoolRepository, Store};
use async_trait::async_trait;
use chrono::Utc;
use coupon_domain::{Grant, Pool, PoolCode, PoolId, PoolSeed, RequesterId, SeedOutcome};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{Mutex as RowLock, OwnedMutexGuard};
use tracing::debug;

/// In-memory store for testing
pub struct MemoryStore {
    state: Mutex<MemoryState>,
    fail_next_insert: AtomicBool,
}

#[derive(Default)]
struct MemoryState {
    /// Committed pool rows
    pools: HashMap<PoolId, Pool>,
    codes: HashMap<PoolCode, PoolId>,
    row_locks: HashMap<PoolId, Arc<RowLock<()>>>,
    /// Committed grants in commit order
    grants: Vec<Grant>,
    by_requester: HashMap<RequesterId, usize>,
    /// Requesters holding an uncommitted grant
    pending: HashSet<RequesterId>,
}

impl MemoryStore {
    /// Create a new empty in-memory store
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemoryState::default()),
            fail_next_insert: AtomicBool::new(false),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        // No invariant spans a panic point, so a poisoned state is still consistent.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn row_lock(&self, pool_id: PoolId) -> Option<Arc<RowLock<()>>> {
        self.lock().row_locks.get(&pool_id).cloned()
    }

    /// Get the number of pools
    pub fn pool_count(&self) -> usize {
        self.lock().pools.len()
    }

    /// Get the number of committed grants
    pub fn grant_count(&self) -> usize {
        self.lock().grants.len()
    }

    /// Committed stock of a pool by code
    pub fn stock_of(&self, code: &str) -> Option<u32> {
        let state = self.lock();
        let code = PoolCode::new(code).ok()?;
        let id = state.codes.get(&code)?;
        state.pools.get(id).map(|p| p.stock)
    }

    /// Configure the next grant insert to fail with a database error.
    pub fn fail_next_grant_insert(&self) {
        self.fail_next_insert.store(true, Ordering::SeqCst);
    }

    /// Clear all data (useful for test setup)
    pub fn clear(&self) {
        let mut state = self.lock();
        *state = MemoryState::default();
        self.fail_next_insert.store(false, Ordering::SeqCst);
    }

    fn should_fail_insert(&self) -> bool {
        self.fail_next_insert.swap(false, Ordering::SeqCst)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Pool Repository Implementation
// =============================================================================

#[async_trait]
impl PoolRepository for MemoryStore {
    async fn seed_if_absent(&self, seed: &PoolSeed) -> Result<SeedOutcome, StoreError> {
        let mut state = self.lock();
        if state.codes.contains_key(&seed.code) {
            return Ok(SeedOutcome::AlreadyPresent);
        }

        let pool = seed.clone().into_pool();
        state.codes.insert(pool.code.clone(), pool.id);
        state.row_locks.insert(pool.id, Arc::new(RowLock::new(())));
        state.pools.insert(pool.id, pool);
        Ok(SeedOutcome::Created)
    }

    async fn find_by_code(&self, code: &PoolCode) -> Result<Option<Pool>, StoreError> {
        let state = self.lock();
        Ok(state.codes.get(code).and_then(|id| state.pools.get(id)).cloned())
    }

    async fn list(&self) -> Result<Vec<Pool>, StoreError> {
        let state = self.lock();
        let mut pools: Vec<Pool> = state.pools.values().cloned().collect();
        pools.sort_by(|a, b| a.code.cmp(&b.code));
        Ok(pools)
    }
}

// =============================================================================
// Grant Repository Implementation
// =============================================================================

#[async_trait]
impl GrantRepository for MemoryStore {
    async fn find_by_requester(&self, requester: RequesterId) -> Result<Option<Grant>, StoreError> {
        let state = self.lock();
        Ok(state.by_requester.get(&requester).map(|&i| state.grants[i].clone()))
    }

    async fn list(&self) -> Result<Vec<Grant>, StoreError> {
        let state = self.lock();
        Ok(state.grants.iter().rev().cloned().collect())
    }

    async fn count_by_pool(&self) -> Result<BTreeMap<PoolCode, u64>, StoreError> {
        let state = self.lock();
        let mut counts: BTreeMap<PoolCode, u64> =
            state.codes.keys().map(|code| (code.clone(), 0)).collect();
        for grant in &state.grants {
            *counts.entry(grant.pool_code.clone()).or_insert(0) += 1;
        }
        Ok(counts)
    }
}

// =============================================================================
// Store Implementation
// =============================================================================

#[async_trait]
impl Store for MemoryStore {
    fn pools(&self) -> &dyn PoolRepository {
        self
    }

    fn grants(&self) -> &dyn GrantRepository {
        self
    }

    async fn begin<'a>(&'a self) -> Result<Box<dyn DrawTransaction + 'a>, StoreError> {
        Ok(Box::new(MemoryTransaction::new(self)))
    }
}

// =============================================================================
// Draw Transaction
// =============================================================================

/// Unit of work against a [`MemoryStore`]
///
/// Holds the row lock of every pool it decremented. Decrements and grants are
/// published together on commit; grants reserve their requester id meanwhile.
pub struct MemoryTransaction<'a> {
    store: &'a MemoryStore,
    row_guards: HashMap<PoolId, OwnedMutexGuard<()>>,
    decremented: Vec<PoolId>,
    pending: Vec<Grant>,
    finished: bool,
}

impl<'a> MemoryTransaction<'a> {
    fn new(store: &'a MemoryStore) -> Self {
        Self {
            store,
            row_guards: HashMap::new(),
            decremented: Vec::new(),
            pending: Vec::new(),
            finished: false,
        }
    }

    fn ensure_open(&self) -> Result<(), StoreError> {
        if self.finished {
            return Err(StoreError::invalid_state("transaction already finished"));
        }
        Ok(())
    }

    fn undo(&mut self, state: &mut MemoryState) {
        self.decremented.clear();
        for grant in self.pending.drain(..) {
            state.pending.remove(&grant.requester_id);
        }
        self.finished = true;
    }

    /// Release row locks once the shared state reflects the outcome.
    fn release_rows(&mut self) {
        self.row_guards.clear();
    }
}

#[async_trait]
impl<'a> DrawTransaction for MemoryTransaction<'a> {
    async fn decrement_if_positive(&mut self, pool_id: PoolId) -> Result<u64, StoreError> {
        self.ensure_open()?;
        let store = self.store;

        if !self.row_guards.contains_key(&pool_id) {
            let Some(row_lock) = store.row_lock(pool_id) else {
                return Ok(0);
            };
            let guard = row_lock.lock_owned().await;
            self.row_guards.insert(pool_id, guard);
        }

        let state = store.lock();
        let committed = state.pools.get(&pool_id).map_or(0, |pool| pool.stock);
        let taken = self.decremented.iter().filter(|id| **id == pool_id).count();

        if committed as usize > taken {
            self.decremented.push(pool_id);
            Ok(1)
        } else {
            Ok(0)
        }
    }

    async fn insert_grant(
        &mut self,
        pool: &Pool,
        requester: RequesterId,
    ) -> Result<Grant, StoreError> {
        self.ensure_open()?;
        let store = self.store;

        if store.should_fail_insert() {
            return Err(StoreError::Database("Simulated grant insert failure".to_string()));
        }

        let mut state = store.lock();

        if !state.pools.contains_key(&pool.id) {
            return Err(StoreError::Database(format!(
                "Foreign key violation: pool {} does not exist",
                pool.id
            )));
        }

        if state.by_requester.contains_key(&requester) || state.pending.contains(&requester) {
            return Err(StoreError::duplicate("grant", requester.to_string()));
        }

        state.pending.insert(requester);
        let grant = Grant::new(pool, requester, Utc::now());
        self.pending.push(grant.clone());
        Ok(grant)
    }

    async fn commit(&mut self) -> Result<(), StoreError> {
        self.ensure_open()?;
        let store = self.store;
        {
            let mut state = store.lock();

            let mut taken: HashMap<PoolId, u32> = HashMap::new();
            for pool_id in self.decremented.drain(..) {
                *taken.entry(pool_id).or_insert(0) += 1;
            }

            // Row locks guarantee this; check before touching anything
            for (pool_id, count) in &taken {
                let stock = state.pools.get(pool_id).map_or(0, |pool| pool.stock);
                if stock < *count {
                    return Err(StoreError::invalid_state(format!(
                        "pool {} has {} units, {} taken",
                        pool_id, stock, count
                    )));
                }
            }
            for (pool_id, count) in taken {
                if let Some(pool) = state.pools.get_mut(&pool_id) {
                    pool.stock -= count;
                }
            }

            for grant in self.pending.drain(..) {
                state.pending.remove(&grant.requester_id);
                let index = state.grants.len();
                state.by_requester.insert(grant.requester_id, index);
                state.grants.push(grant);
            }
            self.finished = true;
        }
        self.release_rows();
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), StoreError> {
        self.ensure_open()?;
        let store = self.store;
        {
            let mut state = store.lock();
            self.undo(&mut state);
        }
        self.release_rows();
        Ok(())
    }
}

impl Drop for MemoryTransaction<'_> {
    fn drop(&mut self) {
        if !self.finished {
            debug!(
                decrements = self.decremented.len(),
                grants = self.pending.len(),
                "Rolling back abandoned transaction"
            );
            let store = self.store;
            let mut state = store.lock();
            self.undo(&mut state);
        }
        self.release_rows();
    }
}

// =============================================================================
// Tests
// =============================================================================
