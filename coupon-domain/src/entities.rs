//! Domain Entities for the coupon allocator
//!
//! Pools are finite stock buckets; grants are the immutable record that one
//! requester drew one unit from one pool.

use crate::value_objects::{DomainError, PoolCode, RequesterId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// =============================================================================
// IDs
// =============================================================================

/// Internal identity of a Pool (resolved from its code)
pub type PoolId = Uuid;

/// Surrogate identity of a Grant
pub type GrantId = Uuid;

// =============================================================================
// Pool
// =============================================================================

/// Pool is a named, finite bucket of coupon stock
///
/// Stock is only ever written by the store's conditional decrement.
/// This struct is a snapshot; `stock` is never used to drive a draw.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pool {
    pub id: PoolId,
    pub code: PoolCode,
    pub stock: u32,
}

/// Initial definition of a pool used for idempotent seeding
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolSeed {
    pub code: PoolCode,
    pub initial_stock: u32,
}

impl PoolSeed {
    /// Create a seed
    pub fn new(code: PoolCode, initial_stock: u32) -> Self {
        Self { code, initial_stock }
    }

    /// Parse a `CODE=STOCK` pair (e.g., `"B=30"`)
    ///
    /// # Errors
    /// Returns `DomainError::InvalidPoolCode` or `DomainError::InvalidStock`
    pub fn parse(pair: &str) -> Result<Self, DomainError> {
        let (code, stock) = pair.split_once('=').ok_or_else(|| {
            DomainError::InvalidStock(format!("Expected CODE=STOCK, got '{}'", pair))
        })?;

        let code = PoolCode::new(code)?;
        let initial_stock = stock.trim().parse::<u32>().map_err(|_| {
            DomainError::InvalidStock(format!("Stock for {} must be a non-negative integer", code))
        })?;

        Ok(Self { code, initial_stock })
    }

    /// Materialize the pool this seed creates
    pub fn into_pool(self) -> Pool {
        Pool {
            id: Uuid::now_v7(),
            code: self.code,
            stock: self.initial_stock,
        }
    }
}

/// Result of an insert-if-absent seed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeedOutcome {
    /// Row was inserted with the seed's stock
    Created,
    /// A pool with this code already existed; nothing changed
    AlreadyPresent,
}

// =============================================================================
// Grant
// =============================================================================

/// Grant records that a requester received one unit from a pool
///
/// Created once, inside the same unit of work as the pool decrement.
/// Never mutated or deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grant {
    pub id: GrantId,
    pub pool_id: PoolId,
    pub pool_code: PoolCode,
    pub requester_id: RequesterId,
    /// Assigned by the store at write time
    pub created_at: DateTime<Utc>,
}

impl Grant {
    /// Build a grant drawn from `pool`
    pub fn new(pool: &Pool, requester_id: RequesterId, created_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::now_v7(),
            pool_id: pool.id,
            pool_code: pool.code.clone(),
            requester_id,
            created_at,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seed_parse() {
        let seed = PoolSeed::parse("B=30").unwrap();
        assert_eq!(seed.code.as_str(), "B");
        assert_eq!(seed.initial_stock, 30);

        let seed = PoolSeed::parse(" C = 69 ").unwrap();
        assert_eq!(seed.code.as_str(), "C");
        assert_eq!(seed.initial_stock, 69);
    }

    #[test]
    fn test_seed_parse_rejects_negative_stock() {
        assert!(matches!(PoolSeed::parse("A=-1"), Err(DomainError::InvalidStock(_))));
        assert!(matches!(PoolSeed::parse("A"), Err(DomainError::InvalidStock(_))));
        assert!(matches!(PoolSeed::parse("=5"), Err(DomainError::InvalidPoolCode(_))));
    }

    #[test]
    fn test_seed_into_pool_keeps_stock() {
        let pool = PoolSeed::new(PoolCode::new("A").unwrap(), 1).into_pool();
        assert_eq!(pool.code.as_str(), "A");
        assert_eq!(pool.stock, 1);
    }

    #[test]
    fn test_grant_references_pool() {
        let pool = PoolSeed::new(PoolCode::new("A").unwrap(), 1).into_pool();
        let requester = RequesterId::new(7).unwrap();
        let now = Utc::now();

        let grant = Grant::new(&pool, requester, now);

        assert_eq!(grant.pool_id, pool.id);
        assert_eq!(grant.pool_code, pool.code);
        assert_eq!(grant.requester_id, requester);
        assert_eq!(grant.created_at, now);
    }

    #[test]
    fn test_seed_outcome_serializes_snake_case() {
        let json = serde_json::to_string(&SeedOutcome::AlreadyPresent).unwrap();
        assert_eq!(json, "\"already_present\"");
    }
}
