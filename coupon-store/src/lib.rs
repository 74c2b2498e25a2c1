//! Coupon Storage Layer
//!
//! Provides the Pool Store, the Grant Ledger, and the transactional unit of
//! work that ties a stock decrement to its grant record.
//!
//! # Architecture
//!
//! - **Repository traits**: Define the storage interface (ports)
//! - **`DrawTransaction`**: Decrement + grant insert, committed or rolled back together
//! - **In-memory store**: Fast implementation for testing
//! - **PostgreSQL store**: Production implementation (feature `postgres`)
//!
//! # Usage
//!
//! ```rust
//! use coupon_domain::{PoolCode, PoolSeed, RequesterId};
//! use coupon_store::{MemoryStore, Store};
//!
//! #[tokio::main]
//! async fn main() {
//!     let store = MemoryStore::new();
//!     let code = PoolCode::new("A").unwrap();
//!     store.pools().seed_if_absent(&PoolSeed::new(code.clone(), 1)).await.unwrap();
//!
//!     let pool = store.pools().find_by_code(&code).await.unwrap().unwrap();
//!     let mut tx = store.begin().await.unwrap();
//!     assert_eq!(tx.decrement_if_positive(pool.id).await.unwrap(), 1);
//!     tx.insert_grant(&pool, RequesterId::new(1).unwrap()).await.unwrap();
//!     tx.commit().await.unwrap();
//!
//!     assert_eq!(store.grant_count(), 1);
//! }
//! ```

#![warn(clippy::all)]

// Modules
mod error;
mod memory;
#[cfg(feature = "postgres")]
mod postgres;
mod repository;

// Re-exports
pub use error::StoreError;
pub use memory::{MemoryStore, MemoryTransaction};
#[cfg(feature = "postgres")]
pub use postgres::{PgDrawTransaction, PgStore, GRANT_REQUESTER_CONSTRAINT};
pub use repository::{DrawTransaction, GrantRepository, PoolRepository, Store};
