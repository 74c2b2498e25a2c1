//! Coupon Domain Layer
//!
//! Pure domain logic with zero I/O dependencies.
//! Contains the pool and grant entities plus the validated primitives
//! they are built from.

#![warn(missing_docs)]
#![warn(clippy::all)]

// Public modules
pub mod entities;
pub mod value_objects;

// Re-export commonly used types
pub use entities::{Grant, GrantId, Pool, PoolId, PoolSeed, SeedOutcome};
pub use value_objects::{DomainError, PoolCode, PoolPriority, RequesterId};
