//! Coupon Allocation Engine
//!
//! Grants each requester at most one unit from an ordered list of pools.
//!
//! Correctness under concurrency is delegated to the store: the conditional
//! decrement prevents over-allocation and the requester uniqueness constraint
//! prevents double grants. The allocator itself holds no locks.

#![warn(clippy::all)]

mod allocator;
mod error;

pub use allocator::Allocator;
pub use error::{AllocationError, EngineResult};
