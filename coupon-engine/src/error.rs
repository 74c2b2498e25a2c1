//! Allocation error types.

use coupon_domain::{PoolCode, RequesterId};
use coupon_store::StoreError;
use thiserror::Error;

/// Outcome of an allocation that did not produce a grant.
///
/// `AlreadyGranted` and `Exhausted` are business outcomes. `UnknownPool` is a
/// configuration defect. `Store` carries any storage failure unmodified.
#[derive(Debug, Error)]
pub enum AllocationError {
    /// Requester already holds a grant (or lost a race to create one)
    #[error("Requester {0} has already been granted a coupon")]
    AlreadyGranted(RequesterId),

    /// Every pool in priority order is empty
    #[error("All coupon pools are exhausted")]
    Exhausted,

    /// Priority list names a pool code absent from the store
    #[error("Coupon pool does not exist: {0}")]
    UnknownPool(PoolCode),

    /// Storage or transport failure
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl AllocationError {
    /// Whether this is an expected business outcome rather than a failure.
    pub fn is_business_outcome(&self) -> bool {
        matches!(self, Self::AlreadyGranted(_) | Self::Exhausted)
    }
}

/// Result type for allocation operations.
pub type EngineResult<T> = Result<T, AllocationError>;
