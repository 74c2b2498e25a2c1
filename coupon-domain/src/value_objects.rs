//! Value Objects for the coupon domain
//!
//! Immutable, validated domain primitives.
//! All value objects enforce invariants at construction time.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

/// Domain errors for value object validation
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DomainError {
    /// Pool code must be non-blank and fit the store column
    #[error("Invalid pool code: {0}")]
    InvalidPoolCode(String),

    /// Stock must fit the store representation
    #[error("Invalid stock: {0}")]
    InvalidStock(String),

    /// Requester identity must be positive
    #[error("Invalid requester: {0}")]
    InvalidRequester(String),

    /// Priority list must be non-empty with distinct codes
    #[error("Invalid pool priority: {0}")]
    InvalidPriority(String),
}

// =============================================================================
// PoolCode
// =============================================================================

/// Short code naming a pool (e.g., "A")
///
/// # Invariants
/// - Trimmed, non-empty
/// - At most [`PoolCode::MAX_LEN`] characters
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PoolCode(String);

impl PoolCode {
    /// Maximum code length, matching `coupon_pool.code VARCHAR(16)`
    pub const MAX_LEN: usize = 16;

    /// Create a new PoolCode with validation
    ///
    /// # Examples
    /// ```
    /// # use coupon_domain::PoolCode;
    /// let code = PoolCode::new(" A ").unwrap();
    /// assert_eq!(code.as_str(), "A");
    /// ```
    ///
    /// # Errors
    /// Returns `DomainError::InvalidPoolCode` if blank or too long
    pub fn new(code: impl AsRef<str>) -> Result<Self, DomainError> {
        let trimmed = code.as_ref().trim();
        if trimmed.is_empty() {
            return Err(DomainError::InvalidPoolCode("Pool code must not be blank".to_string()));
        }
        if trimmed.chars().count() > Self::MAX_LEN {
            return Err(DomainError::InvalidPoolCode(format!(
                "Pool code '{}' exceeds {} characters",
                trimmed,
                Self::MAX_LEN
            )));
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Get the code as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PoolCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for PoolCode {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for PoolCode {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<PoolCode> for String {
    fn from(code: PoolCode) -> Self {
        code.0
    }
}

// =============================================================================
// RequesterId
// =============================================================================

/// Identity of a requester (e.g., a user id)
///
/// The at-most-one-grant invariant is keyed on this value.
///
/// # Invariants
/// - Must be > 0
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub struct RequesterId(i64);

impl RequesterId {
    /// Create a new RequesterId with validation
    ///
    /// # Errors
    /// Returns `DomainError::InvalidRequester` if value <= 0
    pub fn new(value: i64) -> Result<Self, DomainError> {
        if value <= 0 {
            return Err(DomainError::InvalidRequester(format!(
                "Requester id must be positive, got {}",
                value
            )));
        }
        Ok(Self(value))
    }

    /// Get the underlying integer value
    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for RequesterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RequesterId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value = s
            .trim()
            .parse::<i64>()
            .map_err(|_| DomainError::InvalidRequester(format!("Not an integer: {}", s)))?;
        Self::new(value)
    }
}

impl TryFrom<i64> for RequesterId {
    type Error = DomainError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<RequesterId> for i64 {
    fn from(id: RequesterId) -> Self {
        id.0
    }
}

// =============================================================================
// PoolPriority
// =============================================================================

/// Fixed, deterministic order in which pools are drawn from
///
/// # Invariants
/// - Non-empty
/// - No code appears twice
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolPriority(Vec<PoolCode>);

impl PoolPriority {
    /// Create a priority list from codes in draw order
    ///
    /// # Errors
    /// Returns `DomainError::InvalidPriority` if empty or a code repeats
    pub fn new(codes: Vec<PoolCode>) -> Result<Self, DomainError> {
        if codes.is_empty() {
            return Err(DomainError::InvalidPriority(
                "At least one pool code is required".to_string(),
            ));
        }

        let mut seen = HashSet::with_capacity(codes.len());
        for code in &codes {
            if !seen.insert(code) {
                return Err(DomainError::InvalidPriority(format!("Duplicate pool code: {}", code)));
            }
        }

        Ok(Self(codes))
    }

    /// Codes in draw order
    pub fn codes(&self) -> &[PoolCode] {
        &self.0
    }

    /// Iterate codes in draw order
    pub fn iter(&self) -> std::slice::Iter<'_, PoolCode> {
        self.0.iter()
    }

    /// Number of pools in the list
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Never true for a constructed list
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromStr for PoolPriority {
    type Err = DomainError;

    /// Parse a comma-separated list, e.g. `"A,B,C"`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let codes = s
            .split(',')
            .filter(|part| !part.trim().is_empty())
            .map(PoolCode::new)
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(codes)
    }
}

impl fmt::Display for PoolPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let joined: Vec<&str> = self.0.iter().map(PoolCode::as_str).collect();
        f.write_str(&joined.join(","))
    }
}

impl<'a> IntoIterator for &'a PoolPriority {
    type Item = &'a PoolCode;
    type IntoIter = std::slice::Iter<'a, PoolCode>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

// =============================================================================
// Tests
// =============================================================================
