//! HTTP API for the coupon daemon.
//!
//! Provides REST endpoints for:
//! - Health check
//! - Issue a coupon to a user
//! - Issued grants, per-pool distribution and remaining stock
//!
//! Every body except `/health` uses the `ApiResponse` envelope.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::error;
use uuid::Uuid;

use coupon_domain::{Grant, RequesterId};
use coupon_engine::{AllocationError, Allocator};
use coupon_store::Store;

use crate::error::DaemonError;

// =============================================================================
// API State
// =============================================================================

/// Shared state for API handlers.
pub struct ApiState<S: Store + 'static> {
    pub allocator: Arc<Allocator<S>>,
}

// =============================================================================
// Request/Response Types
// =============================================================================

/// Response envelope.
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

/// Health check response.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// An issued coupon.
#[derive(Debug, Serialize, Deserialize)]
pub struct GrantResponse {
    pub id: Uuid,
    pub code: String,
    pub user_id: i64,
    pub issued_at: DateTime<Utc>,
}

impl From<Grant> for GrantResponse {
    fn from(grant: Grant) -> Self {
        Self {
            id: grant.id,
            code: grant.pool_code.to_string(),
            user_id: grant.requester_id.as_i64(),
            issued_at: grant.created_at,
        }
    }
}

/// Remaining stock of one pool.
#[derive(Debug, Serialize, Deserialize)]
pub struct PoolResponse {
    pub code: String,
    pub stock: u32,
}

type ApiError = (StatusCode, Json<ApiResponse<()>>);
type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiError>;

// =============================================================================
// Router
// =============================================================================

/// Create the API router.
pub fn create_router<S>(state: Arc<ApiState<S>>) -> Router
where
    S: Store + 'static,
{
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/coupons/issue/:user_id", post(issue_handler))
        .route("/api/coupons/issued", get(issued_handler))
        .route("/api/coupons/distribution", get(distribution_handler))
        .route("/api/coupons/pools", get(pools_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// =============================================================================
// Handlers
// =============================================================================

/// Health check endpoint.
async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Issue one coupon to `user_id`.
async fn issue_handler<S>(
    State(state): State<Arc<ApiState<S>>>,
    Path(user_id): Path<String>,
) -> ApiResult<GrantResponse>
where
    S: Store + 'static,
{
    let requester: RequesterId =
        user_id.parse().map_err(|e| to_error_response(DaemonError::Domain(e)))?;

    let grant = state
        .allocator
        .allocate(requester)
        .await
        .map_err(|e| to_error_response(e.into()))?;

    Ok(Json(ApiResponse::ok(grant.into())))
}

/// All committed grants, newest first.
async fn issued_handler<S>(State(state): State<Arc<ApiState<S>>>) -> ApiResult<Vec<GrantResponse>>
where
    S: Store + 'static,
{
    let grants = state
        .allocator
        .store()
        .grants()
        .list()
        .await
        .map_err(|e| to_error_response(e.into()))?;

    Ok(Json(ApiResponse::ok(grants.into_iter().map(GrantResponse::from).collect())))
}

/// Grant count per pool code.
async fn distribution_handler<S>(
    State(state): State<Arc<ApiState<S>>>,
) -> ApiResult<BTreeMap<String, u64>>
where
    S: Store + 'static,
{
    let counts = state
        .allocator
        .store()
        .grants()
        .count_by_pool()
        .await
        .map_err(|e| to_error_response(e.into()))?;

    let counts = counts.into_iter().map(|(code, n)| (code.to_string(), n)).collect();
    Ok(Json(ApiResponse::ok(counts)))
}

/// Remaining stock per pool, ordered by code.
async fn pools_handler<S>(State(state): State<Arc<ApiState<S>>>) -> ApiResult<Vec<PoolResponse>>
where
    S: Store + 'static,
{
    let pools = state
        .allocator
        .store()
        .pools()
        .list()
        .await
        .map_err(|e| to_error_response(e.into()))?;

    let pools = pools
        .into_iter()
        .map(|pool| PoolResponse {
            code: pool.code.to_string(),
            stock: pool.stock,
        })
        .collect();
    Ok(Json(ApiResponse::ok(pools)))
}

// =============================================================================
// Error mapping
// =============================================================================

fn to_error_response(error: DaemonError) -> ApiError {
    let (status, message) = match &error {
        DaemonError::Domain(e) => (StatusCode::BAD_REQUEST, e.to_string()),
        DaemonError::Allocation(
            e @ (AllocationError::AlreadyGranted(_) | AllocationError::Exhausted),
        ) => (StatusCode::CONFLICT, e.to_string()),
        DaemonError::Allocation(e @ AllocationError::UnknownPool(_)) => {
            error!(error = %e, "Priority list names a missing pool");
            (StatusCode::NOT_FOUND, e.to_string())
        },
        _ => {
            error!(error = %error, "Request failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
        },
    };

    (status, Json(ApiResponse::failure(message)))
}

// =============================================================================
// Tests
// =============================================================================
