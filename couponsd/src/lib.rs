//! Coupon Daemon Library
//!
//! Runtime for the coupon allocation service.
//!
//! # Architecture
//!
//! ```text
//! HTTP → API Server → Allocator → Store (memory | PostgreSQL)
//!                                   ↑
//!                              Bootstrap (seeding)
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use couponsd::{Config, Daemon};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = Config::from_env().expect("Failed to load config");
//!     let daemon = Daemon::new_memory(config).expect("Invalid config");
//!     daemon.run().await.expect("Daemon error");
//! }
//! ```

#![warn(clippy::all)]

pub mod api;
pub mod bootstrap;
pub mod config;
pub mod daemon;
pub mod error;

#[cfg(feature = "postgres")]
pub mod db;

// Re-exports for convenience
pub use config::{AllocationConfig, ApiConfig, Config, DatabaseConfig, Environment};
pub use daemon::Daemon;
pub use error::{DaemonError, DaemonResult};
