//! Daemon configuration.
//!
//! Loads configuration from environment variables with sensible defaults.

use crate::error::{DaemonError, DaemonResult};
use coupon_domain::{PoolPriority, PoolSeed};
use std::collections::HashSet;
use std::env;

/// Seeds used when `COUPON_POOL_SEEDS` is unset.
pub const DEFAULT_POOL_SEEDS: &str = "A=1,B=30,C=69";

// =============================================================================
// Configuration
// =============================================================================

/// Daemon configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// API server configuration
    pub api: ApiConfig,

    /// Pool seeding and draw order
    pub allocation: AllocationConfig,

    /// Storage backend configuration
    pub database: DatabaseConfig,

    /// Environment (test, development, production)
    pub environment: Environment,
}

/// API server configuration.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Host to bind to
    pub host: String,
    /// Port to bind to
    pub port: u16,
}

/// Pool seeding and draw order.
#[derive(Debug, Clone)]
pub struct AllocationConfig {
    /// Pools created at startup when absent
    pub seeds: Vec<PoolSeed>,
    /// Explicit draw order; `None` draws seed codes in lexical order
    pub priority: Option<PoolPriority>,
    /// Seed pools on startup
    pub bootstrap_enabled: bool,
}

/// Storage backend configuration.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// PostgreSQL URL; `None` selects the in-memory store
    pub url: Option<String>,
    /// Connection pool size
    pub max_connections: u32,
    /// Run migrations before serving
    pub run_migrations: bool,
}

/// Environment type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    /// Test environment
    Test,
    /// Development environment
    Development,
    /// Production environment
    Production,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> DaemonResult<Self> {
        // Load .env file if present (ignore errors)
        let _ = dotenvy::dotenv();

        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> DaemonResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let environment = Self::load_environment(&lookup)?;
        let api = Self::load_api_config(&lookup)?;
        let allocation = Self::load_allocation_config(&lookup)?;
        let database = Self::load_database_config(&lookup)?;

        Ok(Self {
            api,
            allocation,
            database,
            environment,
        })
    }

    /// Create test configuration.
    pub fn test() -> Self {
        Self {
            api: ApiConfig {
                host: "127.0.0.1".to_string(),
                port: 0, // Let OS assign port
            },
            allocation: AllocationConfig::default(),
            database: DatabaseConfig {
                url: None,
                max_connections: 5,
                run_migrations: false,
            },
            environment: Environment::Test,
        }
    }

    fn load_environment<F>(lookup: &F) -> DaemonResult<Environment>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env_str = lookup("COUPON_ENV").unwrap_or_else(|| "development".to_string());

        match env_str.to_lowercase().as_str() {
            "test" => Ok(Environment::Test),
            "development" | "dev" => Ok(Environment::Development),
            "production" | "prod" => Ok(Environment::Production),
            other => Err(DaemonError::Config(format!(
                "Invalid COUPON_ENV: {}. Expected: test, development, production",
                other
            ))),
        }
    }

    fn load_api_config<F>(lookup: &F) -> DaemonResult<ApiConfig>
    where
        F: Fn(&str) -> Option<String>,
    {
        let host = lookup("COUPON_API_HOST").unwrap_or_else(|| "0.0.0.0".to_string());
        let port_str = lookup("COUPON_API_PORT").unwrap_or_else(|| "8080".to_string());

        let port = port_str
            .parse::<u16>()
            .map_err(|_| DaemonError::Config(format!("Invalid COUPON_API_PORT: {}", port_str)))?;

        Ok(ApiConfig { host, port })
    }

    fn load_allocation_config<F>(lookup: &F) -> DaemonResult<AllocationConfig>
    where
        F: Fn(&str) -> Option<String>,
    {
        let seeds_str = lookup("COUPON_POOL_SEEDS").unwrap_or_else(|| DEFAULT_POOL_SEEDS.to_string());
        let seeds = parse_seeds(&seeds_str)?;

        let priority = match lookup("COUPON_POOL_PRIORITY") {
            Some(raw) if !raw.trim().is_empty() => Some(raw.parse::<PoolPriority>().map_err(|e| {
                DaemonError::Config(format!("Invalid COUPON_POOL_PRIORITY: {}", e))
            })?),
            _ => None,
        };

        let bootstrap_enabled = load_bool(lookup, "COUPON_BOOTSTRAP_ENABLED", true)?;

        let config = AllocationConfig {
            seeds,
            priority,
            bootstrap_enabled,
        };
        // Fail at load time rather than on the first request
        config.draw_order()?;
        Ok(config)
    }

    fn load_database_config<F>(lookup: &F) -> DaemonResult<DatabaseConfig>
    where
        F: Fn(&str) -> Option<String>,
    {
        let url = lookup("DATABASE_URL").filter(|url| !url.trim().is_empty());

        let max_str = lookup("COUPON_DB_MAX_CONNECTIONS").unwrap_or_else(|| "20".to_string());
        let max_connections = match max_str.parse::<u32>() {
            Ok(n) if n > 0 => n,
            _ => {
                return Err(DaemonError::Config(format!(
                    "Invalid COUPON_DB_MAX_CONNECTIONS: {}",
                    max_str
                )))
            },
        };

        let run_migrations = load_bool(lookup, "COUPON_DB_MIGRATE", true)?;

        Ok(DatabaseConfig {
            url,
            max_connections,
            run_migrations,
        })
    }
}

impl AllocationConfig {
    /// The priority list the allocator draws in.
    pub fn draw_order(&self) -> DaemonResult<PoolPriority> {
        if let Some(priority) = &self.priority {
            return Ok(priority.clone());
        }

        let mut codes: Vec<_> = self.seeds.iter().map(|seed| seed.code.clone()).collect();
        codes.sort();
        PoolPriority::new(codes).map_err(|e| {
            DaemonError::Config(format!(
                "No pool priority configured and no seeds to derive one from: {}",
                e
            ))
        })
    }
}

impl Default for AllocationConfig {
    fn default() -> Self {
        Self {
            seeds: parse_seeds(DEFAULT_POOL_SEEDS).unwrap_or_default(),
            priority: None,
            bootstrap_enabled: true,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api: ApiConfig {
                host: "0.0.0.0".to_string(),
                port: 8080,
            },
            allocation: AllocationConfig::default(),
            database: DatabaseConfig {
                url: None,
                max_connections: 20,
                run_migrations: true,
            },
            environment: Environment::Development,
        }
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Environment::Test => write!(f, "test"),
            Environment::Development => write!(f, "development"),
            Environment::Production => write!(f, "production"),
        }
    }
}

/// Parse `CODE=STOCK` pairs separated by commas.
///
/// Blank entries are skipped. A code may appear only once.
pub fn parse_seeds(raw: &str) -> DaemonResult<Vec<PoolSeed>> {
    let mut seen = HashSet::new();
    let mut seeds = Vec::new();

    for pair in raw.split(',').filter(|pair| !pair.trim().is_empty()) {
        let seed = PoolSeed::parse(pair)
            .map_err(|e| DaemonError::Config(format!("Invalid COUPON_POOL_SEEDS: {}", e)))?;
        if !seen.insert(seed.code.clone()) {
            return Err(DaemonError::Config(format!(
                "Invalid COUPON_POOL_SEEDS: pool {} listed twice",
                seed.code
            )));
        }
        seeds.push(seed);
    }

    Ok(seeds)
}

fn load_bool<F>(lookup: &F, key: &str, default: bool) -> DaemonResult<bool>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(default),
        Some(val) => match val.trim().to_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(true),
            "false" | "0" | "no" | "off" => Ok(false),
            _ => Err(DaemonError::Config(format!("Invalid {} value: {}", key, val))),
        },
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(vars: &[(&str, &str)]) -> DaemonResult<Config> {
        let vars: HashMap<String, String> =
            vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.api.port, 8080);
        assert_eq!(config.environment, Environment::Development);
        assert_eq!(config.allocation.seeds.len(), 3);
        assert!(config.database.url.is_none());
    }

    #[test]
    fn test_test_config() {
        let config = Config::test();

        assert_eq!(config.api.port, 0);
        assert_eq!(config.environment, Environment::Test);
        assert!(!config.database.run_migrations);
    }

    #[test]
    fn test_empty_environment_matches_defaults() {
        let config = config_from(&[]).unwrap();

        assert_eq!(config.api.host, "0.0.0.0");
        assert_eq!(config.api.port, 8080);
        assert_eq!(config.database.max_connections, 20);
        assert!(config.database.run_migrations);
        assert!(config.allocation.bootstrap_enabled);
        assert_eq!(config.allocation.draw_order().unwrap().to_string(), "A,B,C");
    }

    #[test]
    fn test_default_seeds() {
        let seeds = Config::default().allocation.seeds;
        let pairs: Vec<(String, u32)> =
            seeds.iter().map(|s| (s.code.to_string(), s.initial_stock)).collect();

        assert_eq!(
            pairs,
            vec![
                ("A".to_string(), 1),
                ("B".to_string(), 30),
                ("C".to_string(), 69)
            ]
        );
    }

    #[test]
    fn test_priority_derived_from_seeds_in_lexical_order() {
        let config = config_from(&[("COUPON_POOL_SEEDS", "C=5,A=1,B=2")]).unwrap();

        assert_eq!(config.allocation.draw_order().unwrap().to_string(), "A,B,C");
    }

    #[test]
    fn test_explicit_priority_wins() {
        let config = config_from(&[("COUPON_POOL_PRIORITY", "C,A")]).unwrap();

        assert_eq!(config.allocation.draw_order().unwrap().to_string(), "C,A");
    }

    #[test]
    fn test_invalid_values_rejected() {
        for (key, value) in [
            ("COUPON_ENV", "staging"),
            ("COUPON_API_PORT", "http"),
            ("COUPON_POOL_SEEDS", "A=-1"),
            ("COUPON_POOL_SEEDS", "A=1,A=2"),
            ("COUPON_POOL_PRIORITY", "A,A"),
            ("COUPON_BOOTSTRAP_ENABLED", "maybe"),
            ("COUPON_DB_MAX_CONNECTIONS", "0"),
        ] {
            let result = config_from(&[(key, value)]);
            assert!(
                matches!(result, Err(DaemonError::Config(_))),
                "{key}={value} should be rejected"
            );
        }
    }

    #[test]
    fn test_no_seeds_requires_priority() {
        assert!(config_from(&[("COUPON_POOL_SEEDS", "")]).is_err());

        let config =
            config_from(&[("COUPON_POOL_SEEDS", ""), ("COUPON_POOL_PRIORITY", "A")]).unwrap();
        assert!(config.allocation.seeds.is_empty());
    }

    #[test]
    fn test_database_settings() {
        let config = config_from(&[
            ("DATABASE_URL", "postgres://localhost/coupons"),
            ("COUPON_DB_MAX_CONNECTIONS", "8"),
            ("COUPON_DB_MIGRATE", "off"),
            ("COUPON_BOOTSTRAP_ENABLED", "false"),
        ])
        .unwrap();

        assert_eq!(config.database.url.as_deref(), Some("postgres://localhost/coupons"));
        assert_eq!(config.database.max_connections, 8);
        assert!(!config.database.run_migrations);
        assert!(!config.allocation.bootstrap_enabled);
    }

    #[test]
    fn test_environment_display() {
        assert_eq!(Environment::Test.to_string(), "test");
        assert_eq!(Environment::Development.to_string(), "development");
        assert_eq!(Environment::Production.to_string(), "production");
    }
}
