//! Database connection pool configuration

use crate::error::DbResultExt;
use attest_core::CoreResult;
use deadpool_postgres::{
    Config, ManagerConfig, Pool, PoolConfig, RecyclingMethod, Runtime, Timeouts,
};
use std::time::Duration;
use tokio_postgres::NoTls;

/// Database connection pool configuration.
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// PostgreSQL host
    pub host: String,
    /// PostgreSQL port
    pub port: u16,
    /// Database name
    pub dbname: String,
    /// Database user
    pub user: String,
    /// Database password
    pub password: String,
    /// Maximum pool size
    pub max_size: usize,
    /// Connection timeout
    pub timeout: Duration,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            dbname: "attest".to_string(),
            user: "postgres".to_string(),
            password: "".to_string(),
            max_size: 16,
            timeout: Duration::from_secs(30),
        }
    }
}

impl DbConfig {
    /// Create a new database configuration from environment variables.
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            host: std::env::var("ATTEST_DB_HOST").unwrap_or(default.host),
            port: std::env::var("ATTEST_DB_PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(default.port),
            dbname: std::env::var("ATTEST_DB_NAME").unwrap_or(default.dbname),
            user: std::env::var("ATTEST_DB_USER").unwrap_or(default.user),
            password: std::env::var("ATTEST_DB_PASSWORD").unwrap_or_default(),
            max_size: std::env::var("ATTEST_DB_POOL_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(default.max_size),
            timeout: std::env::var("ATTEST_DB_TIMEOUT")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(default.timeout),
        }
    }

    /// Create a connection pool from this configuration.
    ///
    /// Connections are opened lazily, so this succeeds without a reachable
    /// server.
    pub fn create_pool(&self) -> CoreResult<Pool> {
        let mut cfg = Config::new();
        cfg.host = Some(self.host.clone());
        cfg.port = Some(self.port);
        cfg.dbname = Some(self.dbname.clone());
        cfg.user = Some(self.user.clone());
        cfg.password = Some(self.password.clone());

        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });

        let mut pool = PoolConfig::new(self.max_size);
        pool.timeouts = Timeouts {
            wait: Some(self.timeout),
            create: Some(self.timeout),
            recycle: Some(self.timeout),
        };
        cfg.pool = Some(pool);

        cfg.create_pool(Some(Runtime::Tokio1), NoTls)
            .db_context("create_pool")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_env_overrides_defaults() {
        std::env::set_var("ATTEST_DB_PORT", "6543");
        std::env::set_var("ATTEST_DB_TIMEOUT", "5");
        std::env::set_var("ATTEST_DB_POOL_SIZE", "many");
        let config = DbConfig::from_env();
        std::env::remove_var("ATTEST_DB_PORT");
        std::env::remove_var("ATTEST_DB_TIMEOUT");
        std::env::remove_var("ATTEST_DB_POOL_SIZE");

        assert_eq!(config.port, 6543);
        assert_eq!(config.timeout, Duration::from_secs(5));
        assert_eq!(config.max_size, 16);
    }

    #[tokio::test]
    async fn test_create_pool_is_lazy() -> CoreResult<()> {
        let pool = DbConfig {
            port: 1,
            ..DbConfig::default()
        }
        .create_pool()?;
        assert_eq!(pool.status().size, 0);
        Ok(())
    }
}
