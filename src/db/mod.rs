//! Database connection management

use std::time::Duration;

use sqlx::migrate::Migrator;
use sqlx::postgres::{PgPool, PgPoolOptions};

/// Embedded schema migrations (`migrations/`)
pub static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// Pool sizing and connect retry policy
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    pub max_connections: u32,
    pub acquire_timeout: Duration,
    /// Connection attempts before giving up
    pub retries: u32,
    /// Pause between failed attempts
    pub retry_interval: Duration,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            max_connections: 20,
            acquire_timeout: Duration::from_secs(5),
            retries: 5,
            retry_interval: Duration::from_secs(3),
        }
    }
}

/// PostgreSQL database connection pool
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Connect once
    pub async fn connect(database_url: &str, opts: &ConnectOptions) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(opts.max_connections)
            .acquire_timeout(opts.acquire_timeout)
            .connect(database_url)
            .await?;

        tracing::info!("PostgreSQL connection pool established");
        Ok(Self { pool })
    }

    /// Connect, retrying up to `opts.retries` times with `opts.retry_interval`
    /// between attempts. Returns the last error when every attempt failed.
    pub async fn connect_with_retry(
        database_url: &str,
        opts: &ConnectOptions,
    ) -> Result<Self, sqlx::Error> {
        let attempts = opts.retries.max(1);
        let mut attempt = 1;
        loop {
            match Self::connect(database_url, opts).await {
                Ok(db) => return Ok(db),
                Err(e) if attempt < attempts => {
                    tracing::warn!(
                        attempt,
                        max_attempts = attempts,
                        retry_in_ms = opts.retry_interval.as_millis() as u64,
                        error = %e,
                        "PostgreSQL connection failed, retrying"
                    );
                    tokio::time::sleep(opts.retry_interval).await;
                    attempt += 1;
                }
                Err(e) => {
                    tracing::error!(attempts, error = %e, "PostgreSQL connection failed");
                    return Err(e);
                }
            }
        }
    }

    /// Apply pending schema migrations
    pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
        MIGRATOR.run(&self.pool).await?;
        tracing::info!("Database migrations applied");
        Ok(())
    }

    /// Get a reference to the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Check database health
    pub async fn health_check(&self) -> Result<(), sqlx::Error> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// Close the pool, waiting for checked-out connections to be returned
    pub async fn close(&self) {
        self.pool.close().await;
        tracing::info!("PostgreSQL connection pool closed");
    }
}
