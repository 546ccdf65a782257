// src/utils/db_connect.rs - Registry database settings and the shared bb8 pool
use anyhow::{bail, Context, Result};
use bb8::Pool;
use bb8_postgres::PostgresConnectionManager;
use log::info;
use std::time::Duration;
use tokio_postgres::{Config, NoTls};

pub type PgPool = Pool<PostgresConnectionManager<NoTls>>;

const APPLICATION_NAME: &str = "company_matching";
const MAX_POOL_SIZE: u32 = 64;

/// Where the company registry lives and how many connections resolution may hold.
#[derive(Debug, Clone, PartialEq)]
pub struct DbSettings {
    pub host: String,
    pub port: u16,
    pub dbname: String,
    pub user: String,
    pub password: String,
    pub pool_size: u32,
    pub min_idle: u32,
    /// Pool checkout wait. Tied to the collaborator timeout so a starved pool fails
    /// the search instead of outliving it.
    pub checkout_timeout: Duration,
    pub connect_timeout: Duration,
}

impl DbSettings {
    /// `POSTGRES_*` variables; unset or unparsable values fall back to defaults.
    pub fn from_env(collaborator_timeout: Duration) -> Self {
        Self::from_vars(|key| std::env::var(key).ok(), collaborator_timeout)
    }

    pub fn from_vars<F>(lookup: F, collaborator_timeout: Duration) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let parsed = |key: &str| lookup(key).and_then(|v| v.trim().parse::<u32>().ok());
        Self {
            host: lookup("POSTGRES_HOST").unwrap_or_else(|| "127.0.0.1".to_string()),
            port: lookup("POSTGRES_PORT")
                .and_then(|p| p.trim().parse::<u16>().ok())
                .unwrap_or(5432),
            dbname: lookup("POSTGRES_DB").unwrap_or_else(|| "company_registry".to_string()),
            user: lookup("POSTGRES_USER").unwrap_or_else(|| "postgres".to_string()),
            password: lookup("POSTGRES_PASSWORD").unwrap_or_default(),
            pool_size: parsed("POSTGRES_POOL_SIZE").unwrap_or(16),
            min_idle: parsed("POSTGRES_MIN_IDLE").unwrap_or(2),
            checkout_timeout: collaborator_timeout,
            connect_timeout: collaborator_timeout.min(Duration::from_secs(10)),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.pool_size == 0 || self.pool_size > MAX_POOL_SIZE {
            bail!(
                "POSTGRES_POOL_SIZE must be between 1 and {}, got {}",
                MAX_POOL_SIZE,
                self.pool_size
            );
        }
        if self.min_idle > self.pool_size {
            bail!(
                "POSTGRES_MIN_IDLE ({}) exceeds POSTGRES_POOL_SIZE ({})",
                self.min_idle,
                self.pool_size
            );
        }
        if self.checkout_timeout.is_zero() {
            bail!("pool checkout timeout must be positive");
        }
        Ok(())
    }

    pub fn log_config(&self) {
        info!(
            "🗄️ Registry DB: {}@{}:{}/{} (pool {}, min idle {}, checkout {:?})",
            self.user,
            self.host,
            self.port,
            self.dbname,
            self.pool_size,
            self.min_idle,
            self.checkout_timeout
        );
    }

    fn pg_config(&self) -> Config {
        let mut config = Config::new();
        config
            .host(&self.host)
            .port(self.port)
            .dbname(&self.dbname)
            .user(&self.user)
            .password(&self.password);
        config.application_name(APPLICATION_NAME);
        config.connect_timeout(self.connect_timeout);
        config
    }
}

/// Builds the pool and proves it with `SELECT 1` before any search is attempted.
pub async fn connect(settings: &DbSettings) -> Result<PgPool> {
    settings.validate().context("Invalid registry database settings")?;
    let manager = PostgresConnectionManager::new(settings.pg_config(), NoTls);
    let pool = Pool::builder()
        .max_size(settings.pool_size)
        .min_idle(Some(settings.min_idle))
        .idle_timeout(Some(Duration::from_secs(180)))
        .connection_timeout(settings.checkout_timeout)
        .build(manager)
        .await
        .context("Failed to build database connection pool")?;

    let conn = pool
        .get()
        .await
        .context("Failed to get test connection from pool")?;
    conn.query_one("SELECT 1", &[])
        .await
        .context("Test query 'SELECT 1' failed")?;
    drop(conn);
    info!("Registry connection pool ready");
    Ok(pool)
}

/// (connections, idle connections) for log lines.
pub fn get_pool_status(pool: &PgPool) -> (u32, u32) {
    let state = pool.state();
    (state.connections, state.idle_connections)
}
