use crate::error::ApiError;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::future::Future;
use std::str::FromStr;
use std::time::Duration;
use tokio::time;
use tracing::{error, info};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);
pub const QUERY_TIMEOUT: Duration = Duration::from_secs(5);
const DB_TIMEOUT_MESSAGE: &str = "Database is busy, please retry";

// SQLite is single writer only, having more in the pool just results in locking and other issues.
// So instead just queue it on our side until SQLite is free again.
const WRITE_POOL_MAX_CONNECTIONS: u32 = 1;
const READ_POOL_MAX_CONNECTIONS: u32 = 32;

#[derive(Clone)]
pub struct DbPools {
    read: SqlitePool,
    write: SqlitePool,
}

impl DbPools {
    pub fn read(&self) -> &SqlitePool {
        &self.read
    }

    pub fn write(&self) -> &SqlitePool {
        &self.write
    }
}

fn build_connection_options(database_url: &str) -> Result<SqliteConnectOptions, sqlx::Error> {
    Ok(SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
        .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
        .pragma("foreign_keys", "ON")
        .busy_timeout(BUSY_TIMEOUT))
}

pub async fn init_pool(database_url: &str) -> Result<DbPools, sqlx::Error> {
    let options = build_connection_options(database_url)?;

    let read_pool = SqlitePoolOptions::new()
        .max_connections(READ_POOL_MAX_CONNECTIONS)
        .acquire_timeout(Duration::from_secs(30))
        .connect_with(options.clone())
        .await?;

    let write_pool = SqlitePoolOptions::new()
        .max_connections(WRITE_POOL_MAX_CONNECTIONS)
        .acquire_timeout(Duration::from_secs(30))
        .connect_with(options)
        .await?;

    info!(
        "DB pools initialised (read: {}, write: {})",
        READ_POOL_MAX_CONNECTIONS, WRITE_POOL_MAX_CONNECTIONS
    );

    Ok(DbPools {
        read: read_pool,
        write: write_pool,
    })
}

pub async fn run_migrations(pools: &DbPools) -> Result<(), sqlx::Error> {
    sqlx::migrate!("./migrations").run(pools.write()).await?;
    info!("Database migrations completed");
    Ok(())
}

#[derive(Debug)]
pub enum DbQueryError {
    Timeout,
    Sqlx(sqlx::Error),
}

impl From<sqlx::Error> for DbQueryError {
    fn from(err: sqlx::Error) -> Self {
        Self::Sqlx(err)
    }
}

pub async fn query_with_timeout<F, T>(future: F) -> Result<T, DbQueryError>
where
    F: Future<Output = Result<T, sqlx::Error>>,
{
    match time::timeout(QUERY_TIMEOUT, future).await {
        Ok(result) => result.map_err(Into::into),
        Err(_) => Err(DbQueryError::Timeout),
    }
}

impl DbQueryError {
    pub fn into_api_error(self, context: &'static str, client_message: &'static str) -> ApiError {
        match self {
            Self::Timeout => {
                error!("Database timeout while {}", context);
                ApiError::service_unavailable(DB_TIMEOUT_MESSAGE)
            }
            Self::Sqlx(err) => {
                error!("Database error while {}: {}", context, err);
                ApiError::internal(client_message)
            }
        }
    }

    /// Like `into_api_error`, but statement failures surface as a client-side
    /// 400 `PERSISTENCE_FAILED` instead of a 500.
    pub fn into_persistence_error(
        self,
        context: &'static str,
        client_message: &'static str,
    ) -> ApiError {
        match self {
            Self::Timeout => {
                error!("Database timeout while {}", context);
                ApiError::service_unavailable(DB_TIMEOUT_MESSAGE)
            }
            Self::Sqlx(err) => {
                error!("Database error while {}: {}", context, err);
                ApiError::persistence_failed(client_message)
            }
        }
    }
}
