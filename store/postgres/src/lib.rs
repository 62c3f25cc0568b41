//! Diesel/Postgres implementations of the repository traits.

use diesel::pg::PgConnection;
use diesel::r2d2::{ConnectionManager, Pool, PooledConnection};
use slog::{info, Logger};

use delver::components::store::StoreError;

mod checked_headers_repository;
mod diff_repository;
mod event_log_repository;
mod header_repository;
mod nodes;
pub mod schema;

pub use checked_headers_repository::CheckedHeadersRepository;
pub use diff_repository::DiffRepository;
pub use event_log_repository::EventLogRepository;
pub use header_repository::HeaderRepository;
pub use nodes::ensure_eth_node;

pub(crate) type PooledPgConnection = PooledConnection<ConnectionManager<PgConnection>>;

/// A pool of Postgres connections shared by all repositories.
pub struct ConnectionPool {
    pool: Pool<ConnectionManager<PgConnection>>,
}

impl ConnectionPool {
    pub fn create(logger: &Logger, postgres_url: &str, pool_size: u32) -> Result<Self, StoreError> {
        info!(logger, "Connecting to Postgres"; "pool_size" => pool_size);
        let manager = ConnectionManager::<PgConnection>::new(postgres_url);
        let pool = Pool::builder()
            .max_size(pool_size)
            .build(manager)
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        Ok(ConnectionPool { pool })
    }

    pub(crate) fn get(&self) -> Result<PooledPgConnection, StoreError> {
        self.pool
            .get()
            .map_err(|e| StoreError::Unavailable(e.to_string()))
    }
}

/// Map a diesel error into the store taxonomy. Callers that need a more
/// specific reading of `NotFound` use `.optional()` and map the `None`
/// themselves.
pub(crate) fn store_error(e: diesel::result::Error) -> StoreError {
    match e {
        diesel::result::Error::NotFound => StoreError::NotFound,
        other => StoreError::Unknown(anyhow::Error::from(other)),
    }
}
