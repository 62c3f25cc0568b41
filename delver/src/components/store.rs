use mockall::automock;
use thiserror::Error;
use web3::types::Log;

use crate::data::event_log::EventLog;
use crate::data::header::{BlockHeader, BlockNumber, Header};
use crate::data::storage_diff::{PersistedDiff, RawDiff};

/// Errors from the relational store. The variants that matter to control
/// flow are explicit; everything else is wrapped opaquely.
#[derive(Error, Debug)]
pub enum StoreError {
    /// No header exists for the requested block number.
    #[error("header does not exist")]
    HeaderDoesNotExist,

    /// An insert hit the diff uniqueness constraint.
    #[error("duplicate diff")]
    DuplicateDiff,

    /// A lookup matched no rows. Scans treat this as "no work"; the diff
    /// transform treats it as a soft condition.
    #[error("query returned no rows")]
    NotFound,

    /// The checked-headers schema named in configuration does not exist.
    #[error("invalid schema `{0}`")]
    InvalidSchema(String),

    #[error("database unavailable: {0}")]
    Unavailable(String),

    #[error("store error: {0:#}")]
    Unknown(#[from] anyhow::Error),
}

/// Lookup and insert of block headers, scoped to the current node.
#[automock]
pub trait HeaderRepository: Send + Sync + 'static {
    /// Upsert by block number. On a hash mismatch the stored hash and raw
    /// payload are replaced and the existing id is returned.
    fn create_or_update_header(&self, header: &BlockHeader) -> Result<i64, StoreError>;

    /// Returns `StoreError::HeaderDoesNotExist` when the block has not
    /// been synced.
    fn header_by_block_number(&self, number: BlockNumber) -> Result<Header, StoreError>;

    /// The chain head as far as the store knows. `StoreError::NotFound`
    /// when no headers have been synced yet.
    fn most_recent_header_block_number(&self) -> Result<BlockNumber, StoreError>;

    /// Remove a non-canonical header so the validator can re-sync it.
    fn delete_header(&self, number: BlockNumber) -> Result<(), StoreError>;

    /// Every integer in `[start, end]` absent from the headers table.
    fn missing_block_numbers(
        &self,
        start: BlockNumber,
        end: BlockNumber,
    ) -> Result<Vec<BlockNumber>, StoreError>;

    /// All synced headers in `[start, end]`, ascending.
    fn headers_in_range(
        &self,
        start: BlockNumber,
        end: BlockNumber,
    ) -> Result<Vec<Header>, StoreError>;
}

/// Per-transformer-set record of which headers have been processed by the
/// log extractor, living in a schema owned by the transformer set.
#[automock]
pub trait CheckedHeadersRepository: Send + Sync + 'static {
    /// Insert with a count of 1, or increment the existing count.
    fn mark_header_checked(&self, header_id: i64) -> Result<(), StoreError>;

    /// Zero the count for the header at `block_number`, forcing a recheck.
    fn mark_single_header_unchecked(&self, block_number: BlockNumber) -> Result<(), StoreError>;

    /// Headers in `[start, end]` that are unchecked or due a recheck.
    /// `end = -1` means "to tip". A header with count `c` is due iff
    /// `c < check_count` and its block is at least `15 * c * (c + 1) / 2`
    /// blocks behind the head.
    fn unchecked_headers(
        &self,
        start: BlockNumber,
        end: BlockNumber,
        check_count: i64,
    ) -> Result<Vec<Header>, StoreError>;
}

/// Persistence of raw event logs keyed to headers.
#[automock]
pub trait EventLogRepository: Send + Sync + 'static {
    /// Persist node logs for a header. Idempotent: a log already present
    /// under its `(tx_hash, log_index)` key is left untouched.
    fn create_event_logs(&self, header_id: i64, logs: &[Log]) -> Result<(), StoreError>;

    /// A bounded batch of logs not yet consumed by a transformer, in
    /// persisted order.
    fn untransformed_logs(&self, limit: i64) -> Result<Vec<EventLog>, StoreError>;

    /// Flip `transformed` for all of `ids` in one statement.
    fn mark_logs_transformed(&self, ids: &[i64]) -> Result<(), StoreError>;
}

/// Durable CRUD and status transitions for storage diffs.
#[automock]
pub trait DiffRepository: Send + Sync + 'static {
    /// Insert a live diff with status `new`. Returns
    /// `StoreError::DuplicateDiff` when the row already exists.
    fn create_storage_diff(&self, raw: &RawDiff) -> Result<i64, StoreError>;

    /// Insert a back-filled value under the dedup rules: nothing is
    /// written when the same `(address, key, value)` already exists at or
    /// below the target block, and a zero value is suppressed entirely
    /// unless a prior non-zero diff exists for the key.
    fn create_back_filled_storage_value(&self, raw: &RawDiff) -> Result<(), StoreError>;

    /// Diffs with status `new` and `id > min_id`, ascending, at most
    /// `limit` rows.
    fn new_diffs(&self, min_id: i64, limit: i64) -> Result<Vec<PersistedDiff>, StoreError>;

    fn unrecognized_diffs(&self, min_id: i64, limit: i64)
        -> Result<Vec<PersistedDiff>, StoreError>;

    fn pending_diffs(&self, min_id: i64, limit: i64) -> Result<Vec<PersistedDiff>, StoreError>;

    /// The lowest diff id at or above `block_height`, used to position the
    /// watcher cursor near the head of the chain.
    fn first_diff_id_for_block_height(
        &self,
        block_height: BlockNumber,
    ) -> Result<i64, StoreError>;

    fn mark_transformed(&self, id: i64) -> Result<(), StoreError>;

    fn mark_pending(&self, id: i64) -> Result<(), StoreError>;

    fn mark_noncanonical(&self, id: i64) -> Result<(), StoreError>;

    fn mark_unrecognized(&self, id: i64) -> Result<(), StoreError>;

    fn mark_unwatched(&self, id: i64) -> Result<(), StoreError>;

    /// Operator reset: flip every `noncanonical` diff at `block_height`
    /// back to `new`.
    fn mark_noncanonical_diffs_as_new(&self, block_height: BlockNumber)
        -> Result<(), StoreError>;
}
