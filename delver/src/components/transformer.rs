use thiserror::Error;
use web3::types::{H160, H256};

use crate::components::store::StoreError;
use crate::data::event_log::EventLog;
use crate::data::header::BlockNumber;
use crate::data::storage_diff::PersistedDiff;

/// Errors surfaced by transformer implementations.
#[derive(Error, Debug)]
pub enum TransformerError {
    /// The transformer does not recognize the diff's storage key. The
    /// watcher parks the diff as `unrecognized` for a later schema
    /// update rather than failing.
    #[error("unrecognized storage key {0:?}")]
    KeyNotFound(H256),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("transformer error: {0:#}")]
    Other(#[from] anyhow::Error),
}

/// Which chain data an event transformer subscribes to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventTransformerConfig {
    pub name: String,
    pub contract_addresses: Vec<H160>,
    pub topic0: H256,
    pub start_block: BlockNumber,
    /// `-1` means "watch to the tip".
    pub end_block: BlockNumber,
}

/// A domain decoder for event logs from a `(contract, topic0)` pair.
/// Logs are delivered in persisted order within one delegation pass.
pub trait EventTransformer: Send + Sync {
    fn config(&self) -> &EventTransformerConfig;

    fn execute(&self, logs: &[EventLog]) -> Result<(), TransformerError>;
}

/// A domain decoder for storage diffs of a single contract address. The
/// watcher only hands over diffs whose block hash matched a canonical
/// header, with `header_id` attached.
pub trait StorageTransformer: Send + Sync {
    fn contract_address(&self) -> H160;

    fn execute(&self, diff: &PersistedDiff) -> Result<(), TransformerError>;
}
