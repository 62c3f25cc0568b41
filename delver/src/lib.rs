/// Traits and errors for all system components.
pub mod components;

/// Data types shared across crates: headers, event logs, storage diffs.
pub mod data;

/// Logger setup and the per-component logger factory.
pub mod log;

/// Utilities.
pub mod util;

/// A prelude that makes the component traits and data types available.
///
/// ```
/// use delver::prelude::*;
/// ```
pub mod prelude {
    pub use anyhow::{anyhow, Error};
    pub use slog::{self, crit, debug, error, info, o, trace, warn, Logger};
    pub use std::fmt::Debug;
    pub use std::sync::Arc;

    pub use crate::components::ethereum::{EthereumAdapter, EthereumRpcError, NodeInfo};
    pub use crate::components::store::{
        CheckedHeadersRepository, DiffRepository, EventLogRepository, HeaderRepository, StoreError,
    };
    pub use crate::components::transformer::{
        EventTransformer, EventTransformerConfig, StorageTransformer, TransformerError,
    };
    pub use crate::data::event_log::EventLog;
    pub use crate::data::header::{BlockHeader, BlockNumber, Header};
    pub use crate::data::storage_diff::{DiffStatus, PersistedDiff, RawDiff};
    pub use crate::log::LoggerFactory;
    pub use crate::util::status_writer::StatusWriter;
}
