use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use mockall::automock;
use slog::{debug, trace, Logger};
use thiserror::Error;
use web3::types::{H160, H256};

use delver::components::ethereum::{EthereumAdapter, EthereumRpcError};
use delver::components::store::{
    CheckedHeadersRepository, EventLogRepository, HeaderRepository, StoreError,
};
use delver::components::transformer::EventTransformerConfig;
use delver::data::header::{BlockNumber, Header};

/// How often a header is revisited for logs when rechecking is enabled.
/// The recheck schedule spaces the visits out as the header ages.
pub const RECHECK_HEADER_CAP: i64 = 3;

/// Whether an extraction pass revisits already-checked headers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HeaderRecheck {
    Unchecked,
    Rechecked,
}

impl HeaderRecheck {
    /// The check-count ceiling passed to the unchecked-headers query.
    fn check_count(self) -> i64 {
        match self {
            HeaderRecheck::Unchecked => 1,
            HeaderRecheck::Rechecked => RECHECK_HEADER_CAP,
        }
    }
}

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("no watched addresses configured")]
    NoWatchedAddresses,

    #[error("duplicate transformer config `{0}`")]
    DuplicateConfig(String),

    #[error(transparent)]
    Rpc(#[from] EthereumRpcError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ExtractError {
    /// Transient errors are retried by the supervising event watcher;
    /// anything else tears the watcher down.
    pub fn is_transient(&self) -> bool {
        matches!(self, ExtractError::Rpc(e) if e.is_transient())
    }
}

/// The extraction surface the event watcher drives.
#[automock]
#[async_trait]
pub trait Extractor: Send + Sync + 'static {
    /// Extract logs for every header due a check. Returns whether any
    /// header was processed, so the caller can tell "caught up" from
    /// "work remains". A header whose logs could not be fetched or
    /// persisted is not marked checked.
    async fn extract_logs(&self, recheck: HeaderRecheck) -> Result<bool, ExtractError>;
}

/// Fetches logs matching the configured transformer set for each header
/// that has not been checked (or is due a recheck), persists them, and
/// records the check in the transformer set's schema.
pub struct LogExtractor {
    logger: Logger,
    eth: Arc<dyn EthereumAdapter>,
    headers: Arc<dyn HeaderRepository>,
    checked_headers: Arc<dyn CheckedHeadersRepository>,
    logs: Arc<dyn EventLogRepository>,
    configs: Vec<EventTransformerConfig>,
    addresses: Vec<H160>,
    address_set: HashSet<H160>,
    topic0s: Vec<H256>,
    starting_block: Option<BlockNumber>,
    ending_block: Option<BlockNumber>,
}

impl LogExtractor {
    pub fn new(
        logger: Logger,
        eth: Arc<dyn EthereumAdapter>,
        headers: Arc<dyn HeaderRepository>,
        checked_headers: Arc<dyn CheckedHeadersRepository>,
        logs: Arc<dyn EventLogRepository>,
    ) -> Self {
        LogExtractor {
            logger,
            eth,
            headers,
            checked_headers,
            logs,
            configs: Vec::new(),
            addresses: Vec::new(),
            address_set: HashSet::new(),
            topic0s: Vec::new(),
            starting_block: None,
            ending_block: None,
        }
    }

    /// Widen the extraction window and filter set with another
    /// transformer's config. Registering the same config twice is a
    /// wiring mistake and is rejected.
    pub fn add_transformer_config(
        &mut self,
        config: EventTransformerConfig,
    ) -> Result<(), ExtractError> {
        if self.configs.contains(&config) {
            return Err(ExtractError::DuplicateConfig(config.name));
        }

        self.starting_block = Some(match self.starting_block {
            None => config.start_block,
            Some(start) => start.min(config.start_block),
        });
        self.ending_block = Some(match self.ending_block {
            // An unbounded config keeps the whole set unbounded.
            Some(-1) => -1,
            _ if config.end_block == -1 => -1,
            None => config.end_block,
            Some(end) => end.max(config.end_block),
        });

        for address in &config.contract_addresses {
            if self.address_set.insert(*address) {
                self.addresses.push(*address);
            }
        }
        if !self.topic0s.contains(&config.topic0) {
            self.topic0s.push(config.topic0);
        }
        self.configs.push(config);
        Ok(())
    }

    /// One-shot extraction for every synced header in
    /// `[earliest config start, ending_block]`, ignoring check counts.
    /// Used when a transformer is added to an instance whose headers were
    /// checked against a smaller filter set; inserts are idempotent so
    /// already-fetched logs are left untouched.
    pub async fn backfill_logs(&self, ending_block: BlockNumber) -> Result<(), ExtractError> {
        let start = self.starting_block.ok_or(ExtractError::NoWatchedAddresses)?;
        let headers = self.headers.headers_in_range(start, ending_block)?;
        debug!(
            self.logger,
            "Back-filling logs for {} headers up to block {}",
            headers.len(),
            ending_block
        );
        for header in &headers {
            self.fetch_and_persist(header).await?;
        }
        Ok(())
    }

    async fn fetch_and_persist(&self, header: &Header) -> Result<(), ExtractError> {
        let logs = self
            .eth
            .logs_in_range(
                header.block_number,
                header.block_number,
                self.addresses.clone(),
                self.topic0s.clone(),
            )
            .await?;
        if !logs.is_empty() {
            trace!(
                self.logger,
                "Persisting {} logs for block {}",
                logs.len(),
                header.block_number
            );
        }
        self.logs.create_event_logs(header.id, &logs)?;
        Ok(())
    }
}

#[async_trait]
impl Extractor for LogExtractor {
    async fn extract_logs(&self, recheck: HeaderRecheck) -> Result<bool, ExtractError> {
        let start = self.starting_block.ok_or(ExtractError::NoWatchedAddresses)?;
        let end = self.ending_block.unwrap_or(-1);

        let headers = self
            .checked_headers
            .unchecked_headers(start, end, recheck.check_count())?;
        if headers.is_empty() {
            trace!(self.logger, "No headers due a check");
            return Ok(false);
        }

        debug!(self.logger, "Extracting logs for {} headers", headers.len());
        for header in &headers {
            self.fetch_and_persist(header).await?;
            self.checked_headers.mark_header_checked(header.id)?;
        }
        Ok(true)
    }
}
