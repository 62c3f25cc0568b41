use std::sync::Arc;

use slog::{debug, info, Logger};
use thiserror::Error;

use delver::components::ethereum::{EthereumAdapter, EthereumRpcError};
use delver::components::store::{HeaderRepository, StoreError};
use delver::data::header::BlockNumber;

#[derive(Error, Debug)]
pub enum BackfillError {
    #[error(transparent)]
    Rpc(#[from] EthereumRpcError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Fills header gaps below the validation window. Blocks inside the
/// window belong to the validator, which rewrites them on reorg; anything
/// older is durable history this component may copy in once.
pub struct HeaderBackfiller {
    logger: Logger,
    eth: Arc<dyn EthereumAdapter>,
    headers: Arc<dyn HeaderRepository>,
    starting_block: BlockNumber,
    window_size: i64,
}

impl HeaderBackfiller {
    pub fn new(
        logger: Logger,
        eth: Arc<dyn EthereumAdapter>,
        headers: Arc<dyn HeaderRepository>,
        starting_block: BlockNumber,
        window_size: i64,
    ) -> Self {
        HeaderBackfiller {
            logger,
            eth,
            headers,
            starting_block,
            window_size,
        }
    }

    /// One backfill pass: compute the missing block numbers up to
    /// `head - window`, fetch and insert each, and return how many were
    /// added. The caller re-arms this on completion.
    pub async fn populate_missing_headers(&self) -> Result<usize, BackfillError> {
        let head = self.eth.chain_head_block_number().await?;
        let end = head - self.window_size;
        if end < self.starting_block {
            return Ok(0);
        }

        let missing = self
            .headers
            .missing_block_numbers(self.starting_block, end)?;
        if missing.is_empty() {
            debug!(self.logger, "No missing headers below block {}", end);
            return Ok(0);
        }

        info!(
            self.logger,
            "Backfilling {} missing headers", missing.len();
            "first" => missing.first().copied().unwrap_or_default(),
            "last" => missing.last().copied().unwrap_or_default(),
        );
        for number in &missing {
            let header = self.eth.block_header_by_number(*number).await?;
            self.headers.create_or_update_header(&header)?;
        }
        Ok(missing.len())
    }
}
