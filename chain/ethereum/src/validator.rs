use std::fmt;
use std::sync::Arc;

use slog::{debug, Logger};
use thiserror::Error;

use delver::components::ethereum::{EthereumAdapter, EthereumRpcError};
use delver::components::store::{HeaderRepository, StoreError};
use delver::data::header::BlockNumber;

/// How many blocks behind the tip are continuously reconciled against the
/// node to catch reorgs.
pub const DEFAULT_VALIDATION_WINDOW: i64 = 15;

#[derive(Error, Debug)]
pub enum ValidatorError {
    #[error(transparent)]
    Rpc(#[from] EthereumRpcError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Summary of one validation tick.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidationWindow {
    pub lowest: BlockNumber,
    pub highest: BlockNumber,
    /// Headers written this tick, counting both fresh inserts at the tip
    /// and replacements of reorged hashes.
    pub replaced: usize,
}

impl fmt::Display for ValidationWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Validated headers {} through {}, {} written",
            self.lowest, self.highest, self.replaced
        )
    }
}

/// Follows the chain tip: each tick compares every stored header in the
/// validation window with the node's version and upserts on divergence.
/// After an error-free tick the whole window agrees with the node.
pub struct HeaderValidator {
    logger: Logger,
    eth: Arc<dyn EthereumAdapter>,
    headers: Arc<dyn HeaderRepository>,
    window_size: i64,
}

impl HeaderValidator {
    pub fn new(
        logger: Logger,
        eth: Arc<dyn EthereumAdapter>,
        headers: Arc<dyn HeaderRepository>,
        window_size: i64,
    ) -> Self {
        HeaderValidator {
            logger,
            eth,
            headers,
            window_size,
        }
    }

    pub async fn validate_headers(&self) -> Result<ValidationWindow, ValidatorError> {
        let head = self.eth.chain_head_block_number().await?;
        let lowest = (head - self.window_size).max(0);
        let mut replaced = 0;

        for number in lowest..=head {
            let node_header = self.eth.block_header_by_number(number).await?;
            match self.headers.header_by_block_number(number) {
                Ok(stored) if stored.hash == node_header.hash => continue,
                Ok(stored) => {
                    debug!(
                        self.logger,
                        "Replacing header at block {}", number;
                        "stored_hash" => format!("{:?}", stored.hash),
                        "node_hash" => format!("{:?}", node_header.hash),
                    );
                }
                Err(StoreError::HeaderDoesNotExist) => (),
                Err(e) => return Err(e.into()),
            }
            self.headers.create_or_update_header(&node_header)?;
            replaced += 1;
        }

        Ok(ValidationWindow {
            lowest,
            highest: head,
            replaced,
        })
    }
}
