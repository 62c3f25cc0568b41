use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use slog::{debug, trace, Logger};
use web3::transports::Http;
use web3::types::{Block, BlockId, BlockNumber as Web3BlockNumber, FilterBuilder, Log, H160, H256};
use web3::Web3;

use delver::components::ethereum::{
    EthereumAdapter as EthereumAdapterTrait, EthereumRpcError, NodeInfo,
};
use delver::data::header::{BlockHeader, BlockNumber};
use delver::util::backoff::ExponentialBackoff;

/// Most providers reject `eth_getLogs` filters naming too many contracts;
/// larger address sets are split into several calls.
const GET_LOGS_MAX_CONTRACTS: usize = 1000;

/// Attempts per RPC call before a transient error is surfaced to the
/// caller (which has its own, slower retry policy).
const REQUEST_RETRIES: u64 = 5;

const RETRY_BASE_DELAY: Duration = Duration::from_millis(250);
const RETRY_MAX_DELAY: Duration = Duration::from_secs(30);

/// An [`EthereumAdapterTrait`] implementation over the node's HTTP
/// JSON-RPC endpoint.
pub struct EthereumAdapter {
    logger: Logger,
    web3: Web3<Http>,
}

impl EthereumAdapter {
    pub fn new(logger: Logger, url: &str) -> Result<Self, EthereumRpcError> {
        let transport =
            Http::new(url).map_err(|e| EthereumRpcError::Connection(e.to_string()))?;
        Ok(EthereumAdapter {
            logger,
            web3: Web3::new(transport),
        })
    }

    /// Sort a transport error into the taxonomy callers route on.
    fn classify(e: web3::Error) -> EthereumRpcError {
        match e {
            web3::Error::Decoder(msg) => EthereumRpcError::Decode(msg),
            web3::Error::InvalidResponse(msg) => EthereumRpcError::Decode(msg),
            web3::Error::Rpc(rpc) => {
                let msg = rpc.to_string();
                if msg.contains("missing trie node") {
                    EthereumRpcError::MissingTrieNode(msg)
                } else {
                    EthereumRpcError::Rejected(msg)
                }
            }
            web3::Error::Unreachable => {
                EthereumRpcError::Connection("transport unreachable".to_string())
            }
            other => EthereumRpcError::Connection(other.to_string()),
        }
    }

    /// Run `call` until it succeeds, backing off between transient
    /// failures. Fatal errors and exhausted budgets are returned.
    async fn with_retry<T, F, Fut>(
        &self,
        operation: &str,
        call: F,
    ) -> Result<T, EthereumRpcError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, web3::Error>>,
    {
        let mut backoff =
            ExponentialBackoff::with_limit(RETRY_BASE_DELAY, RETRY_MAX_DELAY, REQUEST_RETRIES);
        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    let err = Self::classify(e);
                    if !err.is_transient() {
                        return Err(err);
                    }
                    match backoff.next_delay() {
                        Some(delay) => {
                            debug!(
                                self.logger,
                                "Trying again after {} failed: {}", operation, err;
                                "delay_ms" => delay.as_millis() as u64,
                            );
                            tokio::time::sleep(delay).await;
                        }
                        None => return Err(err),
                    }
                }
            }
        }
    }
}

fn block_header_from_block(
    number: BlockNumber,
    block: Block<H256>,
) -> Result<BlockHeader, EthereumRpcError> {
    let hash = block
        .hash
        .ok_or_else(|| EthereumRpcError::Decode(format!("block {} has no hash", number)))?;
    let raw = serde_json::to_value(&block).map_err(|e| EthereumRpcError::Decode(e.to_string()))?;
    Ok(BlockHeader {
        block_number: number,
        hash,
        parent_hash: block.parent_hash,
        raw,
        timestamp: block.timestamp.low_u64() as i64,
    })
}

#[async_trait]
impl EthereumAdapterTrait for EthereumAdapter {
    async fn chain_head_block_number(&self) -> Result<BlockNumber, EthereumRpcError> {
        let number = self
            .with_retry("eth_blockNumber", || self.web3.eth().block_number())
            .await?;
        Ok(number.as_u64() as i64)
    }

    async fn block_header_by_number(
        &self,
        number: BlockNumber,
    ) -> Result<BlockHeader, EthereumRpcError> {
        let block_id = BlockId::Number(Web3BlockNumber::Number((number as u64).into()));
        let block = self
            .with_retry("eth_getBlockByNumber", || self.web3.eth().block(block_id))
            .await?
            .ok_or(EthereumRpcError::BlockUnavailable(number))?;
        block_header_from_block(number, block)
    }

    async fn logs_in_range(
        &self,
        from: BlockNumber,
        to: BlockNumber,
        addresses: Vec<H160>,
        topic0s: Vec<H256>,
    ) -> Result<Vec<Log>, EthereumRpcError> {
        let mut logs = Vec::new();
        for chunk in addresses.chunks(GET_LOGS_MAX_CONTRACTS) {
            trace!(
                self.logger,
                "Requesting logs for blocks [{}, {}], {} contracts",
                from,
                to,
                chunk.len()
            );
            let filter = FilterBuilder::default()
                .from_block(Web3BlockNumber::Number((from as u64).into()))
                .to_block(Web3BlockNumber::Number((to as u64).into()))
                .address(chunk.to_vec())
                .topics(Some(topic0s.clone()), None, None, None)
                .build();
            let chunk_logs = self
                .with_retry("eth_getLogs", || self.web3.eth().logs(filter.clone()))
                .await?;
            logs.extend(chunk_logs);
        }
        Ok(logs)
    }

    async fn node_info(&self) -> Result<NodeInfo, EthereumRpcError> {
        let client_name = self
            .with_retry("web3_clientVersion", || self.web3.web3().client_version())
            .await?;
        let network_id = self
            .with_retry("net_version", || self.web3.net().version())
            .await?;
        Ok(NodeInfo {
            client_name,
            network_id,
        })
    }
}
