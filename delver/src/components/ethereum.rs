use async_trait::async_trait;
use mockall::automock;
use thiserror::Error;
use web3::types::{Log, H160, H256};

use crate::data::header::{BlockHeader, BlockNumber};

/// Identity of the node this indexer is attached to, recorded in the store
/// so several indexers can share a database without mixing histories.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeInfo {
    pub client_name: String,
    pub network_id: String,
}

/// Errors from the Ethereum node, tagged by kind so callers can route on
/// the variant instead of matching message text.
#[derive(Error, Debug)]
pub enum EthereumRpcError {
    #[error("ethereum node unreachable: {0}")]
    Connection(String),

    #[error("ethereum node took too long to respond: {0}")]
    Timeout(String),

    /// The node refused the request: rate limiting or an oversized
    /// `eth_getLogs` range. Retryable, possibly after shrinking the
    /// request.
    #[error("ethereum node rejected the request: {0}")]
    Rejected(String),

    /// State for the requested block has been pruned or is still syncing.
    #[error("missing trie node: {0}")]
    MissingTrieNode(String),

    /// The node does not know the block, likely uncled during a reorg.
    #[error("block {0} unavailable from the ethereum node")]
    BlockUnavailable(BlockNumber),

    #[error("failed to decode node response: {0}")]
    Decode(String),
}

impl EthereumRpcError {
    /// Whether retrying the same request later can reasonably succeed.
    /// Decoding failures never resolve on their own and are fatal.
    pub fn is_transient(&self) -> bool {
        !matches!(self, EthereumRpcError::Decode(_))
    }
}

/// The node operations the indexing core depends on. Implementations
/// enforce per-call timeouts and retry transient failures internally.
#[automock]
#[async_trait]
pub trait EthereumAdapter: Send + Sync + 'static {
    /// The most recent block number the node knows about.
    async fn chain_head_block_number(&self) -> Result<BlockNumber, EthereumRpcError>;

    /// The header for `number`, with the node's raw JSON attached.
    async fn block_header_by_number(
        &self,
        number: BlockNumber,
    ) -> Result<BlockHeader, EthereumRpcError>;

    /// All logs in `[from, to]` emitted by one of `addresses` with a
    /// first topic in `topic0s`. Implementations chunk the request to
    /// respect node batching limits.
    async fn logs_in_range(
        &self,
        from: BlockNumber,
        to: BlockNumber,
        addresses: Vec<H160>,
        topic0s: Vec<H256>,
    ) -> Result<Vec<Log>, EthereumRpcError>;

    /// Client and network identity, used to scope persisted headers.
    async fn node_info(&self) -> Result<NodeInfo, EthereumRpcError>;
}
