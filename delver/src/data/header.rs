use web3::types::H256;

/// A block number. Negative values never occur on chain; `-1` is used as a
/// sentinel for "no upper bound" in range queries.
pub type BlockNumber = i64;

/// A block header as reported by the Ethereum node, before it has been
/// assigned a database id.
#[derive(Clone, Debug, PartialEq)]
pub struct BlockHeader {
    pub block_number: BlockNumber,
    pub hash: H256,
    pub parent_hash: H256,
    /// The node's JSON rendering of the header, kept verbatim so that
    /// transformers can reach fields the indexer does not model.
    pub raw: serde_json::Value,
    pub timestamp: i64,
}

/// A persisted block header.
#[derive(Clone, Debug, PartialEq)]
pub struct Header {
    pub id: i64,
    pub block_number: BlockNumber,
    pub hash: H256,
    pub parent_hash: H256,
    pub raw: serde_json::Value,
    pub timestamp: i64,
}

impl Header {
    pub fn from_block_header(id: i64, header: BlockHeader) -> Self {
        Header {
            id,
            block_number: header.block_number,
            hash: header.hash,
            parent_hash: header.parent_hash,
            raw: header.raw,
            timestamp: header.timestamp,
        }
    }
}
