use web3::types::{H160, H256};

use crate::data::header::BlockNumber;

/// A raw event log persisted by the log extractor. `transformed` is flipped
/// by the log delegator once the matching event transformer has consumed
/// the log.
#[derive(Clone, Debug, PartialEq)]
pub struct EventLog {
    pub id: i64,
    pub header_id: i64,
    pub address: H160,
    pub topics: Vec<H256>,
    pub data: Vec<u8>,
    pub block_number: BlockNumber,
    pub tx_hash: H256,
    pub tx_index: i64,
    pub log_index: i64,
    pub transformed: bool,
}

impl EventLog {
    /// The event signature, when the log carries one. Anonymous events
    /// have no topics and never match an event transformer.
    pub fn topic0(&self) -> Option<H256> {
        self.topics.first().copied()
    }
}
