use std::collections::HashMap;

use web3::types::{H160, H256};

use delver::components::transformer::EventTransformerConfig;
use delver::data::event_log::EventLog;

/// Partitions persisted logs into per-transformer chunks by
/// `(contract address, topic0)`.
#[derive(Debug, Default)]
pub struct LogChunker {
    address_to_names: HashMap<H160, Vec<String>>,
    name_to_topic0: HashMap<String, H256>,
}

impl LogChunker {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn add_config(&mut self, config: &EventTransformerConfig) {
        for address in &config.contract_addresses {
            self.address_to_names
                .entry(*address)
                .or_default()
                .push(config.name.clone());
        }
        self.name_to_topic0
            .insert(config.name.clone(), config.topic0);
    }

    /// Chunk `logs` by transformer name. A log matching no configured
    /// `(address, topic0)` pair appears in no chunk and stays
    /// untransformed in the store, where a transformer added later can
    /// still pick it up.
    pub fn chunk_logs(&self, logs: &[EventLog]) -> HashMap<String, Vec<EventLog>> {
        let mut chunks: HashMap<String, Vec<EventLog>> = HashMap::new();
        for log in logs {
            let Some(names) = self.address_to_names.get(&log.address) else {
                continue;
            };
            for name in names {
                if self.name_to_topic0.get(name) == log.topics.first() {
                    chunks.entry(name.clone()).or_default().push(log.clone());
                }
            }
        }
        chunks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(name: &str, address: H160, topic0: H256) -> EventTransformerConfig {
        EventTransformerConfig {
            name: name.to_string(),
            contract_addresses: vec![address],
            topic0,
            start_block: 0,
            end_block: -1,
        }
    }

    fn log(address: H160, topic0: H256) -> EventLog {
        EventLog {
            id: 1,
            header_id: 1,
            address,
            topics: vec![topic0],
            data: vec![],
            block_number: 1,
            tx_hash: H256::zero(),
            tx_index: 0,
            log_index: 0,
            transformed: false,
        }
    }

    #[test]
    fn groups_logs_by_transformer_name() {
        let address_a = H160::repeat_byte(0xaa);
        let address_b = H160::repeat_byte(0xbb);
        let topic_a = H256::repeat_byte(1);
        let topic_b = H256::repeat_byte(2);

        let mut chunker = LogChunker::new();
        chunker.add_config(&config("alpha", address_a, topic_a));
        chunker.add_config(&config("beta", address_b, topic_b));

        let logs = vec![log(address_a, topic_a), log(address_b, topic_b)];
        let chunks = chunker.chunk_logs(&logs);

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks["alpha"], vec![log(address_a, topic_a)]);
        assert_eq!(chunks["beta"], vec![log(address_b, topic_b)]);
    }

    #[test]
    fn drops_logs_matching_no_config() {
        let watched = H160::repeat_byte(0xaa);
        let topic = H256::repeat_byte(1);
        let mut chunker = LogChunker::new();
        chunker.add_config(&config("alpha", watched, topic));

        // Wrong address, and right address with the wrong topic.
        let logs = vec![
            log(H160::repeat_byte(0xcc), topic),
            log(watched, H256::repeat_byte(9)),
        ];

        assert!(chunker.chunk_logs(&logs).is_empty());
    }

    #[test]
    fn distinguishes_transformers_sharing_an_address() {
        let address = H160::repeat_byte(0xaa);
        let topic_a = H256::repeat_byte(1);
        let topic_b = H256::repeat_byte(2);

        let mut chunker = LogChunker::new();
        chunker.add_config(&config("alpha", address, topic_a));
        chunker.add_config(&config("beta", address, topic_b));

        let chunks = chunker.chunk_logs(&[log(address, topic_b)]);

        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks["beta"].len(), 1);
    }

    #[test]
    fn logs_without_topics_never_match() {
        let address = H160::repeat_byte(0xaa);
        let mut chunker = LogChunker::new();
        chunker.add_config(&config("alpha", address, H256::repeat_byte(1)));

        let mut anonymous = log(address, H256::zero());
        anonymous.topics.clear();

        assert!(chunker.chunk_logs(&[anonymous]).is_empty());
    }
}
