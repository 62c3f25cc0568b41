use std::sync::Arc;

use mockall::automock;
use slog::{debug, trace, Logger};
use thiserror::Error;

use delver::components::store::{EventLogRepository, StoreError};
use delver::components::transformer::{EventTransformer, TransformerError};

use crate::chunker::LogChunker;

/// Upper bound on logs fetched per delegation pass.
pub const LOG_BATCH_SIZE: i64 = 500;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DelegateOutcome {
    LogsDelegated,
    NoLogs,
}

#[derive(Error, Debug)]
pub enum DelegateError {
    #[error("no event transformers configured")]
    NoTransformers,

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("error executing event transformer `{name}`: {source}")]
    Transformer {
        name: String,
        #[source]
        source: TransformerError,
    },
}

/// The delegation surface the event watcher drives.
#[automock]
pub trait Delegator: Send + Sync + 'static {
    fn delegate_logs(&self) -> Result<DelegateOutcome, DelegateError>;
}

/// Reads persisted, untransformed logs, chunks them by contract and
/// topic, and hands each chunk to its transformer. Within one pass every
/// transformer sees its logs in persisted order; across transformers
/// there is no ordering guarantee.
pub struct LogDelegator {
    logger: Logger,
    logs: Arc<dyn EventLogRepository>,
    chunker: LogChunker,
    transformers: Vec<Arc<dyn EventTransformer>>,
}

impl LogDelegator {
    pub fn new(logger: Logger, logs: Arc<dyn EventLogRepository>) -> Self {
        LogDelegator {
            logger,
            logs,
            chunker: LogChunker::new(),
            transformers: Vec::new(),
        }
    }

    pub fn add_transformer(&mut self, transformer: Arc<dyn EventTransformer>) {
        self.chunker.add_config(transformer.config());
        self.transformers.push(transformer);
    }
}

impl Delegator for LogDelegator {
    fn delegate_logs(&self) -> Result<DelegateOutcome, DelegateError> {
        if self.transformers.is_empty() {
            return Err(DelegateError::NoTransformers);
        }

        let logs = self.logs.untransformed_logs(LOG_BATCH_SIZE)?;
        if logs.is_empty() {
            trace!(self.logger, "No untransformed logs");
            return Ok(DelegateOutcome::NoLogs);
        }

        debug!(self.logger, "Delegating {} logs", logs.len());
        let mut chunks = self.chunker.chunk_logs(&logs);
        for transformer in &self.transformers {
            let name = &transformer.config().name;
            let Some(chunk) = chunks.remove(name) else {
                continue;
            };
            transformer
                .execute(&chunk)
                .map_err(|source| DelegateError::Transformer {
                    name: name.clone(),
                    source,
                })?;
            let ids: Vec<i64> = chunk.iter().map(|log| log.id).collect();
            self.logs.mark_logs_transformed(&ids)?;
        }
        Ok(DelegateOutcome::LogsDelegated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Mutex;

    use delver::components::store::MockEventLogRepository;
    use delver::components::transformer::EventTransformerConfig;
    use delver::data::event_log::EventLog;
    use mockall::predicate::eq;
    use slog::o;
    use web3::types::{H160, H256};

    fn logger() -> Logger {
        Logger::root(slog::Discard, o!())
    }

    /// Records the log chunks it receives; optionally fails.
    struct FakeTransformer {
        config: EventTransformerConfig,
        executed: Mutex<Vec<Vec<EventLog>>>,
        fail: bool,
    }

    impl FakeTransformer {
        fn new(name: &str, address: H160, topic0: H256) -> Self {
            FakeTransformer {
                config: EventTransformerConfig {
                    name: name.to_string(),
                    contract_addresses: vec![address],
                    topic0,
                    start_block: 0,
                    end_block: -1,
                },
                executed: Mutex::new(Vec::new()),
                fail: false,
            }
        }

        fn failing(name: &str, address: H160, topic0: H256) -> Self {
            FakeTransformer {
                fail: true,
                ..Self::new(name, address, topic0)
            }
        }
    }

    impl EventTransformer for FakeTransformer {
        fn config(&self) -> &EventTransformerConfig {
            &self.config
        }

        fn execute(&self, logs: &[EventLog]) -> Result<(), TransformerError> {
            if self.fail {
                return Err(TransformerError::Other(anyhow::anyhow!("decode failed")));
            }
            self.executed.lock().unwrap().push(logs.to_vec());
            Ok(())
        }
    }

    fn log(id: i64, address: H160, topic0: H256) -> EventLog {
        EventLog {
            id,
            header_id: 1,
            address,
            topics: vec![topic0],
            data: vec![],
            block_number: 1,
            tx_hash: H256::zero(),
            tx_index: 0,
            log_index: id,
            transformed: false,
        }
    }

    fn watched_address() -> H160 {
        H160::repeat_byte(0xaa)
    }

    fn watched_topic() -> H256 {
        H256::repeat_byte(1)
    }

    #[test]
    fn fails_without_transformers() {
        let delegator = LogDelegator::new(logger(), Arc::new(MockEventLogRepository::new()));

        assert!(matches!(
            delegator.delegate_logs(),
            Err(DelegateError::NoTransformers)
        ));
    }

    #[test]
    fn reports_no_logs_when_caught_up() {
        let mut logs = MockEventLogRepository::new();
        logs.expect_untransformed_logs()
            .with(eq(LOG_BATCH_SIZE))
            .returning(|_| Ok(vec![]));

        let mut delegator = LogDelegator::new(logger(), Arc::new(logs));
        delegator.add_transformer(Arc::new(FakeTransformer::new("alpha", watched_address(), watched_topic())));

        assert_eq!(delegator.delegate_logs().unwrap(), DelegateOutcome::NoLogs);
    }

    #[test]
    fn store_errors_propagate() {
        let mut logs = MockEventLogRepository::new();
        logs.expect_untransformed_logs()
            .returning(|_| Err(StoreError::Unavailable("gone".to_string())));

        let mut delegator = LogDelegator::new(logger(), Arc::new(logs));
        delegator.add_transformer(Arc::new(FakeTransformer::new("alpha", watched_address(), watched_topic())));

        assert!(matches!(
            delegator.delegate_logs(),
            Err(DelegateError::Store(StoreError::Unavailable(_)))
        ));
    }

    #[test]
    fn delivers_chunks_and_marks_them_transformed() {
        let mut logs = MockEventLogRepository::new();
        logs.expect_untransformed_logs()
            .returning(|_| Ok(vec![log(7, watched_address(), watched_topic()), log(9, watched_address(), watched_topic())]));
        logs.expect_mark_logs_transformed()
            .withf(|ids| ids == [7, 9])
            .times(1)
            .returning(|_| Ok(()));

        let transformer = Arc::new(FakeTransformer::new("alpha", watched_address(), watched_topic()));
        let mut delegator = LogDelegator::new(logger(), Arc::new(logs));
        delegator.add_transformer(transformer.clone());

        assert_eq!(
            delegator.delegate_logs().unwrap(),
            DelegateOutcome::LogsDelegated
        );
        let executed = transformer.executed.lock().unwrap();
        assert_eq!(executed.len(), 1);
        assert_eq!(
            executed[0].iter().map(|l| l.id).collect::<Vec<_>>(),
            vec![7, 9]
        );
    }

    #[test]
    fn unmatched_logs_stay_untransformed() {
        let stranger = H160::repeat_byte(0xcc);
        let mut logs = MockEventLogRepository::new();
        logs.expect_untransformed_logs()
            .returning(move |_| Ok(vec![log(7, stranger, watched_topic())]));
        logs.expect_mark_logs_transformed().times(0);

        let mut delegator = LogDelegator::new(logger(), Arc::new(logs));
        delegator.add_transformer(Arc::new(FakeTransformer::new("alpha", watched_address(), watched_topic())));

        assert_eq!(
            delegator.delegate_logs().unwrap(),
            DelegateOutcome::LogsDelegated
        );
    }

    #[test]
    fn transformer_failure_leaves_logs_unmarked() {
        let mut logs = MockEventLogRepository::new();
        logs.expect_untransformed_logs()
            .returning(|_| Ok(vec![log(7, watched_address(), watched_topic())]));
        logs.expect_mark_logs_transformed().times(0);

        let mut delegator = LogDelegator::new(logger(), Arc::new(logs));
        delegator.add_transformer(Arc::new(FakeTransformer::failing("alpha", watched_address(), watched_topic())));

        assert!(matches!(
            delegator.delegate_logs(),
            Err(DelegateError::Transformer { name, .. }) if name == "alpha"
        ));
    }
}
