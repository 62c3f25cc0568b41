/// Partitioning of event logs by contract and topic.
pub mod chunker;

/// Dispatch of persisted logs to event transformers.
pub mod delegator;

/// Supervision loop alternating extraction and delegation.
pub mod event_watcher;

/// Retrieval of event logs for checked headers.
pub mod extractor;

/// The storage-diff state machine.
pub mod storage_watcher;
