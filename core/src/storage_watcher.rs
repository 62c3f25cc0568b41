use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use slog::{debug, error, trace, Logger};
use thiserror::Error;
use tokio::time::Instant;
use web3::types::H160;

use delver::components::store::{DiffRepository, HeaderRepository, StoreError};
use delver::components::transformer::{StorageTransformer, TransformerError};
use delver::data::storage_diff::{DiffStatus, PersistedDiff};
use delver::util::status_writer::StatusWriter;

/// Depth beyond which a header-hash mismatch is treated as permanent
/// rather than a reorg in flight.
pub const REORG_WINDOW: i64 = 250;

/// Diffs fetched per cursor step.
pub const RESULTS_LIMIT: i64 = 500;

/// Which part of the diff state machine a watcher instance drives. Each
/// status is scanned by its own watcher with an independent cursor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DiffStatusToWatch {
    New,
    Unrecognized,
    Pending,
}

impl fmt::Display for DiffStatusToWatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DiffStatusToWatch::New => "new",
            DiffStatusToWatch::Unrecognized => "unrecognized",
            DiffStatusToWatch::Pending => "pending",
        };
        write!(f, "{}", name)
    }
}

#[derive(Error, Debug)]
pub enum StorageWatcherError {
    #[error("error confirming health check: {0}")]
    HealthCheck(#[from] std::io::Error),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("error executing storage transformer: {0}")]
    Transformer(TransformerError),
}

/// Cursors through persisted diffs of one status and drives each through
/// the state machine: dispatch to the address-matched transformer, park
/// it, or flag it as fallen off the canonical chain.
pub struct StorageWatcher {
    logger: Logger,
    headers: Arc<dyn HeaderRepository>,
    diffs: Arc<dyn DiffRepository>,
    transformers: HashMap<H160, Arc<dyn StorageTransformer>>,
    /// How far behind the stored chain head to start scanning; `-1`
    /// scans everything from diff id 0.
    diff_blocks_from_head: i64,
    status_to_watch: DiffStatusToWatch,
    status_writer: StatusWriter,
    /// Minimum wall time per scan iteration; an early finish sleeps the
    /// remainder. Zero disables the throttle.
    min_iteration_time: Duration,
}

impl StorageWatcher {
    pub fn for_new_diffs(
        logger: Logger,
        headers: Arc<dyn HeaderRepository>,
        diffs: Arc<dyn DiffRepository>,
        diff_blocks_from_head: i64,
        status_writer: StatusWriter,
        min_iteration_time: Duration,
    ) -> Self {
        Self::create(
            logger,
            headers,
            diffs,
            diff_blocks_from_head,
            status_writer,
            min_iteration_time,
            DiffStatusToWatch::New,
        )
    }

    pub fn for_unrecognized_diffs(
        logger: Logger,
        headers: Arc<dyn HeaderRepository>,
        diffs: Arc<dyn DiffRepository>,
        diff_blocks_from_head: i64,
        status_writer: StatusWriter,
        min_iteration_time: Duration,
    ) -> Self {
        Self::create(
            logger,
            headers,
            diffs,
            diff_blocks_from_head,
            status_writer,
            min_iteration_time,
            DiffStatusToWatch::Unrecognized,
        )
    }

    pub fn for_pending_diffs(
        logger: Logger,
        headers: Arc<dyn HeaderRepository>,
        diffs: Arc<dyn DiffRepository>,
        diff_blocks_from_head: i64,
        status_writer: StatusWriter,
        min_iteration_time: Duration,
    ) -> Self {
        Self::create(
            logger,
            headers,
            diffs,
            diff_blocks_from_head,
            status_writer,
            min_iteration_time,
            DiffStatusToWatch::Pending,
        )
    }

    fn create(
        logger: Logger,
        headers: Arc<dyn HeaderRepository>,
        diffs: Arc<dyn DiffRepository>,
        diff_blocks_from_head: i64,
        status_writer: StatusWriter,
        min_iteration_time: Duration,
        status_to_watch: DiffStatusToWatch,
    ) -> Self {
        StorageWatcher {
            logger,
            headers,
            diffs,
            transformers: HashMap::new(),
            diff_blocks_from_head,
            status_to_watch,
            status_writer,
            min_iteration_time,
        }
    }

    pub fn status_to_watch(&self) -> DiffStatusToWatch {
        self.status_to_watch
    }

    pub fn add_transformer(&mut self, transformer: Arc<dyn StorageTransformer>) {
        self.transformers
            .insert(transformer.contract_address(), transformer);
    }

    pub async fn execute(&self) -> Result<(), StorageWatcherError> {
        self.status_writer.write()?;

        loop {
            let started = Instant::now();
            if let Err(err) = self.transform_diffs() {
                error!(
                    self.logger,
                    "Error transforming {} diffs: {}", self.status_to_watch, err
                );
                return Err(err);
            }
            let elapsed = started.elapsed();
            if elapsed < self.min_iteration_time {
                tokio::time::sleep(self.min_iteration_time - elapsed).await;
            }
        }
    }

    /// One cursored scan over the watched status, from the configured
    /// head offset (or id 0) until a fetch comes back short.
    fn transform_diffs(&self) -> Result<(), StorageWatcherError> {
        let mut min_id = self.min_diff_id()?;

        loop {
            let diffs = self.diffs_to_watch(min_id)?;
            for diff in &diffs {
                self.transform_diff(diff)?;
            }
            let fetched = diffs.len() as i64;
            if let Some(last) = diffs.last() {
                min_id = last.id;
            }
            if fetched < RESULTS_LIMIT {
                return Ok(());
            }
        }
    }

    fn min_diff_id(&self) -> Result<i64, StorageWatcherError> {
        if self.diff_blocks_from_head < 0 {
            return Ok(0);
        }
        let head = match self.headers.most_recent_header_block_number() {
            Ok(head) => head,
            Err(StoreError::NotFound) => return Ok(0),
            Err(e) => return Err(e.into()),
        };
        match self
            .diffs
            .first_diff_id_for_block_height(head - self.diff_blocks_from_head)
        {
            // Off by one so the boundary diff itself is included by the
            // `id > min_id` scan.
            Ok(id) => Ok(id - 1),
            Err(StoreError::NotFound) => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    fn diffs_to_watch(&self, min_id: i64) -> Result<Vec<PersistedDiff>, StoreError> {
        match self.status_to_watch {
            DiffStatusToWatch::New => self.diffs.new_diffs(min_id, RESULTS_LIMIT),
            DiffStatusToWatch::Unrecognized => {
                self.diffs.unrecognized_diffs(min_id, RESULTS_LIMIT)
            }
            DiffStatusToWatch::Pending => self.diffs.pending_diffs(min_id, RESULTS_LIMIT),
        }
    }

    fn transform_diff(&self, diff: &PersistedDiff) -> Result<(), StorageWatcherError> {
        let Some(transformer) = self.transformers.get(&diff.raw.address) else {
            self.diffs.mark_unwatched(diff.id)?;
            return Ok(());
        };

        let header = match self.headers.header_by_block_number(diff.raw.block_height) {
            Ok(header) => header,
            Err(StoreError::HeaderDoesNotExist) | Err(StoreError::NotFound) => {
                trace!(
                    self.logger,
                    "No header yet for diff {} at block {}",
                    diff.id,
                    diff.raw.block_height
                );
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };
        if header.hash != diff.raw.block_hash {
            return self.handle_header_mismatch(diff);
        }

        let mut diff = diff.clone();
        diff.header_id = Some(header.id);
        match transformer.execute(&diff) {
            Ok(()) => self.diffs.mark_transformed(diff.id)?,
            Err(TransformerError::KeyNotFound(key)) => {
                debug!(
                    self.logger,
                    "Diff {} has a storage key no transformer recognizes: {:?}", diff.id, key
                );
                self.diffs.mark_unrecognized(diff.id)?;
            }
            Err(TransformerError::Store(
                err @ (StoreError::NotFound | StoreError::HeaderDoesNotExist),
            )) => {
                trace!(self.logger, "Error transforming diff {}: {}", diff.id, err);
            }
            Err(err) => return Err(StorageWatcherError::Transformer(err)),
        }
        Ok(())
    }

    /// The stored header for the diff's block carries a different hash:
    /// deep mismatches are permanent, anything inside the reorg window
    /// waits as `pending` for the validator to settle the tip.
    fn handle_header_mismatch(&self, diff: &PersistedDiff) -> Result<(), StorageWatcherError> {
        let head = self.headers.most_recent_header_block_number()?;
        if diff.raw.block_height < head - REORG_WINDOW {
            self.diffs.mark_noncanonical(diff.id)?;
        } else if diff.status != DiffStatus::Pending {
            self.diffs.mark_pending(diff.id)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Mutex;

    use delver::components::store::{MockDiffRepository, MockHeaderRepository};
    use delver::data::header::Header;
    use delver::data::storage_diff::RawDiff;
    use mockall::predicate::eq;
    use slog::o;
    use web3::types::H256;

    fn logger() -> Logger {
        Logger::root(slog::Discard, o!())
    }

    fn watched_address() -> H160 {
        H160::repeat_byte(0xaa)
    }

    fn canonical_hash() -> H256 {
        H256::repeat_byte(0xcc)
    }

    fn diff(id: i64, status: DiffStatus, block_height: i64) -> PersistedDiff {
        PersistedDiff {
            id,
            status,
            from_backfill: false,
            header_id: None,
            eth_node_id: 1,
            raw: RawDiff {
                address: watched_address(),
                block_height,
                block_hash: canonical_hash(),
                storage_key: H256::repeat_byte(1),
                storage_value: H256::repeat_byte(2),
            },
        }
    }

    fn header(id: i64, number: i64, hash: H256) -> Header {
        Header {
            id,
            block_number: number,
            hash,
            parent_hash: H256::zero(),
            raw: serde_json::json!({}),
            timestamp: 0,
        }
    }

    /// Records executed diffs; the result is configurable per call.
    struct FakeStorageTransformer {
        address: H160,
        executed: Mutex<Vec<PersistedDiff>>,
        result: Box<dyn Fn() -> Result<(), TransformerError> + Send + Sync>,
    }

    impl FakeStorageTransformer {
        fn succeeding(address: H160) -> Self {
            FakeStorageTransformer {
                address,
                executed: Mutex::new(Vec::new()),
                result: Box::new(|| Ok(())),
            }
        }

        fn failing(
            address: H160,
            result: impl Fn() -> Result<(), TransformerError> + Send + Sync + 'static,
        ) -> Self {
            FakeStorageTransformer {
                address,
                executed: Mutex::new(Vec::new()),
                result: Box::new(result),
            }
        }
    }

    impl StorageTransformer for FakeStorageTransformer {
        fn contract_address(&self) -> H160 {
            self.address
        }

        fn execute(&self, diff: &PersistedDiff) -> Result<(), TransformerError> {
            self.executed.lock().unwrap().push(diff.clone());
            (self.result)()
        }
    }

    fn watcher(
        headers: MockHeaderRepository,
        diffs: MockDiffRepository,
        diff_blocks_from_head: i64,
    ) -> StorageWatcher {
        let status_path = std::env::temp_dir().join("delver_storage_watcher_test");
        StorageWatcher::for_new_diffs(
            logger(),
            Arc::new(headers),
            Arc::new(diffs),
            diff_blocks_from_head,
            StatusWriter::new(status_path, "storage watcher starting\n"),
            Duration::ZERO,
        )
    }

    #[test]
    fn unwatched_addresses_are_marked_and_skipped() {
        let headers = MockHeaderRepository::new();
        let mut diffs = MockDiffRepository::new();
        diffs
            .expect_mark_unwatched()
            .with(eq(7))
            .times(1)
            .returning(|_| Ok(()));

        let watcher = watcher(headers, diffs, -1);

        watcher
            .transform_diff(&diff(7, DiffStatus::New, 100))
            .unwrap();
    }

    #[test]
    fn matching_header_hash_transforms_and_marks() {
        let mut headers = MockHeaderRepository::new();
        headers
            .expect_header_by_block_number()
            .with(eq(100))
            .returning(|n| Ok(header(42, n, canonical_hash())));

        let mut diffs = MockDiffRepository::new();
        diffs
            .expect_mark_transformed()
            .with(eq(7))
            .times(1)
            .returning(|_| Ok(()));

        let transformer = Arc::new(FakeStorageTransformer::succeeding(watched_address()));
        let mut watcher = watcher(headers, diffs, -1);
        watcher.add_transformer(transformer.clone());

        watcher
            .transform_diff(&diff(7, DiffStatus::New, 100))
            .unwrap();

        let executed = transformer.executed.lock().unwrap();
        assert_eq!(executed.len(), 1);
        assert_eq!(executed[0].header_id, Some(42));
    }

    #[test]
    fn missing_header_leaves_the_diff_for_a_later_pass() {
        let mut headers = MockHeaderRepository::new();
        headers
            .expect_header_by_block_number()
            .returning(|_| Err(StoreError::HeaderDoesNotExist));

        let mut diffs = MockDiffRepository::new();
        diffs.expect_mark_pending().times(0);
        diffs.expect_mark_transformed().times(0);
        diffs.expect_mark_noncanonical().times(0);

        let mut watcher = watcher(headers, diffs, -1);
        watcher.add_transformer(Arc::new(FakeStorageTransformer::succeeding(
            watched_address(),
        )));

        watcher
            .transform_diff(&diff(7, DiffStatus::New, 100))
            .unwrap();
    }

    #[test]
    fn mismatch_inside_the_reorg_window_goes_pending() {
        let mut headers = MockHeaderRepository::new();
        headers
            .expect_header_by_block_number()
            .returning(|n| Ok(header(42, n, H256::repeat_byte(0xdd))));
        headers
            .expect_most_recent_header_block_number()
            .returning(|| Ok(110));

        let mut diffs = MockDiffRepository::new();
        diffs
            .expect_mark_pending()
            .with(eq(7))
            .times(1)
            .returning(|_| Ok(()));

        let mut watcher = watcher(headers, diffs, -1);
        watcher.add_transformer(Arc::new(FakeStorageTransformer::succeeding(
            watched_address(),
        )));

        watcher
            .transform_diff(&diff(7, DiffStatus::New, 100))
            .unwrap();
    }

    #[test]
    fn pending_diffs_stay_pending_inside_the_window() {
        let mut headers = MockHeaderRepository::new();
        headers
            .expect_header_by_block_number()
            .returning(|n| Ok(header(42, n, H256::repeat_byte(0xdd))));
        headers
            .expect_most_recent_header_block_number()
            .returning(|| Ok(110));

        let mut diffs = MockDiffRepository::new();
        diffs.expect_mark_pending().times(0);
        diffs.expect_mark_noncanonical().times(0);

        let mut watcher = watcher(headers, diffs, -1);
        watcher.add_transformer(Arc::new(FakeStorageTransformer::succeeding(
            watched_address(),
        )));

        watcher
            .transform_diff(&diff(7, DiffStatus::Pending, 100))
            .unwrap();
    }

    #[test]
    fn mismatch_exactly_at_the_window_edge_is_still_pending() {
        let mut headers = MockHeaderRepository::new();
        headers
            .expect_header_by_block_number()
            .returning(|n| Ok(header(42, n, H256::repeat_byte(0xdd))));
        headers
            .expect_most_recent_header_block_number()
            .returning(|| Ok(350));

        let mut diffs = MockDiffRepository::new();
        diffs
            .expect_mark_pending()
            .with(eq(7))
            .times(1)
            .returning(|_| Ok(()));
        diffs.expect_mark_noncanonical().times(0);

        let mut watcher = watcher(headers, diffs, -1);
        watcher.add_transformer(Arc::new(FakeStorageTransformer::succeeding(
            watched_address(),
        )));

        // block_height = head - REORG_WINDOW exactly.
        watcher
            .transform_diff(&diff(7, DiffStatus::New, 100))
            .unwrap();
    }

    #[test]
    fn mismatch_outside_the_reorg_window_is_noncanonical() {
        let mut headers = MockHeaderRepository::new();
        headers
            .expect_header_by_block_number()
            .returning(|n| Ok(header(42, n, H256::repeat_byte(0xdd))));
        headers
            .expect_most_recent_header_block_number()
            .returning(|| Ok(400));

        let mut diffs = MockDiffRepository::new();
        diffs
            .expect_mark_noncanonical()
            .with(eq(7))
            .times(1)
            .returning(|_| Ok(()));
        diffs.expect_mark_pending().times(0);

        let mut watcher = watcher(headers, diffs, -1);
        watcher.add_transformer(Arc::new(FakeStorageTransformer::succeeding(
            watched_address(),
        )));

        watcher
            .transform_diff(&diff(7, DiffStatus::New, 100))
            .unwrap();
    }

    #[test]
    fn unknown_keys_park_the_diff_as_unrecognized() {
        let mut headers = MockHeaderRepository::new();
        headers
            .expect_header_by_block_number()
            .returning(|n| Ok(header(42, n, canonical_hash())));

        let mut diffs = MockDiffRepository::new();
        diffs
            .expect_mark_unrecognized()
            .with(eq(7))
            .times(1)
            .returning(|_| Ok(()));
        diffs.expect_mark_transformed().times(0);

        let mut watcher = watcher(headers, diffs, -1);
        watcher.add_transformer(Arc::new(FakeStorageTransformer::failing(
            watched_address(),
            || Err(TransformerError::KeyNotFound(H256::repeat_byte(1))),
        )));

        watcher
            .transform_diff(&diff(7, DiffStatus::New, 100))
            .unwrap();
    }

    #[test]
    fn soft_store_errors_skip_without_a_status_change() {
        let mut headers = MockHeaderRepository::new();
        headers
            .expect_header_by_block_number()
            .returning(|n| Ok(header(42, n, canonical_hash())));

        let mut diffs = MockDiffRepository::new();
        diffs.expect_mark_transformed().times(0);
        diffs.expect_mark_unrecognized().times(0);

        let mut watcher = watcher(headers, diffs, -1);
        watcher.add_transformer(Arc::new(FakeStorageTransformer::failing(
            watched_address(),
            || Err(TransformerError::Store(StoreError::NotFound)),
        )));

        watcher
            .transform_diff(&diff(7, DiffStatus::New, 100))
            .unwrap();
    }

    #[test]
    fn other_transformer_errors_are_fatal() {
        let mut headers = MockHeaderRepository::new();
        headers
            .expect_header_by_block_number()
            .returning(|n| Ok(header(42, n, canonical_hash())));

        let diffs = MockDiffRepository::new();

        let mut watcher = watcher(headers, diffs, -1);
        watcher.add_transformer(Arc::new(FakeStorageTransformer::failing(
            watched_address(),
            || Err(TransformerError::Other(anyhow::anyhow!("constraint"))),
        )));

        assert!(matches!(
            watcher.transform_diff(&diff(7, DiffStatus::New, 100)),
            Err(StorageWatcherError::Transformer(_))
        ));
    }

    #[test]
    fn scans_from_zero_when_watching_everything() {
        let mut headers = MockHeaderRepository::new();
        headers.expect_most_recent_header_block_number().times(0);
        let diffs = MockDiffRepository::new();

        let watcher = watcher(headers, diffs, -1);

        assert_eq!(watcher.min_diff_id().unwrap(), 0);
    }

    #[test]
    fn positions_the_cursor_near_the_head() {
        let mut headers = MockHeaderRepository::new();
        headers
            .expect_most_recent_header_block_number()
            .returning(|| Ok(1000));
        let mut diffs = MockDiffRepository::new();
        diffs
            .expect_first_diff_id_for_block_height()
            .with(eq(900))
            .returning(|_| Ok(555));

        let watcher = watcher(headers, diffs, 100);

        assert_eq!(watcher.min_diff_id().unwrap(), 554);
    }

    #[test]
    fn an_empty_store_degrades_the_cursor_to_zero() {
        let mut headers = MockHeaderRepository::new();
        headers
            .expect_most_recent_header_block_number()
            .returning(|| Err(StoreError::NotFound));
        let diffs = MockDiffRepository::new();

        let without_headers = watcher(headers, diffs, 100);
        assert_eq!(without_headers.min_diff_id().unwrap(), 0);

        let mut headers = MockHeaderRepository::new();
        headers
            .expect_most_recent_header_block_number()
            .returning(|| Ok(1000));
        let mut diffs = MockDiffRepository::new();
        diffs
            .expect_first_diff_id_for_block_height()
            .returning(|_| Err(StoreError::NotFound));

        let without_diffs = watcher(headers, diffs, 100);
        assert_eq!(without_diffs.min_diff_id().unwrap(), 0);
    }

    #[test]
    fn the_cursor_advances_through_full_batches() {
        let headers = MockHeaderRepository::new();
        let mut diffs = MockDiffRepository::new();
        // A full first batch (ids 1..=500) forces a second fetch from the
        // last seen id; the short second batch ends the scan. Every diff
        // lands in `unwatched` since no transformer is registered.
        diffs
            .expect_new_diffs()
            .with(eq(0), eq(RESULTS_LIMIT))
            .times(1)
            .returning(|_, _| {
                Ok((1..=RESULTS_LIMIT)
                    .map(|id| diff(id, DiffStatus::New, 100))
                    .collect())
            });
        diffs
            .expect_new_diffs()
            .with(eq(RESULTS_LIMIT), eq(RESULTS_LIMIT))
            .times(1)
            .returning(|_, _| Ok(vec![]));
        diffs
            .expect_mark_unwatched()
            .times(RESULTS_LIMIT as usize)
            .returning(|_| Ok(()));

        let watcher = watcher(headers, diffs, -1);

        watcher.transform_diffs().unwrap();
    }

    #[tokio::test]
    async fn execute_surfaces_fatal_errors() {
        let headers = MockHeaderRepository::new();
        let mut diffs = MockDiffRepository::new();
        diffs
            .expect_new_diffs()
            .returning(|_, _| Err(StoreError::Unavailable("gone".to_string())));

        let watcher = watcher(headers, diffs, -1);

        assert!(matches!(
            watcher.execute().await,
            Err(StorageWatcherError::Store(StoreError::Unavailable(_)))
        ));
    }
}
