use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Error};
use slog::{debug, error, info, warn, Logger};
use tokio::sync::mpsc;
use tokio::task::JoinSet;

use delver::components::ethereum::EthereumAdapter as EthereumAdapterTrait;
use delver::components::store::{
    DiffRepository as DiffRepositoryTrait, EventLogRepository as EventLogRepositoryTrait,
    HeaderRepository as HeaderRepositoryTrait,
};
use delver::log::LoggerFactory;
use delver::util::status_writer::StatusWriter;
use delver_chain_ethereum::{EthereumAdapter, HeaderBackfiller, HeaderValidator, DEFAULT_VALIDATION_WINDOW};
use delver_core::delegator::LogDelegator;
use delver_core::event_watcher::EventWatcher;
use delver_core::extractor::{HeaderRecheck, LogExtractor};
use delver_core::storage_watcher::StorageWatcher;
use delver_store_postgres::{
    ensure_eth_node, CheckedHeadersRepository, ConnectionPool, DiffRepository,
    EventLogRepository, HeaderRepository,
};

use crate::opt::Opt;
use crate::registry;

const HEADER_SYNC_HEALTH_CHECK: &str = "/tmp/header_sync_health_check";
const EXECUTE_HEALTH_CHECK: &str = "/tmp/execute_health_check";

/// Shared wiring for every command: the node adapter, the store, and the
/// node identity row scoping headers and diffs.
struct Deps {
    pool: Arc<ConnectionPool>,
    eth: Arc<dyn EthereumAdapterTrait>,
    eth_node_id: i64,
}

async fn connect(factory: &LoggerFactory, opt: &Opt) -> Result<Deps, Error> {
    let logger = factory.component_logger("EthereumAdapter");
    let eth: Arc<dyn EthereumAdapterTrait> =
        Arc::new(EthereumAdapter::new(logger, &opt.ethereum_rpc)?);

    let store_logger = factory.component_logger("Store");
    let pool = Arc::new(ConnectionPool::create(
        &store_logger,
        &opt.postgres_url,
        opt.store_connection_pool_size,
    )?);

    let node_info = eth.node_info().await?;
    let eth_node_id = ensure_eth_node(&pool, &node_info)?;
    Ok(Deps {
        pool,
        eth,
        eth_node_id,
    })
}

pub async fn run_header_sync(
    factory: &LoggerFactory,
    opt: &Opt,
    starting_block_number: i64,
    polling_interval: u64,
) -> Result<(), Error> {
    let logger = factory.component_logger("HeaderSync");
    let deps = connect(factory, opt).await?;

    let chain_head = deps.eth.chain_head_block_number().await?;
    if starting_block_number > chain_head {
        return Err(anyhow!(
            "--starting-block-number ({}) greater than the node's most recent synced block ({})",
            starting_block_number,
            chain_head
        ));
    }

    StatusWriter::new(HEADER_SYNC_HEALTH_CHECK, "headerSync starting\n")
        .write()
        .context("error writing health check file")?;

    let headers: Arc<dyn HeaderRepositoryTrait> = Arc::new(HeaderRepository::new(
        deps.pool.clone(),
        deps.eth_node_id,
    ));
    let validator = HeaderValidator::new(
        factory.component_logger("HeaderValidator"),
        deps.eth.clone(),
        headers.clone(),
        DEFAULT_VALIDATION_WINDOW,
    );
    let backfiller = Arc::new(HeaderBackfiller::new(
        factory.component_logger("HeaderBackfiller"),
        deps.eth.clone(),
        headers,
        starting_block_number,
        DEFAULT_VALIDATION_WINDOW,
    ));

    let (completions, mut completed) = mpsc::channel(1);
    tokio::spawn(run_backfill_pass(
        logger.clone(),
        backfiller.clone(),
        completions.clone(),
    ));

    let mut ticker = tokio::time::interval(Duration::from_millis(polling_interval));
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match validator.validate_headers().await {
                    Ok(window) => debug!(logger, "{}", window),
                    Err(e) => error!(logger, "Validating headers failed: {}", e),
                }
            }
            Some(populated) = completed.recv() => {
                if populated == 0 {
                    tokio::time::sleep(Duration::from_secs(3)).await;
                }
                tokio::spawn(run_backfill_pass(
                    logger.clone(),
                    backfiller.clone(),
                    completions.clone(),
                ));
            }
        }
    }
}

async fn run_backfill_pass(
    logger: Logger,
    backfiller: Arc<HeaderBackfiller>,
    completions: mpsc::Sender<usize>,
) {
    let populated = match backfiller.populate_missing_headers().await {
        Ok(populated) => populated,
        Err(e) => {
            error!(logger, "Backfilling headers failed: {}", e);
            0
        }
    };
    let _ = completions.send(populated).await;
}

#[allow(clippy::too_many_arguments)]
pub async fn run_execute(
    factory: &LoggerFactory,
    opt: &Opt,
    recheck_headers: bool,
    retry_interval: u64,
    max_unexpected_errs: usize,
    new_diff_blocks_from_head: i64,
    unrecognized_diff_blocks_from_head: i64,
    schema: &str,
    transformer_names: &[String],
) -> Result<(), Error> {
    let logger = factory.component_logger("Execute");
    let deps = connect(factory, opt).await?;

    let registry = registry::builtin();
    let event_transformers = registry.event_transformers(&deps.pool, transformer_names)?;
    let storage_transformers = registry.storage_transformers(&deps.pool, transformer_names)?;

    let headers: Arc<dyn HeaderRepositoryTrait> = Arc::new(HeaderRepository::new(
        deps.pool.clone(),
        deps.eth_node_id,
    ));
    let diffs: Arc<dyn DiffRepositoryTrait> = Arc::new(DiffRepository::new(
        deps.pool.clone(),
        deps.eth_node_id,
    ));

    let mut tasks: JoinSet<Result<(), Error>> = JoinSet::new();

    if event_transformers.is_empty() {
        warn!(logger, "No event transformers registered; not watching events");
    } else {
        let checked_headers = Arc::new(CheckedHeadersRepository::new(deps.pool.clone(), schema)?);
        let logs: Arc<dyn EventLogRepositoryTrait> =
            Arc::new(EventLogRepository::new(deps.pool.clone()));

        let mut extractor = LogExtractor::new(
            factory.component_logger("LogExtractor"),
            deps.eth.clone(),
            headers.clone(),
            checked_headers,
            logs.clone(),
        );
        let mut delegator =
            LogDelegator::new(factory.component_logger("LogDelegator"), logs);
        for transformer in event_transformers {
            extractor.add_transformer_config(transformer.config().clone())?;
            delegator.add_transformer(transformer);
        }

        let watcher = EventWatcher::new(
            factory.component_logger("EventWatcher"),
            Arc::new(extractor),
            Arc::new(delegator),
            max_unexpected_errs,
            Duration::from_secs(retry_interval),
            StatusWriter::new(EXECUTE_HEALTH_CHECK, "event watcher starting\n"),
        );
        let recheck = if recheck_headers {
            HeaderRecheck::Rechecked
        } else {
            HeaderRecheck::Unchecked
        };
        info!(logger, "Executing event transformers");
        tasks.spawn(async move { watcher.execute(recheck).await.map_err(Error::from) });
    }

    if storage_transformers.is_empty() {
        warn!(logger, "No storage transformers registered; not watching diffs");
    } else {
        // One watcher per driven status, with independent cursors. The
        // pending watcher shares the new watcher's head offset.
        let mut watchers = vec![
            StorageWatcher::for_new_diffs(
                factory.component_logger("StorageWatcherNew"),
                headers.clone(),
                diffs.clone(),
                new_diff_blocks_from_head,
                StatusWriter::new(
                    EXECUTE_HEALTH_CHECK,
                    "storage watcher for new diffs starting\n",
                ),
                Duration::ZERO,
            ),
            StorageWatcher::for_unrecognized_diffs(
                factory.component_logger("StorageWatcherUnrecognized"),
                headers.clone(),
                diffs.clone(),
                unrecognized_diff_blocks_from_head,
                StatusWriter::new(
                    EXECUTE_HEALTH_CHECK,
                    "storage watcher for unrecognized diffs starting\n",
                ),
                Duration::ZERO,
            ),
            StorageWatcher::for_pending_diffs(
                factory.component_logger("StorageWatcherPending"),
                headers.clone(),
                diffs.clone(),
                new_diff_blocks_from_head,
                StatusWriter::new(
                    EXECUTE_HEALTH_CHECK,
                    "storage watcher for pending diffs starting\n",
                ),
                Duration::ZERO,
            ),
        ];
        for watcher in &mut watchers {
            for transformer in &storage_transformers {
                watcher.add_transformer(transformer.clone());
            }
        }
        for watcher in watchers {
            info!(
                logger,
                "Executing {} storage transformers", watcher.status_to_watch()
            );
            tasks.spawn(async move { watcher.execute().await.map_err(Error::from) });
        }
    }

    if tasks.is_empty() {
        warn!(logger, "Nothing to execute; no transformers registered");
        return Ok(());
    }

    // The watchers only return on fatal errors; the first one to finish
    // takes the process down.
    while let Some(joined) = tasks.join_next().await {
        joined.map_err(Error::from)??;
    }
    Ok(())
}

pub async fn run_backfill_events(
    factory: &LoggerFactory,
    opt: &Opt,
    ending_block_number: i64,
    schema: &str,
    transformer_names: &[String],
) -> Result<(), Error> {
    let logger = factory.component_logger("BackfillEvents");
    let deps = connect(factory, opt).await?;

    let registry = registry::builtin();
    let event_transformers = registry.event_transformers(&deps.pool, transformer_names)?;
    if event_transformers.is_empty() {
        warn!(
            logger,
            "Not back-filling events because no transformers are registered"
        );
        return Ok(());
    }

    let headers: Arc<dyn HeaderRepositoryTrait> = Arc::new(HeaderRepository::new(
        deps.pool.clone(),
        deps.eth_node_id,
    ));
    let checked_headers = Arc::new(CheckedHeadersRepository::new(deps.pool.clone(), schema)?);
    let logs: Arc<dyn EventLogRepositoryTrait> =
        Arc::new(EventLogRepository::new(deps.pool.clone()));

    let mut extractor = LogExtractor::new(
        factory.component_logger("LogExtractor"),
        deps.eth,
        headers,
        checked_headers,
        logs,
    );
    for transformer in event_transformers {
        extractor.add_transformer_config(transformer.config().clone())?;
    }

    extractor.backfill_logs(ending_block_number).await?;
    info!(logger, "Completed back-filling events");
    Ok(())
}

pub async fn run_delete_header(
    factory: &LoggerFactory,
    opt: &Opt,
    block_number: i64,
) -> Result<(), Error> {
    let logger = factory.component_logger("DeleteHeader");
    let deps = connect(factory, opt).await?;
    let headers = HeaderRepository::new(deps.pool, deps.eth_node_id);
    headers.delete_header(block_number)?;
    info!(logger, "Deleted header at block {}", block_number);
    Ok(())
}

pub async fn run_reset_noncanonical_diffs(
    factory: &LoggerFactory,
    opt: &Opt,
    block_number: i64,
) -> Result<(), Error> {
    let logger = factory.component_logger("ResetNoncanonicalDiffs");
    let deps = connect(factory, opt).await?;
    let diffs = DiffRepository::new(deps.pool, deps.eth_node_id);
    diffs.mark_noncanonical_diffs_as_new(block_number)?;
    info!(
        logger,
        "Reset noncanonical diffs at block {} to new", block_number
    );
    Ok(())
}
