use std::sync::Arc;
use std::time::Duration;

use slog::{trace, warn, Logger};
use thiserror::Error;

use delver::util::status_writer::StatusWriter;

use crate::delegator::{DelegateError, DelegateOutcome, Delegator};
use crate::extractor::{ExtractError, Extractor, HeaderRecheck};

pub const DEFAULT_MAX_UNEXPECTED_ERRORS: usize = 5;
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(7);

#[derive(Error, Debug)]
pub enum EventWatcherError {
    #[error("error confirming health check: {0}")]
    HealthCheck(#[from] std::io::Error),

    #[error("too many unexpected errors extracting logs: {0}")]
    TooManyErrors(#[source] ExtractError),

    #[error(transparent)]
    Extract(ExtractError),

    #[error(transparent)]
    Delegate(#[from] DelegateError),
}

/// Supervises the extract/delegate cycle: transient extraction errors are
/// retried up to a bound, anything else tears the process down. Sleeps
/// when both sides report they are caught up.
pub struct EventWatcher {
    logger: Logger,
    extractor: Arc<dyn Extractor>,
    delegator: Arc<dyn Delegator>,
    max_unexpected_errors: usize,
    retry_interval: Duration,
    status_writer: StatusWriter,
}

impl EventWatcher {
    pub fn new(
        logger: Logger,
        extractor: Arc<dyn Extractor>,
        delegator: Arc<dyn Delegator>,
        max_unexpected_errors: usize,
        retry_interval: Duration,
        status_writer: StatusWriter,
    ) -> Self {
        EventWatcher {
            logger,
            extractor,
            delegator,
            max_unexpected_errors,
            retry_interval,
            status_writer,
        }
    }

    pub async fn execute(&self, recheck: HeaderRecheck) -> Result<(), EventWatcherError> {
        self.status_writer.write()?;

        let mut unexpected_errors = 0;
        loop {
            let headers_found = match self.extractor.extract_logs(recheck).await {
                Ok(found) => found,
                Err(err) if err.is_transient() => {
                    unexpected_errors += 1;
                    if unexpected_errors > self.max_unexpected_errors {
                        return Err(EventWatcherError::TooManyErrors(err));
                    }
                    warn!(
                        self.logger,
                        "Retrying after transient extraction error: {}", err;
                        "attempt" => unexpected_errors,
                    );
                    tokio::time::sleep(self.retry_interval).await;
                    continue;
                }
                Err(err) => return Err(EventWatcherError::Extract(err)),
            };

            let delegated = self.delegator.delegate_logs()?;
            unexpected_errors = 0;

            if delegated == DelegateOutcome::NoLogs && !headers_found {
                trace!(self.logger, "Caught up; sleeping before the next cycle");
                tokio::time::sleep(self.retry_interval).await;
            }
        }
    }
}
