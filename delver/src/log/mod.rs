use std::env;

use slog::{o, Drain, FilterLevel, Logger};

/// Creates the root logger: terminal output behind an async drain, with
/// the level taken from `--debug` and refined via `DELVER_LOG`.
pub fn logger(show_debug: bool) -> Logger {
    let decorator = slog_term::TermDecorator::new().build();
    let drain = slog_term::FullFormat::new(decorator)
        .use_utc_timestamp()
        .build()
        .fuse();
    let drain = slog_envlogger::LogBuilder::new(drain)
        .filter(
            None,
            if show_debug {
                FilterLevel::Debug
            } else {
                FilterLevel::Info
            },
        )
        .parse(env::var("DELVER_LOG").unwrap_or_default().as_str())
        .build()
        .fuse();
    let drain = slog_async::Async::new(drain).chan_size(20000).build().fuse();
    Logger::root(drain, o!())
}

/// Factory for per-component child loggers.
#[derive(Clone)]
pub struct LoggerFactory {
    parent: Logger,
}

impl LoggerFactory {
    pub fn new(logger: Logger) -> Self {
        Self { parent: logger }
    }

    pub fn with_parent(&self, parent: Logger) -> Self {
        Self { parent }
    }

    pub fn component_logger(&self, component: &str) -> Logger {
        self.parent.new(o!("component" => component.to_string()))
    }
}
