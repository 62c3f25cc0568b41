use slog::{crit, info};
use structopt::StructOpt;

use delver::log::LoggerFactory;

mod launcher;
mod opt;
mod registry;

use opt::{Command, Opt};

#[tokio::main]
async fn main() {
    let opt = Opt::from_args();
    let logger = delver::log::logger(opt.debug);
    let factory = LoggerFactory::new(logger.clone());

    let result = match opt.cmd.clone() {
        Command::HeaderSync {
            starting_block_number,
            polling_interval,
        } => {
            launcher::run_header_sync(&factory, &opt, starting_block_number, polling_interval)
                .await
        }
        Command::Execute {
            recheck_headers,
            retry_interval,
            max_unexpected_errs,
            new_diff_blocks_from_head,
            unrecognized_diff_blocks_from_head,
            schema,
            transformers,
        } => {
            launcher::run_execute(
                &factory,
                &opt,
                recheck_headers,
                retry_interval,
                max_unexpected_errs,
                new_diff_blocks_from_head,
                unrecognized_diff_blocks_from_head,
                &schema,
                &transformers,
            )
            .await
        }
        Command::BackfillEvents {
            ending_block_number,
            schema,
            transformers,
        } => {
            launcher::run_backfill_events(
                &factory,
                &opt,
                ending_block_number,
                &schema,
                &transformers,
            )
            .await
        }
        Command::DeleteHeader { block_number } => {
            launcher::run_delete_header(&factory, &opt, block_number).await
        }
        Command::ResetNoncanonicalDiffs { block_number } => {
            launcher::run_reset_noncanonical_diffs(&factory, &opt, block_number).await
        }
    };

    match result {
        Ok(()) => info!(logger, "Done"),
        Err(e) => {
            crit!(logger, "Fatal error: {:#}", e);
            std::process::exit(1);
        }
    }
}
