use structopt::StructOpt;

#[derive(Clone, Debug, StructOpt)]
#[structopt(
    name = "delver-node",
    about = "Indexes block headers, event logs and contract storage diffs into Postgres"
)]
pub struct Opt {
    #[structopt(
        long,
        value_name = "URL",
        env = "DATABASE_URL",
        help = "Location of the Postgres database used for storing indexed data"
    )]
    pub postgres_url: String,
    #[structopt(
        long,
        value_name = "URL",
        env = "ETHEREUM_RPC",
        help = "HTTP JSON-RPC endpoint of the Ethereum node"
    )]
    pub ethereum_rpc: String,
    #[structopt(
        long,
        default_value = "10",
        value_name = "SIZE",
        env = "STORE_CONNECTION_POOL_SIZE",
        help = "Limits the number of connections in the store's connection pool"
    )]
    pub store_connection_pool_size: u32,
    #[structopt(long, help = "Enable debug logging")]
    pub debug: bool,
    #[structopt(subcommand)]
    pub cmd: Command,
}

#[derive(Clone, Debug, StructOpt)]
pub enum Command {
    /// Sync block headers: validate the chain tip and backfill history
    HeaderSync {
        #[structopt(
            long,
            default_value = "0",
            value_name = "BLOCK",
            help = "Block number to start syncing from"
        )]
        starting_block_number: i64,
        #[structopt(
            long,
            default_value = "1000",
            value_name = "MILLISECONDS",
            env = "ETHEREUM_POLLING_INTERVAL",
            help = "How often to poll the Ethereum node for new blocks"
        )]
        polling_interval: u64,
    },
    /// Run the event and storage watchers over the registered transformers
    Execute {
        #[structopt(long, help = "Re-check headers for watched events")]
        recheck_headers: bool,
        #[structopt(
            long,
            default_value = "7",
            value_name = "SECONDS",
            help = "Interval between retries on execution error"
        )]
        retry_interval: u64,
        #[structopt(
            long,
            default_value = "5",
            value_name = "COUNT",
            help = "Maximum number of unexpected errors to allow (with retries) before exiting"
        )]
        max_unexpected_errs: usize,
        #[structopt(
            long,
            default_value = "-1",
            value_name = "BLOCKS",
            help = "Number of blocks from the head of the chain to start processing new diffs; \
                    -1 processes all diffs"
        )]
        new_diff_blocks_from_head: i64,
        #[structopt(
            long,
            default_value = "-1",
            value_name = "BLOCKS",
            help = "Number of blocks from the head of the chain to start processing unrecognized \
                    diffs; -1 processes all diffs"
        )]
        unrecognized_diff_blocks_from_head: i64,
        #[structopt(
            long,
            default_value = "transformers",
            value_name = "SCHEMA",
            help = "Database schema holding the transformer set's checked_headers table"
        )]
        schema: String,
        #[structopt(
            long,
            use_delimiter = true,
            value_name = "NAME,",
            help = "Registered transformer names to run; defaults to every registered transformer"
        )]
        transformers: Vec<String>,
    },
    /// One-shot log extraction for headers checked before a transformer was added
    BackfillEvents {
        #[structopt(long, value_name = "BLOCK", help = "Last block to back-fill events for")]
        ending_block_number: i64,
        #[structopt(
            long,
            default_value = "transformers",
            value_name = "SCHEMA",
            help = "Database schema holding the transformer set's checked_headers table"
        )]
        schema: String,
        #[structopt(
            long,
            use_delimiter = true,
            value_name = "NAME,",
            help = "Registered transformer names to back-fill; defaults to every registered transformer"
        )]
        transformers: Vec<String>,
    },
    /// Delete a non-canonical header so the validator can replace it
    DeleteHeader {
        #[structopt(long, value_name = "BLOCK", help = "Block number of the header to delete")]
        block_number: i64,
    },
    /// Reset noncanonical diffs at a block back to new
    ResetNoncanonicalDiffs {
        #[structopt(
            long,
            value_name = "BLOCK",
            help = "Block number whose noncanonical diffs should be marked new"
        )]
        block_number: i64,
    },
}
