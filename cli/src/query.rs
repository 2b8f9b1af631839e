use clap::{Args, Subcommand};
use error_stack::{Result, ResultExt};
use ethevents_common::{
    query::{self, SearchQuery},
    schema::EntityKind,
    IndexerError,
};
use ethevents_index::{BackendArgs, QueryService};
use serde_json::Value;
use tracing::info;

#[derive(Args, Debug)]
pub struct QueryCommand {
    #[clap(flatten)]
    backend: BackendArgs,
    /// Print the query body instead of running it.
    #[arg(long, global = true)]
    print_query: bool,
    /// Maximum number of results.
    #[arg(long, global = true)]
    size: Option<usize>,
    /// Return the results after these sort values, as a JSON array.
    #[arg(long, global = true)]
    after: Option<String>,
    #[command(subcommand)]
    query: QueryKind,
}

#[derive(Subcommand, Debug)]
enum QueryKind {
    /// Entities with the given hash, sender or recipient.
    Lookup { value: String },
    /// Transactions of the block with the given hash.
    BlockTransactions { block_hash: String },
    /// The most recent canonical block.
    LatestBlock,
    /// The canonical block at the given height.
    Block { height: u64 },
    /// Transactions sent to the address.
    TransactionsTo { address: String },
    /// Transactions sent from or to the address.
    Transactions { address: String },
    /// Logs whose first topic is the given signature.
    Logs { signature: String },
    /// Entities with the given ids.
    Ids {
        #[arg(required = true)]
        ids: Vec<String>,
    },
    /// Entities of a type (block, tx or log) with a timestamp in `[from, to)`.
    TimeRange {
        kind: EntityKind,
        from: u64,
        to: u64,
    },
    /// Most recent blocks with a transaction from or to the address. `--size` blocks, default 10.
    BlocksWithAddress { address: String },
    /// Most recent blocks with a log whose first topic is the signature. `--size` blocks, default 10.
    BlocksThatLogged { signature: String },
    /// Gas price statistics and histogram of transactions with a timestamp in `[from, to)`.
    GasPrices {
        from: u64,
        to: u64,
        /// Histogram bucket width, in wei.
        #[arg(long, default_value_t = 1_000_000_000)]
        interval: u64,
    },
    /// Most frequent event topics with their most frequent contracts.
    EventTopics {
        #[arg(long, default_value_t = 10)]
        topics: usize,
        #[arg(long, default_value_t = 10)]
        contracts: usize,
        /// Only count the first topic of every log.
        #[arg(long)]
        only_signatures: bool,
    },
    /// Most frequent senders of transactions that emitted the event.
    EventCallers {
        signature: String,
        #[arg(long, default_value_t = 10)]
        callers: usize,
    },
}

/// Blocks returned by the block intents when `--size` is missing.
const DEFAULT_BLOCK_COUNT: usize = 10;

impl QueryCommand {
    pub async fn run(self) -> Result<(), IndexerError> {
        let query = self.to_search_query()?;

        if self.print_query {
            println!("{}", query.to_json());
            return Ok(());
        }

        let service = QueryService::new(self.backend.to_search_backend()?);
        let block_count = self.size.unwrap_or(DEFAULT_BLOCK_COUNT);

        match &self.query {
            QueryKind::BlocksWithAddress { address } => {
                let blocks = service.blocks_with_address(address, block_count).await?;
                print_lines(blocks.iter())?;
            }
            QueryKind::BlocksThatLogged { signature } => {
                let blocks = service.blocks_that_logged(signature, block_count).await?;
                print_lines(blocks.iter())?;
            }
            QueryKind::EventCallers { signature, callers } => {
                let aggregations = service.callers_for_event(signature, *callers).await?;
                print_lines(std::iter::once(&aggregations))?;
            }
            _ => {
                let page = service.execute_page(&query).await?;
                print_lines(page.entities.iter())?;

                if !page.aggregations.is_empty() {
                    print_lines(std::iter::once(&page.aggregations))?;
                }

                if let Some(next) = page.next {
                    info!(after = %serde_json::Value::from(next), "more results available");
                }
            }
        }

        Ok(())
    }

    fn to_search_query(&self) -> Result<SearchQuery, IndexerError> {
        let mut query = self.query.to_search_query()?;

        if let Some(size) = self.size {
            query = query.with_size(size)?;
        }

        if let Some(after) = &self.after {
            let values = serde_json::from_str::<Vec<Value>>(after)
                .change_context(IndexerError::InvalidQueryArgument)
                .attach_printable("after must be a JSON array")
                .attach_printable_lazy(|| format!("after: {after}"))?;
            query = query.after(values);
        }

        Ok(query)
    }
}

impl QueryKind {
    fn to_search_query(&self) -> Result<SearchQuery, IndexerError> {
        match self {
            QueryKind::Lookup { value } => query::by_hash_or_address(value),
            QueryKind::BlockTransactions { block_hash } => {
                query::transactions_by_block_hash(block_hash)
            }
            QueryKind::LatestBlock => Ok(query::latest_block()),
            QueryKind::Block { height } => Ok(query::block_by_height(*height)),
            QueryKind::TransactionsTo { address } => query::transactions_to(address),
            QueryKind::Transactions { address } => query::transactions_from_or_to(address),
            QueryKind::Logs { signature } => query::logs_with_signature(signature),
            QueryKind::Ids { ids } => query::by_id(ids),
            QueryKind::TimeRange { kind, from, to } => query::in_time_range(*kind, *from, *to),
            // Block and caller intents run this query first.
            QueryKind::BlocksWithAddress { address } => query::transactions_from_or_to(address),
            QueryKind::BlocksThatLogged { signature } | QueryKind::EventCallers { signature, .. } => {
                query::logs_with_signature(signature)
            }
            QueryKind::GasPrices { from, to, interval } => query::gas_prices(*from, *to, *interval),
            QueryKind::EventTopics {
                topics,
                contracts,
                only_signatures,
            } => query::common_event_topics(*topics, *contracts, *only_signatures),
        }
    }
}

/// Prints every item as a JSON line.
fn print_lines<'a, T>(items: impl Iterator<Item = &'a T>) -> Result<(), IndexerError>
where
    T: serde::Serialize + 'a,
{
    for item in items {
        let line = serde_json::to_string(item)
            .change_context(IndexerError::SchemaConflict)
            .attach_printable("failed to serialize result")?;
        println!("{line}");
    }
    Ok(())
}
