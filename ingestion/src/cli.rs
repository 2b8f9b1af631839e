use std::time::Duration;

use clap::Args;
use error_stack::{Result, ResultExt};
use ethevents_common::IndexerError;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use url::Url;

use crate::{
    jsonrpc::{JsonRpcSource, JsonRpcSourceOptions},
    pipeline::IngestionOptions,
};

#[derive(Args, Debug)]
pub struct IngestionArgs {
    /// First block to ingest when the index is empty.
    #[clap(
        long = "ingestion.starting-block",
        env = "ETHEVENTS_INGESTION_STARTING_BLOCK",
        default_value = "0"
    )]
    pub ingestion_starting_block: u64,
    /// Stop ingesting after this block.
    #[clap(
        long = "ingestion.ending-block",
        env = "ETHEVENTS_INGESTION_ENDING_BLOCK"
    )]
    pub ingestion_ending_block: Option<u64>,
    /// Number of blocks on top of a block before it's ingested.
    #[clap(
        long = "ingestion.confirmations",
        env = "ETHEVENTS_INGESTION_CONFIRMATIONS",
        default_value = "0"
    )]
    pub ingestion_confirmations: u64,
    /// Deepest reorg the ingestion can recover from.
    #[clap(
        long = "ingestion.max-reorg-depth",
        env = "ETHEVENTS_INGESTION_MAX_REORG_DEPTH",
        default_value = "128"
    )]
    pub ingestion_max_reorg_depth: usize,
    /// Retire blocks older than this many blocks from the last ingested block.
    #[clap(
        long = "ingestion.prune-depth",
        env = "ETHEVENTS_INGESTION_PRUNE_DEPTH"
    )]
    pub ingestion_prune_depth: Option<u64>,
    /// How often to poll for new blocks once caught up, for example "3s" or "500ms".
    #[clap(
        long = "ingestion.poll-interval",
        env = "ETHEVENTS_INGESTION_POLL_INTERVAL",
        default_value = "3s"
    )]
    pub ingestion_poll_interval: String,
    /// How many times to try a request before giving up.
    #[clap(
        long = "ingestion.max-attempts",
        env = "ETHEVENTS_INGESTION_MAX_ATTEMPTS",
        default_value = "10"
    )]
    pub ingestion_max_attempts: u32,
    /// Minimum delay between retries.
    #[clap(
        long = "ingestion.retry-min-delay",
        env = "ETHEVENTS_INGESTION_RETRY_MIN_DELAY",
        default_value = "100ms"
    )]
    pub ingestion_retry_min_delay: String,
    /// Maximum delay between retries.
    #[clap(
        long = "ingestion.retry-max-delay",
        env = "ETHEVENTS_INGESTION_RETRY_MAX_DELAY",
        default_value = "10s"
    )]
    pub ingestion_retry_max_delay: String,
}

#[derive(Args, Debug)]
pub struct RpcArgs {
    /// Ethereum JSON-RPC URL.
    #[arg(
        long = "rpc.url",
        env = "ETHEVENTS_RPC_URL",
        default_value = "http://localhost:8545"
    )]
    pub rpc_url: String,

    /// Request timeout, for example "20s".
    #[arg(long = "rpc.timeout", env = "ETHEVENTS_RPC_TIMEOUT", default_value = "20s")]
    pub rpc_timeout: String,

    /// Headers to send with the requests, as `name: value`.
    #[arg(long = "rpc.headers", env = "ETHEVENTS_RPC_HEADERS")]
    pub rpc_headers: Vec<String>,
}

impl IngestionArgs {
    pub fn to_ingestion_options(&self) -> Result<IngestionOptions, IndexerError> {
        let poll_interval = parse_duration("poll interval", &self.ingestion_poll_interval)?;
        let min_retry_delay =
            parse_duration("retry min delay", &self.ingestion_retry_min_delay)?;
        let max_retry_delay =
            parse_duration("retry max delay", &self.ingestion_retry_max_delay)?;

        let options = IngestionOptions {
            starting_block: self.ingestion_starting_block,
            ending_block: self.ingestion_ending_block,
            confirmations: self.ingestion_confirmations,
            max_reorg_depth: self.ingestion_max_reorg_depth,
            prune_depth: self.ingestion_prune_depth,
            poll_interval,
            max_attempts: self.ingestion_max_attempts,
            min_retry_delay,
            max_retry_delay,
        };

        options.validate()?;

        Ok(options)
    }
}

impl RpcArgs {
    pub fn to_json_rpc_source(&self) -> Result<JsonRpcSource, IndexerError> {
        let url = self
            .rpc_url
            .parse::<Url>()
            .change_context(IndexerError::Configuration)
            .attach_printable("failed to parse RPC URL")
            .attach_printable_lazy(|| format!("url: {}", self.rpc_url))?;

        let headers = {
            let mut headers = HeaderMap::default();

            for kv in self.rpc_headers.iter() {
                let (key, value) = kv
                    .split_once(':')
                    .ok_or(IndexerError::Configuration)
                    .attach_printable("invalid header")
                    .attach_printable_lazy(|| format!("header: {}", kv))?;

                headers.insert(
                    key.trim()
                        .parse::<HeaderName>()
                        .change_context(IndexerError::Configuration)
                        .attach_printable("invalid header name")
                        .attach_printable_lazy(|| format!("header name: {}", key))?,
                    value
                        .trim()
                        .parse::<HeaderValue>()
                        .change_context(IndexerError::Configuration)
                        .attach_printable("invalid header value")
                        .attach_printable_lazy(|| format!("header value: {}", value))?,
                );
            }

            headers
        };

        let timeout = parse_duration("rpc timeout", &self.rpc_timeout)?;
        let options = JsonRpcSourceOptions { timeout, headers };

        JsonRpcSource::new(url, options)
    }
}

fn parse_duration(name: &str, value: &str) -> Result<Duration, IndexerError> {
    duration_str::parse_std(value).or_else(|err| {
        Err(IndexerError::Configuration)
            .attach_printable_lazy(|| format!("failed to parse {name}"))
            .attach_printable(format!("error: {}", err))
    })
}
