//! Ingest Ethereum blocks into the search index.
pub mod cli;
pub mod jsonrpc;
mod pipeline;
pub mod source;
pub mod state;
pub mod testing;

pub use self::cli::{IngestionArgs, RpcArgs};
pub use self::jsonrpc::{JsonRpcSource, JsonRpcSourceOptions};
pub use self::pipeline::{IngestionOptions, IngestionPipeline, StepOutcome};
pub use self::source::ChainSource;
pub use self::state::{ChainState, DEFAULT_MAX_REORG_DEPTH};
