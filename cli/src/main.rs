mod index;
mod ingest;
mod query;

use std::process::ExitCode;

use clap::{Parser, Subcommand};
use error_stack::{Result, ResultExt};
use ethevents_common::{IndexerError, ReportExt};
use ethevents_observability::init_tracing;
use tokio_util::sync::CancellationToken;
use tracing::info;

use self::{index::CreateIndexCommand, ingest::IngestCommand, query::QueryCommand};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Ingest blocks from a JSON-RPC node into the index.
    Ingest(IngestCommand),
    /// Create the index and its mappings, if missing.
    CreateIndex(CreateIndexCommand),
    /// Run a query against the index.
    Query(QueryCommand),
}

#[tokio::main]
async fn main() -> ExitCode {
    run_with_args().await.to_exit_code()
}

async fn run_with_args() -> Result<(), IndexerError> {
    // Load .env before parsing so that it can provide defaults for the arguments.
    load_dotenv()?;

    let args = Cli::parse();

    init_tracing()
        .change_context(IndexerError::Configuration)
        .attach_printable("failed to initialize tracing")?;

    let ct = CancellationToken::new();

    ctrlc::set_handler({
        let ct = ct.clone();
        move || {
            info!("SIGINT received");
            ct.cancel();
        }
    })
    .change_context(IndexerError::Configuration)
    .attach_printable("failed to set SIGINT handler")?;

    args.run(ct).await
}

impl Cli {
    async fn run(self, ct: CancellationToken) -> Result<(), IndexerError> {
        match self.command {
            Command::Ingest(command) => command.run(ct).await,
            Command::CreateIndex(command) => command.run().await,
            Command::Query(command) => command.run().await,
        }
    }
}

fn load_dotenv() -> Result<(), IndexerError> {
    match dotenvy::dotenv() {
        Ok(_) => Ok(()),
        Err(err) if err.not_found() => Ok(()),
        Err(err) => Err(err)
            .change_context(IndexerError::Configuration)
            .attach_printable("failed to load .env file"),
    }
}
