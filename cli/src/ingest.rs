use clap::Args;
use error_stack::{Result, ResultExt};
use ethevents_common::IndexerError;
use ethevents_index::{cli::MEMORY_BACKEND_URL, BackendArgs};
use ethevents_ingestion::{IngestionArgs, IngestionPipeline, RpcArgs};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Args, Debug)]
pub struct IngestCommand {
    #[clap(flatten)]
    rpc: RpcArgs,
    #[clap(flatten)]
    backend: BackendArgs,
    #[clap(flatten)]
    ingestion: IngestionArgs,
}

impl IngestCommand {
    pub async fn run(self, ct: CancellationToken) -> Result<(), IndexerError> {
        let source = self.rpc.to_json_rpc_source()?;
        let backend = self.backend.to_search_backend()?;
        let policy = self.backend.to_retire_policy()?;
        let options = self.ingestion.to_ingestion_options()?;

        if self.backend.backend_url == MEMORY_BACKEND_URL {
            warn!("using the in-memory backend, the index is lost on exit");
        }

        info!(
            rpc = %self.rpc.rpc_url,
            backend = %self.backend.backend_url,
            index = %self.backend.backend_index,
            starting_block = options.starting_block,
            "starting ingestion"
        );

        backend
            .ensure_index()
            .await
            .attach_printable("failed to create index")?;

        let pipeline = IngestionPipeline::new(source, backend, policy, options)?;
        pipeline.run(ct).await
    }
}
