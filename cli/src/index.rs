use clap::Args;
use error_stack::{Result, ResultExt};
use ethevents_common::IndexerError;
use ethevents_index::BackendArgs;
use tracing::info;

#[derive(Args, Debug)]
pub struct CreateIndexCommand {
    #[clap(flatten)]
    backend: BackendArgs,
}

impl CreateIndexCommand {
    pub async fn run(self) -> Result<(), IndexerError> {
        let backend = self.backend.to_search_backend()?;

        backend
            .ensure_index()
            .await
            .attach_printable("failed to create index")
            .attach_printable_lazy(|| format!("index: {}", self.backend.backend_index))?;

        info!(index = %self.backend.backend_index, "index ready");

        Ok(())
    }
}
