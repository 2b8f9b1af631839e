use std::sync::Arc;

use clap::Args;
use error_stack::{Result, ResultExt};
use ethevents_common::IndexerError;
use url::Url;

use crate::{
    backend::SearchBackend,
    elasticsearch::{ElasticsearchBackend, ElasticsearchOptions, RefreshPolicy},
    memory::InMemoryBackend,
    writer::RetirePolicy,
};

/// Url that selects the in-memory backend.
pub const MEMORY_BACKEND_URL: &str = "memory://";

#[derive(Args, Debug)]
pub struct BackendArgs {
    /// Search backend URL, or `memory://` to keep the index in memory.
    #[clap(
        long = "backend.url",
        env = "ETHEVENTS_BACKEND_URL",
        default_value = "http://localhost:9200"
    )]
    pub backend_url: String,
    /// Name of the index storing the entities.
    #[clap(
        long = "backend.index",
        env = "ETHEVENTS_BACKEND_INDEX",
        default_value = "ethereum"
    )]
    pub backend_index: String,
    /// What to do with the transactions and logs of retired blocks, `flag` or `delete`.
    #[clap(
        long = "backend.retire-policy",
        env = "ETHEVENTS_BACKEND_RETIRE_POLICY",
        default_value = "flag"
    )]
    pub backend_retire_policy: String,
    /// When writes become visible to queries, `none`, `wait-for` or `immediate`.
    #[clap(
        long = "backend.refresh",
        env = "ETHEVENTS_BACKEND_REFRESH",
        default_value = "wait-for"
    )]
    pub backend_refresh: String,
    /// Request timeout, for example "20s".
    #[clap(
        long = "backend.timeout",
        env = "ETHEVENTS_BACKEND_TIMEOUT",
        default_value = "20s"
    )]
    pub backend_timeout: String,
}

impl BackendArgs {
    pub fn to_search_backend(&self) -> Result<Arc<dyn SearchBackend>, IndexerError> {
        if self.backend_url == MEMORY_BACKEND_URL {
            return Ok(Arc::new(InMemoryBackend::new()));
        }

        let options = self.to_elasticsearch_options()?;
        let backend = ElasticsearchBackend::new(options)?;
        Ok(Arc::new(backend))
    }

    pub fn to_elasticsearch_options(&self) -> Result<ElasticsearchOptions, IndexerError> {
        let url = self
            .backend_url
            .parse::<Url>()
            .change_context(IndexerError::Configuration)
            .attach_printable("failed to parse backend URL")
            .attach_printable_lazy(|| format!("url: {}", self.backend_url))?;

        if self.backend_index.trim().is_empty() {
            return Err(IndexerError::Configuration).attach_printable("index name is empty");
        }

        let refresh = self.backend_refresh.parse::<RefreshPolicy>().or_else(|err| {
            Err(IndexerError::Configuration)
                .attach_printable("failed to parse refresh policy")
                .attach_printable(format!("error: {}", err))
        })?;

        let timeout = duration_str::parse_std(&self.backend_timeout).or_else(|err| {
            Err(IndexerError::Configuration)
                .attach_printable("failed to parse backend timeout")
                .attach_printable(format!("error: {}", err))
        })?;

        Ok(ElasticsearchOptions {
            url,
            index: self.backend_index.clone(),
            timeout,
            refresh,
        })
    }

    pub fn to_retire_policy(&self) -> Result<RetirePolicy, IndexerError> {
        self.backend_retire_policy
            .parse::<RetirePolicy>()
            .or_else(|err| {
                Err(IndexerError::Configuration)
                    .attach_printable("failed to parse retire policy")
                    .attach_printable(format!("error: {}", err))
            })
    }
}
