//! Entity storage: search backends, the index writer and the query service.
pub mod backend;
pub mod cli;
pub mod elasticsearch;
pub mod memory;
mod service;
mod writer;

pub use self::backend::{Document, Hit, SearchBackend, SearchResponse};
pub use self::cli::BackendArgs;
pub use self::elasticsearch::{ElasticsearchBackend, ElasticsearchOptions, RefreshPolicy};
pub use self::memory::InMemoryBackend;
pub use self::service::{Page, QueryService};
pub use self::writer::{IndexWriter, RetirePolicy, WriteAck};
