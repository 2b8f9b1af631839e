//! The search backend contract.
use std::sync::Arc;

use async_trait::async_trait;
use error_stack::{Result, ResultExt};
use ethevents_common::{
    query::{Filter, SearchQuery},
    schema::Entity,
    IndexerError,
};
use serde_json::{Map, Value};

/// A document to store, keyed by its id.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub body: Value,
}

/// A search hit.
#[derive(Debug, Clone, PartialEq)]
pub struct Hit {
    pub id: String,
    pub source: Value,
    /// Sort values of the hit, used to continue after it.
    pub sort: Vec<Value>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchResponse {
    pub hits: Vec<Hit>,
    /// Aggregation results by name, in the backend's response format.
    pub aggregations: Map<String, Value>,
}

/// Storage and query engine for entity documents.
///
/// Implementations return [IndexerError::BackendUnavailable] for errors that can be
/// retried and [IndexerError::SchemaConflict] when a request is rejected.
#[async_trait]
pub trait SearchBackend: Send + Sync {
    /// Creates the index and its mappings if they don't exist yet.
    async fn ensure_index(&self) -> Result<(), IndexerError>;

    /// Returns the hits matching the query, in the query's sort order.
    async fn search(&self, query: &SearchQuery) -> Result<SearchResponse, IndexerError>;

    /// Inserts or replaces the documents. Returns the number of documents written.
    async fn upsert(&self, documents: Vec<Document>) -> Result<u64, IndexerError>;

    /// Sets the fields of `patch` on every document matching `filter`.
    async fn update_by_query(
        &self,
        filter: &Filter,
        patch: &Map<String, Value>,
    ) -> Result<u64, IndexerError>;

    /// Deletes every document matching `filter`.
    async fn delete_by_query(&self, filter: &Filter) -> Result<u64, IndexerError>;
}

impl Document {
    pub fn from_entity(entity: &Entity) -> Result<Self, IndexerError> {
        let body = serde_json::to_value(entity)
            .change_context(IndexerError::SchemaConflict)
            .attach_printable("failed to serialize entity")
            .attach_printable_lazy(|| format!("id: {}", entity.id()))?;

        Ok(Document {
            id: entity.id().to_string(),
            body,
        })
    }
}

impl Hit {
    /// Deserializes the hit into an entity.
    pub fn to_entity(&self) -> Result<Entity, IndexerError> {
        serde_json::from_value(self.source.clone())
            .change_context(IndexerError::SchemaConflict)
            .attach_printable("document does not match the entity schema")
            .attach_printable_lazy(|| format!("id: {}", self.id))
    }
}

#[async_trait]
impl<B> SearchBackend for Arc<B>
where
    B: SearchBackend + ?Sized,
{
    async fn ensure_index(&self) -> Result<(), IndexerError> {
        self.as_ref().ensure_index().await
    }

    async fn search(&self, query: &SearchQuery) -> Result<SearchResponse, IndexerError> {
        self.as_ref().search(query).await
    }

    async fn upsert(&self, documents: Vec<Document>) -> Result<u64, IndexerError> {
        self.as_ref().upsert(documents).await
    }

    async fn update_by_query(
        &self,
        filter: &Filter,
        patch: &Map<String, Value>,
    ) -> Result<u64, IndexerError> {
        self.as_ref().update_by_query(filter, patch).await
    }

    async fn delete_by_query(&self, filter: &Filter) -> Result<u64, IndexerError> {
        self.as_ref().delete_by_query(filter).await
    }
}
