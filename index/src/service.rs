//! Execute queries and map hits back to entities.
use std::collections::HashSet;

use error_stack::{Result, ResultExt};
use ethevents_common::{
    query::{self, SearchQuery, MAX_PAGE_SIZE},
    schema::{Block, Entity, Log, Transaction},
    IndexerError,
};
use serde_json::{Map, Value};
use tracing::{debug, instrument};

use crate::backend::SearchBackend;

/// A page of results.
#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    pub entities: Vec<Entity>,
    /// Sort values to continue after this page, if the page is full.
    pub next: Option<Vec<Value>>,
    /// Aggregation results by name.
    pub aggregations: Map<String, Value>,
}

/// Hits fetched per request while collecting the blocks of transactions or logs.
const BLOCK_SCAN_PAGE_SIZE: usize = 100;

/// Stateless query executor, safe to share between tasks.
pub struct QueryService<B: SearchBackend> {
    backend: B,
}

impl<B> QueryService<B>
where
    B: SearchBackend,
{
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    /// Returns the entities matching the query, in order.
    ///
    /// A query without hits returns an empty list.
    #[instrument(skip_all, err(Debug))]
    pub async fn execute(&self, query: &SearchQuery) -> Result<Vec<Entity>, IndexerError> {
        Ok(self.execute_page(query).await?.entities)
    }

    /// Like [QueryService::execute], but also returns the cursor to the next page.
    pub async fn execute_page(&self, query: &SearchQuery) -> Result<Page, IndexerError> {
        let response = self
            .backend
            .search(query)
            .await
            .attach_printable("failed to execute query")?;

        let entities = response
            .hits
            .iter()
            .map(|hit| hit.to_entity())
            .collect::<Result<Vec<_>, _>>()?;

        let is_full = query
            .size
            .map(|size| response.hits.len() >= size)
            .unwrap_or(false);
        let next = if is_full && !query.sort.is_empty() {
            response.hits.last().map(|hit| hit.sort.clone())
        } else {
            None
        };

        debug!(hits = entities.len(), has_next = next.is_some(), "executed query");

        Ok(Page {
            entities,
            next,
            aggregations: response.aggregations,
        })
    }

    /// Runs the query for its aggregations only.
    pub async fn aggregate(&self, query: &SearchQuery) -> Result<Map<String, Value>, IndexerError> {
        let page = self.execute_page(query).await?;
        Ok(page.aggregations)
    }

    pub async fn by_hash_or_address(&self, value: &str) -> Result<Vec<Entity>, IndexerError> {
        let query = query::by_hash_or_address(value)?;
        self.execute(&query).await
    }

    pub async fn transactions_by_block_hash(
        &self,
        block_hash: &str,
    ) -> Result<Vec<Transaction>, IndexerError> {
        let query = query::transactions_by_block_hash(block_hash)?;
        let entities = self.execute(&query).await?;
        entities.into_iter().map(into_transaction).collect()
    }

    pub async fn latest_block(&self) -> Result<Option<Block>, IndexerError> {
        let entities = self.execute(&query::latest_block()).await?;
        entities.into_iter().next().map(into_block).transpose()
    }

    pub async fn block_by_height(&self, height: u64) -> Result<Option<Block>, IndexerError> {
        let entities = self.execute(&query::block_by_height(height)).await?;
        entities.into_iter().next().map(into_block).transpose()
    }

    pub async fn canonical_blocks_since(&self, height: u64) -> Result<Vec<Block>, IndexerError> {
        let entities = self.execute(&query::canonical_blocks_since(height)).await?;
        entities.into_iter().map(into_block).collect()
    }

    pub async fn transactions_to(&self, address: &str) -> Result<Vec<Transaction>, IndexerError> {
        let query = query::transactions_to(address)?;
        let entities = self.execute(&query).await?;
        entities.into_iter().map(into_transaction).collect()
    }

    pub async fn logs_with_signature(&self, signature: &str) -> Result<Vec<Log>, IndexerError> {
        let query = query::logs_with_signature(signature)?;
        let entities = self.execute(&query).await?;
        entities.into_iter().map(into_log).collect()
    }

    /// The most recent canonical blocks with a transaction from or to `address`.
    pub async fn blocks_with_address(
        &self,
        address: &str,
        count: usize,
    ) -> Result<Vec<Block>, IndexerError> {
        let query = query::transactions_from_or_to(address)?;
        self.blocks_of(query, count).await
    }

    /// The most recent canonical blocks with a log whose first topic is `signature`.
    pub async fn blocks_that_logged(
        &self,
        signature: &str,
        count: usize,
    ) -> Result<Vec<Block>, IndexerError> {
        let query = query::logs_with_signature(signature)?;
        self.blocks_of(query, count).await
    }

    /// The most frequent senders of transactions that emitted a log with `signature`.
    ///
    /// Only the most recent [MAX_PAGE_SIZE] logs with the signature are considered.
    pub async fn callers_for_event(
        &self,
        signature: &str,
        callers: usize,
    ) -> Result<Map<String, Value>, IndexerError> {
        let logs = query::logs_with_signature(signature)?.with_size(MAX_PAGE_SIZE)?;
        let mut seen = HashSet::new();
        let transaction_hashes = self
            .execute(&logs)
            .await?
            .into_iter()
            .map(into_log)
            .filter_map(|log| match log {
                Ok(log) if seen.insert(log.transaction_hash.clone()) => {
                    Some(Ok(log.transaction_hash))
                }
                Ok(_) => None,
                Err(err) => Some(Err(err)),
            })
            .collect::<Result<Vec<_>, _>>()?;

        debug!(
            transactions = transaction_hashes.len(),
            "collected transactions of event"
        );

        let query = query::callers_of_transactions(&transaction_hashes, callers)?;
        self.aggregate(&query).await
    }

    /// Pages through transactions or logs, newest first, until `count` distinct
    /// blocks are found. Returns the blocks, newest first.
    async fn blocks_of(&self, query: SearchQuery, count: usize) -> Result<Vec<Block>, IndexerError> {
        if count == 0 || count > MAX_PAGE_SIZE {
            return Err(IndexerError::InvalidQueryArgument)
                .attach_printable("block count must be between 1 and 10000")
                .attach_printable_lazy(|| format!("count: {count}"));
        }

        let query = query.with_size(BLOCK_SCAN_PAGE_SIZE)?;
        let mut seen = HashSet::new();
        let mut block_hashes = Vec::new();
        let mut page = self.execute_page(&query).await?;

        'pages: loop {
            for entity in &page.entities {
                let block_hash = match entity {
                    Entity::Transaction(tx) => &tx.block_hash,
                    Entity::Log(log) => &log.block_hash,
                    other => return Err(unexpected_kind("tx or log", other)),
                };
                if seen.insert(block_hash.clone()) {
                    block_hashes.push(block_hash.clone());
                    if block_hashes.len() == count {
                        break 'pages;
                    }
                }
            }

            let Some(next) = page.next.take() else {
                break;
            };
            page = self.execute_page(&query.clone().after(next)).await?;
        }

        if block_hashes.is_empty() {
            return Ok(Vec::new());
        }

        let entities = self.execute(&query::blocks_by_hash(&block_hashes)?).await?;
        entities.into_iter().map(into_block).collect()
    }
}

fn into_block(entity: Entity) -> Result<Block, IndexerError> {
    match entity {
        Entity::Block(block) => Ok(block),
        other => Err(unexpected_kind("block", &other)),
    }
}

fn into_transaction(entity: Entity) -> Result<Transaction, IndexerError> {
    match entity {
        Entity::Transaction(tx) => Ok(tx),
        other => Err(unexpected_kind("tx", &other)),
    }
}

fn into_log(entity: Entity) -> Result<Log, IndexerError> {
    match entity {
        Entity::Log(log) => Ok(log),
        other => Err(unexpected_kind("log", &other)),
    }
}

fn unexpected_kind(expected: &str, entity: &Entity) -> error_stack::Report<IndexerError> {
    error_stack::report!(IndexerError::SchemaConflict)
        .attach_printable(format!("expected {expected}, found {}", entity.kind()))
        .attach_printable(format!("id: {}", entity.id()))
}
