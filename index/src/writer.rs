//! Write normalized blocks and retire orphaned ones.
use error_stack::{Result, ResultExt};
use ethevents_common::{
    query::{BoolFilter, Field, Filter},
    schema::{Entity, EntityKind, NormalizedBlock},
    IndexerError,
};
use serde_json::{json, Map, Value};
use tracing::{debug, info, instrument};

use crate::backend::{Document, SearchBackend};

/// What happens to the transactions and logs of a retired block.
///
/// Blocks themselves are always kept and flagged as non canonical.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RetirePolicy {
    /// Flag dependents as non canonical.
    #[default]
    Flag,
    /// Delete dependents.
    Delete,
}

/// Acknowledgement of a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WriteAck {
    /// Number of documents written, updated or deleted.
    pub documents: u64,
}

/// The only component that writes to the index.
///
/// Writes are applied in the order they are issued. Every write is idempotent.
pub struct IndexWriter<B: SearchBackend> {
    backend: B,
    policy: RetirePolicy,
}

impl<B> IndexWriter<B>
where
    B: SearchBackend,
{
    pub fn new(backend: B, policy: RetirePolicy) -> Self {
        Self { backend, policy }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn policy(&self) -> RetirePolicy {
        self.policy
    }

    /// Upserts the block, then its transactions and logs.
    ///
    /// The block is written before any of its dependents so that every
    /// stored transaction references a stored block.
    #[instrument(skip_all, fields(block = %normalized.block.cursor()), err(Debug))]
    pub async fn apply(&self, normalized: &NormalizedBlock) -> Result<WriteAck, IndexerError> {
        let block = Document::from_entity(&Entity::Block(normalized.block.clone()))?;
        let transactions = normalized
            .transactions
            .iter()
            .map(|tx| Document::from_entity(&Entity::Transaction(tx.clone())))
            .collect::<Result<Vec<_>, _>>()?;
        let logs = normalized
            .logs
            .iter()
            .map(|log| Document::from_entity(&Entity::Log(log.clone())))
            .collect::<Result<Vec<_>, _>>()?;

        let block_count = self
            .backend
            .upsert(vec![block])
            .await
            .attach_printable("failed to write block")?;

        let (tx_count, log_count) = futures::try_join!(
            self.upsert_dependents(transactions),
            self.upsert_dependents(logs)
        )
        .attach_printable("failed to write block dependents")
        .attach_printable_lazy(|| format!("block: {}", normalized.block.cursor()))?;

        debug!(
            transactions = tx_count,
            logs = log_count,
            "wrote block entities"
        );

        Ok(WriteAck {
            documents: block_count + tx_count + log_count,
        })
    }

    /// Retires the dependents of the block according to the policy, then marks
    /// the block non canonical.
    ///
    /// The block is flipped last: while it is still canonical a restarted
    /// pipeline restores it and retires it again.
    #[instrument(skip(self), err(Debug))]
    pub async fn retire(&self, block_hash: &str) -> Result<WriteAck, IndexerError> {
        let dependents = self
            .retire_dependents(Filter::term(Field::BlockHash, block_hash))
            .await
            .attach_printable_lazy(|| format!("block hash: {block_hash}"))?;

        let block_filter = BoolFilter::new()
            .filter(Filter::ids([block_hash]))
            .filter(Filter::term(Field::Type, EntityKind::Block.as_str()));

        let blocks = self
            .backend
            .update_by_query(&block_filter.into(), &non_canonical_patch())
            .await
            .attach_printable("failed to retire block")
            .attach_printable_lazy(|| format!("block hash: {block_hash}"))?;

        info!(block_hash, dependents, "retired block");

        Ok(WriteAck {
            documents: blocks + dependents,
        })
    }

    /// Retires every canonical block below `height`, together with its dependents.
    #[instrument(skip(self), err(Debug))]
    pub async fn retire_below(&self, height: u64) -> Result<WriteAck, IndexerError> {
        let dependents_filter = BoolFilter::new()
            .filter(Filter::term(Field::Canonical, true))
            .filter(Filter::range(Field::BlockHeight, None, Some(json!(height))));

        let dependents = self
            .retire_dependents(dependents_filter.into())
            .await
            .attach_printable_lazy(|| format!("below height: {height}"))?;

        let block_filter = BoolFilter::new()
            .filter(Filter::term(Field::Type, EntityKind::Block.as_str()))
            .filter(Filter::term(Field::Canonical, true))
            .filter(Filter::range(Field::Height, None, Some(json!(height))));

        let blocks = self
            .backend
            .update_by_query(&block_filter.into(), &non_canonical_patch())
            .await
            .attach_printable("failed to retire blocks")
            .attach_printable_lazy(|| format!("below height: {height}"))?;

        info!(height, blocks, dependents, "retired blocks below height");

        Ok(WriteAck {
            documents: blocks + dependents,
        })
    }

    async fn upsert_dependents(&self, documents: Vec<Document>) -> Result<u64, IndexerError> {
        if documents.is_empty() {
            return Ok(0);
        }
        self.backend.upsert(documents).await
    }

    async fn retire_dependents(&self, filter: Filter) -> Result<u64, IndexerError> {
        match self.policy {
            RetirePolicy::Flag => self
                .backend
                .update_by_query(&filter, &non_canonical_patch())
                .await
                .attach_printable("failed to flag block dependents"),
            RetirePolicy::Delete => self
                .backend
                .delete_by_query(&filter)
                .await
                .attach_printable("failed to delete block dependents"),
        }
    }
}

fn non_canonical_patch() -> Map<String, Value> {
    let mut patch = Map::new();
    patch.insert(Field::Canonical.as_str().to_string(), Value::Bool(false));
    patch
}

impl std::str::FromStr for RetirePolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "flag" => Ok(RetirePolicy::Flag),
            "delete" => Ok(RetirePolicy::Delete),
            other => Err(format!("unknown retire policy: {other}")),
        }
    }
}
