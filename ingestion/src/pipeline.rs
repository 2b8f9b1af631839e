//! Pull blocks from the chain source and keep the index on the canonical chain.
use std::{future::Future, time::Duration};

use error_stack::{Result, ResultExt};
use ethevents_common::{
    normalize, query::MAX_PAGE_SIZE, schema::NormalizedBlock, BlockHeader, IndexerError,
    IndexerErrorExt,
};
use ethevents_index::{IndexWriter, QueryService, RetirePolicy, SearchBackend};
use exponential_backoff::Backoff;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    source::ChainSource,
    state::{ChainState, DEFAULT_MAX_REORG_DEPTH},
};

#[derive(Debug, Clone)]
pub struct IngestionOptions {
    /// First block to ingest when the index is empty.
    pub starting_block: u64,
    /// Stop after this block is ingested.
    pub ending_block: Option<u64>,
    /// Only ingest blocks that have at least this many blocks on top of them.
    pub confirmations: u64,
    /// How many headers to keep to walk back a reorg.
    pub max_reorg_depth: usize,
    /// Retire blocks that are this many blocks behind the last ingested one.
    pub prune_depth: Option<u64>,
    /// How long to wait for new blocks once caught up.
    pub poll_interval: Duration,
    /// How many times a failed request is retried before ingestion stalls.
    pub max_attempts: u32,
    pub min_retry_delay: Duration,
    pub max_retry_delay: Duration,
}

/// The result of a single pipeline step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// A new block was written to the index.
    Ingested(BlockHeader),
    /// Orphaned blocks were retired, in descending height order.
    ///
    /// Ingestion continues from the block after the common ancestor.
    Reorganized {
        common_ancestor: Option<BlockHeader>,
        retired: Vec<BlockHeader>,
    },
    /// No block to ingest.
    Idle { tip: u64 },
}

/// Drives the normalizer and the index writer from the chain source.
///
/// The pipeline is the only writer of the index.
pub struct IngestionPipeline<S, B>
where
    S: ChainSource,
    B: SearchBackend + Clone,
{
    source: S,
    writer: IndexWriter<B>,
    queries: QueryService<B>,
    options: IngestionOptions,
}

impl<S, B> IngestionPipeline<S, B>
where
    S: ChainSource,
    B: SearchBackend + Clone,
{
    pub fn new(
        source: S,
        backend: B,
        policy: RetirePolicy,
        options: IngestionOptions,
    ) -> Result<Self, IndexerError> {
        options.validate()?;

        Ok(Self {
            source,
            writer: IndexWriter::new(backend.clone(), policy),
            queries: QueryService::new(backend),
            options,
        })
    }

    pub fn options(&self) -> &IngestionOptions {
        &self.options
    }

    /// Runs until cancelled or until the ending block is ingested.
    pub async fn run(&self, ct: CancellationToken) -> Result<(), IndexerError> {
        let mut state = match self.restore_state(&ct).await {
            Ok(state) => state,
            Err(err) if err.kind() == IndexerError::Cancelled => return Ok(()),
            Err(err) => return Err(err),
        };

        loop {
            if ct.is_cancelled() {
                break;
            }

            if let Some(ending_block) = self.options.ending_block {
                if state.next_height(self.options.starting_block) > ending_block {
                    info!(ending_block, "reached ending block");
                    break;
                }
            }

            let (new_state, outcome) = match self.step(state, &ct).await {
                Ok(result) => result,
                Err(err) if err.kind() == IndexerError::Cancelled => break,
                Err(err) => return Err(err),
            };
            state = new_state;

            let made_progress = match &outcome {
                StepOutcome::Ingested(_) => true,
                StepOutcome::Reorganized { retired, .. } => !retired.is_empty(),
                StepOutcome::Idle { .. } => false,
            };

            if !made_progress {
                tokio::select! {
                    _ = tokio::time::sleep(self.options.poll_interval) => {},
                    _ = ct.cancelled() => break,
                }
            }
        }

        info!("ingestion stopped");

        Ok(())
    }

    /// Restores the chain state from the canonical blocks in the index.
    pub async fn restore_state(&self, ct: &CancellationToken) -> Result<ChainState, IndexerError> {
        let depth = self.options.max_reorg_depth;

        let latest = self
            .with_retry("get latest block", ct, || self.queries.latest_block())
            .await?;

        let Some(latest) = latest else {
            info!(
                starting_block = self.options.starting_block,
                "index is empty, starting from the starting block"
            );
            return Ok(ChainState::new(depth));
        };

        let since = latest.height.saturating_sub(depth as u64 - 1);
        let blocks = self
            .with_retry("get recent blocks", ct, || {
                self.queries.canonical_blocks_since(since)
            })
            .await?;

        let state = ChainState::restore(blocks.iter().map(|block| block.header()), depth);

        info!(
            last_confirmed = ?state.last_confirmed().map(BlockHeader::cursor),
            headers = state.len(),
            "restored ingestion state"
        );

        if let Some(last_confirmed) = state.last_confirmed() {
            self.reapply_last_confirmed(last_confirmed, ct).await?;
        }

        Ok(state)
    }

    /// Writes the last confirmed block again.
    ///
    /// A previous run may have stopped after writing the block but before
    /// writing all of its transactions and logs. If the block is no longer on
    /// the source chain it's left to the reorg handling of the next step.
    async fn reapply_last_confirmed(
        &self,
        last_confirmed: &BlockHeader,
        ct: &CancellationToken,
    ) -> Result<(), IndexerError> {
        let Some(block) = self.fetch_block(last_confirmed.height, ct).await? else {
            return Ok(());
        };

        if block.block.hash != last_confirmed.hash {
            debug!(
                last_confirmed = %last_confirmed,
                "last confirmed block changed, skipping rewrite"
            );
            return Ok(());
        }

        self.with_retry("rewrite last confirmed block", ct, || {
            self.writer.apply(&block)
        })
        .await?;

        debug!(block = %last_confirmed.cursor(), "rewrote last confirmed block");

        Ok(())
    }

    /// Ingests the next block, or handles a reorg if the chain changed.
    pub async fn step(
        &self,
        state: ChainState,
        ct: &CancellationToken,
    ) -> Result<(ChainState, StepOutcome), IndexerError> {
        let tip = self
            .with_retry("get chain tip", ct, || self.source.get_tip())
            .await?;

        let height = state.next_height(self.options.starting_block);
        let target = tip.checked_sub(self.options.confirmations);

        if target.map(|target| height > target).unwrap_or(true) {
            return self.check_last_confirmed(state, tip, ct).await;
        }

        let Some(block) = self.fetch_block(height, ct).await? else {
            debug!(height, tip, "block not available yet");
            return Ok((state, StepOutcome::Idle { tip }));
        };

        let header = block.block.header();

        if !state.can_grow(&header) {
            info!(
                block = %header,
                last_confirmed = ?state.last_confirmed().map(BlockHeader::cursor),
                "reorg detected"
            );
            return self.reconcile(state, ct).await;
        }

        self.with_retry("write block", ct, || self.writer.apply(&block))
            .await?;
        let state = state.grow(header.clone())?;

        info!(
            block = %header.cursor(),
            transactions = block.transactions.len(),
            logs = block.logs.len(),
            "ingested block"
        );

        if let Some(prune_depth) = self.options.prune_depth {
            if let Some(prune_height) = header.height.checked_sub(prune_depth) {
                self.with_retry("prune blocks", ct, || {
                    self.writer.retire_below(prune_height)
                })
                .await?;
            }
        }

        Ok((state, StepOutcome::Ingested(header)))
    }

    /// Checks that the last confirmed block is still on the source chain.
    async fn check_last_confirmed(
        &self,
        state: ChainState,
        tip: u64,
        ct: &CancellationToken,
    ) -> Result<(ChainState, StepOutcome), IndexerError> {
        let Some(last_confirmed) = state.last_confirmed() else {
            return Ok((state, StepOutcome::Idle { tip }));
        };

        let source_hash = self.fetch_hash(last_confirmed.height, ct).await?;
        if source_hash.as_deref() == Some(last_confirmed.hash.as_str()) {
            return Ok((state, StepOutcome::Idle { tip }));
        }

        info!(
            last_confirmed = %last_confirmed,
            source_hash = ?source_hash,
            "last confirmed block is no longer on the source chain"
        );

        self.reconcile(state, ct).await
    }

    /// Walks back from the last confirmed block to the common ancestor and retires orphans.
    async fn reconcile(
        &self,
        mut state: ChainState,
        ct: &CancellationToken,
    ) -> Result<(ChainState, StepOutcome), IndexerError> {
        let mut orphaned = 0;
        let mut common_ancestor = None;

        for indexed in state.headers().rev() {
            let source_hash = self.fetch_hash(indexed.height, ct).await?;
            if source_hash.as_deref() == Some(indexed.hash.as_str()) {
                common_ancestor = Some(indexed.clone());
                break;
            }
            orphaned += 1;
        }

        if common_ancestor.is_none() {
            let oldest = state
                .oldest()
                .map(|header| header.height)
                .unwrap_or(self.options.starting_block);

            if oldest > self.options.starting_block {
                return Err(IndexerError::IngestionStalled)
                    .attach_printable("reorg is deeper than the header arena")
                    .attach_printable_lazy(|| {
                        format!("max reorg depth: {}", self.options.max_reorg_depth)
                    })
                    .attach_printable_lazy(|| format!("oldest header: {oldest}"));
            }

            warn!("every indexed block was orphaned");
        }

        let mut retired = Vec::with_capacity(orphaned);
        for _ in 0..orphaned {
            let Some(header) = state.pop() else {
                break;
            };

            self.with_retry("retire block", ct, || self.writer.retire(&header.hash))
                .await?;

            info!(block = %header, "retired orphaned block");
            retired.push(header);
        }

        info!(
            common_ancestor = ?common_ancestor.as_ref().map(BlockHeader::cursor),
            retired = retired.len(),
            "reorg handled"
        );

        Ok((
            state,
            StepOutcome::Reorganized {
                common_ancestor,
                retired,
            },
        ))
    }

    async fn fetch_block(
        &self,
        height: u64,
        ct: &CancellationToken,
    ) -> Result<Option<NormalizedBlock>, IndexerError> {
        self.with_retry("fetch block", ct, || async move {
            let raw = self.source.get_block(height).await?;
            raw.map(|raw| normalize(&raw)).transpose()
        })
        .await
        .attach_printable_lazy(|| format!("height: {height}"))
    }

    async fn fetch_hash(
        &self,
        height: u64,
        ct: &CancellationToken,
    ) -> Result<Option<String>, IndexerError> {
        let block = self
            .with_retry("fetch block hash", ct, || self.source.get_block(height))
            .await
            .attach_printable_lazy(|| format!("height: {height}"))?;

        Ok(block.and_then(|block| block.hash))
    }

    /// Retries `f` with exponential backoff.
    ///
    /// Unavailable sources and backends are retried, and so is malformed chain
    /// data since the node may return a complete block on the next request.
    /// Returns [IndexerError::IngestionStalled] once all attempts failed.
    async fn with_retry<T, F, Fut>(
        &self,
        what: &str,
        ct: &CancellationToken,
        f: F,
    ) -> Result<T, IndexerError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, IndexerError>>,
    {
        let backoff = Backoff::new(
            self.options.max_attempts,
            self.options.min_retry_delay,
            Some(self.options.max_retry_delay),
        );
        let delays = IntoIterator::into_iter(&backoff).collect::<Vec<Duration>>();

        let mut last_error = None;
        for duration in delays {
            let err = match f().await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            match err.kind() {
                IndexerError::MalformedInput => {
                    error!(err = ?err, what, "malformed chain data");
                }
                kind if kind.is_retryable() => {
                    warn!(err = ?err, what, "request failed, retrying");
                }
                _ => return Err(err),
            }

            tokio::select! {
                _ = tokio::time::sleep(duration) => {},
                _ = ct.cancelled() => {
                    return Err(err)
                        .change_context(IndexerError::Cancelled)
                        .attach_printable_lazy(|| format!("{what} cancelled"));
                }
            }

            last_error = Some(err);
        }

        match last_error {
            Some(err) => Err(err)
                .change_context(IndexerError::IngestionStalled)
                .attach_printable_lazy(|| format!("{what} failed after retry")),
            None => Err(IndexerError::IngestionStalled)
                .attach_printable_lazy(|| format!("{what} was not attempted")),
        }
    }
}

impl IngestionOptions {
    pub fn validate(&self) -> Result<(), IndexerError> {
        if self.max_reorg_depth == 0 || self.max_reorg_depth > MAX_PAGE_SIZE {
            return Err(IndexerError::Configuration)
                .attach_printable("max reorg depth must be between 1 and 10000")
                .attach_printable_lazy(|| format!("max reorg depth: {}", self.max_reorg_depth));
        }

        if self.max_attempts == 0 {
            return Err(IndexerError::Configuration)
                .attach_printable("max attempts must be at least 1");
        }

        if let Some(prune_depth) = self.prune_depth {
            if prune_depth < self.max_reorg_depth as u64 {
                return Err(IndexerError::Configuration)
                    .attach_printable("prune depth must not be smaller than the max reorg depth")
                    .attach_printable_lazy(|| format!("prune depth: {prune_depth}"))
                    .attach_printable_lazy(|| {
                        format!("max reorg depth: {}", self.max_reorg_depth)
                    });
            }
        }

        if let Some(ending_block) = self.ending_block {
            if ending_block < self.starting_block {
                return Err(IndexerError::Configuration)
                    .attach_printable("ending block is before the starting block")
                    .attach_printable_lazy(|| format!("starting block: {}", self.starting_block))
                    .attach_printable_lazy(|| format!("ending block: {ending_block}"));
            }
        }

        Ok(())
    }
}

impl Default for IngestionOptions {
    fn default() -> Self {
        Self {
            starting_block: 0,
            ending_block: None,
            confirmations: 0,
            max_reorg_depth: DEFAULT_MAX_REORG_DEPTH,
            prune_depth: None,
            poll_interval: Duration::from_secs(3),
            max_attempts: 10,
            min_retry_delay: Duration::from_millis(100),
            max_retry_delay: Duration::from_secs(10),
        }
    }
}
