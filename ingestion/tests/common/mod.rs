#![allow(dead_code)]
use std::{sync::Arc, time::Duration};

use ethevents_index::{InMemoryBackend, RetirePolicy, SearchBackend};
use ethevents_ingestion::{
    testing::InMemoryChainSource, ChainState, IngestionOptions, IngestionPipeline, StepOutcome,
};
use tokio_util::sync::CancellationToken;

pub type TestPipeline = IngestionPipeline<Arc<InMemoryChainSource>, Arc<InMemoryBackend>>;

/// Options with short delays so that retries don't slow down tests.
pub fn new_test_options() -> IngestionOptions {
    IngestionOptions {
        max_reorg_depth: 16,
        poll_interval: Duration::from_millis(5),
        max_attempts: 5,
        min_retry_delay: Duration::from_millis(1),
        max_retry_delay: Duration::from_millis(5),
        ..Default::default()
    }
}

pub fn new_test_pipeline(
    source: &Arc<InMemoryChainSource>,
    backend: &Arc<InMemoryBackend>,
    options: IngestionOptions,
) -> TestPipeline {
    IngestionPipeline::new(
        source.clone(),
        backend.clone(),
        RetirePolicy::Flag,
        options,
    )
    .unwrap()
}

/// Steps the pipeline until it has nothing left to do.
pub async fn step_until_idle<B>(
    pipeline: &IngestionPipeline<Arc<InMemoryChainSource>, B>,
    mut state: ChainState,
) -> (ChainState, Vec<StepOutcome>)
where
    B: SearchBackend + Clone,
{
    let ct = CancellationToken::new();
    let mut outcomes = Vec::new();

    for _ in 0..1_000 {
        let (new_state, outcome) = pipeline.step(state, &ct).await.unwrap();
        state = new_state;
        if let StepOutcome::Idle { .. } = outcome {
            return (state, outcomes);
        }
        outcomes.push(outcome);
    }

    panic!("pipeline did not become idle");
}

/// Heights of the ingested blocks, in order.
pub fn ingested_heights(outcomes: &[StepOutcome]) -> Vec<u64> {
    outcomes
        .iter()
        .filter_map(|outcome| match outcome {
            StepOutcome::Ingested(header) => Some(header.height),
            _ => None,
        })
        .collect()
}
