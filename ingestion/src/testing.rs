//! In-memory chain source for tests.
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Mutex,
};

use async_trait::async_trait;
use error_stack::{Result, ResultExt};
use ethevents_common::{
    raw::{RawBlock, RawLog, RawTransaction},
    testing::new_test_hash,
    IndexerError,
};

use crate::source::ChainSource;

/// A chain source backed by a vector of blocks, one per height.
///
/// The chain can be extended and forked while the pipeline runs.
#[derive(Default)]
pub struct InMemoryChainSource {
    blocks: Mutex<Vec<RawBlock>>,
    failures: AtomicUsize,
    requests: AtomicUsize,
}

/// Returns a raw block on `chain` with a single transfer from `0xsender`.
pub fn new_test_raw_block(height: u64, chain: u8, parent_hash: &str) -> RawBlock {
    let hash = new_test_hash(height, chain);
    let tx_hash = format!("{hash}-tx0");

    RawBlock {
        number: Some(format!("0x{height:x}")),
        hash: Some(hash),
        parent_hash: Some(parent_hash.to_string()),
        timestamp: Some(format!("0x{:x}", 1_000 + height * 12)),
        transactions: vec![RawTransaction {
            hash: Some(tx_hash.clone()),
            transaction_index: Some("0x0".to_string()),
            from: Some("0xsender".to_string()),
            to: Some("0xrecipient".to_string()),
            value: Some("0x1".to_string()),
            ..Default::default()
        }],
        logs: vec![RawLog {
            transaction_hash: Some(tx_hash),
            log_index: Some("0x0".to_string()),
            address: Some("0xc0ffee".to_string()),
            topics: vec!["0xddf252ad".to_string()],
            data: None,
        }],
    }
}

impl InMemoryChainSource {
    /// Creates a chain with blocks `0..length` on `chain`.
    pub fn new(length: u64, chain: u8) -> Self {
        let source = Self::default();
        source.extend(length, chain);
        source
    }

    /// Appends `count` blocks on `chain`.
    pub fn extend(&self, count: u64, chain: u8) {
        let mut blocks = self.lock();
        for _ in 0..count {
            let height = blocks.len() as u64;
            let parent_hash = blocks
                .last()
                .and_then(|block| block.hash.clone())
                .unwrap_or_else(|| "0x0".to_string());
            blocks.push(new_test_raw_block(height, chain, &parent_hash));
        }
    }

    /// Replaces all blocks from `height` onwards with `count` blocks on `chain`.
    pub fn fork(&self, height: u64, count: u64, chain: u8) {
        self.lock().truncate(height as usize);
        self.extend(count, chain);
    }

    /// Replaces the block at `height`.
    pub fn replace(&self, height: u64, block: RawBlock) {
        let mut blocks = self.lock();
        if let Some(existing) = blocks.get_mut(height as usize) {
            *existing = block;
        }
    }

    /// Returns the hash of the block at `height`.
    pub fn hash_at(&self, height: u64) -> Option<String> {
        self.lock()
            .get(height as usize)
            .and_then(|block| block.hash.clone())
    }

    /// Makes the next `count` requests fail with [IndexerError::SourceUnavailable].
    pub fn fail_next(&self, count: usize) {
        self.failures.store(count, Ordering::SeqCst);
    }

    /// Number of requests received, including failed ones.
    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<RawBlock>> {
        self.blocks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn check_failure(&self) -> Result<(), IndexerError> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        let failed = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |remaining| {
                remaining.checked_sub(1)
            })
            .is_ok();

        if failed {
            return Err(IndexerError::SourceUnavailable)
                .attach_printable("in-memory source request failed");
        }

        Ok(())
    }
}

#[async_trait]
impl ChainSource for InMemoryChainSource {
    async fn get_block(&self, height: u64) -> Result<Option<RawBlock>, IndexerError> {
        self.check_failure()?;
        Ok(self.lock().get(height as usize).cloned())
    }

    async fn get_tip(&self) -> Result<u64, IndexerError> {
        self.check_failure()?;
        let length = self.lock().len() as u64;
        length
            .checked_sub(1)
            .ok_or(IndexerError::SourceUnavailable)
            .attach_printable("in-memory source is empty")
    }
}
