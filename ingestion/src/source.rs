use async_trait::async_trait;
use error_stack::Result;
use ethevents_common::{raw::RawBlock, IndexerError};

/// Supplier of raw chain data.
#[async_trait]
pub trait ChainSource: Send + Sync {
    /// Returns the block at `height`, with its transactions and logs.
    ///
    /// Returns `None` if the source doesn't have the block.
    async fn get_block(&self, height: u64) -> Result<Option<RawBlock>, IndexerError>;

    /// Returns the height of the most recent block.
    async fn get_tip(&self) -> Result<u64, IndexerError>;
}

#[async_trait]
impl<S> ChainSource for std::sync::Arc<S>
where
    S: ChainSource + ?Sized,
{
    async fn get_block(&self, height: u64) -> Result<Option<RawBlock>, IndexerError> {
        self.as_ref().get_block(height).await
    }

    async fn get_tip(&self) -> Result<u64, IndexerError> {
        self.as_ref().get_tip().await
    }
}
