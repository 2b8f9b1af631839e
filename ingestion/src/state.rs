//! Chain state tracked by the ingestion pipeline.
use std::collections::BTreeMap;

use error_stack::{Result, ResultExt};
use ethevents_common::{BlockHeader, IndexerError};

/// Default number of headers kept to walk back a reorg.
pub const DEFAULT_MAX_REORG_DEPTH: usize = 128;

/// The indexed chain, as seen by the pipeline.
///
/// Keeps the most recent headers in a bounded arena indexed by height.
/// The headers in the arena always form a chain linked by parent hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainState {
    headers: BTreeMap<u64, BlockHeader>,
    capacity: usize,
}

impl ChainState {
    pub fn new(capacity: usize) -> Self {
        Self {
            headers: BTreeMap::new(),
            capacity: capacity.max(1),
        }
    }

    /// Rebuilds the state from headers sorted by height.
    ///
    /// Only the longest linked run ending at the last header is kept.
    pub fn restore(headers: impl IntoIterator<Item = BlockHeader>, capacity: usize) -> Self {
        let mut state = Self::new(capacity);
        for header in headers {
            if !state.can_grow(&header) {
                state.headers.clear();
            }
            state.push(header);
        }
        state
    }

    /// The last confirmed (indexed) header.
    pub fn last_confirmed(&self) -> Option<&BlockHeader> {
        self.headers.values().next_back()
    }

    /// The oldest header still in the arena.
    pub fn oldest(&self) -> Option<&BlockHeader> {
        self.headers.values().next()
    }

    pub fn header_at(&self, height: u64) -> Option<&BlockHeader> {
        self.headers.get(&height)
    }

    /// Headers in the arena, from the oldest.
    pub fn headers(&self) -> impl DoubleEndedIterator<Item = &BlockHeader> {
        self.headers.values()
    }

    pub fn len(&self) -> usize {
        self.headers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// The next height to ingest.
    pub fn next_height(&self, starting_block: u64) -> u64 {
        self.last_confirmed()
            .map(|header| header.height + 1)
            .unwrap_or(starting_block)
    }

    /// Returns true if `header` extends the last confirmed header.
    pub fn can_grow(&self, header: &BlockHeader) -> bool {
        match self.last_confirmed() {
            None => true,
            Some(tip) => header.is_child_of(tip),
        }
    }

    /// Appends `header`, evicting the oldest header if the arena is full.
    pub fn grow(mut self, header: BlockHeader) -> Result<Self, IndexerError> {
        if !self.can_grow(&header) {
            return Err(IndexerError::IngestionStalled)
                .attach_printable("header does not extend the indexed chain")
                .attach_printable_lazy(|| format!("header: {header}"))
                .attach_printable_lazy(|| {
                    format!("last confirmed: {:?}", self.last_confirmed().map(|h| h.cursor()))
                });
        }

        self.push(header);
        Ok(self)
    }

    /// Removes the last confirmed header and returns it.
    pub fn pop(&mut self) -> Option<BlockHeader> {
        self.headers.pop_last().map(|(_, header)| header)
    }

    fn push(&mut self, header: BlockHeader) {
        self.headers.insert(header.height, header);
        while self.headers.len() > self.capacity {
            self.headers.pop_first();
        }
    }
}

impl Default for ChainState {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_REORG_DEPTH)
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use ethevents_common::{testing::new_test_header, IndexerError};

    use super::ChainState;

    #[test]
    fn test_grow_and_evict() {
        let mut state = ChainState::new(3);
        for height in 0..5 {
            state = state.grow(new_test_header(height, 0)).unwrap();
        }

        assert_eq!(state.len(), 3);
        assert_eq!(state.oldest().unwrap().height, 2);
        assert_eq!(state.last_confirmed().unwrap().height, 4);
        assert_eq!(state.next_height(0), 5);
    }

    #[test]
    fn test_grow_rejects_unlinked_header() {
        let state = ChainState::new(3).grow(new_test_header(0, 0)).unwrap();

        let err = state.clone().grow(new_test_header(1, 1)).unwrap_err();
        assert_matches!(err.current_context(), IndexerError::IngestionStalled);

        let err = state.grow(new_test_header(2, 0)).unwrap_err();
        assert_matches!(err.current_context(), IndexerError::IngestionStalled);
    }

    #[test]
    fn test_empty_state_starts_at_starting_block() {
        let state = ChainState::new(3);
        assert!(state.is_empty());
        assert_eq!(state.next_height(42), 42);
        assert!(state.can_grow(&new_test_header(42, 0)));
    }

    #[test]
    fn test_pop() {
        let mut state = ChainState::new(3);
        for height in 0..3 {
            state = state.grow(new_test_header(height, 0)).unwrap();
        }

        assert_eq!(state.pop().unwrap().height, 2);
        assert_eq!(state.last_confirmed().unwrap().height, 1);
        assert!(state.can_grow(&new_test_header(2, 0)));
    }

    #[test]
    fn test_restore_keeps_linked_tail() {
        let headers = vec![
            new_test_header(1, 0),
            new_test_header(2, 0),
            // Gap, height 3 is missing.
            new_test_header(4, 0),
            new_test_header(5, 0),
        ];

        let state = ChainState::restore(headers, 10);
        assert_eq!(state.len(), 2);
        assert_eq!(state.oldest().unwrap().height, 4);
        assert_eq!(state.last_confirmed().unwrap().height, 5);
    }
}
