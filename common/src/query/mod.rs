//! Query expressions and the builders for every supported lookup.
mod aggregation;
mod builder;
mod expr;
mod field;

pub use self::aggregation::{Aggregation, Aggregations};
pub use self::builder::{
    block_by_height, blocks_by_hash, by_hash_or_address, by_id, callers_of_transactions,
    canonical_blocks_since, common_event_topics, gas_prices, in_time_range, latest_block,
    logs_with_signature, transactions_by_block_hash, transactions_from_or_to, transactions_to,
};
pub use self::expr::{BoolFilter, Filter, SearchQuery, Sort, SortOrder, MAX_PAGE_SIZE};
pub use self::field::Field;
