//! Typed lookup intents.
//!
//! Every builder is pure: the same arguments always produce the same expression.
use error_stack::{Result, ResultExt};
use serde_json::json;

use crate::{error::IndexerError, schema::EntityKind};

use super::{
    aggregation::Aggregation,
    expr::{BoolFilter, Filter, SearchQuery, Sort, MAX_PAGE_SIZE},
    field::Field,
};

/// Canonical entities whose id, sender or recipient is `value`, newest first.
///
/// The value is opaque and is never checked to look like a hash or address.
pub fn by_hash_or_address(value: &str) -> Result<SearchQuery, IndexerError> {
    let value = non_empty(value, "value")?;
    let filter = BoolFilter::new()
        .should(Filter::ids([value]))
        .should(Filter::term(Field::From, value))
        .should(Filter::term(Field::To, value))
        .filter(canonical());

    Ok(SearchQuery {
        sort: newest_first(None),
        ..SearchQuery::new(filter)
    })
}

/// Transactions of the block with the given hash, in block order.
///
/// Transactions of retired blocks are included, the hash is an explicit reference.
pub fn transactions_by_block_hash(block_hash: &str) -> Result<SearchQuery, IndexerError> {
    let block_hash = non_empty(block_hash, "block hash")?;
    let filter = BoolFilter::new()
        .filter(of_kind(EntityKind::Transaction))
        .filter(Filter::term(Field::BlockHash, block_hash));

    SearchQuery::new(filter)
        .sort_by(Sort::asc(Field::TransactionIndex))
        .with_size(MAX_PAGE_SIZE)
}

/// The canonical block with the highest height.
pub fn latest_block() -> SearchQuery {
    let filter = BoolFilter::new()
        .filter(of_kind(EntityKind::Block))
        .filter(canonical());

    SearchQuery {
        sort: vec![Sort::desc(Field::Height), Sort::desc(Field::Timestamp)],
        size: Some(1),
        ..SearchQuery::new(filter)
    }
}

/// Canonical transactions sent to `address`, newest first.
pub fn transactions_to(address: &str) -> Result<SearchQuery, IndexerError> {
    let address = non_empty(address, "address")?;
    let filter = BoolFilter::new()
        .filter(of_kind(EntityKind::Transaction))
        .filter(canonical())
        .filter(Filter::term(Field::To, address));

    Ok(SearchQuery::new(filter)
        .sort_by(Sort::desc(Field::BlockHeight))
        .sort_by(Sort::desc(Field::TransactionIndex)))
}

/// Canonical transactions sent from or to `address`, newest first.
pub fn transactions_from_or_to(address: &str) -> Result<SearchQuery, IndexerError> {
    let address = non_empty(address, "address")?;
    let filter = BoolFilter::new()
        .should(Filter::term(Field::From, address))
        .should(Filter::term(Field::To, address))
        .filter(of_kind(EntityKind::Transaction))
        .filter(canonical());

    Ok(SearchQuery::new(filter)
        .sort_by(Sort::desc(Field::BlockHeight))
        .sort_by(Sort::desc(Field::TransactionIndex)))
}

/// Canonical logs whose first topic is `signature`, newest first.
pub fn logs_with_signature(signature: &str) -> Result<SearchQuery, IndexerError> {
    let signature = non_empty(signature, "signature")?;
    let filter = BoolFilter::new()
        .filter(of_kind(EntityKind::Log))
        .filter(canonical())
        .filter(Filter::term(Field::Signature, signature));

    Ok(SearchQuery::new(filter)
        .sort_by(Sort::desc(Field::BlockHeight))
        .sort_by(Sort::desc(Field::LogIndex)))
}

/// Canonical blocks at or above `height`, in ascending order.
pub fn canonical_blocks_since(height: u64) -> SearchQuery {
    let filter = BoolFilter::new()
        .filter(of_kind(EntityKind::Block))
        .filter(canonical())
        .filter(Filter::range(Field::Height, Some(json!(height)), None));

    SearchQuery {
        sort: vec![Sort::asc(Field::Height)],
        size: Some(MAX_PAGE_SIZE),
        ..SearchQuery::new(filter)
    }
}

/// The canonical block at `height`.
pub fn block_by_height(height: u64) -> SearchQuery {
    let filter = BoolFilter::new()
        .filter(of_kind(EntityKind::Block))
        .filter(canonical())
        .filter(Filter::term(Field::Height, height));

    SearchQuery {
        size: Some(1),
        ..SearchQuery::new(filter)
    }
}

/// Entities with the given ids, canonical or not.
pub fn by_id<S: AsRef<str>>(ids: &[S]) -> Result<SearchQuery, IndexerError> {
    if ids.is_empty() || ids.len() > MAX_PAGE_SIZE {
        return Err(IndexerError::InvalidQueryArgument)
            .attach_printable("id lookup requires between 1 and 10000 ids")
            .attach_printable_lazy(|| format!("ids: {}", ids.len()));
    }

    let ids = ids
        .iter()
        .map(|id| non_empty(id.as_ref(), "id"))
        .collect::<Result<Vec<_>, _>>()?;

    let size = ids.len();
    SearchQuery::new(Filter::ids(ids)).with_size(size)
}

/// Entities of the given kind with a timestamp in `[from, to)`, newest first.
pub fn in_time_range(kind: EntityKind, from: u64, to: u64) -> Result<SearchQuery, IndexerError> {
    if from > to {
        return Err(IndexerError::InvalidQueryArgument)
            .attach_printable("time range start is after its end")
            .attach_printable_lazy(|| format!("range: [{from}, {to})"));
    }

    let filter = BoolFilter::new()
        .filter(of_kind(kind))
        .filter(canonical())
        .filter(Filter::range(
            Field::Timestamp,
            Some(json!(from)),
            Some(json!(to)),
        ));

    Ok(SearchQuery {
        sort: newest_first(Some(kind)),
        ..SearchQuery::new(filter)
    })
}

/// Canonical blocks with the given hashes, newest first.
pub fn blocks_by_hash<S: AsRef<str>>(hashes: &[S]) -> Result<SearchQuery, IndexerError> {
    let hashes = id_list(hashes)?;
    let size = hashes.len().max(1);

    let filter = BoolFilter::new()
        .filter(of_kind(EntityKind::Block))
        .filter(canonical())
        .filter(Filter::ids(hashes));

    SearchQuery::new(filter)
        .sort_by(Sort::desc(Field::Height))
        .with_size(size)
}

/// Gas prices of canonical transactions with a timestamp in `[from, to)`.
///
/// Returns no hits. `gasPriceStats` holds extended statistics and
/// `gasPriceHistogram` counts transactions per `interval` wei.
pub fn gas_prices(from: u64, to: u64, interval: u64) -> Result<SearchQuery, IndexerError> {
    if interval == 0 {
        return Err(IndexerError::InvalidQueryArgument)
            .attach_printable("histogram interval must not be zero");
    }

    let SearchQuery { filter, .. } = in_time_range(EntityKind::Transaction, from, to)?;
    let field = Field::GasPrice;

    Ok(SearchQuery::new(filter)
        .aggregate("gasPriceStats", Aggregation::ExtendedStats { field })
        .aggregate("gasPriceHistogram", Aggregation::Histogram { field, interval })
        .without_hits())
}

/// The most frequent event topics of canonical logs, each with its most frequent contracts.
///
/// Buckets are under `topic`, with the contract addresses of each topic under
/// `contract`. With `only_signatures` only the first topic of every log counts.
pub fn common_event_topics(
    topics: usize,
    contracts: usize,
    only_signatures: bool,
) -> Result<SearchQuery, IndexerError> {
    let topics = bucket_count(topics, "topics")?;
    let contracts = bucket_count(contracts, "contracts")?;
    let field = if only_signatures {
        Field::Signature
    } else {
        Field::Topics
    };

    let filter = BoolFilter::new()
        .filter(of_kind(EntityKind::Log))
        .filter(canonical());

    Ok(SearchQuery::new(filter)
        .aggregate(
            "topic",
            Aggregation::terms(field, topics)
                .nest("contract", Aggregation::terms(Field::Address, contracts)),
        )
        .without_hits())
}

/// The most frequent senders of the given canonical transactions.
///
/// Buckets are under `caller`, each with the `gasPriceStats` of the sender's transactions.
pub fn callers_of_transactions<S: AsRef<str>>(
    transaction_hashes: &[S],
    callers: usize,
) -> Result<SearchQuery, IndexerError> {
    let transaction_hashes = id_list(transaction_hashes)?;
    let callers = bucket_count(callers, "callers")?;

    let filter = BoolFilter::new()
        .filter(of_kind(EntityKind::Transaction))
        .filter(canonical())
        .filter(Filter::ids(transaction_hashes));

    Ok(SearchQuery::new(filter)
        .aggregate(
            "caller",
            Aggregation::terms(Field::From, callers).nest(
                "gasPriceStats",
                Aggregation::Stats {
                    field: Field::GasPrice,
                },
            ),
        )
        .without_hits())
}

/// Timestamp descending, then the position in the chain.
///
/// Entities of one block share a timestamp, the tiebreakers keep the order
/// total so that paging with `search_after` doesn't skip tied hits.
fn newest_first(kind: Option<EntityKind>) -> Vec<Sort> {
    let tiebreakers: &[Field] = match kind {
        Some(EntityKind::Block) => &[Field::Height],
        Some(EntityKind::Transaction) => &[Field::BlockHeight, Field::TransactionIndex],
        Some(EntityKind::Log) => &[Field::BlockHeight, Field::LogIndex],
        None => &[
            Field::Height,
            Field::BlockHeight,
            Field::TransactionIndex,
            Field::LogIndex,
        ],
    };

    std::iter::once(Field::Timestamp)
        .chain(tiebreakers.iter().copied())
        .map(Sort::desc)
        .collect()
}

fn of_kind(kind: EntityKind) -> Filter {
    Filter::term(Field::Type, kind.as_str())
}

fn canonical() -> Filter {
    Filter::term(Field::Canonical, true)
}

/// Up to [MAX_PAGE_SIZE] non empty ids. The list itself may be empty.
fn id_list<S: AsRef<str>>(ids: &[S]) -> Result<Vec<&str>, IndexerError> {
    if ids.len() > MAX_PAGE_SIZE {
        return Err(IndexerError::InvalidQueryArgument)
            .attach_printable("too many ids")
            .attach_printable_lazy(|| format!("ids: {}", ids.len()));
    }

    ids.iter().map(|id| non_empty(id.as_ref(), "id")).collect()
}

fn bucket_count(count: usize, name: &str) -> Result<usize, IndexerError> {
    if count == 0 || count > MAX_PAGE_SIZE {
        return Err(IndexerError::InvalidQueryArgument)
            .attach_printable_lazy(|| format!("{name} must be between 1 and 10000"))
            .attach_printable_lazy(|| format!("{name}: {count}"));
    }
    Ok(count)
}

/// Rejects the empty string. Any other value, whitespace included, is passed through.
fn non_empty<'a>(value: &'a str, name: &str) -> Result<&'a str, IndexerError> {
    if value.is_empty() {
        return Err(IndexerError::InvalidQueryArgument)
            .attach_printable_lazy(|| format!("{name} must not be empty"));
    }
    Ok(value)
}
