//! Convert raw chain data into index entities.
use std::collections::HashSet;

use error_stack::{Result, ResultExt};

use crate::{
    error::IndexerError,
    raw::{RawBlock, RawLog, RawTransaction},
    schema::{Block, Log, NormalizedBlock, Transaction},
};

/// Normalize a raw block into its block, transactions and logs.
///
/// The conversion is pure: the same raw block always produces the same entities.
/// All entities are produced as canonical, the writer decides otherwise.
///
/// Returns [IndexerError::MalformedInput] if the block hash, number or parent hash
/// are missing, or if a transaction or log cannot be identified.
pub fn normalize(raw: &RawBlock) -> Result<NormalizedBlock, IndexerError> {
    let hash = required(&raw.hash, "hash")?;
    let height = parse_quantity(required(&raw.number, "number")?)
        .attach_printable("invalid block number")
        .attach_printable_lazy(|| format!("block hash: {hash}"))?;
    let parent_hash = required(&raw.parent_hash, "parentHash")
        .attach_printable_lazy(|| format!("block: {height}/{hash}"))?;
    let timestamp = match non_empty(&raw.timestamp) {
        None => 0,
        Some(timestamp) => parse_quantity(timestamp)
            .attach_printable("invalid block timestamp")
            .attach_printable_lazy(|| format!("block: {height}/{hash}"))?,
    };

    let block = Block {
        height,
        hash: hash.to_string(),
        parent_hash: parent_hash.to_string(),
        timestamp,
        transaction_count: raw.transactions.len() as u64,
        canonical: true,
    };

    let transactions = raw
        .transactions
        .iter()
        .enumerate()
        .map(|(position, tx)| normalize_transaction(&block, position, tx))
        .collect::<Result<Vec<_>, _>>()
        .attach_printable_lazy(|| format!("block: {height}/{hash}"))?;

    let transaction_hashes = transactions
        .iter()
        .map(|tx| tx.hash.as_str())
        .collect::<HashSet<_>>();

    let logs = raw
        .logs
        .iter()
        .enumerate()
        .map(|(position, log)| normalize_log(&block, &transaction_hashes, position, log))
        .collect::<Result<Vec<_>, _>>()
        .attach_printable_lazy(|| format!("block: {height}/{hash}"))?;

    Ok(NormalizedBlock {
        block,
        transactions,
        logs,
    })
}

fn normalize_transaction(
    block: &Block,
    position: usize,
    raw: &RawTransaction,
) -> Result<Transaction, IndexerError> {
    let hash = required(&raw.hash, "transaction hash")
        .attach_printable_lazy(|| format!("transaction position: {position}"))?;
    let from = required(&raw.from, "transaction from")
        .attach_printable_lazy(|| format!("transaction hash: {hash}"))?;
    let transaction_index = match non_empty(&raw.transaction_index) {
        None => position as u64,
        Some(index) => parse_quantity(index)
            .attach_printable("invalid transaction index")
            .attach_printable_lazy(|| format!("transaction hash: {hash}"))?,
    };

    let gas_price = optional_amount(&raw.gas_price)
        .attach_printable("invalid gas price")
        .attach_printable_lazy(|| format!("transaction hash: {hash}"))?;
    let value = optional_amount(&raw.value)
        .attach_printable("invalid value")
        .attach_printable_lazy(|| format!("transaction hash: {hash}"))?;

    Ok(Transaction {
        hash: hash.to_string(),
        block_hash: block.hash.clone(),
        block_height: block.height,
        transaction_index,
        from: from.to_string(),
        to: non_empty(&raw.to).map(str::to_string),
        timestamp: block.timestamp,
        gas_price,
        value,
        input: non_empty(&raw.input).map(str::to_string),
        canonical: true,
    })
}

fn normalize_log(
    block: &Block,
    transaction_hashes: &HashSet<&str>,
    position: usize,
    raw: &RawLog,
) -> Result<Log, IndexerError> {
    let transaction_hash = required(&raw.transaction_hash, "log transaction hash")
        .attach_printable_lazy(|| format!("log position: {position}"))?;

    if !transaction_hashes.contains(transaction_hash) {
        return Err(IndexerError::MalformedInput)
            .attach_printable("log references a transaction that is not in the block")
            .attach_printable_lazy(|| format!("transaction hash: {transaction_hash}"));
    }

    let address = required(&raw.address, "log address")
        .attach_printable_lazy(|| format!("log position: {position}"))?;
    let log_index = match non_empty(&raw.log_index) {
        None => position as u64,
        Some(index) => parse_quantity(index)
            .attach_printable("invalid log index")
            .attach_printable_lazy(|| format!("log position: {position}"))?,
    };

    Ok(Log {
        id: Log::new_id(&block.hash, transaction_hash, log_index),
        block_hash: block.hash.clone(),
        block_height: block.height,
        transaction_hash: transaction_hash.to_string(),
        log_index,
        address: address.to_string(),
        topics: raw.topics.clone(),
        signature: raw.topics.first().cloned(),
        data: non_empty(&raw.data).map(str::to_string),
        timestamp: block.timestamp,
        canonical: true,
    })
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|value| !value.is_empty())
}

fn required<'a>(value: &'a Option<String>, name: &str) -> Result<&'a str, IndexerError> {
    non_empty(value)
        .ok_or(IndexerError::MalformedInput)
        .attach_printable_lazy(|| format!("missing required field: {name}"))
}

/// Parse a quantity encoded either as `0x`-prefixed hex or as a decimal string.
pub fn parse_quantity(value: &str) -> Result<u64, IndexerError> {
    let parsed = match strip_hex_prefix(value) {
        Some(digits) => u64::from_str_radix(digits, 16),
        None => value.parse::<u64>(),
    };

    parsed
        .change_context(IndexerError::MalformedInput)
        .attach_printable_lazy(|| format!("invalid quantity: {value}"))
}

/// Amounts (wei) don't fit a u64, they are stored as decimal strings.
fn optional_amount(value: &Option<String>) -> Result<Option<String>, IndexerError> {
    let Some(value) = non_empty(value) else {
        return Ok(None);
    };

    let parsed = match strip_hex_prefix(value) {
        Some(digits) => u128::from_str_radix(digits, 16),
        None => value.parse::<u128>(),
    };

    parsed
        .map(|amount| Some(amount.to_string()))
        .change_context(IndexerError::MalformedInput)
        .attach_printable_lazy(|| format!("invalid amount: {value}"))
}

fn strip_hex_prefix(value: &str) -> Option<&str> {
    value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
}
