#![allow(dead_code)]
use ethevents_common::{
    schema::{Block, Log, NormalizedBlock, Transaction},
    testing::new_test_header,
};

/// Returns a block on `chain` with one transaction per `(from, to)` pair and one log per transaction.
pub fn new_test_block(height: u64, chain: u8, transfers: &[(&str, Option<&str>)]) -> NormalizedBlock {
    let header = new_test_header(height, chain);
    let timestamp = 1_000 + height * 12;

    let block = Block {
        height,
        hash: header.hash.clone(),
        parent_hash: header.parent_hash.clone(),
        timestamp,
        transaction_count: transfers.len() as u64,
        canonical: true,
    };

    let transactions = transfers
        .iter()
        .enumerate()
        .map(|(index, (from, to))| Transaction {
            hash: format!("{}-tx{index}", header.hash),
            block_hash: header.hash.clone(),
            block_height: height,
            transaction_index: index as u64,
            from: from.to_string(),
            to: to.map(str::to_string),
            timestamp,
            gas_price: None,
            value: None,
            input: None,
            canonical: true,
        })
        .collect::<Vec<_>>();

    let logs = transactions
        .iter()
        .map(|tx| Log {
            id: Log::new_id(&header.hash, &tx.hash, tx.transaction_index),
            block_hash: header.hash.clone(),
            block_height: height,
            transaction_hash: tx.hash.clone(),
            log_index: tx.transaction_index,
            address: "0xc0ffee".to_string(),
            topics: vec!["0xddf252ad".to_string()],
            signature: Some("0xddf252ad".to_string()),
            data: None,
            timestamp,
            canonical: true,
        })
        .collect();

    NormalizedBlock {
        block,
        transactions,
        logs,
    }
}
