//! Entities stored in the search index.
//!
//! Each entity is stored as an independent document. Relationships between
//! entities are expressed with back-references (`blockHash`, `transactionHash`)
//! and every document carries the `type` discriminator and the `canonical` flag.
use serde::{Deserialize, Serialize};

use crate::core::{BlockHeader, Cursor};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    #[serde(rename = "block")]
    Block,
    #[serde(rename = "tx")]
    Transaction,
    #[serde(rename = "log")]
    Log,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    pub height: u64,
    pub hash: String,
    pub parent_hash: String,
    pub timestamp: u64,
    pub transaction_count: u64,
    pub canonical: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub hash: String,
    pub block_hash: String,
    pub block_height: u64,
    pub transaction_index: u64,
    pub from: String,
    /// Missing for contract creation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    pub timestamp: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gas_price: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<String>,
    pub canonical: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Log {
    pub id: String,
    pub block_hash: String,
    pub block_height: u64,
    pub transaction_hash: String,
    pub log_index: u64,
    pub address: String,
    pub topics: Vec<String>,
    /// The first topic, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    pub timestamp: u64,
    pub canonical: bool,
}

/// Any indexed entity, tagged by its `type` field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Entity {
    #[serde(rename = "block")]
    Block(Block),
    #[serde(rename = "tx")]
    Transaction(Transaction),
    #[serde(rename = "log")]
    Log(Log),
}

/// A block together with its dependents, as produced by the normalizer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedBlock {
    pub block: Block,
    pub transactions: Vec<Transaction>,
    pub logs: Vec<Log>,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Block => "block",
            EntityKind::Transaction => "tx",
            EntityKind::Log => "log",
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EntityKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "block" => Ok(EntityKind::Block),
            "tx" | "transaction" => Ok(EntityKind::Transaction),
            "log" => Ok(EntityKind::Log),
            other => Err(format!("unknown entity type: {other}")),
        }
    }
}

impl Block {
    pub fn header(&self) -> BlockHeader {
        BlockHeader {
            height: self.height,
            hash: self.hash.clone(),
            parent_hash: self.parent_hash.clone(),
        }
    }

    pub fn cursor(&self) -> Cursor {
        Cursor::new(self.height, self.hash.clone())
    }
}

impl Log {
    /// Returns the unique id of the log with the given position.
    pub fn new_id(block_hash: &str, transaction_hash: &str, log_index: u64) -> String {
        format!("{block_hash}-{transaction_hash}-{log_index}")
    }
}

impl Entity {
    /// The document id of the entity.
    pub fn id(&self) -> &str {
        match self {
            Entity::Block(block) => &block.hash,
            Entity::Transaction(tx) => &tx.hash,
            Entity::Log(log) => &log.id,
        }
    }

    pub fn kind(&self) -> EntityKind {
        match self {
            Entity::Block(_) => EntityKind::Block,
            Entity::Transaction(_) => EntityKind::Transaction,
            Entity::Log(_) => EntityKind::Log,
        }
    }

    pub fn is_canonical(&self) -> bool {
        match self {
            Entity::Block(block) => block.canonical,
            Entity::Transaction(tx) => tx.canonical,
            Entity::Log(log) => log.canonical,
        }
    }

    pub fn as_block(&self) -> Option<&Block> {
        match self {
            Entity::Block(block) => Some(block),
            _ => None,
        }
    }

    pub fn as_transaction(&self) -> Option<&Transaction> {
        match self {
            Entity::Transaction(tx) => Some(tx),
            _ => None,
        }
    }

    pub fn as_log(&self) -> Option<&Log> {
        match self {
            Entity::Log(log) => Some(log),
            _ => None,
        }
    }
}

impl NormalizedBlock {
    /// Returns all entities, block first.
    pub fn into_entities(self) -> impl Iterator<Item = Entity> {
        std::iter::once(Entity::Block(self.block))
            .chain(self.transactions.into_iter().map(Entity::Transaction))
            .chain(self.logs.into_iter().map(Entity::Log))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{Block, Entity, Transaction};
    use crate::query::Field;

    fn new_transaction(to: Option<&str>) -> Transaction {
        Transaction {
            hash: "0xt1".to_string(),
            block_hash: "0xb1".to_string(),
            block_height: 1,
            transaction_index: 0,
            from: "0xABC".to_string(),
            to: to.map(str::to_string),
            timestamp: 100,
            gas_price: None,
            value: None,
            input: None,
            canonical: true,
        }
    }

    #[test]
    fn test_block_document_field_names() {
        let block = Entity::Block(Block {
            height: 7,
            hash: "0xb7".to_string(),
            parent_hash: "0xb6".to_string(),
            timestamp: 1_000,
            transaction_count: 2,
            canonical: true,
        });

        let value = serde_json::to_value(&block).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "block",
                "height": 7,
                "hash": "0xb7",
                "parentHash": "0xb6",
                "timestamp": 1_000,
                "transactionCount": 2,
                "canonical": true,
            })
        );

        for field in [
            Field::Type,
            Field::Height,
            Field::ParentHash,
            Field::Timestamp,
            Field::Canonical,
        ] {
            assert!(value.get(field.as_str()).is_some(), "missing {field}");
        }
    }

    #[test]
    fn test_transaction_document_field_names() {
        let value = serde_json::to_value(Entity::Transaction(new_transaction(Some("0xdef"))))
            .unwrap();

        for field in [
            Field::Type,
            Field::BlockHash,
            Field::BlockHeight,
            Field::TransactionIndex,
            Field::From,
            Field::To,
            Field::Timestamp,
            Field::Canonical,
        ] {
            assert!(value.get(field.as_str()).is_some(), "missing {field}");
        }
        assert_eq!(value["type"], "tx");
    }

    #[test]
    fn test_contract_creation_has_no_to() {
        let entity = Entity::Transaction(new_transaction(None));
        let value = serde_json::to_value(&entity).unwrap();
        assert!(value.get("to").is_none());

        let back: Entity = serde_json::from_value(value).unwrap();
        assert_eq!(back, entity);
    }

    #[test]
    fn test_entity_id() {
        let entity = Entity::Transaction(new_transaction(None));
        assert_eq!(entity.id(), "0xt1");
        assert!(entity.is_canonical());
    }
}
