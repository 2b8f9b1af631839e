//! Chain data as returned by the node.
//!
//! Every field is optional so that missing data is reported by the normalizer
//! instead of failing deserialization.
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawBlock {
    pub number: Option<String>,
    pub hash: Option<String>,
    pub parent_hash: Option<String>,
    pub timestamp: Option<String>,
    #[serde(default)]
    pub transactions: Vec<RawTransaction>,
    /// Logs emitted by the block's transactions, in block order.
    #[serde(default)]
    pub logs: Vec<RawLog>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawTransaction {
    pub hash: Option<String>,
    pub transaction_index: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub gas_price: Option<String>,
    pub value: Option<String>,
    pub input: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawLog {
    pub transaction_hash: Option<String>,
    pub log_index: Option<String>,
    pub address: Option<String>,
    #[serde(default)]
    pub topics: Vec<String>,
    pub data: Option<String>,
}
