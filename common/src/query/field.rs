use std::fmt;

/// Document fields that queries filter or sort on.
///
/// The names are the exact field names stored in the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    /// The document id. Matched with an `ids` filter.
    Id,
    Type,
    Canonical,
    Hash,
    Height,
    ParentHash,
    BlockHash,
    BlockHeight,
    TransactionIndex,
    TransactionHash,
    From,
    To,
    Timestamp,
    Address,
    Signature,
    Topics,
    LogIndex,
    /// Decimal string, aggregated through its numeric sub-field.
    GasPrice,
}

impl Field {
    pub fn as_str(&self) -> &'static str {
        match self {
            Field::Id => "_id",
            Field::Type => "type",
            Field::Canonical => "canonical",
            Field::Hash => "hash",
            Field::Height => "height",
            Field::ParentHash => "parentHash",
            Field::BlockHash => "blockHash",
            Field::BlockHeight => "blockHeight",
            Field::TransactionIndex => "transactionIndex",
            Field::TransactionHash => "transactionHash",
            Field::From => "from",
            Field::To => "to",
            Field::Timestamp => "timestamp",
            Field::Address => "address",
            Field::Signature => "signature",
            Field::Topics => "topics",
            Field::LogIndex => "logIndex",
            Field::GasPrice => "gasPrice",
        }
    }

    /// Name of the field holding the value as a number.
    ///
    /// Differs from [Field::as_str] for fields stored as decimal strings.
    pub fn numeric_name(&self) -> &'static str {
        match self {
            Field::GasPrice => "gasPrice.num",
            other => other.as_str(),
        }
    }

    /// Fields that hold exact identifiers and must be mapped as keywords.
    pub fn keywords() -> &'static [Field] {
        &[
            Field::Type,
            Field::Hash,
            Field::ParentHash,
            Field::BlockHash,
            Field::TransactionHash,
            Field::From,
            Field::To,
            Field::Address,
            Field::Signature,
            Field::Topics,
        ]
    }

    /// Fields that hold integers as decimal strings.
    pub fn decimals() -> &'static [Field] {
        &[Field::GasPrice]
    }

    /// Fields that hold integers.
    pub fn numbers() -> &'static [Field] {
        &[
            Field::Height,
            Field::BlockHeight,
            Field::TransactionIndex,
            Field::LogIndex,
            Field::Timestamp,
        ]
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
