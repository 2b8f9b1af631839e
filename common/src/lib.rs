//! Shared types of the ethevents indexer.
mod core;
pub mod error;
pub mod normalize;
pub mod query;
pub mod raw;
pub mod schema;

pub use self::core::{testing, BlockHeader, Cursor};
pub use self::error::{IndexerError, IndexerErrorExt, ReportExt, Result};
pub use self::normalize::normalize;
