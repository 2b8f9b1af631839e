use std::{fmt, process::ExitCode};

use error_stack::Report;

/// Error kinds shared by every ethevents component.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexerError {
    /// Raw chain data is missing required fields. Should alert, never drop.
    MalformedInput,
    /// The search backend could not be reached. Can retry.
    BackendUnavailable,
    /// The chain source could not be reached. Can retry.
    SourceUnavailable,
    /// The backend rejected a document or returned one that doesn't match the schema.
    /// Should not retry.
    SchemaConflict,
    /// Ingestion cannot make progress. Should restart from the last confirmed height.
    IngestionStalled,
    /// A query builder received an unusable argument. Should not retry.
    InvalidQueryArgument,
    /// Configuration error. Should not retry.
    Configuration,
    /// The operation was cancelled.
    Cancelled,
}

pub type Result<T> = error_stack::Result<T, IndexerError>;

impl error_stack::Context for IndexerError {}

impl fmt::Display for IndexerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexerError::MalformedInput => f.write_str("indexer error: malformed input"),
            IndexerError::BackendUnavailable => f.write_str("indexer error: backend unavailable"),
            IndexerError::SourceUnavailable => {
                f.write_str("indexer error: chain source unavailable")
            }
            IndexerError::SchemaConflict => f.write_str("indexer error: schema conflict"),
            IndexerError::IngestionStalled => f.write_str("indexer error: ingestion stalled"),
            IndexerError::InvalidQueryArgument => {
                f.write_str("indexer error: invalid query argument")
            }
            IndexerError::Configuration => f.write_str("indexer error: configuration"),
            IndexerError::Cancelled => f.write_str("indexer error: cancelled"),
        }
    }
}

impl IndexerError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            IndexerError::BackendUnavailable | IndexerError::SourceUnavailable
        )
    }
}

pub trait IndexerErrorExt {
    /// Returns the error kind at the top of the report.
    fn kind(&self) -> IndexerError;

    fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }
}

impl IndexerErrorExt for Report<IndexerError> {
    fn kind(&self) -> IndexerError {
        *self.current_context()
    }
}

pub trait ReportExt {
    fn to_exit_code(&self) -> ExitCode;
}

impl<T> ReportExt for Result<T> {
    fn to_exit_code(&self) -> ExitCode {
        match self {
            Ok(_) => ExitCode::SUCCESS,
            Err(err) => {
                eprintln!("{:?}", err);
                // Exit codes based on sysexits.h
                match err.current_context() {
                    IndexerError::Configuration | IndexerError::InvalidQueryArgument => {
                        ExitCode::from(78)
                    }
                    IndexerError::BackendUnavailable
                    | IndexerError::SourceUnavailable
                    | IndexerError::IngestionStalled => ExitCode::from(75),
                    IndexerError::MalformedInput => ExitCode::from(65),
                    IndexerError::Cancelled => ExitCode::SUCCESS,
                    IndexerError::SchemaConflict => ExitCode::FAILURE,
                }
            }
        }
    }
}
