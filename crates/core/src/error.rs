//! Error kinds returned by the core engine. Each operation either returns a
//! successful result or fails with exactly one of these; failures roll back
//! any partial write.

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("storage error: {0}")]
    Storage(String),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("content too large: {0} bytes exceeds the 2 MiB limit")]
    ContentTooLarge(usize),
    #[error("temporal violation: {0}")]
    TemporalViolation(String),
    #[error("causality violation: {0}")]
    CausalityViolation(String),
    #[error("vector index unavailable: {0}")]
    VectorUnavailable(String),
    #[error("malformed query: {0}")]
    MalformedQuery(String),
    #[error("bulk limit exceeded: {0} documents exceeds the 1000 limit")]
    BulkLimitExceeded(usize),
    #[error("migration error: {0}")]
    MigrationError(String),
}

impl From<redb::DatabaseError> for Error {
    fn from(e: redb::DatabaseError) -> Self {
        Error::Storage(e.to_string())
    }
}
impl From<redb::TransactionError> for Error {
    fn from(e: redb::TransactionError) -> Self {
        Error::Storage(e.to_string())
    }
}
impl From<redb::TableError> for Error {
    fn from(e: redb::TableError) -> Self {
        Error::Storage(e.to_string())
    }
}
impl From<redb::StorageError> for Error {
    fn from(e: redb::StorageError) -> Self {
        Error::Storage(e.to_string())
    }
}
impl From<redb::CommitError> for Error {
    fn from(e: redb::CommitError) -> Self {
        Error::Storage(e.to_string())
    }
}

#[cfg(feature = "fulltext")]
impl From<tantivy::TantivyError> for Error {
    fn from(e: tantivy::TantivyError) -> Self {
        Error::MalformedQuery(e.to_string())
    }
}
#[cfg(feature = "fulltext")]
impl From<tantivy::query::QueryParserError> for Error {
    fn from(e: tantivy::query::QueryParserError) -> Self {
        Error::MalformedQuery(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Content size limit from spec §5: 2 MiB per document.
pub const MAX_CONTENT_BYTES: usize = 2 * 1024 * 1024;
/// Bulk tag operation limit from spec §5: 1000 documents per call.
pub const MAX_BULK_DOCUMENTS: usize = 1000;
