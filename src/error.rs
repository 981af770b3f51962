use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("database error: {0}")]
    Redb(#[from] redb::Error),

    #[error("database open error: {0}")]
    RedbDatabase(#[from] redb::DatabaseError),

    #[error("database storage error: {0}")]
    RedbStorage(#[from] redb::StorageError),

    #[error("database transaction error: {0}")]
    RedbTransaction(#[from] redb::TransactionError),

    #[error("database table error: {0}")]
    RedbTable(#[from] redb::TableError),

    #[error("database commit error: {0}")]
    RedbCommit(#[from] redb::CommitError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("{kind} not found: {name}")]
    NotFound { kind: &'static str, name: String },

    #[error("data directory does not exist and could not be created: {0}")]
    DataDir(PathBuf),

    #[error("invalid document: {0}")]
    InvalidDocument(String),

    #[error(
        "embedding dimension mismatch: index uses {expected}, got {actual}"
    )]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("embedding provider rate limited: {0}")]
    RateLimited(String),

    #[error("embedding provider error: {0}")]
    Embedding(String),

    #[error("corrupt persisted state: {0}")]
    CorruptState(String),

    #[error(
        "chunk store holds {records} records but the vector index holds \
         {vectors} vectors; run `rolerag rebuild`"
    )]
    AlignmentViolation { records: usize, vectors: usize },

    #[error("chunk of {len} characters exceeds the {max} character limit")]
    ChunkTooLarge { len: usize, max: usize },
}

impl Error {
    /// Whether the failed operation may succeed if simply tried again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::RateLimited(_))
    }
}
