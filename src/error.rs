use thiserror::Error;

/// Main error type for playgraph
#[derive(Error, Debug)]
pub enum PlaygraphError {
    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// File system I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Attribute payloads, staged candidates and summaries
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A raw record has no usable natural key (blank name)
    #[error("Invalid identity: {0}")]
    InvalidIdentity(String),

    /// Conflicting external ids collapse onto one fallback key
    #[error("Ambiguous identity for {key}: candidates {candidates:?}")]
    AmbiguousIdentity { key: String, candidates: Vec<String> },

    /// A required input table does not exist
    #[error("Missing input table: {0}")]
    MissingTable(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl PlaygraphError {
    /// Record-level errors are counted and skipped; everything else aborts the phase.
    pub fn is_record_level(&self) -> bool {
        matches!(
            self,
            PlaygraphError::InvalidIdentity(_) | PlaygraphError::AmbiguousIdentity { .. }
        )
    }
}

/// Convenient Result type using PlaygraphError
pub type Result<T> = std::result::Result<T, PlaygraphError>;
