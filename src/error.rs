use thiserror::Error;

/// Failure taxonomy surfaced by the store and its engines.
///
/// Outer layers translate these into user-facing responses; none of them
/// are retried internally. A failed structural mutation rolls back every
/// metadata and physical-relation change made during that operation.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A SQL type token could not be matched against exactly one type family.
    #[error("unknown SQL data type '{0}'")]
    UnknownType(String),

    /// Importing a source file into a dataset or version failed.
    #[error("import failed: {0}")]
    Import(String),

    /// A join request referenced invalid tables/columns or had a shape mismatch.
    #[error("join failed: {0}")]
    Join(String),

    /// A deduplication request targeted a missing or non-string column.
    #[error("deduplication failed: {0}")]
    Dedup(String),

    /// An entity-graph invariant would be violated (duplicate column display
    /// name, deleting the sole remaining version, ...).
    #[error("schema invariant violated: {0}")]
    SchemaInvariant(String),

    /// A transform referenced a missing column or a row-level cast failed.
    #[error("transform failed: {0}")]
    Transform(String),

    /// The relational engine rejected a statement.
    #[error("storage engine error: {0}")]
    Storage(String),

    /// Another writer currently holds the dataset's advisory lock.
    #[error("dataset {0} is busy with another structural mutation")]
    Busy(u64),

    /// A referenced entity does not exist.
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: u64 },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;

impl StoreError {
    pub(crate) fn not_found(kind: &'static str, id: u64) -> Self {
        StoreError::NotFound { kind, id }
    }
}
