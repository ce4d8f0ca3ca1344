use thiserror::Error;

/// Unified error type for all quill operations.
///
/// A single enum rather than per-crate error types: errors cross crate
/// boundaries constantly (the transaction plane surfaces storage-plane
/// failures verbatim), and a shared type lets `?` do the plumbing.
///
/// # Thread Safety
///
/// `Error` is `Send + Sync` so failures can cross thread boundaries during
/// parallel scans.
#[derive(Error, Debug)]
pub enum Error {
    /// Arrow library error during columnar data operations.
    ///
    /// Raised when building, slicing, filtering, or casting Arrow arrays and
    /// record batches. Arrow is the engine's columnar memory format, so these
    /// errors usually indicate a schema mismatch between a caller-provided
    /// batch and the table it targets.
    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    /// Invalid user input or API parameter.
    ///
    /// Out-of-range row identifiers, projections referencing unknown columns,
    /// batches whose column count disagrees with the table schema, and
    /// similar caller mistakes. Recoverable: fix the input and retry.
    #[error("Invalid argument: {0}")]
    InvalidArgumentError(String),

    /// Data constraint violation.
    ///
    /// Raised when an insert or update would introduce a duplicate key into
    /// a PRIMARY KEY or UNIQUE index, either against other uncommitted rows
    /// of the same transaction or against committed data at commit time.
    /// Expected during normal operation; callers should surface the message
    /// to the user.
    #[error("Constraint Error: {0}")]
    ConstraintError(String),

    /// Operation the engine does not support in the current state.
    ///
    /// Distinct from [`Error::InvalidArgumentError`]: the request is
    /// well-formed, the engine just cannot honor it (for example altering a
    /// column type that a transaction-local index depends on). The failed
    /// operation must leave state untouched.
    #[error("Not supported: {0}")]
    NotSupported(String),

    /// Internal error indicating a bug or violated invariant.
    ///
    /// Should never occur during normal operation; it terminates the current
    /// transaction. The message names the assertion that failed.
    #[error("An internal operation failed: {0}")]
    Internal(String),
}

impl Error {
    /// The canonical duplicate-key constraint violation.
    ///
    /// Both the transaction-local shadow indexes (at append time) and the
    /// base table indexes (at flush time) report uniqueness conflicts with
    /// this exact message.
    #[inline]
    pub fn duplicate_key() -> Self {
        Error::ConstraintError(
            "PRIMARY KEY or UNIQUE constraint violated: duplicated key".to_string(),
        )
    }
}
