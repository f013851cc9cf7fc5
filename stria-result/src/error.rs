use std::io;

use thiserror::Error;

/// Unified error type for all stria operations.
///
/// Errors propagate upward through the call stack using Rust's `?` operator.
/// Internal code can match on specific variants for fine-grained handling; at
/// API boundaries the variants map onto the caller's fail/skip/abort policy.
///
/// `Error` implements `Send` and `Sync`, allowing errors to cross thread
/// boundaries when decoded blocks are handed off to consumer threads.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error while pulling bytes from a row-group source.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Arrow library error during columnar data operations.
    ///
    /// Raised when building Arrow arrays from decoded values or when an
    /// array-level operation rejects its input. Arrow is the backing memory
    /// format for the concrete scalar blocks, so these errors typically
    /// indicate a malformed decode rather than a user mistake.
    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    /// Invalid argument or API misuse.
    ///
    /// Covers construction-time shape errors (length mismatches, bad region
    /// bounds) and decoder protocol violations (positions not ascending,
    /// calls in the wrong state). These indicate a bug in the calling code
    /// producing malformed inputs; they are never expected in correct
    /// operation and the affected instance is not usable afterwards.
    #[error("Invalid argument: {0}")]
    InvalidArgumentError(String),

    /// Data violates a structural invariant of the columnar layout.
    ///
    /// Raised lazily when the key hash index is first built over a column
    /// whose offsets are not monotonically ascending or whose null maps have
    /// entries, and eagerly when encoded stream bytes cannot be decoded
    /// (truncation, varint overflow, invalid UTF-8). Fatal to key-oriented
    /// use of the column; position/null reads of an already-built block are
    /// unaffected.
    #[error("Corrupted data: {0}")]
    CorruptedData(String),

    /// The segment declares a physical encoding this build cannot decode.
    ///
    /// A static mismatch between the declared schema encoding and the
    /// implemented decode strategies. Retrying the same bytes yields the same
    /// failure, so the caller must fail or skip the affected segment.
    #[error("Unsupported encoding: {0}")]
    UnsupportedEncoding(String),

    /// Internal error indicating a bug or unexpected state.
    ///
    /// Should never occur during normal operation. The message records which
    /// invariant was violated.
    #[error("An internal operation failed: {0}")]
    Internal(String),
}
