use crate::error::Error;

/// Result type alias used throughout stria.
///
/// All stria operations that can fail return this type.
pub type Result<T> = std::result::Result<T, Error>;
