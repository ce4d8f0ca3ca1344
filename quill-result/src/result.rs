use crate::error::Error;

/// Result type alias used throughout quill.
///
/// Shorthand for `std::result::Result<T, Error>`. All quill operations that
/// can fail should return this type.
pub type Result<T> = std::result::Result<T, Error>;
