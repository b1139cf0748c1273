use thiserror::Error;

pub type Result<T> = std::result::Result<T, SketchError>;

/// Errors surfaced by sketch handles and their descriptors.
///
/// Remote transport failures are deliberately absent: remote variants fold
/// them into their fail-closed return values.
#[derive(Debug, Error)]
pub enum SketchError {
    /// The type string names no known variant.
    #[error("not implemented: {0}")]
    UnsupportedVariant(String),

    #[error("invalid parameters: {0}")]
    InvalidParameters(String),

    /// A snapshot could not be encoded.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A snapshot is malformed, belongs to another kind of sketch, or was
    /// handed to a variant that keeps no local state.
    #[error("deserialization error: {0}")]
    Deserialization(String),
}
