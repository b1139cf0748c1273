use pds_sketch::SketchError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, CatalogError>;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("not implemented: {0}")]
    UnsupportedVariant(String),

    #[error("invalid parameters: {0}")]
    InvalidParameters(String),

    /// The relational store failed; nothing of the operation was committed.
    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("deserialization error: {0}")]
    Deserialization(String),

    /// A filter was re-declared under an existing key with other tuning.
    #[error("parameter conflict: {0}")]
    ParameterConflict(String),

    #[error("config error: {0}")]
    Config(String),

    /// The remote engine could not be connected at startup.
    #[error("remote engine error: {0}")]
    Remote(String),
}

impl From<SketchError> for CatalogError {
    fn from(e: SketchError) -> Self {
        match e {
            SketchError::UnsupportedVariant(s) => CatalogError::UnsupportedVariant(s),
            SketchError::InvalidParameters(s) => CatalogError::InvalidParameters(s),
            SketchError::Serialization(s) => CatalogError::Serialization(s),
            SketchError::Deserialization(s) => CatalogError::Deserialization(s),
        }
    }
}

impl From<rusqlite::Error> for CatalogError {
    fn from(e: rusqlite::Error) -> Self {
        CatalogError::Persistence(e.to_string())
    }
}
