use thiserror::Error;

/// Top-level error type for the kAIron action server.
///
/// Subsystem crates define their own error types and implement
/// `From<KaironError>` so that the `?` operator works across crate
/// boundaries.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum KaironError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Vault error: {0}")]
    Vault(String),

    #[error("API error: {0}")]
    Api(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<toml::de::Error> for KaironError {
    fn from(err: toml::de::Error) -> Self {
        KaironError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for KaironError {
    fn from(err: toml::ser::Error) -> Self {
        KaironError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for KaironError {
    fn from(err: serde_json::Error) -> Self {
        KaironError::Serialization(err.to_string())
    }
}

/// A specialized `Result` type for kAIron operations.
pub type Result<T> = std::result::Result<T, KaironError>;
