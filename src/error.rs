use thiserror::Error;

/// Errors raised while building or validating [`crate::options::Options`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unknown configuration option: {0}")]
    UnknownOption(String),

    #[error("instrumentation key is missing (set it explicitly or via APPINSIGHTS_INSTRUMENTATIONKEY)")]
    MissingInstrumentationKey,

    #[error("instrumentation key '{0}' is not a valid GUID")]
    InvalidInstrumentationKey(String),

    #[error("invalid value for '{key}': {message}")]
    InvalidValue { key: String, message: String },
}

/// Errors surfaced by [`crate::blob::Blob`] operations.
#[derive(Debug, Error)]
pub enum BlobError {
    #[error("i/o error on blob {path}: {source}")]
    Io {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to decode blob payload at {path}")]
    Decode { path: std::path::PathBuf },
}

/// Errors surfaced by [`crate::transmitter::Transmitter`].
#[derive(Debug, Error)]
pub enum TransmitError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("unexpected response status {0}")]
    UnexpectedStatus(u16),
}
