use thiserror::Error;

/// Errors surfaced by dataset accessors and admin actions.
///
/// Flattening, indexing and joining never fail; only configuration,
/// upstream reads and durable storage can.
#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("upstream fetch failed: {0}")]
    Upstream(String),
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("unsupported in this cache mode: {0}")]
    Unsupported(String),
}

impl Error {
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Config(_) => "ConfigurationError",
            Error::Upstream(_) => "UpstreamFetchError",
            Error::Persistence(_) => "PersistenceError",
            Error::Unsupported(_) => "UnsupportedAction",
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::Upstream(err.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Persistence(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Persistence(err.to_string())
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
