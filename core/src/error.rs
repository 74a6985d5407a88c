use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("upstream returned {status}: {body}")]
    Upstream { status: u16, body: String },

    #[error("{bound} ceiling of {limit} exceeded")]
    BoundExceeded { bound: Bound, limit: u64 },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("validation error: {0}")]
    Validation(String),

    /// Upstream content that could not be decoded or parsed.
    #[error("malformed upstream data: {0}")]
    Data(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Resource ceiling that stopped a paginated fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bound {
    Pages,
    Bytes,
}

impl std::fmt::Display for Bound {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Bound::Pages => write!(f, "page count"),
            Bound::Bytes => write!(f, "byte"),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Config(_) | Error::Validation(_))
    }

    /// HTTP status carried by the error, if the upstream answered at all.
    pub fn upstream_status(&self) -> Option<u16> {
        match self {
            Error::Upstream { status, .. } => Some(*status),
            Error::Transport(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}
