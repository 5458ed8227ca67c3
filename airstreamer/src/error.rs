//! Error types for airstreamer

/// Errors raised while talking to (or running) the audio engine
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Engine unavailable at {0}")]
    Unavailable(String),

    #[error("Invalid engine response: {0}")]
    Parse(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Engine process error: {0}")]
    Process(String),

    #[error(transparent)]
    Store(#[from] airmodels::Error),
}

impl Error {
    pub fn parse(what: impl Into<String>) -> Self {
        Self::Parse(what.into())
    }

    pub fn process(what: impl Into<String>) -> Self {
        Self::Process(what.into())
    }
}

/// Result type for airstreamer
pub type Result<T> = std::result::Result<T, Error>;
