//! Error types for airmonitor

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Store(#[from] airmodels::Error),

    #[error(transparent)]
    Streamer(#[from] airstreamer::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
