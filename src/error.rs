use crate::peer::Peer;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SwarmError {
    #[error("Unknown peer: {0}")]
    UnknownPeer(Peer),

    #[error("Internal invariant violated: {0}")]
    InternalInvariantViolation(String),

    #[error("Torrent worker is no longer running")]
    WorkerClosed,

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, SwarmError>;
