use contextaware_protocol::BusError;
use thiserror::Error;

use crate::phase::RequestPhase;

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("coordinator runtime is offline")]
    Offline,
    #[error("failed to send command to coordinator runtime")]
    ChannelClosed,
    #[error("illegal request transition {from:?} -> {to:?}")]
    InvalidTransition {
        from: RequestPhase,
        to: RequestPhase,
    },
    #[error("malformed reply from surface: {0}")]
    MalformedReply(String),
    #[error("configuration error: {0}")]
    Config(#[from] serde_json::Error),
    #[error("bus error: {0}")]
    Bus(#[from] BusError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("coordinator runtime join error: {0}")]
    Join(#[from] tokio::task::JoinError),
}

pub type CoordinatorResult<T> = Result<T, CoordinatorError>;
