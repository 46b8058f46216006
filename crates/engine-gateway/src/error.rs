use contextaware_protocol::{EngineKind, ErrorKind};
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GatewayError {
    #[error("{0} engine is not available on this host")]
    EngineUnavailable(EngineKind),
    #[error("{0} engine needs its model downloaded before use")]
    EngineDownloadRequired(EngineKind),
    #[error("engine request failed: {0}")]
    EngineRequestFailed(String),
}

impl GatewayError {
    pub fn request_failed(err: impl std::fmt::Display) -> Self {
        Self::EngineRequestFailed(format!("{err:#}"))
    }

    /// Wire taxonomy for this failure.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::EngineUnavailable(_) => ErrorKind::EngineUnavailable,
            Self::EngineDownloadRequired(_) => ErrorKind::EngineDownloadRequired,
            Self::EngineRequestFailed(_) => ErrorKind::EngineRequestFailed,
        }
    }
}
