use thiserror::Error;

/// Errors produced by the signaling relay and client.
#[derive(Debug, Error)]
pub enum SignalError {
    #[error("duplicate connection id: {0}")]
    DuplicateId(String),

    #[error("connection not found: {0}")]
    NotFound(String),

    #[error("send failed: {0}")]
    Send(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("connection closed")]
    Closed,

    #[error("codec error: {0}")]
    Codec(String),

    #[error("invalid message: {0}")]
    InvalidMessage(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("timeout")]
    Timeout,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl From<serde_json::Error> for SignalError {
    fn from(e: serde_json::Error) -> Self {
        SignalError::Codec(e.to_string())
    }
}

pub type SignalResult<T> = Result<T, SignalError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_errors_map_to_codec() {
        let err: SignalError = serde_json::from_str::<serde_json::Value>("{nope")
            .unwrap_err()
            .into();
        assert!(matches!(err, SignalError::Codec(_)));
    }
}
