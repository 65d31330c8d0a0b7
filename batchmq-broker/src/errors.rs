use thiserror::Error;

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("cannot {operation}, message with id {id} not found in wip")]
    NotFound { operation: &'static str, id: u64 },
    #[error("max_messages {max_messages} exceeded: already in queue {queued}, adding {adding}")]
    CapacityExceeded {
        max_messages: usize,
        queued: usize,
        adding: usize,
    },
    #[error("connectivity error: {0}")]
    Connectivity(String),
    #[error("cannot decode message: {0}")]
    Decode(String),
    #[error("cannot stop {0} gracefully, closing its channel is unsafe")]
    ShutdownTimeout(&'static str),
    #[error("operation not supported: {0}")]
    NotSupported(&'static str),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("broker responded {status}: {message}")]
    Remote { status: u16, message: String },
    #[error("internal broker error: {0}")]
    Internal(String),
}

impl BrokerError {
    pub(crate) fn not_found(operation: &'static str, id: u64) -> Self {
        BrokerError::NotFound { operation, id }
    }
}

impl From<reqwest::Error> for BrokerError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            BrokerError::Decode(err.to_string())
        } else {
            BrokerError::Connectivity(err.to_string())
        }
    }
}
