use thiserror::Error;

/// Failures surfaced to callers of the invocation primitives.
#[derive(Error, Debug)]
pub enum RemotingError {
    /// The request never left the process.
    #[error("Send request to <{addr}> failed{}", describe_cause(.cause))]
    SendRequest {
        addr: String,
        cause: Option<TransportError>,
    },

    /// The request was written but no correlated reply arrived in time.
    #[error("Wait reply from <{addr}> timed out after {timeout_ms}ms{}", describe_cause(.cause))]
    Timeout {
        addr: String,
        timeout_ms: u64,
        cause: Option<TransportError>,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Codec error: {0}")]
    Codec(String),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

impl RemotingError {
    /// True when the request was sent and the outcome is unknown.
    ///
    /// The remote may have processed the request, so a retry is not
    /// automatically safe.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// True when the request never reached the wire.
    pub fn is_send_request(&self) -> bool {
        matches!(self, Self::SendRequest { .. })
    }

    /// The underlying transport cause, if one was recorded.
    pub fn cause(&self) -> Option<&TransportError> {
        match self {
            Self::SendRequest { cause, .. } | Self::Timeout { cause, .. } => cause.as_ref(),
            Self::Transport(err) => Some(err),
            _ => None,
        }
    }
}

/// Failures reported by a [`Channel`](crate::channel::Channel) write or read.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Channel closed")]
    Closed,

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Frame too large: {size} bytes (max: {max} bytes)")]
    FrameTooLarge { size: usize, max: usize },

    #[error("Codec error: {0}")]
    Codec(String),
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::UnexpectedEof
            | std::io::ErrorKind::BrokenPipe
            | std::io::ErrorKind::ConnectionReset => Self::Closed,
            _ => Self::Io(err.to_string()),
        }
    }
}

fn describe_cause(cause: &Option<TransportError>) -> String {
    match cause {
        Some(cause) => format!(": {}", cause),
        None => String::new(),
    }
}

pub type Result<T> = std::result::Result<T, RemotingError>;
