use std::io;

/// Socket-level failures. Resolution failures are mapped to `HostNotFound`
/// by the connect path; everything else comes from `std::io::Error`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("connection refused")]
    ConnectionRefused,

    #[error("host not found")]
    HostNotFound,

    #[error("remote host closed the connection")]
    RemoteClosed,

    #[error("network error: {0}")]
    Network(String),

    #[error("operation timed out")]
    TimedOut,

    #[error("{0}")]
    Other(String),
}

impl TransportError {
    /// Status line suitable for direct display
    pub fn status_message(&self) -> String {
        match self {
            TransportError::RemoteClosed => "Server closed connection - reconnecting...".to_string(),
            TransportError::ConnectionRefused => {
                "Connection refused - check if server is running".to_string()
            }
            TransportError::HostNotFound => "Server not found - check server address".to_string(),
            TransportError::Network(_) => "Network error - check your connection".to_string(),
            other => format!("Connection error: {}", other),
        }
    }
}

impl From<io::Error> for TransportError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::ConnectionRefused => TransportError::ConnectionRefused,
            io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::UnexpectedEof => TransportError::RemoteClosed,
            io::ErrorKind::NotConnected | io::ErrorKind::AddrNotAvailable => {
                TransportError::Network(err.to_string())
            }
            io::ErrorKind::TimedOut => TransportError::TimedOut,
            _ => TransportError::Other(err.to_string()),
        }
    }
}
