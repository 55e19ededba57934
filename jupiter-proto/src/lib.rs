pub mod messages;
pub mod framing;

pub use messages::*;
pub use framing::*;

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Inbound buffer overflow: {0} bytes without a complete frame (max: {1})")]
    BufferOverflow(usize, usize),
}

pub type Result<T> = std::result::Result<T, ProtocolError>;
