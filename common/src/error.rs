use crate::file_utils::FileError;
use thiserror::Error;
use tonic::{Code, Status};

/// Everything that can go wrong while talking to the hello service.
///
/// Nothing in this crate terminates the process: errors are handed back to the
/// caller, which decides what to do with them.
#[derive(Error, Debug)]
pub enum HelloError {
    #[error("Invalid server url {url}")]
    InvalidUrl {
        url: String,
        source: http::uri::InvalidUri,
    },
    #[error("Refusing plaintext connection to {0}, configure tls or explicitly allow insecure transport")]
    InsecureTransportRefused(String),
    #[error("Unable to load TLS material")]
    TlsMaterial(#[from] FileError),
    #[error("Invalid TLS configuration for {url}")]
    TlsConfig {
        url: String,
        source: tonic::transport::Error,
    },
    #[error("Unable to connect to {url}")]
    Connect {
        url: String,
        source: tonic::transport::Error,
    },
    #[error("Hello call failed")]
    Unary(#[source] Status),
    #[error("Unable to open the duplex channel")]
    StreamOpen(#[source] Status),
    #[error("Unable to send on the duplex channel, the channel is closed")]
    Send,
    #[error("Unable to receive from the duplex channel")]
    Receive(#[source] Status),
    #[error("Send task crashed")]
    Producer(#[from] tokio::task::JoinError),
    #[error("Interrupted")]
    Cancelled,
}

impl HelloError {
    /// Whether retrying the failed operation may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            HelloError::Connect { .. } => true,
            HelloError::Unary(status)
            | HelloError::StreamOpen(status)
            | HelloError::Receive(status) => is_transient_code(status.code()),
            _ => false,
        }
    }
}

pub fn is_transient_code(code: Code) -> bool {
    matches!(
        code,
        Code::Unavailable | Code::ResourceExhausted | Code::Aborted | Code::DeadlineExceeded
    )
}
