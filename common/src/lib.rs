#[macro_use]
extern crate log;

pub mod config;
pub mod duplex;
pub mod error;
pub mod file_utils;
pub mod message;
pub mod retry;
pub mod transport;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub const PROTOCOL_VERSION: &str = grpc_service::VERSION;

pub fn format_error(error: anyhow::Error) -> String {
    error
        .chain()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("\nCaused by:\n    ")
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::error::HelloError;
    use tonic::Status;

    #[test]
    fn format_error_chain() {
        let error = anyhow::Error::from(HelloError::Receive(Status::internal("boom")));
        let formatted = format_error(error);
        assert!(formatted.starts_with("Unable to receive from the duplex channel\nCaused by:\n    "));
        assert!(formatted.contains("boom"));
    }
}
