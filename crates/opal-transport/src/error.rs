use opal_binary::error::BinaryError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Malformed segment: {0}")]
    Malformed(#[from] BinaryError),
    #[error("Server reported: file not found")]
    FileNotFound,
    #[error("File name does not fit in a single request datagram")]
    RequestTooLong,
}

pub type Result<T> = std::result::Result<T, TransportError>;
