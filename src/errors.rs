use std::io;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, StreamError>;

#[derive(Error, Debug)]
pub enum StreamError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("Bad connection string: {0}")]
    Uri(String),
    #[error("Position out of range: {0}")]
    OutOfRange(String),
    #[error("Operation is not supported: {0}")]
    Unsupported(&'static str),
    #[error("Stream is closed")]
    Closed,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<StreamError> for io::Error {
    fn from(err: StreamError) -> Self {
        match err {
            StreamError::Io(e) => e,
            StreamError::Closed => {
                io::Error::new(io::ErrorKind::UnexpectedEof, "stream is closed")
            }
            StreamError::Unsupported(op) => {
                io::Error::new(io::ErrorKind::Unsupported, op)
            }
            other => io::Error::new(io::ErrorKind::Other, other.to_string()),
        }
    }
}
