use std::io;

use thiserror::Error;

/// Errors produced while reading, writing or detecting `.big` archives.
#[derive(Error, Debug)]
pub enum BigError {
    #[error("format error: {0}")]
    Format(String),

    #[error("encryption error: {0}")]
    Encryption(String),

    #[error("integrity error: {0}")]
    Integrity(String),

    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("value error: {0}")]
    Value(String),
}

pub type Result<T> = std::result::Result<T, BigError>;

impl BigError {
    pub fn format<S: Into<String>>(msg: S) -> Self {
        BigError::Format(msg.into())
    }

    pub fn encryption<S: Into<String>>(msg: S) -> Self {
        BigError::Encryption(msg.into())
    }

    pub fn integrity<S: Into<String>>(msg: S) -> Self {
        BigError::Integrity(msg.into())
    }

    pub fn value<S: Into<String>>(msg: S) -> Self {
        BigError::Value(msg.into())
    }
}

impl From<BigError> for io::Error {
    fn from(err: BigError) -> io::Error {
        match err {
            BigError::Io(err) => err,
            other => io::Error::new(io::ErrorKind::InvalidData, other),
        }
    }
}
