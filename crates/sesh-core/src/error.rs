use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Unsupported environment: {0}")]
    UnsupportedEnvironment(String),

    #[error("Invalid session id: {0:?}")]
    InvalidSessionId(String),

    #[error("Session handler is not open")]
    NotOpen,

    #[error("Session not started")]
    NotStarted,

    #[error("Session already started")]
    AlreadyStarted,

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
