use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("Config Error - {0}")]
    Config(String),

    #[error("Connection Error - {0}")]
    Connection(String),

    #[error("Marshal Error - {0}")]
    Marshal(String),

    #[error("Sink Error - {0}")]
    Sink(String),

    #[error("Store Error - {0}")]
    Store(String),

    #[error("IO Error - {0}")]
    Io(String),

    #[error("Worker Error - {0}")]
    Worker(String),
}

impl Error {
    /// Fatal errors stop the run, the rest are reported on the error sink and processing carries on.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Config(_) | Error::Connection(_) | Error::Worker(_))
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Config(err.to_string())
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(err: tokio::task::JoinError) -> Self {
        Error::Worker(err.to_string())
    }
}
