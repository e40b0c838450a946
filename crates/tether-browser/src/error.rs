use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Browser not found: {0}")]
    NotFound(String),

    #[error("Browser error: {0}")]
    Browser(String),

    #[error("Certificate database error: {0}")]
    CertDatabase(String),

    #[error(transparent)]
    Core(#[from] tether_core::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<Error> for tether_core::Error {
    fn from(err: Error) -> Self {
        match err {
            Error::Core(inner) => inner,
            Error::Io(inner) => tether_core::Error::Io(inner),
            other => tether_core::Error::Unknown(other.to_string()),
        }
    }
}
