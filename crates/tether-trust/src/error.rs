use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Certificate generation failed: {0}")]
    Generation(String),

    #[error("Elevation was cancelled or denied: {0}")]
    ElevationDenied(String),

    #[error("No certificate trust directory found")]
    NoTrustStore,

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
            Error::Generation(message) => tether_core::Error::Certificate(message),
            other => tether_core::Error::Unknown(other.to_string()),
        }
    }
}
