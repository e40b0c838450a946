use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Device error: {0}")]
    Device(String),

    #[error("Simulator {0} did not finish booting")]
    BootTimeout(String),

    #[error(transparent)]
    Core(#[from] tether_core::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
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
