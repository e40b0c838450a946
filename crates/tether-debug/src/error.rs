use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Inspector HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Invalid inspector URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Debug session disconnected")]
    Disconnected,

    #[error("No debuggable target on port {0}")]
    NoTarget(u16),

    #[error("No application path given")]
    NoApplication,

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
