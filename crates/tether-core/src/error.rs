use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Coarse classification of a failure, independent of where it came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    Unsupported,
    ConfirmationRequired,
    CertificateNotInstalled,
    DebugClientInitFailed,
    InjectionException,
    Unknown,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Unsupported => "unsupported",
            ErrorKind::ConfirmationRequired => "confirmation-required",
            ErrorKind::CertificateNotInstalled => "certificate-not-installed",
            ErrorKind::DebugClientInitFailed => "debug-client-init-failed",
            ErrorKind::InjectionException => "injection-exception",
            ErrorKind::Unknown => "unknown",
        }
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("Unsupported: {0}")]
    Unsupported(String),

    #[error("{0} is already running and must be closed before it can be intercepted")]
    ConfirmationRequired(String),

    #[error("CA certificate is not installed and trusted")]
    CertificateNotInstalled,

    #[error("Failed to initialize debug client: {0}")]
    DebugClientInitFailed(String),

    #[error("Injected script threw: {0}")]
    InjectionException(String),

    #[error("{0}")]
    Unknown(String),

    #[error("Duplicate target id: {0}")]
    DuplicateTarget(String),

    #[error("Unknown target: {0}")]
    UnknownTarget(String),

    #[error("Invalid activation key: {0}")]
    InvalidKey(String),

    #[error("Command `{program}` failed: {message}")]
    Command { program: String, message: String },

    #[error("Process error: {0}")]
    Process(String),

    #[error("Certificate error: {0}")]
    Certificate(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Unsupported(_) => ErrorKind::Unsupported,
            Error::ConfirmationRequired(_) => ErrorKind::ConfirmationRequired,
            Error::CertificateNotInstalled => ErrorKind::CertificateNotInstalled,
            Error::DebugClientInitFailed(_) => ErrorKind::DebugClientInitFailed,
            Error::InjectionException(_) => ErrorKind::InjectionException,
            _ => ErrorKind::Unknown,
        }
    }

    /// Whether this failure should reach error reporting, as opposed to being
    /// an expected outcome the caller handles in its UI
    pub fn reportable(&self) -> bool {
        !matches!(
            self.kind(),
            ErrorKind::Unsupported | ErrorKind::ConfirmationRequired
        )
    }

    pub fn metadata(&self) -> ErrorMetadata {
        let kind = self.kind();
        ErrorMetadata {
            kind,
            message: self.to_string(),
            reportable: self.reportable(),
            close_confirm_required: (kind == ErrorKind::ConfirmationRequired).then_some(true),
        }
    }

    pub fn command(program: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Command {
            program: program.into(),
            message: message.into(),
        }
    }
}

/// Failure details handed back across the façade boundary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorMetadata {
    pub kind: ErrorKind,
    pub message: String,
    pub reportable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub close_confirm_required: Option<bool>,
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_confirmation_required_is_not_reportable() {
        let err = Error::ConfirmationRequired("Google Chrome".to_string());
        let meta = err.metadata();

        assert_eq!(meta.kind, ErrorKind::ConfirmationRequired);
        assert!(!meta.reportable);
        assert_eq!(meta.close_confirm_required, Some(true));

        let json = serde_json::to_value(&meta).unwrap();
        assert_eq!(json["closeConfirmRequired"], true);
    }

    #[test]
    fn test_plumbing_errors_are_unknown_and_reportable() {
        let err = Error::command("adb", "exited with 1");
        assert_eq!(err.kind(), ErrorKind::Unknown);
        assert!(err.reportable());
        assert!(err.metadata().close_confirm_required.is_none());
    }
}
