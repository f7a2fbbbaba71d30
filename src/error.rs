use std::io::ErrorKind;

/// Storage core error type.
///
/// Variants carry message strings only, so outcomes can be cloned and fanned
/// out to every waiter of an in-flight derivative generation. Transient
/// backend failures (`BackendUnavailable`) are retryable by the caller;
/// `BackendDenied` signals a credential or permission problem and is not.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("backend denied: {0}")]
    BackendDenied(String),

    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("invalid image: {0}")]
    InvalidImage(String),

    #[error("name exhausted: {0}")]
    NameExhausted(String),
}

impl Error {
    /// Stable machine-readable kind, for boundary layers mapping errors to
    /// response codes.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::NotFound(_) => "not_found",
            Error::InvalidKey(_) => "invalid_key",
            Error::BackendUnavailable(_) => "backend_unavailable",
            Error::BackendDenied(_) => "backend_denied",
            Error::UnsupportedFormat(_) => "unsupported_format",
            Error::InvalidImage(_) => "invalid_image",
            Error::NameExhausted(_) => "name_exhausted",
        }
    }

    /// Whether a retry of the same call may succeed without intervention.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::BackendUnavailable(_))
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            ErrorKind::NotFound => Error::NotFound(e.to_string()),
            ErrorKind::PermissionDenied => Error::BackendDenied(e.to_string()),
            _ => Error::BackendUnavailable(e.to_string()),
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::BackendUnavailable(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
