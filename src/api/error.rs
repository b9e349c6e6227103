//! Error taxonomy for the backend API client.

use std::fmt;

/// A structured failure reported by the backend.
///
/// `status_code` is 0 when the error was embedded in a streamed chunk rather
/// than carried by the HTTP status line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    pub status_code: u16,
    pub status_text: String,
    pub message: String,
    pub endpoint: String,
}

impl ApiError {
    /// An error carried inside a streamed chunk.
    pub fn in_stream(endpoint: &str, message: impl Into<String>) -> Self {
        Self {
            status_code: 0,
            status_text: String::new(),
            message: message.into(),
            endpoint: endpoint.to_string(),
        }
    }

    pub fn is_server_error(&self) -> bool {
        matches!(self.status_code, 500 | 502 | 503 | 504)
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            write!(f, "ollama api {}: {}", self.endpoint, self.status_text)
        } else {
            write!(
                f,
                "ollama api {}: {} (status {})",
                self.endpoint, self.message, self.status_code
            )
        }
    }
}

impl std::error::Error for ApiError {}

/// Errors returned by [`crate::api::OllamaClient`].
#[derive(Debug)]
pub enum Error {
    /// Malformed input detected before any request was sent.
    Validation(String),
    /// The request could not be sent or the response could not be read.
    Transport {
        context: &'static str,
        source: reqwest::Error,
    },
    /// The backend answered with a failure.
    Api(ApiError),
    /// A response or stream chunk was not valid JSON of the expected shape.
    Decode {
        context: &'static str,
        source: serde_json::Error,
    },
    /// Writing streamed output to the caller's sink failed.
    Io {
        context: &'static str,
        source: std::io::Error,
    },
    /// The caller cancelled the operation.
    Cancelled,
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    pub(crate) fn validation(msg: impl Into<String>) -> Self {
        Error::Validation(msg.into())
    }

    pub(crate) fn transport(context: &'static str, source: reqwest::Error) -> Self {
        Error::Transport { context, source }
    }

    pub(crate) fn decode(context: &'static str, source: serde_json::Error) -> Self {
        Error::Decode { context, source }
    }

    pub(crate) fn io(context: &'static str, source: std::io::Error) -> Self {
        Error::Io { context, source }
    }

    /// Returns the backend error if this is one.
    pub fn api_error(&self) -> Option<&ApiError> {
        match self {
            Error::Api(e) => Some(e),
            _ => None,
        }
    }

    /// HTTP status of a backend error; `Some(0)` for stream-embedded errors.
    pub fn status_code(&self) -> Option<u16> {
        self.api_error().map(|e| e.status_code)
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, Error::Validation(_))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Validation(msg) => write!(f, "invalid request: {}", msg),
            Error::Transport { context, source } => write!(f, "{}: {}", context, source),
            Error::Api(e) => e.fmt(f),
            Error::Decode { context, source } => write!(f, "{}: {}", context, source),
            Error::Io { context, source } => write!(f, "{}: {}", context, source),
            Error::Cancelled => write!(f, "operation cancelled"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Transport { source, .. } => Some(source),
            Error::Decode { source, .. } => Some(source),
            Error::Io { source, .. } => Some(source),
            Error::Api(_) | Error::Validation(_) | Error::Cancelled => None,
        }
    }
}

impl From<ApiError> for Error {
    fn from(e: ApiError) -> Self {
        Error::Api(e)
    }
}
