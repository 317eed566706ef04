use std::error::Error as StdError;
use std::fmt;

use reqwest::StatusCode;

pub type BoxError = Box<dyn StdError + Send + Sync>;

/// Which request an [`ApiError`] came from; only affects the wording.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiOperation {
    ListModels,
    Chat,
}

impl ApiOperation {
    fn http_failure_prefix(self) -> &'static str {
        match self {
            ApiOperation::ListModels => "Failed to list models",
            ApiOperation::Chat => "Chat request failed",
        }
    }

    fn network_hint(self) -> &'static str {
        match self {
            ApiOperation::ListModels => {
                "Network error while listing models. Check that the server is running and reachable at the configured address."
            }
            ApiOperation::Chat => {
                "Network error during chat. Check the connection to the server and that it is still running."
            }
        }
    }

    fn unexpected_message(self) -> &'static str {
        match self {
            ApiOperation::ListModels => "Unexpected error while listing models",
            ApiOperation::Chat => "Unexpected error during chat",
        }
    }
}

/// The single error kind surfaced by model listing and chat streaming.
#[derive(Debug)]
pub struct ApiError {
    pub message: String,
    pub status: Option<StatusCode>,
    pub cause: Option<BoxError>,
}

impl ApiError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status: None,
            cause: None,
        }
    }

    /// Non-success HTTP status; keeps the server's body text verbatim.
    pub fn http_status(operation: ApiOperation, status: StatusCode, body: &str) -> Self {
        let body = body.trim();
        let message = if body.is_empty() {
            format!("{}: {}", operation.http_failure_prefix(), status)
        } else {
            format!("{}: {} - {}", operation.http_failure_prefix(), status, body)
        };
        Self {
            message,
            status: Some(status),
            cause: None,
        }
    }

    pub fn missing_body() -> Self {
        Self::new("Response has no body")
    }

    pub fn network(operation: ApiOperation, cause: reqwest::Error) -> Self {
        Self {
            message: operation.network_hint().to_string(),
            status: None,
            cause: Some(Box::new(cause)),
        }
    }

    pub fn unexpected(operation: ApiOperation, cause: impl Into<BoxError>) -> Self {
        Self {
            message: operation.unexpected_message().to_string(),
            status: None,
            cause: Some(cause.into()),
        }
    }

    /// Converts an arbitrary failure into an `ApiError`.
    ///
    /// An `ApiError` passes through untouched, transport failures from
    /// `reqwest` get the network hint and everything else is reported as an
    /// unexpected failure with the original error kept as the source.
    pub fn wrap(operation: ApiOperation, err: BoxError) -> Self {
        let err = match err.downcast::<ApiError>() {
            Ok(api_error) => return *api_error,
            Err(other) => other,
        };
        match err.downcast::<reqwest::Error>() {
            Ok(reqwest_error) => Self::from_reqwest(operation, *reqwest_error),
            Err(other) => Self::unexpected(operation, other),
        }
    }

    pub fn from_reqwest(operation: ApiOperation, err: reqwest::Error) -> Self {
        if err.is_connect() || err.is_timeout() || err.is_request() {
            Self::network(operation, err)
        } else {
            Self::unexpected(operation, err)
        }
    }

    pub fn status(&self) -> Option<StatusCode> {
        self.status
    }

    pub fn is_network(&self) -> bool {
        self.status.is_none()
            && self
                .cause
                .as_ref()
                .and_then(|source| source.downcast_ref::<reqwest::Error>())
                .is_some_and(|err| err.is_connect() || err.is_timeout() || err.is_request())
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl StdError for ApiError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.cause
            .as_ref()
            .map(|source| source.as_ref() as &(dyn StdError + 'static))
    }
}
