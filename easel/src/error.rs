//! Error types for backend clients.

use reqwest::StatusCode;

/// Result type alias for backend operations.
pub type Result<T> = std::result::Result<T, BackendError>;

/// Errors raised while talking to a generation backend.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum BackendError {
    /// The request never produced a response (connect, timeout, body read).
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The backend answered with an error status.
    #[error("got unexpected response code: {status}")]
    Status {
        /// Status code returned by the backend.
        status: StatusCode,
        /// Response body, possibly empty.
        body: String,
    },

    /// The response body was not the JSON we expected.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Inline image payload was not valid base64.
    #[error("invalid image data: {0}")]
    Decode(#[from] base64::DecodeError),

    /// The backend returned no results.
    #[error("no text in response")]
    EmptyResponse,

    /// The backend reported a failure for the job itself.
    #[error("received error from backend: {0}")]
    Engine(String),

    /// A configured URL could not be used.
    #[error("invalid URL: {0}")]
    InvalidUrl(String),
}

impl BackendError {
    /// Create an engine-reported error.
    #[inline]
    pub fn engine(msg: impl Into<String>) -> Self {
        Self::Engine(msg.into())
    }

    /// Whether this error came from the network layer rather than the backend's own logic.
    #[must_use]
    pub const fn is_transport(&self) -> bool {
        matches!(self, Self::Http(_) | Self::Status { .. })
    }

    /// Whether the backend answered successfully but had nothing to return.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::EmptyResponse)
    }
}

/// Turn an error status into [`BackendError::Status`].
///
/// 425 (Too Early) is passed through; the engine uses it for "nothing yet".
pub(crate) async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status != StatusCode::TOO_EARLY && (status.is_client_error() || status.is_server_error()) {
        let body = response.text().await.unwrap_or_default();
        return Err(BackendError::Status { status, body });
    }
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classes() {
        let err = BackendError::Status {
            status: StatusCode::BAD_GATEWAY,
            body: String::new(),
        };
        assert!(err.is_transport());
        assert!(!err.is_not_found());

        assert!(BackendError::EmptyResponse.is_not_found());
        assert!(!BackendError::engine("oom").is_transport());
    }

    #[test]
    fn test_display() {
        let err = BackendError::engine("CUDA out of memory");
        assert_eq!(err.to_string(), "received error from backend: CUDA out of memory");
    }
}
