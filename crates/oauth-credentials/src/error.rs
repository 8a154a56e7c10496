//! Error types for credential and storage operations

/// Errors from credential construction, refresh, revocation and storage.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error("token refresh failed ({status}): {message}")]
    Refresh { status: u16, message: String },

    #[error("authorization code exchange failed ({status}): {message}")]
    Exchange { status: u16, message: String },

    #[error("credentials cannot be refreshed: {0}")]
    NonRefreshable(String),

    #[error("token revocation failed ({status}): {message}")]
    Revoke { status: u16, message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("credential decode error: {0}")]
    Decode(String),

    #[error("unknown credential class: {0}")]
    UnknownVariant(String),

    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("request body cannot be buffered: {0}")]
    Body(String),
}

impl Error {
    /// Whether retrying the same operation can never succeed.
    ///
    /// True for structurally non-refreshable credentials. Token endpoint
    /// failures are left to the caller to classify from status and message.
    pub fn is_permanent(&self) -> bool {
        matches!(self, Error::NonRefreshable(_))
    }

    /// HTTP status carried by refresh, revoke and exchange failures.
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::Refresh { status, .. }
            | Error::Revoke { status, .. }
            | Error::Exchange { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Decode(e.to_string())
    }
}

/// Result alias for credential operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refresh_error_carries_status_and_message() {
        let err = Error::Refresh {
            status: 400,
            message: "invalid_grant: Token has been expired or revoked.".into(),
        };
        assert_eq!(err.status(), Some(400));
        assert!(!err.is_permanent());
        assert_eq!(
            err.to_string(),
            "token refresh failed (400): invalid_grant: Token has been expired or revoked."
        );
    }

    #[test]
    fn non_refreshable_is_permanent() {
        let err = Error::NonRefreshable("no refresh token".into());
        assert!(err.is_permanent());
        assert_eq!(err.status(), None);
    }

    #[test]
    fn io_errors_keep_their_kind() {
        let err: Error = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied").into();
        match err {
            Error::Io(e) => assert_eq!(e.kind(), std::io::ErrorKind::PermissionDenied),
            other => panic!("expected Io, got {other:?}"),
        }
    }
}
