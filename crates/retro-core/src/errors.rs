use crate::wire::UNKNOWN_CLIENT_BODY;

/// Typed error hierarchy for session and command delivery.
/// Classifies errors as transient (retry), session-unknown (permanent for the
/// current session), or surfaced to the caller.
#[derive(Clone, Debug, thiserror::Error)]
pub enum SessionError {
    // Transient, retried with backoff
    #[error("network error: {0}")]
    Network(String),
    #[error("server error {status}: {body}")]
    Server { status: u16, body: String },
    #[error("stream interrupted: {0}")]
    StreamInterrupted(String),

    // Permanent for the current session
    #[error("session unknown to server")]
    SessionUnknown,

    // Surfaced to the caller
    #[error("unexpected response to {command} command ({status}): {body}")]
    Unexpected {
        command: String,
        status: u16,
        body: String,
    },
    #[error("malformed response: {0}")]
    Decode(String),

    // Configuration
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),
}

impl SessionError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Network(_) | Self::Server { .. } | Self::StreamInterrupted(_)
        )
    }

    pub fn is_session_unknown(&self) -> bool {
        matches!(self, Self::SessionUnknown)
    }

    /// Short classification string for logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Network(_) => "network_error",
            Self::Server { .. } => "server_error",
            Self::StreamInterrupted(_) => "stream_interrupted",
            Self::SessionUnknown => "session_unknown",
            Self::Unexpected { .. } => "unexpected_response",
            Self::Decode(_) => "decode_error",
            Self::InvalidEndpoint(_) => "invalid_endpoint",
        }
    }

    /// Classify a non-200 response. The sentinel body wins over the status
    /// code, so a 4xx or 5xx carrying it both mean the session is gone.
    pub fn from_response(command: &str, status: u16, body: String) -> Self {
        if body == UNKNOWN_CLIENT_BODY {
            return Self::SessionUnknown;
        }
        match status {
            500..=599 => Self::Server { status, body },
            _ => Self::Unexpected {
                command: command.to_string(),
                status,
                body,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(SessionError::Network("connection refused".into()).is_retryable());
        assert!(SessionError::Server { status: 503, body: "busy".into() }.is_retryable());
        assert!(SessionError::StreamInterrupted("eof".into()).is_retryable());
    }

    #[test]
    fn permanent_errors_not_retryable() {
        assert!(!SessionError::SessionUnknown.is_retryable());
        assert!(!SessionError::Decode("bad json".into()).is_retryable());
        assert!(!SessionError::InvalidEndpoint("::".into()).is_retryable());
        let unexpected = SessionError::Unexpected {
            command: "data".into(),
            status: 400,
            body: "Invalid request\n".into(),
        };
        assert!(!unexpected.is_retryable());
        assert!(!unexpected.is_session_unknown());
    }

    #[test]
    fn sentinel_body_means_session_unknown() {
        let err = SessionError::from_response("data", 400, "Unknown client\n".into());
        assert!(err.is_session_unknown());

        let err = SessionError::from_response("data", 404, UNKNOWN_CLIENT_BODY.into());
        assert!(err.is_session_unknown());
    }

    #[test]
    fn sentinel_must_match_exactly() {
        let err = SessionError::from_response("data", 400, "Unknown client".into());
        assert!(matches!(err, SessionError::Unexpected { status: 400, .. }));
    }

    #[test]
    fn from_status_mapping() {
        assert!(SessionError::from_response("data", 500, "internal".into()).is_retryable());
        assert!(SessionError::from_response("data", 502, "bad gateway".into()).is_retryable());
        let err = SessionError::from_response("data", 409, "conflict".into());
        match err {
            SessionError::Unexpected { command, status, body } => {
                assert_eq!(command, "data");
                assert_eq!(status, 409);
                assert_eq!(body, "conflict");
            }
            other => panic!("expected Unexpected, got {other:?}"),
        }
    }

    #[test]
    fn error_kind_strings() {
        assert_eq!(SessionError::SessionUnknown.error_kind(), "session_unknown");
        assert_eq!(SessionError::Network("x".into()).error_kind(), "network_error");
        assert_eq!(
            SessionError::Server { status: 500, body: String::new() }.error_kind(),
            "server_error"
        );
    }

    #[test]
    fn unexpected_display_names_command() {
        let err = SessionError::from_response("hello", 418, "teapot".into());
        assert_eq!(
            err.to_string(),
            "unexpected response to hello command (418): teapot"
        );
    }
}
