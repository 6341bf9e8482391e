use std::time::Duration;

/// Request validation failures. Resolved entirely by the router.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum RouteError {
    #[error("expected Upgrade: websocket")]
    ProtocolMismatch,
    #[error("expected GET method")]
    MethodNotAllowed,
    #[error("Not Found")]
    NotFound,
}

impl RouteError {
    /// HTTP status code the error is surfaced as.
    pub fn status(&self) -> u16 {
        match self {
            Self::ProtocolMismatch => 426,
            Self::MethodNotAllowed => 400,
            Self::NotFound => 404,
        }
    }
}

/// Failure of the outbound call made while handling one message.
///
/// Scoped to that message: never retried, never closes the connection.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum DependencyError {
    #[error("dependency timed out after {0:?}")]
    Timeout(Duration),
    #[error("dependency network error: {0}")]
    Network(String),
}

impl DependencyError {
    /// Short classification string for logging/metrics.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Timeout(_) => "timeout",
            Self::Network(_) => "network_error",
        }
    }
}

/// The local close frame could not be delivered. Always absorbed.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("failed to close connection: {0}")]
pub struct CloseError(pub String);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn route_error_statuses() {
        assert_eq!(RouteError::ProtocolMismatch.status(), 426);
        assert_eq!(RouteError::MethodNotAllowed.status(), 400);
        assert_eq!(RouteError::NotFound.status(), 404);
    }

    #[test]
    fn route_error_messages() {
        assert_eq!(RouteError::ProtocolMismatch.to_string(), "expected Upgrade: websocket");
        assert_eq!(RouteError::NotFound.to_string(), "Not Found");
    }

    #[test]
    fn dependency_error_kinds() {
        assert_eq!(DependencyError::Timeout(Duration::from_secs(1)).error_kind(), "timeout");
        assert_eq!(DependencyError::Network("refused".into()).error_kind(), "network_error");
    }

    #[test]
    fn dependency_timeout_display_includes_duration() {
        let err = DependencyError::Timeout(Duration::from_millis(250));
        assert_eq!(err.to_string(), "dependency timed out after 250ms");
    }
}
