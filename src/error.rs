//! Stream error taxonomy.
//!
//! Every failure the engine can surface is one of a closed set of kinds so
//! callers handle them with pattern matching instead of string inspection.

use std::fmt;
use std::time::Duration;

/// Errors surfaced through the [`Lifecycle::Error`](crate::dispatch::Lifecycle)
/// signal and by connection attempts.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamError {
    /// The server rejected the request with 401 or 403.
    ///
    /// Callers typically refresh credentials and reconnect.
    Auth {
        status: u16,
        body: Option<String>,
    },

    /// The response was not a usable event stream: a non-2xx status other
    /// than 401/403, a missing or wrong content type, or a missing body.
    Protocol {
        status: Option<u16>,
        message: String,
    },

    /// The transport gave out: connect failure, mid-stream network error,
    /// or the server ending the stream.
    Transport {
        message: String,
    },

    /// The heartbeat watchdog saw no frames for the configured interval.
    Timeout {
        idle: Duration,
    },
}

impl StreamError {
    /// Whether the reconnection controller will retry after this error.
    ///
    /// Everything in this taxonomy is retryable; auth failures are too,
    /// since a token resolver may produce fresh credentials on the next
    /// attempt. The retry ceiling is what makes a connection terminal.
    pub fn is_retryable(&self) -> bool {
        true
    }

    /// True for 401/403 rejections, so callers can refresh credentials.
    pub fn is_auth(&self) -> bool {
        matches!(self, StreamError::Auth { .. })
    }

    /// HTTP status code, when the failure carried one.
    pub fn status(&self) -> Option<u16> {
        match self {
            StreamError::Auth { status, .. } => Some(*status),
            StreamError::Protocol { status, .. } => *status,
            _ => None,
        }
    }

    /// Short stable code for logging.
    pub fn error_code(&self) -> &'static str {
        match self {
            StreamError::Auth { .. } => "E_STREAM_AUTH",
            StreamError::Protocol { .. } => "E_STREAM_PROTO",
            StreamError::Transport { .. } => "E_STREAM_CONN",
            StreamError::Timeout { .. } => "E_STREAM_TIMEOUT",
        }
    }
}

impl fmt::Display for StreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamError::Auth { status, body } => match body {
                Some(b) => write!(f, "authentication failed ({}): {}", status, b),
                None => write!(f, "authentication failed ({})", status),
            },
            StreamError::Protocol { status, message } => match status {
                Some(s) => write!(f, "stream protocol error ({}): {}", s, message),
                None => write!(f, "stream protocol error: {}", message),
            },
            StreamError::Transport { message } => {
                write!(f, "stream transport error: {}", message)
            }
            StreamError::Timeout { idle } => {
                write!(f, "heartbeat timeout: no frames for {:?}", idle)
            }
        }
    }
}

impl std::error::Error for StreamError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_error() {
        let err = StreamError::Auth {
            status: 401,
            body: Some("{\"error\":\"expired\"}".to_string()),
        };
        assert!(err.is_auth());
        assert_eq!(err.status(), Some(401));
        assert_eq!(err.error_code(), "E_STREAM_AUTH");
        assert!(err.to_string().contains("401"));
        assert!(err.to_string().contains("expired"));
    }

    #[test]
    fn test_auth_error_without_body() {
        let err = StreamError::Auth {
            status: 403,
            body: None,
        };
        assert_eq!(err.to_string(), "authentication failed (403)");
    }

    #[test]
    fn test_protocol_error_with_status() {
        let err = StreamError::Protocol {
            status: Some(502),
            message: "Bad Gateway".to_string(),
        };
        assert!(!err.is_auth());
        assert_eq!(err.status(), Some(502));
        assert_eq!(err.error_code(), "E_STREAM_PROTO");
    }

    #[test]
    fn test_protocol_error_content_type() {
        let err = StreamError::Protocol {
            status: None,
            message: "unexpected content type: text/html".to_string(),
        };
        assert_eq!(err.status(), None);
        assert!(err.to_string().contains("text/html"));
    }

    #[test]
    fn test_transport_error() {
        let err = StreamError::Transport {
            message: "connection reset by peer".to_string(),
        };
        assert_eq!(err.status(), None);
        assert_eq!(err.error_code(), "E_STREAM_CONN");
        assert!(err.is_retryable());
    }

    #[test]
    fn test_timeout_error() {
        let err = StreamError::Timeout {
            idle: Duration::from_secs(30),
        };
        assert_eq!(err.error_code(), "E_STREAM_TIMEOUT");
        assert!(err.to_string().contains("heartbeat timeout"));
    }
}
