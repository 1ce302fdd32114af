//! CDP error types.
//!
//! Every failure the control-plane client can surface is one variant of
//! [`CdpError`]. Variants carry the endpoint path or URL and, where the
//! server supplied them, its own error code and message, so a caller can
//! tell bad credentials apart from a service outage or a stuck resource.

use serde::Deserialize;
use thiserror::Error;

/// Top-level error type for all CDP operations.
#[derive(Debug, Clone, Error)]
pub enum CdpError {
    /// Malformed or missing credentials. Raised before any network call.
    #[error("{0}")]
    Credential(String),

    /// Invalid client configuration (endpoint, region, ...).
    #[error("invalid configuration: {0}")]
    Config(String),

    /// 401 / 403 from the control plane. Never retried.
    #[error("{message}")]
    Auth { status: u16, path: String, message: String },

    /// Any other 4xx. Never retried.
    #[error("{message} [{status}] for {url}")]
    ClientRequest {
        status: u16,
        code: Option<String>,
        message: String,
        url: String,
    },

    /// 5xx, 408 or 429 that persisted through every retry.
    #[error("{message} [{status}] for {url}")]
    Transient {
        status: u16,
        code: Option<String>,
        message: String,
        url: String,
    },

    /// Connection-level failure that persisted through every retry.
    #[error("Request failed after {attempts} attempts for {url}: {cause}")]
    Transport {
        attempts: u32,
        url: String,
        cause: String,
    },

    /// A polled resource reached one of its failure states.
    #[error("{resource} reached failure state '{state}': {message}")]
    StateFailure {
        resource: String,
        state: String,
        message: String,
    },

    /// A poll did not converge within its timeout.
    #[error("Timeout waiting for {resource} to reach {target} after {elapsed_secs}s")]
    Timeout {
        resource: String,
        target: String,
        elapsed_secs: u64,
    },

    /// Request body could not be encoded or a response could not be decoded.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The underlying HTTP client could not be constructed.
    #[error("HTTP client error: {0}")]
    Http(String),

    /// No live session with this id.
    #[error("CDP session {0} not found or disconnected")]
    SessionNotFound(String),
}

/// The error envelope CDP services return on failure.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiErrorBody {
    error_code: Option<String>,
    error_message: Option<String>,
    code: Option<String>,
    message: Option<String>,
}

impl CdpError {
    pub fn credential(msg: impl Into<String>) -> Self {
        Self::Credential(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn unauthorized(path: &str) -> Self {
        Self::Auth {
            status: 401,
            path: path.to_string(),
            message: format!("Unauthorized access to {}", path),
        }
    }

    pub fn forbidden(path: &str) -> Self {
        Self::Auth {
            status: 403,
            path: path.to_string(),
            message: format!("Forbidden access to {}", path),
        }
    }

    /// Build the error for a non-success HTTP response.
    ///
    /// Uses the server's `errorMessage` / `errorCode` when the body is a JSON
    /// error envelope, otherwise the raw body text, otherwise the canonical
    /// reason phrase of the status.
    pub fn from_response(status: u16, body: &str, url: &str) -> Self {
        let (code, message) = parse_error_body(status, body);
        if is_retryable_status(status) {
            Self::Transient {
                status,
                code,
                message,
                url: url.to_string(),
            }
        } else {
            Self::ClientRequest {
                status,
                code,
                message,
                url: url.to_string(),
            }
        }
    }

    /// HTTP status associated with this error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Auth { status, .. }
            | Self::ClientRequest { status, .. }
            | Self::Transient { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Server-supplied error code, if any.
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::ClientRequest { code, .. } | Self::Transient { code, .. } => code.as_deref(),
            _ => None,
        }
    }

    /// Whether the request that produced this error may be re-sent.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transient { .. } | Self::Transport { .. } => true,
            _ => false,
        }
    }
}

/// 408, 429 and every 5xx are retried with backoff.
pub fn is_retryable_status(status: u16) -> bool {
    status == 408 || status == 429 || status >= 500
}

fn parse_error_body(status: u16, body: &str) -> (Option<String>, String) {
    if let Ok(parsed) = serde_json::from_str::<ApiErrorBody>(body) {
        let code = parsed.error_code.or(parsed.code);
        let message = parsed.error_message.or(parsed.message);
        if code.is_some() || message.is_some() {
            let message = message.unwrap_or_else(|| "Unknown error".to_string());
            return (code, message);
        }
    }

    let trimmed = body.trim();
    let message = if trimmed.is_empty() {
        reqwest::StatusCode::from_u16(status)
            .ok()
            .and_then(|s| s.canonical_reason())
            .map(|r| r.to_string())
            .unwrap_or_else(|| format!("HTTP {} Error", status))
    } else {
        trimmed.chars().take(500).collect()
    };
    (None, message)
}

impl From<reqwest::Error> for CdpError {
    fn from(err: reqwest::Error) -> Self {
        Self::Http(err.to_string())
    }
}

impl From<serde_json::Error> for CdpError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Convert CdpError to a String for command-layer returns.
impl From<CdpError> for String {
    fn from(err: CdpError) -> String {
        err.to_string()
    }
}

/// Convenience result type for CDP operations.
pub type CdpResult<T> = Result<T, CdpError>;
