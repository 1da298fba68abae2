//! Structured error types for clarity-core.
//!
//! Uses `thiserror` so the inference client and the CLI can match on the
//! failure taxonomy. The binary (clarity-cli) wraps these in `anyhow` for
//! reporting, but library consumers get structured, composable errors.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Longest response body kept in an error's detail view.
pub const MAX_DETAIL_LEN: usize = 500;

/// Coarse classification of a failure, used by front-ends to pick wording
/// and by the retry loop to decide whether another attempt is allowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    ConfigurationMissing,
    NetworkError,
    ServerUnavailable,
    ClientRejected,
    ContentBlocked,
    EmptyResponse,
    LocalIoError,
    ImageEncoding,
    Config,
    Internal,
}

impl FailureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FailureKind::ConfigurationMissing => "configuration-missing",
            FailureKind::NetworkError => "network-error",
            FailureKind::ServerUnavailable => "server-unavailable",
            FailureKind::ClientRejected => "client-rejected",
            FailureKind::ContentBlocked => "content-blocked",
            FailureKind::EmptyResponse => "empty-response",
            FailureKind::LocalIoError => "local-io-error",
            FailureKind::ImageEncoding => "image-encoding",
            FailureKind::Config => "config",
            FailureKind::Internal => "internal",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Main error type for Clarity operations
#[derive(Error, Debug)]
pub enum ClarityError {
    /// No credential, or the placeholder credential, is configured
    #[error("Credential not configured: {reason}")]
    ConfigurationMissing { reason: String },

    /// Transport-level failure (DNS, connect, reset, timeout)
    #[error("Network error after {attempts} attempt(s): {message}")]
    Network { attempts: u32, message: String },

    /// Server kept answering 5xx until the retry budget ran out
    #[error("Server unavailable after {attempts} attempt(s) (last status {status})")]
    ServerUnavailable {
        attempts: u32,
        status: u16,
        body: String,
    },

    /// 4xx: bad request, auth failure, unknown model, billing
    #[error("Request rejected ({status})")]
    ClientRejected { status: u16, body: String },

    /// Response present but filtered by the provider
    #[error("Response blocked by content policy: {reason}")]
    ContentBlocked { reason: String },

    /// Success status with no usable candidate text
    #[error("Empty response from model: {detail}")]
    EmptyResponse { detail: String },

    /// Reading or writing a local file failed
    #[error("I/O error on {path:?}: {source}")]
    LocalIo {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Re-encoding an evidence image for transport failed
    #[error("Failed to encode image '{label}': {reason}")]
    ImageEncoding { label: String, reason: String },

    /// Configuration file could not be parsed or written
    #[error("Configuration error: {reason}")]
    Config { reason: String },

    /// A background worker ended without reporting a result
    #[error("Internal error: {reason}")]
    Internal { reason: String },
}

/// Result type alias for clarity operations
pub type Result<T> = std::result::Result<T, ClarityError>;

impl ClarityError {
    pub fn configuration_missing(reason: impl Into<String>) -> Self {
        Self::ConfigurationMissing {
            reason: reason.into(),
        }
    }

    pub fn network(attempts: u32, message: impl Into<String>) -> Self {
        Self::Network {
            attempts,
            message: message.into(),
        }
    }

    pub fn server_unavailable(attempts: u32, status: u16, body: impl AsRef<str>) -> Self {
        Self::ServerUnavailable {
            attempts,
            status,
            body: truncate_detail(body.as_ref()),
        }
    }

    pub fn client_rejected(status: u16, body: impl AsRef<str>) -> Self {
        Self::ClientRejected {
            status,
            body: truncate_detail(body.as_ref()),
        }
    }

    pub fn content_blocked(reason: impl Into<String>) -> Self {
        Self::ContentBlocked {
            reason: reason.into(),
        }
    }

    pub fn empty_response(detail: impl Into<String>) -> Self {
        Self::EmptyResponse {
            detail: detail.into(),
        }
    }

    pub fn local_io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::LocalIo {
            path: path.into(),
            source,
        }
    }

    pub fn image_encoding(label: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ImageEncoding {
            label: label.into(),
            reason: reason.into(),
        }
    }

    pub fn config(reason: impl Into<String>) -> Self {
        Self::Config {
            reason: reason.into(),
        }
    }

    pub fn internal(reason: impl Into<String>) -> Self {
        Self::Internal {
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            Self::ConfigurationMissing { .. } => FailureKind::ConfigurationMissing,
            Self::Network { .. } => FailureKind::NetworkError,
            Self::ServerUnavailable { .. } => FailureKind::ServerUnavailable,
            Self::ClientRejected { .. } => FailureKind::ClientRejected,
            Self::ContentBlocked { .. } => FailureKind::ContentBlocked,
            Self::EmptyResponse { .. } => FailureKind::EmptyResponse,
            Self::LocalIo { .. } => FailureKind::LocalIoError,
            Self::ImageEncoding { .. } => FailureKind::ImageEncoding,
            Self::Config { .. } => FailureKind::Config,
            Self::Internal { .. } => FailureKind::Internal,
        }
    }

    /// Short, user-facing message. Status codes and bodies live in `detail()`.
    pub fn summary(&self) -> String {
        match self {
            Self::ConfigurationMissing { .. } => {
                "No API credential configured. Run `clarity config init` and set a key.".to_string()
            }
            Self::Network { .. } => "Could not reach the model endpoint.".to_string(),
            Self::ServerUnavailable { attempts, .. } => {
                format!("The model service is unavailable (gave up after {attempts} attempts).")
            }
            Self::ClientRejected { status, .. } => match status {
                401 | 403 => "The request was not authorized. Check the credential.".to_string(),
                404 => "The model or endpoint was not found. Check the model name and region."
                    .to_string(),
                _ => "The model service rejected the request.".to_string(),
            },
            Self::ContentBlocked { .. } => "The response was blocked by the content policy.".to_string(),
            Self::EmptyResponse { .. } => "The model returned no content.".to_string(),
            Self::LocalIo { path, .. } => format!("Could not access {}.", path.display()),
            Self::ImageEncoding { label, .. } => format!("Could not encode image '{label}'."),
            Self::Config { .. } => "The configuration file is invalid.".to_string(),
            Self::Internal { .. } => "Clarity hit an internal error; please retry.".to_string(),
        }
    }

    /// Expanded diagnostic text: original status and (truncated) message.
    pub fn detail(&self) -> String {
        match self {
            Self::ServerUnavailable { status, body, .. } | Self::ClientRejected { status, body } => {
                if body.is_empty() {
                    format!("HTTP {status}")
                } else {
                    format!("HTTP {status}: {body}")
                }
            }
            other => other.to_string(),
        }
    }

    /// Whether another attempt may succeed. Only transport failures and
    /// server-side errors qualify.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network { .. } | Self::ServerUnavailable { .. })
    }
}

/// Truncate an error body so provider responses do not flood logs
pub fn truncate_detail(text: &str) -> String {
    if text.len() <= MAX_DETAIL_LEN {
        return text.to_string();
    }
    let mut end = MAX_DETAIL_LEN;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &text[..end])
}
