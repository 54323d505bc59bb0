use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::Value;
use std::path::PathBuf;
use thiserror::Error;

/// Everything a client-side operation can fail with.
///
/// Transport failures (no response), backend rejections carrying a `detail`
/// and local validation failures are kept apart so the front end can decide
/// what to show; none of them are retried.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("invalid base URL `{0}`")]
    InvalidBaseUrl(String),
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("backend returned {status}: {}", .detail.as_deref().unwrap_or("no detail"))]
    Backend {
        status: StatusCode,
        detail: Option<String>,
    },
    #[error("failed to decode response body: {0}")]
    Decode(#[source] serde_json::Error),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl ClientError {
    /// The backend-provided `detail`, if the failure came with one.
    pub fn detail(&self) -> Option<&str> {
        match self {
            ClientError::Backend { detail, .. } => detail.as_deref(),
            _ => None,
        }
    }

    pub fn status(&self) -> Option<StatusCode> {
        match self {
            ClientError::Backend { status, .. } => Some(*status),
            ClientError::Transport(err) => err.status(),
            _ => None,
        }
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, ClientError::Validation(_))
    }

    /// Message suitable for showing to a user: the backend detail or the
    /// validation message when there is one, otherwise `fallback`.
    pub fn display_message(&self, fallback: &str) -> String {
        match self {
            ClientError::Backend {
                detail: Some(detail),
                ..
            } => detail.clone(),
            ClientError::Validation(err) => err.to_string(),
            _ => fallback.to_string(),
        }
    }

    pub(crate) fn from_backend_body(status: StatusCode, body: &[u8]) -> Self {
        ClientError::Backend {
            status,
            detail: extract_detail(body),
        }
    }
}

/// Client-side form checks that stop a request before it is sent.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{} is required", capitalize(.0))]
    MissingField(&'static str),
    #[error("Password must be at least {min} characters long")]
    PasswordTooShort { min: usize },
    #[error("Please enter a new password")]
    NewPasswordRequired,
    #[error("Passwords do not match")]
    PasswordMismatch,
    #[error("Invalid reset link. Please request a new password reset.")]
    InvalidResetLink,
    #[error("Invalid reset token")]
    MissingResetToken,
    #[error("Please select an image file")]
    NotAnImage,
    #[error("File size must be less than {}MB", .limit / (1024 * 1024))]
    FileTooLarge { size: u64, limit: u64 },
    #[error("Job link is required for job posts")]
    JobLinkRequired,
    #[error("Comment may not be empty")]
    EmptyComment,
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("local storage file {path} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Deserialize)]
struct ErrorBody {
    detail: Option<Value>,
}

/// FastAPI reports either `{"detail": "text"}` or, for request validation,
/// `{"detail": [{"msg": "...", ...}, ...]}`.
fn extract_detail(body: &[u8]) -> Option<String> {
    let parsed: ErrorBody = serde_json::from_slice(body).ok()?;
    match parsed.detail? {
        Value::String(text) if !text.trim().is_empty() => Some(text),
        Value::Array(items) => {
            let messages: Vec<String> = items
                .iter()
                .filter_map(|item| item.get("msg").and_then(Value::as_str))
                .map(str::to_string)
                .collect();
            if messages.is_empty() {
                None
            } else {
                Some(messages.join("; "))
            }
        }
        _ => None,
    }
}

fn capitalize(field: &str) -> String {
    let mut chars = field.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
