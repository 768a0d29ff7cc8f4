//! Error types for the compliance data service.
//!
//! Library crates use [`CortapError`] via `thiserror`.
//! The `cortap` binary wraps this with `color-eyre` for rich diagnostics and
//! maps it onto structured JSON payloads for the HTTP surface.

use std::path::PathBuf;

use serde_json::{Value, json};

/// Top-level error type for all service operations.
#[derive(Debug, thiserror::Error)]
pub enum CortapError {
    /// Remote review-management API failure (network, timeout, 4xx/5xx, bad body).
    #[error("remote API error [{code}]: {message}")]
    RemoteApi {
        code: String,
        message: String,
        status: Option<u16>,
        details: Value,
    },

    /// Data validation error (missing header field, consolidation failure, schema).
    #[error("validation error [{code}]: {message}")]
    Validation {
        code: String,
        message: String,
        details: Value,
    },

    /// Cache or blob storage failure.
    #[error("storage error: {0}")]
    Storage(String),

    /// Document renderer failure (missing context key, template syntax).
    #[error("render error [{code}]: {message}")]
    Render { code: String, message: String },

    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, CortapError>;

impl CortapError {
    /// Create a remote API error without an HTTP status (timeouts, connection errors).
    pub fn remote(code: impl Into<String>, message: impl Into<String>, details: Value) -> Self {
        Self::RemoteApi {
            code: code.into(),
            message: message.into(),
            status: None,
            details,
        }
    }

    /// Create a remote API error for a non-success HTTP status.
    pub fn remote_status(status: u16, message: impl Into<String>, details: Value) -> Self {
        Self::RemoteApi {
            code: format!("REMOTE_HTTP_{status}"),
            message: message.into(),
            status: Some(status),
            details,
        }
    }

    /// Create a validation error with a machine-readable code.
    pub fn validation(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            code: code.into(),
            message: message.into(),
            details: Value::Object(Default::default()),
        }
    }

    /// Create a validation error carrying a structured detail payload.
    pub fn validation_with(code: impl Into<String>, message: impl Into<String>, details: Value) -> Self {
        Self::Validation {
            code: code.into(),
            message: message.into(),
            details,
        }
    }

    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Stable machine-readable error code.
    pub fn error_code(&self) -> &str {
        match self {
            Self::RemoteApi { code, .. }
            | Self::Validation { code, .. }
            | Self::Render { code, .. } => code,
            Self::Storage(_) => "STORAGE_ERROR",
            Self::Config { .. } => "CONFIG_ERROR",
            Self::Io { .. } => "IO_ERROR",
        }
    }

    /// Human-readable message without the code prefix.
    pub fn message(&self) -> String {
        match self {
            Self::RemoteApi { message, .. }
            | Self::Validation { message, .. }
            | Self::Render { message, .. }
            | Self::Config { message } => message.clone(),
            Self::Storage(msg) => msg.clone(),
            Self::Io { path, source } => format!("{}: {source}", path.display()),
        }
    }

    /// Structured detail payload for callers and error responses.
    pub fn details(&self) -> Value {
        match self {
            Self::RemoteApi {
                status, details, ..
            } => {
                let mut details = details.clone();
                if let (Some(status), Value::Object(map)) = (status, &mut details) {
                    map.entry("status_code").or_insert(json!(status));
                }
                details
            }
            Self::Validation { details, .. } => details.clone(),
            _ => Value::Object(Default::default()),
        }
    }

    /// Attach the subject identifier to a validation or remote error's details.
    pub fn with_subject(mut self, subject_id: &str) -> Self {
        if let Self::RemoteApi { details, .. } | Self::Validation { details, .. } = &mut self {
            if !details.is_object() {
                *details = Value::Object(Default::default());
            }
            if let Value::Object(map) = details {
                map.insert("project_id".into(), json!(subject_id));
            }
        }
        self
    }

    /// Whether this error reflects a failure of the remote API.
    pub fn is_remote(&self) -> bool {
        matches!(self, Self::RemoteApi { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let err = CortapError::config("missing API key");
        assert_eq!(err.to_string(), "config error: missing API key");

        let err = CortapError::validation("MISSING_PROJECT_FIELD", "recipient_name is required");
        assert!(err.to_string().contains("MISSING_PROJECT_FIELD"));
        assert!(err.to_string().contains("recipient_name"));
    }

    #[test]
    fn remote_status_carries_code_and_status() {
        let err = CortapError::remote_status(404, "not found", json!({"url": "/assessments/9"}));
        assert_eq!(err.error_code(), "REMOTE_HTTP_404");
        assert_eq!(err.details()["status_code"], 404);
        assert_eq!(err.details()["url"], "/assessments/9");
        assert!(err.is_remote());
    }

    #[test]
    fn with_subject_adds_project_id() {
        let err = CortapError::validation("DATA_TRANSFORMATION_ERROR", "boom").with_subject("33");
        assert_eq!(err.details()["project_id"], "33");

        let storage = CortapError::Storage("disk full".into()).with_subject("33");
        assert_eq!(storage.error_code(), "STORAGE_ERROR");
        assert!(storage.details().as_object().is_some_and(|m| m.is_empty()));
    }
}
