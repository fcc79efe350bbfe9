use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A single field-level validation failure, rendered under the offending input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

#[derive(Error, Debug)]
pub enum TmsError {
    #[error("Network error, the request never reached the server: {0}")]
    Network(#[source] reqwest::Error),

    #[error("HTTP request failed: {0}")]
    Http(#[source] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid response body: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Validation failed: {}", format_fields(.message, .fields))]
    Validation {
        message: String,
        fields: Vec<FieldError>,
    },

    #[error("Not authenticated. Run 'tms login' to sign in again")]
    Unauthorized,

    #[error("Access denied: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Server error (status {status}): {message}")]
    Server { status: u16, message: String },

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Empty response from API")]
    EmptyResponse,

    #[error("{message}")]
    PartialFailure {
        message: String,
        #[source]
        source: Box<TmsError>,
    },

    #[error("Realtime connection failed: {0}")]
    Realtime(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Failed to read config file at {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file at {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Failed to write session file at {path}: {source}")]
    SessionWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Could not determine config directory")]
    NoConfigDir,

    #[error("Project not specified and no default_project in config")]
    NoProject,

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Failed to read file {path}: {source}")]
    FileRead {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

fn format_fields(message: &str, fields: &[FieldError]) -> String {
    if fields.is_empty() {
        return message.to_string();
    }
    let joined = fields
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ");
    format!("{message} ({joined})")
}

impl From<reqwest::Error> for TmsError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_connect() || err.is_timeout() || err.is_request() {
            TmsError::Network(err)
        } else {
            TmsError::Http(err)
        }
    }
}

impl TmsError {
    pub fn validation(fields: Vec<FieldError>) -> Self {
        TmsError::Validation {
            message: "Please fix the highlighted fields".to_string(),
            fields,
        }
    }

    /// Whether the caller must drop the session and send the user back to login.
    pub fn requires_logout(&self) -> bool {
        matches!(self, TmsError::Unauthorized)
    }

    /// Short text for the error notification shown after a failed action.
    pub fn toast(&self, fallback: &str) -> String {
        match self {
            TmsError::Network(_) | TmsError::Server { .. } => fallback.to_string(),
            TmsError::Validation { .. }
            | TmsError::NotFound(_)
            | TmsError::Forbidden(_)
            | TmsError::Conflict(_)
            | TmsError::Unauthorized
            | TmsError::PartialFailure { .. } => self.to_string(),
            TmsError::Api { message, .. } if !message.is_empty() => message.clone(),
            _ => fallback.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, TmsError>;
