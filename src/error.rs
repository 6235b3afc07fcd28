//! Unified client error model.
//! One enum covers every failure the session, protocol and copy layers can report,
//! with a stable code string for logs and a process exit code for the binary.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AppError {
    /// Missing or unparseable certificate material.
    #[error("{code}: {message}")]
    Identity { code: String, message: String },
    /// Inbound message could not be framed or decoded.
    #[error("{code}: {message}")]
    Protocol { code: String, message: String },
    /// The catalogue refused or returned nothing for an access request.
    #[error("{code}: {message}")]
    Authorization { code: String, message: String },
    #[error("{code}: {message}")]
    Transfer { code: String, message: String },
    /// The control connection is gone; the session is closed.
    #[error("{code}: {message}")]
    Transport { code: String, message: String },
    #[error("{code}: {message}")]
    Tls { code: String, message: String },
    #[error("{code}: {message}")]
    UserInput { code: String, message: String },
    #[error("{code}: {message}")]
    Io { code: String, message: String },
}

impl AppError {
    pub fn code_str(&self) -> &str {
        match self {
            AppError::Identity { code, .. }
            | AppError::Protocol { code, .. }
            | AppError::Authorization { code, .. }
            | AppError::Transfer { code, .. }
            | AppError::Transport { code, .. }
            | AppError::Tls { code, .. }
            | AppError::UserInput { code, .. }
            | AppError::Io { code, .. } => code.as_str(),
        }
    }

    pub fn message(&self) -> &str {
        match self {
            AppError::Identity { message, .. }
            | AppError::Protocol { message, .. }
            | AppError::Authorization { message, .. }
            | AppError::Transfer { message, .. }
            | AppError::Transport { message, .. }
            | AppError::Tls { message, .. }
            | AppError::UserInput { message, .. }
            | AppError::Io { message, .. } => message.as_str(),
        }
    }

    pub fn identity(code: impl Into<String>, msg: impl Into<String>) -> Self { AppError::Identity { code: code.into(), message: msg.into() } }
    pub fn protocol(code: impl Into<String>, msg: impl Into<String>) -> Self { AppError::Protocol { code: code.into(), message: msg.into() } }
    pub fn authorization(code: impl Into<String>, msg: impl Into<String>) -> Self { AppError::Authorization { code: code.into(), message: msg.into() } }
    pub fn transfer(code: impl Into<String>, msg: impl Into<String>) -> Self { AppError::Transfer { code: code.into(), message: msg.into() } }
    pub fn transport(code: impl Into<String>, msg: impl Into<String>) -> Self { AppError::Transport { code: code.into(), message: msg.into() } }
    pub fn tls(code: impl Into<String>, msg: impl Into<String>) -> Self { AppError::Tls { code: code.into(), message: msg.into() } }
    pub fn user(code: impl Into<String>, msg: impl Into<String>) -> Self { AppError::UserInput { code: code.into(), message: msg.into() } }
    pub fn io(code: impl Into<String>, msg: impl Into<String>) -> Self { AppError::Io { code: code.into(), message: msg.into() } }

    /// Map to the process exit status used by the one-shot command mode.
    pub fn exit_code(&self) -> i32 {
        match self {
            AppError::UserInput { .. } => 2,
            AppError::Authorization { .. } => 3,
            AppError::Transfer { .. } => 4,
            AppError::Transport { .. } | AppError::Tls { .. } => 5,
            AppError::Protocol { .. } => 6,
            AppError::Io { .. } => 7,
            AppError::Identity { .. } => 8,
        }
    }

    /// True when the control connection can no longer be used.
    pub fn is_session_fatal(&self) -> bool {
        matches!(self, AppError::Transport { .. } | AppError::Tls { .. })
    }
}

pub type AppResult<T> = Result<T, AppError>;

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Io { code: "io_error".into(), message: err.to_string() }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Protocol { code: "json_error".into(), message: err.to_string() }
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod error_tests;
