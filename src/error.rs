use crate::ssh::Role;
use serde::Serialize;
use thiserror::Error;

/// Directory listing failures mapped from SFTP status codes
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ListError {
    #[error("Path not found: {0}")]
    PathNotFound(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),
}

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Command error: {0}")]
    Exec(String),

    #[error(transparent)]
    List(#[from] ListError),

    #[error("Transfer error: {0}")]
    Transfer(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Session is no longer connected")]
    SessionDead,

    #[error("No active {0} session")]
    NoActiveSession(Role),

    #[error("Unsupported: {0}")]
    Unsupported(String),

    #[error("Keychain error: {0}")]
    Keychain(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Profile not found: {0}")]
    ProfileNotFound(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl AppError {
    /// Errors after which the underlying connection cannot be trusted again
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            AppError::Network(_) | AppError::Protocol(_) | AppError::Io(_) | AppError::SessionDead
        )
    }
}

/// Serializable error for UI hosts
#[derive(Serialize)]
pub struct SerializableError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl From<&AppError> for SerializableError {
    fn from(err: &AppError) -> Self {
        let (code, message, details) = match err {
            AppError::Network(msg) => ("NETWORK_ERROR", msg.clone(), None),
            AppError::Auth(msg) => ("AUTH_ERROR", "Authentication failed".to_string(), Some(msg.clone())),
            AppError::Protocol(msg) => ("PROTOCOL_ERROR", msg.clone(), None),
            AppError::Exec(msg) => ("EXEC_ERROR", msg.clone(), None),
            AppError::List(ListError::PathNotFound(path)) => {
                ("PATH_NOT_FOUND", format!("{} does not exist", path), None)
            }
            AppError::List(ListError::PermissionDenied(path)) => {
                ("PERMISSION_DENIED", format!("Permission denied for {}", path), None)
            }
            AppError::Transfer(msg) => ("TRANSFER_ERROR", msg.clone(), None),
            AppError::Timeout(msg) => ("TIMEOUT", msg.clone(), None),
            AppError::SessionDead => ("SESSION_DEAD", err.to_string(), None),
            AppError::NoActiveSession(_) => ("NO_ACTIVE_SESSION", err.to_string(), None),
            AppError::Unsupported(msg) => ("UNSUPPORTED", msg.clone(), None),
            AppError::Keychain(msg) => ("KEYCHAIN_ERROR", msg.clone(), None),
            AppError::Config(msg) => ("CONFIG_ERROR", msg.clone(), None),
            AppError::Io(e) => ("IO_ERROR", e.to_string(), None),
            AppError::Serialization(msg) => ("SERIALIZATION_ERROR", msg.clone(), None),
            AppError::ProfileNotFound(id) => ("PROFILE_NOT_FOUND", format!("Profile {} not found", id), None),
            AppError::InvalidConfig(msg) => ("INVALID_CONFIG", msg.clone(), None),
            AppError::Unknown(msg) => ("UNKNOWN_ERROR", msg.clone(), None),
        };

        SerializableError {
            code: code.to_string(),
            message,
            details,
        }
    }
}

// Serialized form handed to whichever UI host embeds the library
impl Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        SerializableError::from(self).serialize(serializer)
    }
}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        AppError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for AppError {
    fn from(err: toml::ser::Error) -> Self {
        AppError::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Serialization(err.to_string())
    }
}

impl From<keyring::Error> for AppError {
    fn from(err: keyring::Error) -> Self {
        AppError::Keychain(err.to_string())
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Unknown(err.to_string())
    }
}

impl From<tokio::task::JoinError> for AppError {
    fn from(err: tokio::task::JoinError) -> Self {
        AppError::Unknown(format!("Background task failed: {}", err))
    }
}

pub type AppResult<T> = Result<T, AppError>;
