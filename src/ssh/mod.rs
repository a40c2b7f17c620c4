pub mod client;
pub mod commands;
#[cfg(test)]
pub mod mock;
pub mod registry;
pub mod session;
pub mod transport;

pub use client::Ssh2Transport;
pub use registry::{ActiveSession, SessionRegistry};
pub use session::*;
pub use transport::*;

use serde::{Deserialize, Serialize};

/// What a session slot is used for. Each role holds at most one live session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Directory browsing, transfers and one-shot commands
    Files,
    /// The interactive terminal
    Shell,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Files => f.write_str("files"),
            Role::Shell => f.write_str("shell"),
        }
    }
}

impl std::str::FromStr for Role {
    type Err = crate::error::AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "files" | "sftp" => Ok(Role::Files),
            "shell" | "terminal" => Ok(Role::Shell),
            other => Err(crate::error::AppError::InvalidConfig(format!("Unknown role: {}", other))),
        }
    }
}
