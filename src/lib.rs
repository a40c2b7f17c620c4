//! sshdeck: the remote session core of a pocket SSH/SFTP client
//!
//! One authenticated SSH connection per role carries directory listing,
//! file transfer, one-shot commands and Git queries, and feeds the live
//! character stream of an interactive shell to a terminal renderer.

pub mod config;
pub mod error;
pub mod history;
pub mod keychain;
pub mod logging;
pub mod runner;
pub mod sftp;
pub mod shell;
pub mod ssh;
pub mod state;

pub use error::{AppError, AppResult};
pub use state::AppState;

/// Prepare the config directory and the global log store, then build the state
pub fn init_state(config_dir: std::path::PathBuf) -> AppResult<AppState> {
    std::fs::create_dir_all(config_dir.join("logs"))?;
    tracing::info!("sshdeck config dir: {:?}", config_dir);

    logging::init_log_manager(config_dir.clone())
        .map_err(|e| AppError::Config(format!("Failed to initialize log manager: {}", e)))?;

    AppState::new(config_dir)
}
