use super::{get_log_manager, LogFilter, LogLine};
use crate::error::{AppError, AppResult};

/// Upper bound for a single query
const MAX_QUERY_LINES: u32 = 10_000;

fn manager() -> AppResult<&'static std::sync::Arc<super::LogManager>> {
    get_log_manager().ok_or_else(|| AppError::Config("Log manager not initialized".to_string()))
}

/// Get recent logs from the ring buffer
pub async fn get_recent_logs(max_lines: Option<u32>, filter: Option<LogFilter>) -> AppResult<Vec<LogLine>> {
    let lines = max_lines.unwrap_or(1000).min(MAX_QUERY_LINES);
    Ok(manager()?.get_recent_logs(lines, filter))
}

/// Clear the in-memory log view (does not delete file logs)
pub async fn clear_log_view() -> AppResult<()> {
    manager()?.clear_view();
    Ok(())
}

/// Location of the persisted log file
pub async fn get_log_file_path() -> AppResult<String> {
    Ok(manager()?.log_file_path().to_string_lossy().to_string())
}
