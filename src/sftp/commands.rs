//! Async file operations on the active files session

use super::RemoteEntry;
use crate::error::AppResult;
use crate::state::{blocking, AppState};
use serde::Serialize;
use std::path::PathBuf;

/// Directory listing response
#[derive(Debug, Serialize)]
pub struct SftpListResponse {
    pub entries: Vec<RemoteEntry>,
    pub current_path: String,
}

/// List a directory; an empty path lists the home directory
pub async fn sftp_list(state: &AppState, path: String) -> AppResult<SftpListResponse> {
    tracing::info!("SFTP list: path={}", path);
    let fs = state.files()?;

    blocking(move || {
        let current_path = if path.is_empty() {
            fs.home_dir()?
        } else {
            fs.resolve(&path).unwrap_or(path)
        };
        let entries = fs.list(&current_path)?;
        Ok(SftpListResponse {
            entries,
            current_path,
        })
    })
    .await
}

pub async fn sftp_stat(state: &AppState, path: String) -> AppResult<RemoteEntry> {
    let fs = state.files()?;
    blocking(move || fs.stat(&path)).await
}

/// Stream a remote file into a local file
pub async fn sftp_download(state: &AppState, remote_path: String, local_path: PathBuf) -> AppResult<u64> {
    tracing::info!("SFTP download: {} -> {}", remote_path, local_path.display());
    let fs = state.files()?;

    blocking(move || {
        let mut file = std::fs::File::create(&local_path)?;
        fs.download(&remote_path, &mut file)
    })
    .await
}

/// Stream a local file into a remote file
pub async fn sftp_upload(state: &AppState, local_path: PathBuf, remote_path: String) -> AppResult<u64> {
    tracing::info!("SFTP upload: {} -> {}", local_path.display(), remote_path);
    let fs = state.files()?;

    blocking(move || {
        let mut file = std::fs::File::open(&local_path)?;
        fs.upload(&mut file, &remote_path)
    })
    .await
}

pub async fn sftp_rename(state: &AppState, from_path: String, to_path: String) -> AppResult<bool> {
    let fs = state.files()?;
    blocking(move || Ok(fs.rename(&from_path, &to_path))).await
}

pub async fn sftp_move(state: &AppState, path: String, new_dir: String) -> AppResult<bool> {
    let fs = state.files()?;
    blocking(move || Ok(fs.move_to(&path, &new_dir))).await
}

pub async fn sftp_delete(state: &AppState, path: String) -> AppResult<bool> {
    tracing::info!("SFTP delete: path={}", path);
    let fs = state.files()?;
    blocking(move || Ok(fs.delete(&path))).await
}

pub async fn sftp_mkdir(state: &AppState, path: String) -> AppResult<bool> {
    let fs = state.files()?;
    blocking(move || Ok(fs.create_directory(&path))).await
}

pub async fn sftp_home(state: &AppState) -> AppResult<String> {
    let fs = state.files()?;
    blocking(move || fs.home_dir()).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use crate::ssh::mock::MockTransport;
    use crate::ssh::Role;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_list_requires_files_session() {
        let dir = tempfile::tempdir().unwrap();
        let state = AppState::for_tests(dir.path());

        assert!(matches!(
            sftp_list(&state, String::new()).await,
            Err(AppError::NoActiveSession(Role::Files))
        ));
    }

    #[tokio::test]
    async fn test_list_and_transfer_through_state() {
        let dir = tempfile::tempdir().unwrap();
        let state = AppState::for_tests(dir.path());
        let mock = Arc::new(MockTransport::new().with_file("/home/pi/notes.md", b"# notes"));
        state.install_transport(Role::Files, mock.clone());

        let listing = sftp_list(&state, String::new()).await.unwrap();
        assert_eq!(listing.current_path, "/home/pi");
        assert_eq!(listing.entries.len(), 1);

        let local = dir.path().join("notes.md");
        assert_eq!(sftp_download(&state, "/home/pi/notes.md".into(), local.clone()).await.unwrap(), 7);
        assert_eq!(std::fs::read(&local).unwrap(), b"# notes");

        assert!(sftp_mkdir(&state, "/home/pi/drafts".into()).await.unwrap());
        assert!(sftp_move(&state, "/home/pi/notes.md".into(), "/home/pi/drafts".into()).await.unwrap());
        assert!(mock.exists("/home/pi/drafts/notes.md"));
    }
}
