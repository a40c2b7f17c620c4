//! Remote filesystem access over a session's file lane
//!
//! Listings are produced fresh on every call and never patched in place;
//! callers re-list after a mutation.

pub mod commands;

use crate::error::AppResult;
use crate::runner::quote;
use crate::ssh::TransportSession;
use serde::{Deserialize, Serialize};
use std::io::{Cursor, Read, Write};
use std::sync::Arc;

/// Mode used for directories created from the client
const NEW_DIR_MODE: i32 = 0o755;

/// Remote file/directory entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteEntry {
    pub filename: String,
    pub path: String,
    pub is_dir: bool,
    pub is_symlink: bool,
    pub size: u64,
    pub permissions: String,
    /// Unix seconds, 0 when the server did not report it
    pub modified: i64,
    /// Owner uid
    pub owner: String,
}

pub struct RemoteFs {
    session: Arc<TransportSession>,
}

impl RemoteFs {
    pub fn new(session: Arc<TransportSession>) -> Self {
        Self { session }
    }

    pub fn session(&self) -> &Arc<TransportSession> {
        &self.session
    }

    fn chunk_size(&self) -> usize {
        self.session.settings().transfer.chunk_size
    }

    /// List a directory: directories first, then case-insensitive name order.
    /// An empty path lists the home directory.
    pub fn list(&self, path: &str) -> AppResult<Vec<RemoteEntry>> {
        let path = if path.is_empty() { "." } else { path };
        let mut entries: Vec<RemoteEntry> = self
            .session
            .with_files(|t| t.read_dir(path))?
            .into_iter()
            .filter(|e| e.filename != "." && e.filename != "..")
            .collect();

        entries.sort_by(|a, b| match (a.is_dir, b.is_dir) {
            (true, false) => std::cmp::Ordering::Less,
            (false, true) => std::cmp::Ordering::Greater,
            _ => a.filename.to_lowercase().cmp(&b.filename.to_lowercase()),
        });

        Ok(entries)
    }

    pub fn stat(&self, path: &str) -> AppResult<RemoteEntry> {
        self.session.with_files(|t| t.stat(path))
    }

    /// Canonical absolute form of `path`
    pub fn resolve(&self, path: &str) -> AppResult<String> {
        self.session.with_files(|t| t.realpath(path))
    }

    pub fn home_dir(&self) -> AppResult<String> {
        self.resolve(".")
    }

    pub fn try_rename(&self, old_path: &str, new_path: &str) -> AppResult<()> {
        tracing::debug!("Renaming {} -> {}", old_path, new_path);
        self.session.with_files(|t| t.rename(old_path, new_path))
    }

    pub fn rename(&self, old_path: &str, new_path: &str) -> bool {
        report("rename", old_path, self.try_rename(old_path, new_path))
    }

    /// Move `path` into `new_dir`, keeping its name
    pub fn try_move_to(&self, path: &str, new_dir: &str) -> AppResult<()> {
        self.try_rename(path, &join_remote(new_dir, basename(path)))
    }

    pub fn move_to(&self, path: &str, new_dir: &str) -> bool {
        report("move", path, self.try_move_to(path, new_dir))
    }

    /// Files go through SFTP, directories through `rm -rf` on the exec lane
    pub fn try_delete(&self, path: &str) -> AppResult<()> {
        let entry = self.stat(path)?;
        if entry.is_dir && !entry.is_symlink {
            let output = self.session.execute(&format!("rm -rf -- {}", quote(path)), None)?;
            if !output.success() {
                return Err(crate::error::AppError::Exec(format!(
                    "rm exited with {}: {}",
                    output.exit_status,
                    output.stdout.trim()
                )));
            }
            Ok(())
        } else {
            self.session.with_files(|t| t.remove_file(path))
        }
    }

    pub fn delete(&self, path: &str) -> bool {
        report("delete", path, self.try_delete(path))
    }

    pub fn try_create_directory(&self, path: &str) -> AppResult<()> {
        self.session.with_files(|t| t.create_dir(path, NEW_DIR_MODE))
    }

    pub fn create_directory(&self, path: &str) -> bool {
        report("mkdir", path, self.try_create_directory(path))
    }

    /// Stream `reader` into `remote_path`, one chunk in memory at a time
    pub fn upload(&self, reader: &mut dyn Read, remote_path: &str) -> AppResult<u64> {
        let chunk = self.chunk_size();
        let written = self.session.with_files(|t| t.write_file(remote_path, reader, chunk))?;
        tracing::info!("Uploaded {} bytes to {}", written, remote_path);
        Ok(written)
    }

    pub fn download(&self, remote_path: &str, writer: &mut dyn Write) -> AppResult<u64> {
        let chunk = self.chunk_size();
        let read = self.session.with_files(|t| t.read_file(remote_path, writer, chunk))?;
        tracing::info!("Downloaded {} bytes from {}", read, remote_path);
        Ok(read)
    }

    pub fn upload_bytes(&self, contents: &[u8], remote_path: &str) -> AppResult<u64> {
        self.upload(&mut Cursor::new(contents), remote_path)
    }

    pub fn download_bytes(&self, remote_path: &str) -> AppResult<Vec<u8>> {
        let mut contents = Vec::new();
        self.download(remote_path, &mut contents)?;
        Ok(contents)
    }
}

fn report(op: &str, path: &str, result: AppResult<()>) -> bool {
    match result {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!("SFTP {} failed for {}: {}", op, path, e);
            false
        }
    }
}

/// Join a remote directory and a name with exactly one `/`
pub fn join_remote(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        name.to_string()
    } else if dir.ends_with('/') {
        format!("{}{}", dir, name)
    } else {
        format!("{}/{}", dir, name)
    }
}

/// Last component of a remote path, ignoring a trailing `/`
pub fn basename(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    trimmed.rsplit('/').next().unwrap_or(trimmed)
}

/// Format a mode as a string like "drwxr-xr-x"
pub fn format_permissions(mode: u32) -> String {
    let mut s = String::with_capacity(10);

    s.push(match mode & 0o170000 {
        0o040000 => 'd',
        0o120000 => 'l',
        _ => '-',
    });

    for shift in [6, 3, 0] {
        let bits = (mode >> shift) & 0o7;
        s.push(if bits & 0o4 != 0 { 'r' } else { '-' });
        s.push(if bits & 0o2 != 0 { 'w' } else { '-' });
        s.push(if bits & 0o1 != 0 { 'x' } else { '-' });
    }

    s
}
