use super::client::Ssh2Transport;
use super::transport::{PtyRequest, ShellChannel, Transport};
use crate::config::{AppSettings, ConnectionProfile};
use crate::error::{AppError, AppResult};
use crate::keychain::Credential;
use crate::logging::{log_session, LogLevel, LogSubsystem};
use crate::shell::startup::STARTUP_SCRIPT;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Session state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Connected,
    Disconnected,
    Error,
}

/// Session info for listing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionInfo {
    pub id: String,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub state: SessionState,
    pub profile_id: String,
    pub connected_at: i64,
    pub has_sftp: bool,
    pub shell_open: bool,
}

/// Output of a one-shot command, CR bytes removed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedOutput {
    pub stdout: String,
    pub exit_status: i32,
}

impl CapturedOutput {
    pub fn success(&self) -> bool {
        self.exit_status == 0
    }
}

/// An authenticated connection shared by the exec lane, the file lane and
/// at most one interactive shell.
///
/// `is_connected()` only holds while the transport handle is present and the
/// dead flag is clear. Once dead, every operation fails with `SessionDead`
/// without touching the network.
pub struct TransportSession {
    pub id: String,
    profile: ConnectionProfile,
    settings: AppSettings,
    transport: RwLock<Option<Arc<dyn Transport>>>,
    shell: Mutex<Option<Arc<ShellChannel>>>,
    state: RwLock<SessionState>,
    dead: AtomicBool,
    exec_lane: Mutex<()>,
    file_lane: Mutex<()>,
    connected_at: i64,
}

impl TransportSession {
    /// Open a real SSH connection for `profile`. Never retried.
    pub fn connect(
        profile: &ConnectionProfile,
        credential: &Credential,
        settings: &AppSettings,
        known_hosts: &Path,
    ) -> AppResult<Arc<Self>> {
        let transport = Ssh2Transport::connect(profile, credential, &settings.ssh, known_hosts)?;
        Ok(Self::from_transport(profile.clone(), settings.clone(), Arc::new(transport)))
    }

    /// Wrap an already-connected transport
    pub fn from_transport(
        profile: ConnectionProfile,
        settings: AppSettings,
        transport: Arc<dyn Transport>,
    ) -> Arc<Self> {
        let session = Self {
            id: Uuid::new_v4().to_string(),
            profile,
            settings,
            transport: RwLock::new(Some(transport)),
            shell: Mutex::new(None),
            state: RwLock::new(SessionState::Connected),
            dead: AtomicBool::new(false),
            exec_lane: Mutex::new(()),
            file_lane: Mutex::new(()),
            connected_at: chrono::Utc::now().timestamp(),
        };
        log_session(
            LogLevel::Info,
            LogSubsystem::Ssh,
            session.id.clone(),
            format!("Connected to {}", session.profile.identity()),
        );
        Arc::new(session)
    }

    pub fn profile(&self) -> &ConnectionProfile {
        &self.profile
    }

    pub fn settings(&self) -> &AppSettings {
        &self.settings
    }

    pub fn is_connected(&self) -> bool {
        !self.dead.load(Ordering::SeqCst) && self.transport.read().is_some()
    }

    pub fn state(&self) -> SessionState {
        *self.state.read()
    }

    pub fn info(&self) -> SessionInfo {
        let transport = self.transport.read().clone();
        SessionInfo {
            id: self.id.clone(),
            host: self.profile.host.clone(),
            port: self.profile.port,
            username: self.profile.username.clone(),
            state: self.state(),
            profile_id: self.profile.id.clone(),
            connected_at: self.connected_at,
            has_sftp: transport.map(|t| t.has_sftp()).unwrap_or(false),
            shell_open: self.shell.lock().as_ref().map(|s| !s.is_closed()).unwrap_or(false),
        }
    }

    fn transport(&self) -> AppResult<Arc<dyn Transport>> {
        if self.dead.load(Ordering::SeqCst) {
            return Err(AppError::SessionDead);
        }
        self.transport.read().clone().ok_or(AppError::SessionDead)
    }

    /// Tear the session down when `result` carries a connection-killing error
    fn settle<T>(&self, result: AppResult<T>) -> AppResult<T> {
        match result {
            Err(err) if err.is_fatal() && !matches!(err, AppError::SessionDead) => {
                tracing::warn!("Session {} failed: {}", self.id, err);
                self.teardown(&err.to_string(), SessionState::Error);
                Err(err)
            }
            other => other,
        }
    }

    /// Run `command` on a fresh exec channel, stderr merged into stdout.
    ///
    /// A non-zero exit status is returned, not raised. `timeout` defaults to
    /// `ssh.exec_timeout_secs`.
    pub fn execute(&self, command: &str, timeout: Option<Duration>) -> AppResult<CapturedOutput> {
        let transport = self.transport()?;
        let _lane = self.exec_lane.lock();
        if self.dead.load(Ordering::SeqCst) {
            return Err(AppError::SessionDead);
        }

        let timeout = timeout.unwrap_or_else(|| self.settings.ssh.exec_timeout());
        let output = self.settle(transport.exec(command, timeout))?;

        Ok(CapturedOutput {
            stdout: String::from_utf8_lossy(&output.output).replace('\r', ""),
            exit_status: output.exit_status,
        })
    }

    /// Run `op` on the file lane
    pub fn with_files<T>(&self, op: impl FnOnce(&dyn Transport) -> AppResult<T>) -> AppResult<T> {
        let transport = self.transport()?;
        let _lane = self.file_lane.lock();
        if self.dead.load(Ordering::SeqCst) {
            return Err(AppError::SessionDead);
        }
        if !transport.has_sftp() {
            return Err(AppError::Unsupported(format!(
                "SFTP is not available on {}",
                self.profile.identity()
            )));
        }
        self.settle(op(transport.as_ref()))
    }

    /// Open the interactive shell, or return the one already open
    pub fn open_shell(&self) -> AppResult<Arc<ShellChannel>> {
        let transport = self.transport()?;
        let mut slot = self.shell.lock();
        if let Some(existing) = slot.as_ref() {
            if !existing.is_closed() {
                return Ok(Arc::clone(existing));
            }
        }

        let terminal = &self.settings.terminal;
        let pty = PtyRequest {
            term: terminal.term.clone(),
            cols: terminal.cols,
            rows: terminal.rows,
            shell_path: self.profile.shell_path.clone(),
        };
        let shell = match transport.open_shell(&pty) {
            Ok(shell) => Arc::new(shell),
            Err(err) => {
                // teardown takes the shell slot
                drop(slot);
                return self.settle(Err(err));
            }
        };

        if terminal.startup_script {
            for line in STARTUP_SCRIPT {
                if let Err(e) = shell.write(format!("{}\n", line).as_bytes()) {
                    tracing::warn!("Startup script line not delivered: {}", e);
                }
            }
        }

        log_session(LogLevel::Info, LogSubsystem::Shell, self.id.clone(), "Shell opened");
        *slot = Some(Arc::clone(&shell));
        Ok(shell)
    }

    /// The shell opened by `open_shell`, if it is still open
    pub fn shell(&self) -> Option<Arc<ShellChannel>> {
        self.shell.lock().as_ref().filter(|s| !s.is_closed()).cloned()
    }

    /// Close shell, exec and file channels, then the connection. Idempotent.
    pub fn disconnect(&self) {
        self.teardown("Disconnected by user", SessionState::Disconnected);
    }

    fn teardown(&self, reason: &str, state: SessionState) {
        self.dead.store(true, Ordering::SeqCst);
        let Some(transport) = self.transport.write().take() else {
            return;
        };
        *self.state.write() = state;

        if let Some(shell) = self.shell.lock().take() {
            shell.close();
        }
        transport.close_exec();
        transport.close_sftp();
        transport.disconnect(reason);

        log_session(
            LogLevel::Info,
            LogSubsystem::Ssh,
            self.id.clone(),
            format!("Session closed: {}", reason),
        );
    }
}

impl Drop for TransportSession {
    fn drop(&mut self) {
        self.disconnect();
    }
}
