use super::transport::{
    ExecOutput, PtyRequest, ShellChannel, ShellCommand, ShellEvent, ShellWorkerEnd, Transport,
};
use crate::config::{ConnectionProfile, KnownHostsPolicy, SshSettings};
use crate::error::{AppError, AppResult, ListError};
use crate::keychain::Credential;
use crate::sftp::{format_permissions, RemoteEntry};
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use ssh2::{
    CheckResult, Channel, ErrorCode, ExtendedData, FileStat, HostKeyType, KnownHostFileKind,
    KnownHostKeyFormat, Session, Sftp,
};
use std::io::{Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::error::TryRecvError;

const MAX_PENDING_BYTES: usize = 256 * 1024; // 256KB write buffer
const WRITE_CHUNK_BYTES: usize = 8 * 1024; // limit each write call
const READ_BUFFER_BYTES: usize = 32 * 1024;
const MAX_CONSECUTIVE_ERRORS: u32 = 5;

/// How long teardown waits for the connection lock before cutting the socket
const DISCONNECT_GRACE: Duration = Duration::from_secs(2);

/// `Transport` backed by libssh2
///
/// One `Session` is shared by the exec lane, the SFTP lane and the shell
/// worker. Every user re-asserts the blocking mode it needs after taking the
/// lock, and long operations re-lock per step.
pub struct Ssh2Transport {
    label: String,
    session: Arc<Mutex<Session>>,
    sftp: Mutex<Option<Sftp>>,
    tcp: Option<TcpStream>,
    abort: AtomicBool,
    keepalive_interval: u32,
}

impl Ssh2Transport {
    /// Connect, verify the host key, authenticate and optionally open SFTP
    pub fn connect(
        profile: &ConnectionProfile,
        credential: &Credential,
        settings: &SshSettings,
        known_hosts: &Path,
    ) -> AppResult<Self> {
        let label = format!("{}@{}:{}", profile.username, profile.host, profile.port);
        tracing::info!("Connecting to {}", label);

        let tcp = connect_tcp(&profile.host, profile.port, settings.connect_timeout())?;
        tcp.set_nodelay(true)?;
        tcp.set_write_timeout(Some(settings.io_timeout()))?;
        let shutdown_handle = tcp.try_clone().ok();

        let mut session = Session::new()
            .map_err(|e| AppError::Protocol(format!("Failed to create SSH session: {}", e)))?;
        session.set_tcp_stream(tcp);
        session.set_timeout(settings.io_timeout_secs.saturating_mul(1000).min(u32::MAX as u64) as u32);
        session.set_keepalive(true, settings.keepalive_interval);

        session
            .handshake()
            .map_err(|e| AppError::Protocol(format!("SSH handshake failed: {}", e)))?;

        verify_host_key(&session, &profile.host, profile.port, settings.known_hosts_policy, known_hosts)?;
        authenticate(&mut session, &profile.username, credential)?;

        let sftp = if profile.use_sftp {
            match session.sftp() {
                Ok(sftp) => Some(sftp),
                Err(e) => {
                    tracing::warn!("SFTP subsystem unavailable for {}: {}", label, e);
                    None
                }
            }
        } else {
            None
        };

        tracing::info!("SSH connected ({}), sftp={}", label, sftp.is_some());

        Ok(Self {
            label,
            session: Arc::new(Mutex::new(session)),
            sftp: Mutex::new(sftp),
            tcp: shutdown_handle,
            abort: AtomicBool::new(false),
            keepalive_interval: settings.keepalive_interval,
        })
    }

    fn with_sftp<T>(&self, op: impl FnOnce(&Sftp) -> AppResult<T>) -> AppResult<T> {
        if self.abort.load(Ordering::SeqCst) {
            return Err(AppError::SessionDead);
        }
        let session = self.session.lock();
        session.set_blocking(true);
        let sftp = self.sftp.lock();
        let sftp = sftp
            .as_ref()
            .ok_or_else(|| AppError::Unsupported("SFTP subsystem is not open".to_string()))?;
        op(sftp)
    }

    fn force_close(&self, channel: &mut Channel) {
        let session = self.session.lock();
        session.set_blocking(false);
        let _ = channel.close();
    }

    fn open_pty_channel(session: &Session, pty: &PtyRequest, label: &str) -> AppResult<Channel> {
        tracing::debug!("Opening channel [{}]", label);
        let mut ch = session.channel_session().map_err(map_session_error)?;
        ch.handle_extended_data(ExtendedData::Merge).map_err(map_session_error)?;
        ch.request_pty(&pty.term, None, Some((pty.cols, pty.rows, 0, 0)))
            .map_err(map_session_error)?;
        Ok(ch)
    }

    /// Start an interactive program under a PTY, trying the configured shell,
    /// then the login shell, then common fallbacks.
    fn open_interactive_channel(&self, session: &Session, pty: &PtyRequest) -> AppResult<Channel> {
        if let Some(shell_path) = pty.shell_path.as_deref() {
            if let Ok(mut ch) = Self::open_pty_channel(session, pty, "configured") {
                match ch.exec(shell_path) {
                    Ok(()) => return Ok(ch),
                    Err(e) => {
                        tracing::warn!("Configured shell failed ({}): {}", self.label, e);
                        let _ = ch.close();
                    }
                }
            }
        }

        if let Ok(mut ch) = Self::open_pty_channel(session, pty, "primary") {
            match ch.shell() {
                Ok(()) => return Ok(ch),
                Err(e) => {
                    tracing::debug!("shell() refused ({}): {}", self.label, e);
                    let _ = ch.close();
                }
            }
        }

        for cmd in ["$SHELL -l", "bash -l", "sh -l"] {
            if let Ok(mut ch) = Self::open_pty_channel(session, pty, "fallback") {
                match ch.exec(cmd) {
                    Ok(()) => {
                        tracing::debug!("Exec shell started with '{}' ({})", cmd, self.label);
                        return Ok(ch);
                    }
                    Err(_) => {
                        let _ = ch.close();
                    }
                }
            }
        }

        Err(AppError::Exec("Failed to start interactive shell".to_string()))
    }
}

impl Transport for Ssh2Transport {
    fn exec(&self, command: &str, timeout: Duration) -> AppResult<ExecOutput> {
        if self.abort.load(Ordering::SeqCst) {
            return Err(AppError::SessionDead);
        }
        let deadline = exec_deadline(timeout);

        let mut channel = {
            let session = self.session.lock();
            session.set_blocking(true);
            let mut ch = session.channel_session().map_err(map_session_error)?;
            ch.handle_extended_data(ExtendedData::Merge).map_err(map_session_error)?;
            ch.exec(command).map_err(map_session_error)?;
            ch
        };

        let mut output = Vec::new();
        let mut buf = [0u8; READ_BUFFER_BYTES];
        loop {
            if self.abort.load(Ordering::SeqCst) {
                self.force_close(&mut channel);
                return Err(AppError::SessionDead);
            }
            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                self.force_close(&mut channel);
                return Err(AppError::Timeout(format!("command did not finish within {:?}", timeout)));
            }

            let (progressed, finished) = {
                let session = self.session.lock();
                session.set_blocking(false);
                let mut progressed = false;
                loop {
                    match channel.read(&mut buf) {
                        Ok(0) => break,
                        Ok(n) => {
                            output.extend_from_slice(&buf[..n]);
                            progressed = true;
                        }
                        Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                        Err(ref e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                        Err(e) => {
                            if is_recoverable_error(&e.to_string().to_lowercase()) {
                                break;
                            }
                            return Err(AppError::Network(format!("exec read failed: {}", e)));
                        }
                    }
                }
                (progressed, channel.eof())
            };

            if finished {
                break;
            }
            if !progressed {
                thread::sleep(Duration::from_millis(5));
            }
        }

        let session = self.session.lock();
        session.set_blocking(true);
        let _ = channel.wait_close();
        let exit_status = channel.exit_status().unwrap_or(-1);

        Ok(ExecOutput { output, exit_status })
    }

    fn has_sftp(&self) -> bool {
        self.sftp.lock().is_some()
    }

    fn read_dir(&self, path: &str) -> AppResult<Vec<RemoteEntry>> {
        self.with_sftp(|sftp| {
            let listing = sftp
                .readdir(Path::new(path))
                .map_err(|e| map_sftp_error(e, path))?;
            Ok(listing
                .into_iter()
                .map(|(entry_path, stat)| {
                    let mut entry = entry_from_stat(&entry_path, &stat);
                    if entry.is_symlink {
                        // Symlinked directories browse like directories
                        if let Ok(target) = sftp.stat(&entry_path) {
                            entry.is_dir = target.is_dir();
                        }
                    }
                    entry
                })
                .collect())
        })
    }

    fn stat(&self, path: &str) -> AppResult<RemoteEntry> {
        self.with_sftp(|sftp| {
            let stat = sftp.lstat(Path::new(path)).map_err(|e| map_sftp_error(e, path))?;
            let mut entry = entry_from_stat(Path::new(path), &stat);
            if entry.is_symlink {
                if let Ok(target) = sftp.stat(Path::new(path)) {
                    entry.is_dir = target.is_dir();
                }
            }
            Ok(entry)
        })
    }

    fn realpath(&self, path: &str) -> AppResult<String> {
        self.with_sftp(|sftp| {
            sftp.realpath(Path::new(path))
                .map(|p| p.to_string_lossy().to_string())
                .map_err(|e| map_sftp_error(e, path))
        })
    }

    fn rename(&self, from: &str, to: &str) -> AppResult<()> {
        self.with_sftp(|sftp| {
            sftp.rename(Path::new(from), Path::new(to), None)
                .map_err(|e| map_sftp_error(e, from))
        })
    }

    fn remove_file(&self, path: &str) -> AppResult<()> {
        self.with_sftp(|sftp| sftp.unlink(Path::new(path)).map_err(|e| map_sftp_error(e, path)))
    }

    fn create_dir(&self, path: &str, mode: i32) -> AppResult<()> {
        self.with_sftp(|sftp| sftp.mkdir(Path::new(path), mode).map_err(|e| map_sftp_error(e, path)))
    }

    fn read_file(&self, path: &str, sink: &mut dyn Write, chunk_size: usize) -> AppResult<u64> {
        let mut file = self.with_sftp(|sftp| sftp.open(Path::new(path)).map_err(|e| map_sftp_error(e, path)))?;
        let mut buf = vec![0u8; chunk_size.max(1)];
        let mut total = 0u64;

        loop {
            let n = {
                if self.abort.load(Ordering::SeqCst) {
                    return Err(AppError::SessionDead);
                }
                let session = self.session.lock();
                session.set_blocking(true);
                file.read(&mut buf)
                    .map_err(|e| AppError::Transfer(format!("Reading {} failed: {}", path, e)))?
            };
            if n == 0 {
                break;
            }
            sink.write_all(&buf[..n]).map_err(|e| local_io_error(path, e))?;
            total += n as u64;
        }

        sink.flush().map_err(|e| local_io_error(path, e))?;
        Ok(total)
    }

    fn write_file(&self, path: &str, source: &mut dyn Read, chunk_size: usize) -> AppResult<u64> {
        let mut file = self.with_sftp(|sftp| sftp.create(Path::new(path)).map_err(|e| map_sftp_error(e, path)))?;
        let mut buf = vec![0u8; chunk_size.max(1)];
        let mut total = 0u64;

        loop {
            let n = source.read(&mut buf).map_err(|e| local_io_error(path, e))?;
            if n == 0 {
                break;
            }
            if self.abort.load(Ordering::SeqCst) {
                return Err(AppError::SessionDead);
            }
            let session = self.session.lock();
            session.set_blocking(true);
            file.write_all(&buf[..n])
                .map_err(|e| AppError::Transfer(format!("Writing {} failed: {}", path, e)))?;
            total += n as u64;
        }

        Ok(total)
    }

    fn open_shell(&self, pty: &PtyRequest) -> AppResult<ShellChannel> {
        if self.abort.load(Ordering::SeqCst) {
            return Err(AppError::SessionDead);
        }
        let channel = {
            let session = self.session.lock();
            session.set_blocking(true);
            self.open_interactive_channel(&session, pty)?
        };

        let (shell, worker) = ShellChannel::pair();
        let session = Arc::clone(&self.session);
        let label = self.label.clone();
        let keepalive = Duration::from_secs(self.keepalive_interval.max(1) as u64);
        thread::Builder::new()
            .name("sshdeck-shell".to_string())
            .spawn(move || run_shell_loop(&label, &session, channel, worker, keepalive))?;

        Ok(shell)
    }

    fn close_exec(&self) {
        self.abort.store(true, Ordering::SeqCst);
    }

    fn close_sftp(&self) {
        let _session = self.session.try_lock_for(DISCONNECT_GRACE).map(|s| {
            s.set_blocking(true);
            s
        });
        drop(self.sftp.lock().take());
    }

    fn disconnect(&self, reason: &str) {
        self.abort.store(true, Ordering::SeqCst);
        match self.session.try_lock_for(DISCONNECT_GRACE) {
            Some(session) => {
                session.set_blocking(true);
                let _ = session.disconnect(None, reason, None);
            }
            None => tracing::warn!("Connection busy, cutting socket ({})", self.label),
        }
        if let Some(tcp) = &self.tcp {
            let _ = tcp.shutdown(Shutdown::Both);
        }
        tracing::info!("Disconnected {}", self.label);
    }
}

fn connect_tcp(host: &str, port: u16, timeout: Duration) -> AppResult<TcpStream> {
    let addrs = (host, port)
        .to_socket_addrs()
        .map_err(|e| AppError::Network(format!("Cannot resolve {}: {}", host, e)))?;

    let mut last_error = None;
    for addr in addrs {
        match TcpStream::connect_timeout(&addr, timeout) {
            Ok(stream) => return Ok(stream),
            Err(e) => last_error = Some(e),
        }
    }

    Err(AppError::Network(match last_error {
        Some(e) => format!("TCP connect to {}:{} failed: {}", host, port, e),
        None => format!("No address found for {}", host),
    }))
}

fn host_key_name(key_type: HostKeyType) -> &'static str {
    match key_type {
        HostKeyType::Rsa => "ssh-rsa",
        HostKeyType::Dss => "ssh-dss",
        HostKeyType::Ecdsa256 => "ecdsa-sha2-nistp256",
        HostKeyType::Ecdsa384 => "ecdsa-sha2-nistp384",
        HostKeyType::Ecdsa521 => "ecdsa-sha2-nistp521",
        HostKeyType::Unknown => "unknown",
        _ => "ssh-ed25519",
    }
}

fn verify_host_key(
    session: &Session,
    host: &str,
    port: u16,
    policy: KnownHostsPolicy,
    known_hosts_path: &Path,
) -> AppResult<()> {
    let (key, key_type) = session
        .host_key()
        .ok_or_else(|| AppError::Protocol("No host key received".to_string()))?;
    let fingerprint = compute_sha256_fingerprint(key);

    let mut known_hosts = session
        .known_hosts()
        .map_err(|e| AppError::Protocol(format!("Failed to create known_hosts: {}", e)))?;
    if known_hosts_path.exists() {
        let _ = known_hosts.read_file(known_hosts_path, KnownHostFileKind::OpenSSH);
    }

    match known_hosts.check_port(host, port, key) {
        CheckResult::Match => {
            tracing::debug!("Host key matched for {}:{}", host, port);
            Ok(())
        }
        CheckResult::NotFound => match policy {
            KnownHostsPolicy::Strict => Err(AppError::Protocol(format!(
                "Unknown {} host key {} for {}:{}",
                host_key_name(key_type),
                fingerprint,
                host,
                port
            ))),
            KnownHostsPolicy::AcceptNew | KnownHostsPolicy::Accept => {
                tracing::info!(
                    "Recording new {} host key {} for {}:{}",
                    host_key_name(key_type),
                    fingerprint,
                    host,
                    port
                );
                let entry_host = if port == 22 {
                    host.to_string()
                } else {
                    format!("[{}]:{}", host, port)
                };
                known_hosts
                    .add(
                        &entry_host,
                        key,
                        &format!("added by sshdeck on {}", chrono::Utc::now().to_rfc3339()),
                        KnownHostKeyFormat::from(key_type),
                    )
                    .map_err(|e| AppError::Protocol(format!("Failed to add known host: {}", e)))?;
                if let Some(parent) = known_hosts_path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                known_hosts
                    .write_file(known_hosts_path, KnownHostFileKind::OpenSSH)
                    .map_err(|e| AppError::Protocol(format!("Failed to write known_hosts: {}", e)))?;
                Ok(())
            }
        },
        CheckResult::Mismatch => {
            tracing::error!("HOST KEY MISMATCH for {}:{} (now {})", host, port, fingerprint);
            if policy == KnownHostsPolicy::Accept {
                return Ok(());
            }
            Err(AppError::Protocol(format!(
                "Host key for {}:{} has changed. Remove the old entry from known_hosts if the change is expected.",
                host, port
            )))
        }
        CheckResult::Failure => Err(AppError::Protocol("Failed to check known hosts".to_string())),
    }
}

fn authenticate(session: &mut Session, username: &str, credential: &Credential) -> AppResult<()> {
    match credential {
        Credential::Password(password) => {
            session
                .userauth_password(username, password)
                .map_err(|_| AppError::Auth("Password authentication failed".to_string()))?;
        }
        Credential::Key {
            private_key,
            passphrase,
        } => {
            // libssh2 wants a file; keep it private and short-lived
            let key_file_path = std::env::temp_dir().join(format!("sshdeck_key_{}", uuid::Uuid::new_v4()));
            std::fs::write(&key_file_path, private_key)
                .map_err(|e| AppError::Auth(format!("Failed to write temp key file: {}", e)))?;

            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                let _ = std::fs::set_permissions(&key_file_path, std::fs::Permissions::from_mode(0o600));
            }

            let auth_result = session.userauth_pubkey_file(username, None, &key_file_path, passphrase.as_deref());
            let _ = std::fs::remove_file(&key_file_path);

            auth_result.map_err(|e| {
                let msg = e.to_string().to_lowercase();
                if msg.contains("passphrase") || msg.contains("decrypt") || msg.contains("parse") {
                    AppError::Auth("Invalid passphrase or key format".to_string())
                } else {
                    AppError::Auth("Private key not accepted by server".to_string())
                }
            })?;
        }
        Credential::Agent => {
            let mut agent = session
                .agent()
                .map_err(|_| AppError::Auth("SSH agent not available".to_string()))?;
            agent
                .connect()
                .map_err(|_| AppError::Auth("Failed to connect to SSH agent".to_string()))?;
            agent
                .list_identities()
                .map_err(|_| AppError::Auth("Failed to list SSH agent identities".to_string()))?;

            let identities = agent.identities().unwrap_or_default();
            if identities.is_empty() {
                return Err(AppError::Auth("No identities found in SSH agent".to_string()));
            }
            if !identities.iter().any(|identity| agent.userauth(username, identity).is_ok()) {
                return Err(AppError::Auth("SSH agent authentication failed".to_string()));
            }
        }
    }

    if !session.authenticated() {
        return Err(AppError::Auth("Authentication failed".to_string()));
    }
    Ok(())
}

fn entry_from_stat(path: &Path, stat: &FileStat) -> RemoteEntry {
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.to_string_lossy().to_string());
    let perm = stat.perm.unwrap_or(0);

    RemoteEntry {
        filename,
        path: path.to_string_lossy().to_string(),
        is_dir: stat.is_dir(),
        is_symlink: stat.file_type().is_symlink(),
        size: stat.size.unwrap_or(0),
        permissions: format_permissions(perm),
        modified: stat.mtime.unwrap_or(0) as i64,
        owner: stat.uid.map(|uid| uid.to_string()).unwrap_or_default(),
    }
}

/// Map libssh2 session-level failures onto the error taxonomy
pub(crate) fn map_session_error(err: ssh2::Error) -> AppError {
    match err.code() {
        ErrorCode::Session(code) => match code {
            // timeout, socket timeout, EAGAIN
            -9 | -30 | -37 => AppError::Timeout(err.message().to_string()),
            // socket none/send/disconnect/recv, bad socket
            -1 | -7 | -13 | -43 | -45 => AppError::Network(err.message().to_string()),
            -15 | -18 | -19 => AppError::Auth(err.message().to_string()),
            // channel-level refusals leave the connection usable
            -27..=-20 | -32 => AppError::Exec(err.message().to_string()),
            _ => AppError::Protocol(err.message().to_string()),
        },
        ErrorCode::SFTP(_) => map_sftp_error(err, ""),
    }
}

/// Map SFTP status codes, naming the path they concern
pub(crate) fn map_sftp_error(err: ssh2::Error, path: &str) -> AppError {
    match err.code() {
        ErrorCode::SFTP(2) | ErrorCode::SFTP(10) => ListError::PathNotFound(path.to_string()).into(),
        ErrorCode::SFTP(3) => ListError::PermissionDenied(path.to_string()).into(),
        ErrorCode::SFTP(6) | ErrorCode::SFTP(7) => AppError::Network(format!("SFTP connection lost: {}", err)),
        ErrorCode::SFTP(code) => AppError::Transfer(format!("SFTP error {} on {}: {}", code, path, err.message())),
        ErrorCode::Session(_) => map_session_error(err),
    }
}

/// Shell worker: owns the remote channel, drains input, forwards output
fn run_shell_loop(
    label: &str,
    session: &Mutex<Session>,
    mut channel: Channel,
    worker: ShellWorkerEnd,
    keepalive_interval: Duration,
) {
    let ShellWorkerEnd {
        mut commands,
        events,
    } = worker;
    let mut read_buf = [0u8; READ_BUFFER_BYTES];
    let mut last_keepalive = Instant::now();
    let mut pending: Vec<u8> = Vec::new();
    let mut consecutive_errors = 0;

    let reason = 'io: loop {
        if last_keepalive.elapsed() >= keepalive_interval {
            let s = session.lock();
            s.set_blocking(true);
            if let Err(e) = s.keepalive_send() {
                tracing::warn!("Keepalive send failed ({}): {}", label, e);
            }
            last_keepalive = Instant::now();
        }

        for _ in 0..32 {
            match commands.try_recv() {
                Ok(ShellCommand::Write(data)) => {
                    if pending.len() + data.len() > MAX_PENDING_BYTES {
                        tracing::warn!("Shell input dropped, {} bytes pending ({})", pending.len(), label);
                        continue;
                    }
                    pending.extend_from_slice(&data);
                }
                Ok(ShellCommand::Resize(cols, rows)) => {
                    let s = session.lock();
                    s.set_blocking(true);
                    if let Err(e) = channel.request_pty_size(cols, rows, None, None) {
                        tracing::warn!("Failed to resize PTY: {}", e);
                    }
                }
                Ok(ShellCommand::Close) => break 'io "Closed by client".to_string(),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => break 'io "Shell detached".to_string(),
            }
        }

        if consecutive_errors >= MAX_CONSECUTIVE_ERRORS {
            tracing::error!("Too many consecutive errors, closing shell ({})", label);
            break 'io "Connection lost".to_string();
        }

        {
            let s = session.lock();
            s.set_blocking(false);
            loop {
                match channel.stream(0).read(&mut read_buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        consecutive_errors = 0;
                        if events.send(ShellEvent::Data(read_buf[..n].to_vec())).is_err() {
                            break 'io "Shell detached".to_string();
                        }
                    }
                    Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                    Err(ref e) if e.kind() == std::io::ErrorKind::TimedOut => break,
                    Err(ref e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                    Err(e) => {
                        if is_recoverable_error(&e.to_string().to_lowercase()) {
                            break;
                        }
                        consecutive_errors += 1;
                        tracing::warn!("Read error ({}): {}; count={}", label, e, consecutive_errors);
                        break;
                    }
                }
            }
        }

        if !pending.is_empty() {
            let s = session.lock();
            s.set_blocking(true);
            while !pending.is_empty() {
                let write_len = pending.len().min(WRITE_CHUNK_BYTES);
                match channel.write(&pending[..write_len]) {
                    Ok(0) => thread::sleep(Duration::from_millis(4)),
                    Ok(n) => {
                        pending.drain(..n);
                        consecutive_errors = 0;
                    }
                    Err(e) => {
                        if is_recoverable_error(&e.to_string().to_lowercase()) {
                            thread::sleep(Duration::from_millis(4));
                            continue;
                        }
                        tracing::error!("Write error ({}): {}", label, e);
                        consecutive_errors += 1;
                        pending.clear();
                    }
                }
            }
            let _ = channel.flush();
        }

        if channel.eof() {
            break 'io "Remote shell exited".to_string();
        }

        thread::sleep(Duration::from_millis(2));
    };

    {
        let s = session.lock();
        s.set_blocking(false);
        let _ = channel.close();
    }
    log_channel_state(&channel, label, &reason);
    let _ = events.send(ShellEvent::Closed(reason));
}

/// Log channel state for diagnostics (no payloads)
fn log_channel_state(channel: &Channel, label: &str, ctx: &str) {
    let exit_signal = match channel.exit_signal() {
        Ok(sig) => sig.exit_signal.unwrap_or_else(|| "none".to_string()),
        Err(_) => "none".to_string(),
    };
    tracing::info!(
        "Shell closed [{}] ({}): eof={} exit_status={} exit_signal={}",
        ctx,
        label,
        channel.eof(),
        channel.exit_status().unwrap_or_default(),
        exit_signal
    );
}

/// Errors that mean "try again later" rather than a broken connection
fn is_recoverable_error(err_str: &str) -> bool {
    err_str.contains("would block")
        || err_str.contains("wouldblock")
        || err_str.contains("eagain")
        || err_str.contains("try again")
        || err_str.contains("temporarily")
        || err_str.contains("timed out")
        || err_str.contains("-37") // libssh2 EAGAIN code
}

/// `None` when the timeout is too large to represent, meaning no deadline
pub(crate) fn exec_deadline(timeout: Duration) -> Option<Instant> {
    Instant::now().checked_add(timeout)
}

/// Local side of a transfer failed; the connection itself is fine
pub(crate) fn local_io_error(path: &str, err: std::io::Error) -> AppError {
    AppError::Transfer(format!("Local I/O for {} failed: {}", path, err))
}

/// Compute SHA256 fingerprint of a key
pub fn compute_sha256_fingerprint(key: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key);
    let result = hasher.finalize();

    let b64 = base64::Engine::encode(&base64::engine::general_purpose::STANDARD, result);
    format!("SHA256:{}", b64.trim_end_matches('='))
}

/// Shorten connection errors before they are shown to a user
pub fn sanitize_error_message(msg: &str) -> String {
    if msg.len() > 200 {
        let mut cut = 200;
        while !msg.is_char_boundary(cut) {
            cut -= 1;
        }
        format!("{}...", &msg[..cut])
    } else {
        msg.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_format() {
        let fp = compute_sha256_fingerprint(b"test key data");
        assert!(fp.starts_with("SHA256:"));
        assert!(!fp.ends_with('='));
    }

    #[test]
    fn test_sanitize_error() {
        assert_eq!(sanitize_error_message("Short error"), "Short error");

        let sanitized = sanitize_error_message(&"a".repeat(300));
        assert!(sanitized.len() < 210);
        assert!(sanitized.ends_with("..."));
    }

    #[test]
    fn test_huge_exec_timeout_means_no_deadline() {
        assert!(exec_deadline(Duration::MAX).is_none());
        assert!(exec_deadline(Duration::from_secs(30)).is_some());
    }

    #[test]
    fn test_local_io_error_keeps_session() {
        let err = local_io_error("/tmp/out", std::io::Error::new(std::io::ErrorKind::Other, "disk full"));
        assert!(matches!(err, AppError::Transfer(_)));
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_recoverable_errors() {
        assert!(is_recoverable_error("[session(-37)] would block"));
        assert!(is_recoverable_error("operation timed out"));
        assert!(!is_recoverable_error("connection reset by peer"));
    }

    #[test]
    fn test_session_error_mapping() {
        let timeout = ssh2::Error::new(ErrorCode::Session(-9), "timed out waiting");
        assert!(matches!(map_session_error(timeout), AppError::Timeout(_)));

        let dropped = ssh2::Error::new(ErrorCode::Session(-13), "socket disconnect");
        assert!(map_session_error(dropped).is_fatal());

        let denied = ssh2::Error::new(ErrorCode::Session(-22), "channel request denied");
        let err = map_session_error(denied);
        assert!(matches!(err, AppError::Exec(_)));
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_sftp_error_mapping() {
        let missing = ssh2::Error::new(ErrorCode::SFTP(2), "no such file");
        assert!(matches!(
            map_sftp_error(missing, "/nope"),
            AppError::List(ListError::PathNotFound(ref p)) if p == "/nope"
        ));

        let denied = ssh2::Error::new(ErrorCode::SFTP(3), "permission denied");
        assert!(matches!(
            map_sftp_error(denied, "/root"),
            AppError::List(ListError::PermissionDenied(_))
        ));

        let lost = ssh2::Error::new(ErrorCode::SFTP(7), "connection lost");
        assert!(map_sftp_error(lost, "/x").is_fatal());
    }
}
