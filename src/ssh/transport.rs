use crate::error::{AppError, AppResult};
use crate::sftp::RemoteEntry;
use parking_lot::Mutex;
use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// Depth of the shell input queue
pub const SHELL_QUEUE_DEPTH: usize = 1024;

/// Raw result of a remote command, stderr already merged into `output`
#[derive(Debug, Clone, Default)]
pub struct ExecOutput {
    pub output: Vec<u8>,
    pub exit_status: i32,
}

/// PTY parameters for an interactive shell
#[derive(Debug, Clone)]
pub struct PtyRequest {
    pub term: String,
    pub cols: u32,
    pub rows: u32,
    /// Program to exec under the PTY instead of the login shell
    pub shell_path: Option<String>,
}

#[derive(Debug)]
pub enum ShellCommand {
    Write(Vec<u8>),
    Resize(u32, u32),
    Close,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellEvent {
    Data(Vec<u8>),
    Closed(String),
}

/// The worker side of a shell channel: it drains `commands` and publishes `events`.
pub struct ShellWorkerEnd {
    pub commands: mpsc::Receiver<ShellCommand>,
    pub events: mpsc::UnboundedSender<ShellEvent>,
}

/// Owner side of an interactive shell
///
/// Input goes through a bounded queue to the single worker that owns the
/// remote channel; output comes back on an unbounded queue and is drained by
/// whoever drives the terminal.
pub struct ShellChannel {
    commands: mpsc::Sender<ShellCommand>,
    events: Mutex<mpsc::UnboundedReceiver<ShellEvent>>,
    closed: AtomicBool,
}

impl ShellChannel {
    pub fn pair() -> (ShellChannel, ShellWorkerEnd) {
        let (command_tx, command_rx) = mpsc::channel(SHELL_QUEUE_DEPTH);
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let channel = ShellChannel {
            commands: command_tx,
            events: Mutex::new(event_rx),
            closed: AtomicBool::new(false),
        };
        let worker = ShellWorkerEnd {
            commands: command_rx,
            events: event_tx,
        };
        (channel, worker)
    }

    pub fn write(&self, data: &[u8]) -> AppResult<()> {
        if self.is_closed() {
            return Err(AppError::Exec("Shell channel closed".to_string()));
        }
        match self.commands.try_send(ShellCommand::Write(data.to_vec())) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(AppError::Exec("Shell input queue full".to_string())),
            Err(TrySendError::Closed(_)) => {
                self.closed.store(true, Ordering::SeqCst);
                Err(AppError::Exec("Shell channel closed".to_string()))
            }
        }
    }

    pub fn resize(&self, cols: u32, rows: u32) -> AppResult<()> {
        self.commands
            .try_send(ShellCommand::Resize(cols, rows))
            .map_err(|_| AppError::Exec("Shell channel closed".to_string()))
    }

    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            let _ = self.commands.try_send(ShellCommand::Close);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst) || self.commands.is_closed()
    }

    /// Next pending event without blocking
    pub fn try_next_event(&self) -> Option<ShellEvent> {
        let event = self.events.lock().try_recv().ok()?;
        if matches!(event, ShellEvent::Closed(_)) {
            self.closed.store(true, Ordering::SeqCst);
        }
        Some(event)
    }
}

/// One authenticated connection and the sub-channels it can open
///
/// Implementations are blocking. Callers serialize exec and file operations
/// per lane; the shell runs on its own worker.
pub trait Transport: Send + Sync {
    /// Run a command on a fresh exec channel until it exits or `timeout` elapses
    fn exec(&self, command: &str, timeout: Duration) -> AppResult<ExecOutput>;

    fn has_sftp(&self) -> bool;
    fn read_dir(&self, path: &str) -> AppResult<Vec<RemoteEntry>>;
    fn stat(&self, path: &str) -> AppResult<RemoteEntry>;
    fn realpath(&self, path: &str) -> AppResult<String>;
    fn rename(&self, from: &str, to: &str) -> AppResult<()>;
    fn remove_file(&self, path: &str) -> AppResult<()>;
    fn create_dir(&self, path: &str, mode: i32) -> AppResult<()>;

    /// Stream a remote file into `sink`, one chunk in memory at a time
    fn read_file(&self, path: &str, sink: &mut dyn Write, chunk_size: usize) -> AppResult<u64>;

    /// Stream `source` into a remote file, truncating it first
    fn write_file(&self, path: &str, source: &mut dyn Read, chunk_size: usize) -> AppResult<u64>;

    fn open_shell(&self, pty: &PtyRequest) -> AppResult<ShellChannel>;

    /// Abort any in-flight exec
    fn close_exec(&self);
    fn close_sftp(&self);
    fn disconnect(&self, reason: &str);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shell_channel_write_reaches_worker() {
        let (channel, mut worker) = ShellChannel::pair();
        channel.write(b"ls\n").unwrap();
        channel.resize(120, 40).unwrap();

        match worker.commands.try_recv().unwrap() {
            ShellCommand::Write(data) => assert_eq!(data, b"ls\n"),
            other => panic!("unexpected command {:?}", other),
        }
        assert!(matches!(worker.commands.try_recv().unwrap(), ShellCommand::Resize(120, 40)));
    }

    #[test]
    fn test_closed_event_marks_channel_closed() {
        let (channel, worker) = ShellChannel::pair();
        worker.events.send(ShellEvent::Data(b"hi".to_vec())).unwrap();
        worker.events.send(ShellEvent::Closed("exit".into())).unwrap();

        assert_eq!(channel.try_next_event(), Some(ShellEvent::Data(b"hi".to_vec())));
        assert!(!channel.is_closed());
        assert_eq!(channel.try_next_event(), Some(ShellEvent::Closed("exit".into())));
        assert!(channel.is_closed());
        assert!(channel.write(b"x").is_err());
    }

    #[test]
    fn test_dropped_worker_closes_channel() {
        let (channel, worker) = ShellChannel::pair();
        drop(worker);
        assert!(channel.is_closed());
        assert!(channel.write(b"x").is_err());
    }

    #[test]
    fn test_close_sends_once() {
        let (channel, mut worker) = ShellChannel::pair();
        channel.close();
        channel.close();
        assert!(matches!(worker.commands.try_recv().unwrap(), ShellCommand::Close));
        assert!(worker.commands.try_recv().is_err());
    }
}
