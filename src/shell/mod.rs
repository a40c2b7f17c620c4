//! Interactive shell driver
//!
//! Feeds the live character stream of a shell channel to a terminal
//! renderer, turns key presses into bytes for the remote PTY and watches
//! the stream for the clear and close sentinels.

pub mod commands;
pub mod keys;
pub mod renderer;
pub mod sentinel;
pub mod startup;

use crate::error::{AppError, AppResult};
use crate::runner::quote;
use crate::ssh::{ShellChannel, ShellEvent, TransportSession};
use keys::{control_byte, Arrow, BACKSPACE};
use renderer::TerminalRenderer;
use sentinel::{find_from, CLEAR_SENTINEL, CLOSE_SENTINEL, ERASE_HISTORY};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DriverState {
    Idle,
    Starting,
    Live,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CloseReason {
    /// A one-shot command printed the close sentinel
    CommandFinished,
    /// The remote side closed the channel
    ChannelClosed(String),
}

/// What to run right after attaching
#[derive(Debug, Clone, Default)]
pub struct AttachOptions {
    pub working_dir: Option<String>,
    pub deferred_command: Option<String>,
}

/// Everything derived from the stream since the last attach
#[derive(Debug, Default)]
pub struct ShellStreamState {
    pub raw: Vec<u8>,
    pub decorated: String,
    pub control_pending: bool,
    pub working_dir: Option<String>,
    pub deferred_command: Option<String>,
    carry: Vec<u8>,
}

impl ShellStreamState {
    fn reset(&mut self, options: &AttachOptions) {
        *self = Self {
            working_dir: options.working_dir.clone(),
            deferred_command: options.deferred_command.clone(),
            ..Self::default()
        };
    }

    /// Decode `chunk`, holding back a code point split across chunks
    fn decode(&mut self, chunk: &[u8]) -> String {
        let mut bytes = std::mem::take(&mut self.carry);
        bytes.extend_from_slice(chunk);

        let mut text = String::with_capacity(bytes.len());
        let mut rest = bytes.as_slice();
        loop {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    text.push_str(valid);
                    break;
                }
                Err(e) => {
                    let (valid, after) = rest.split_at(e.valid_up_to());
                    text.push_str(&String::from_utf8_lossy(valid));
                    match e.error_len() {
                        Some(bad) => {
                            text.push(char::REPLACEMENT_CHARACTER);
                            rest = &after[bad..];
                        }
                        None => {
                            self.carry = after.to_vec();
                            break;
                        }
                    }
                }
            }
        }
        text
    }

    fn trim_to(&mut self, limit: usize) {
        if self.raw.len() > limit {
            let excess = self.raw.len() - limit;
            self.raw.drain(..excess);
        }
        if self.decorated.len() > limit {
            let mut cut = self.decorated.len() - limit;
            while !self.decorated.is_char_boundary(cut) {
                cut += 1;
            }
            self.decorated.drain(..cut);
        }
    }
}

/// What a chunk did to the decorated buffer
#[derive(Debug, Default, PartialEq, Eq)]
struct Ingest {
    cleared: bool,
    closed: bool,
}

/// Drives one shell channel for one owner thread: `Idle → Starting → Live → Closed`
pub struct ShellDriver<R: TerminalRenderer> {
    renderer: R,
    shell: Option<Arc<ShellChannel>>,
    state: DriverState,
    stream: ShellStreamState,
    close_reason: Option<CloseReason>,
    close_reported: bool,
    scrollback_bytes: usize,
}

impl<R: TerminalRenderer> ShellDriver<R> {
    pub fn new(renderer: R, scrollback_bytes: usize) -> Self {
        Self {
            renderer,
            shell: None,
            state: DriverState::Idle,
            stream: ShellStreamState::default(),
            close_reason: None,
            close_reported: false,
            scrollback_bytes: scrollback_bytes.max(CLOSE_SENTINEL.len().max(CLEAR_SENTINEL.len())),
        }
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    pub fn stream(&self) -> &ShellStreamState {
        &self.stream
    }

    pub fn decorated(&self) -> &str {
        &self.stream.decorated
    }

    pub fn renderer(&self) -> &R {
        &self.renderer
    }

    pub fn close_reason(&self) -> Option<&CloseReason> {
        self.close_reason.as_ref()
    }

    /// Open (or reuse) the session's shell and attach to it
    pub fn attach_session(&mut self, session: &TransportSession, options: AttachOptions) -> AppResult<()> {
        let shell = session.open_shell()?;
        self.attach(shell, options)
    }

    /// Reset the stream state and start driving `shell`
    pub fn attach(&mut self, shell: Arc<ShellChannel>, options: AttachOptions) -> AppResult<()> {
        if self.state == DriverState::Closed {
            return Err(AppError::Exec("Shell driver already closed".to_string()));
        }
        self.stream.reset(&options);
        self.shell = Some(shell);
        self.state = DriverState::Starting;

        if let Some(dir) = &options.working_dir {
            self.send(format!("cd {}; {}\n", quote(dir), ERASE_HISTORY).as_bytes());
        }
        self.send(format!("clear; {}\n", ERASE_HISTORY).as_bytes());
        if let Some(command) = &options.deferred_command {
            self.send(format!("{}; sleep 0.1; {}\n", command, ERASE_HISTORY).as_bytes());
        }
        Ok(())
    }

    /// Drain pending shell events. Returns the close reason exactly once.
    pub fn poll(&mut self) -> Option<CloseReason> {
        while self.state != DriverState::Closed {
            let Some(event) = self.shell.as_ref().and_then(|s| s.try_next_event()) else {
                break;
            };
            match event {
                ShellEvent::Data(bytes) => self.feed(&bytes),
                ShellEvent::Closed(reason) => self.finish(CloseReason::ChannelClosed(reason)),
            }
        }

        if self.state == DriverState::Closed && !self.close_reported {
            self.close_reported = true;
            return self.close_reason.clone();
        }
        None
    }

    /// Process one chunk of shell output
    pub fn feed(&mut self, chunk: &[u8]) {
        match self.state {
            DriverState::Idle | DriverState::Closed => return,
            DriverState::Starting => self.state = DriverState::Live,
            DriverState::Live => {}
        }

        self.stream.raw.extend_from_slice(chunk);
        let text = self.stream.decode(chunk);
        let ingest = self.ingest(&text);
        self.stream.trim_to(self.scrollback_bytes);

        if ingest.cleared {
            self.renderer.clear_screen();
        }
        self.renderer.render(&self.stream.decorated);

        if ingest.closed {
            self.finish(CloseReason::CommandFinished);
        }
    }

    fn ingest(&mut self, text: &str) -> Ingest {
        let mut result = Ingest::default();
        let decorated = &mut self.stream.decorated;
        let mut scanned = decorated.len();
        decorated.push_str(text);

        loop {
            let clear = find_from(decorated, scanned, CLEAR_SENTINEL);
            let close = find_from(decorated, scanned, CLOSE_SENTINEL);
            match (clear, close) {
                (Some(at), close) if close.map_or(true, |c| at < c) => {
                    decorated.drain(..at + CLEAR_SENTINEL.len());
                    scanned = 0;
                    result.cleared = true;
                }
                (_, Some(at)) => {
                    decorated.truncate(at);
                    result.closed = true;
                    break;
                }
                _ => break,
            }
        }
        result
    }

    fn finish(&mut self, reason: CloseReason) {
        if self.state == DriverState::Closed {
            return;
        }
        tracing::debug!("Shell driver closed: {:?}", reason);
        self.state = DriverState::Closed;
        self.renderer.closed(&reason);
        self.close_reason = Some(reason);
    }

    fn send(&self, bytes: &[u8]) {
        if let Some(shell) = &self.shell {
            if let Err(e) = shell.write(bytes) {
                tracing::warn!("Shell write dropped: {}", e);
            }
        }
    }

    fn writable(&self) -> bool {
        matches!(self.state, DriverState::Starting | DriverState::Live)
    }

    /// Type `text`; with Control pending the first character is sent as a
    /// control byte and the flag is cleared
    pub fn insert_text(&mut self, text: &str) {
        if !self.writable() || text.is_empty() {
            return;
        }
        if !std::mem::take(&mut self.stream.control_pending) {
            self.send(text.as_bytes());
            return;
        }

        let mut chars = text.chars();
        let mut bytes = Vec::with_capacity(text.len());
        if let Some(first) = chars.next() {
            match control_byte(first) {
                Some(byte) => bytes.push(byte),
                None => bytes.extend_from_slice(first.encode_utf8(&mut [0; 4]).as_bytes()),
            }
        }
        bytes.extend_from_slice(chars.as_str().as_bytes());
        self.send(&bytes);
    }

    pub fn delete_backward(&mut self) {
        if self.writable() {
            self.send(&[BACKSPACE]);
        }
    }

    pub fn arrow(&mut self, arrow: Arrow) {
        if self.writable() {
            self.send(arrow.sequence());
        }
    }

    pub fn set_control_pending(&mut self, pending: bool) {
        self.stream.control_pending = pending;
    }

    pub fn control_pending(&self) -> bool {
        self.stream.control_pending
    }

    pub fn resize(&mut self, cols: u32, rows: u32) {
        if let Some(shell) = &self.shell {
            if let Err(e) = shell.resize(cols, rows) {
                tracing::warn!("Shell resize dropped: {}", e);
            }
        }
    }

    /// Close the channel from this side
    pub fn close(&mut self) {
        if let Some(shell) = &self.shell {
            shell.close();
        }
        self.finish(CloseReason::ChannelClosed("Closed by client".to_string()));
    }
}
