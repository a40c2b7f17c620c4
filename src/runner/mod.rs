//! One-shot remote commands
//!
//! Command lines are assembled with `CommandLine` so every user-supplied
//! value is quoted for a POSIX shell before it reaches the exec channel.

pub mod commands;
pub mod git;

use crate::error::AppResult;
use crate::logging::{log_session, sanitize, LogLevel, LogSubsystem};
use crate::ssh::{CapturedOutput, TransportSession};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

pub use git::{Branches, GitAction, GitRepo};

/// Single-quote `value` for a POSIX shell
pub fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "'\\''"))
}

fn needs_quoting(value: &str) -> bool {
    value.is_empty()
        || !value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '/' | ':' | '=' | '@' | '+' | ','))
}

/// Builder for a remote shell command line
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandLine {
    line: String,
}

impl CommandLine {
    pub fn new(program: &str) -> Self {
        Self {
            line: program.to_string(),
        }
    }

    fn push(mut self, token: &str) -> Self {
        if !self.line.is_empty() {
            self.line.push(' ');
        }
        self.line.push_str(token);
        self
    }

    /// Plain argument, quoted only when it contains shell syntax
    pub fn arg(self, value: &str) -> Self {
        if needs_quoting(value) {
            let quoted = quote(value);
            self.push(&quoted)
        } else {
            self.push(value)
        }
    }

    /// Filesystem path, always quoted
    pub fn path(self, value: &str) -> Self {
        let quoted = quote(value);
        self.push(&quoted)
    }

    /// Trusted literal, appended as is
    pub fn raw(self, fragment: &str) -> Self {
        self.push(fragment)
    }

    /// Sequence another command after this one
    pub fn then(mut self, next: CommandLine) -> Self {
        self.line.push_str("; ");
        self.line.push_str(&next.line);
        self
    }

    pub fn as_str(&self) -> &str {
        &self.line
    }
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.line)
    }
}

impl From<CommandLine> for String {
    fn from(cmd: CommandLine) -> Self {
        cmd.line
    }
}

/// Runs one-shot commands on a session's exec lane
#[derive(Clone)]
pub struct CommandRunner {
    session: Arc<TransportSession>,
    timeout: Option<Duration>,
}

impl CommandRunner {
    pub fn new(session: Arc<TransportSession>) -> Self {
        Self {
            session,
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn session(&self) -> &Arc<TransportSession> {
        &self.session
    }

    pub fn run_captured(&self, command: &str) -> AppResult<CapturedOutput> {
        let shown = sanitize(command);
        tracing::debug!("exec: {}", shown);
        let output = self.session.execute(command, self.timeout)?;
        log_session(
            LogLevel::Debug,
            LogSubsystem::Ssh,
            self.session.id.clone(),
            format!("exec '{}' exited with {}", shown, output.exit_status),
        );
        Ok(output)
    }

    /// Output of `command`, stderr merged. A non-zero exit is not an error.
    pub fn run(&self, command: &CommandLine) -> AppResult<String> {
        self.run_raw(command.as_str())
    }

    pub fn run_raw(&self, command: &str) -> AppResult<String> {
        Ok(self.run_captured(command)?.stdout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AppSettings, ConnectionProfile};
    use crate::ssh::mock::MockTransport;

    #[test]
    fn test_quote() {
        assert_eq!(quote("plain"), "'plain'");
        assert_eq!(quote("it's"), "'it'\\''s'");
        assert_eq!(quote(""), "''");
    }

    #[test]
    fn test_command_line_builder() {
        let cmd = CommandLine::new("git")
            .raw("-C")
            .path("/srv/my repo")
            .arg("log")
            .arg("feature/x")
            .arg("two words")
            .then(CommandLine::new("echo").arg("$HOME"));

        assert_eq!(
            cmd.as_str(),
            "git -C '/srv/my repo' log feature/x 'two words'; echo '$HOME'"
        );
        assert_eq!(cmd.to_string(), cmd.as_str());
    }

    #[test]
    fn test_runner_returns_output_of_failed_command() {
        let mock = Arc::new(
            MockTransport::new().on_exec("ls '/missing'", "ls: cannot access '/missing'\r\n", 2),
        );
        let profile = ConnectionProfile::new("pi".into(), "pi.local".into(), "pi".into());
        let runner = CommandRunner::new(TransportSession::from_transport(
            profile,
            AppSettings::default(),
            mock.clone(),
        ));

        let out = runner.run(&CommandLine::new("ls").path("/missing")).unwrap();
        assert_eq!(out, "ls: cannot access '/missing'\n");
        assert_eq!(runner.run_captured("ls '/missing'").unwrap().exit_status, 2);
    }
}
