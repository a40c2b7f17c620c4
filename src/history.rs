//! Remote shell command history
//!
//! The shell startup script links `$HISTFILE` to `.pisth_history` in the
//! login directory and flushes history after every prompt, so the file
//! always reflects the commands typed in the interactive shell.

use crate::error::AppResult;
use crate::runner::{CommandLine, CommandRunner};
use serde::{Deserialize, Serialize};

/// History link created by the startup script, relative to the home directory
pub const HISTORY_LINK: &str = ".pisth_history";

/// Commands from the remote history file, most recent last
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryRecord {
    commands: Vec<String>,
}

impl HistoryRecord {
    /// Split on newlines; the empty line after the final newline is dropped
    pub fn parse(output: &str) -> Self {
        let mut commands: Vec<String> = output.split('\n').map(str::to_string).collect();
        if commands.last().is_some_and(|last| last.is_empty()) {
            commands.pop();
        }
        Self { commands }
    }

    pub fn fetch(runner: &CommandRunner) -> AppResult<Self> {
        let output = runner.run(&CommandLine::new("cat").arg(HISTORY_LINK))?;
        let record = Self::parse(&output);
        tracing::debug!("Fetched {} history entries", record.len());
        Ok(record)
    }

    pub fn commands(&self) -> &[String] {
        &self.commands
    }

    pub fn last(&self) -> Option<&str> {
        self.commands.last().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn into_commands(self) -> Vec<String> {
        self.commands
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AppSettings, ConnectionProfile};
    use crate::ssh::mock::MockTransport;
    use crate::ssh::TransportSession;
    use std::sync::Arc;

    #[test]
    fn test_parse_drops_trailing_empty_line() {
        let record = HistoryRecord::parse("ls -la\ncd /var/log\n");
        assert_eq!(record.commands(), ["ls -la", "cd /var/log"]);
        assert_eq!(record.last(), Some("cd /var/log"));
    }

    #[test]
    fn test_parse_keeps_inner_blank_lines() {
        let record = HistoryRecord::parse("a\n\nb");
        assert_eq!(record.len(), 3);
        assert!(HistoryRecord::parse("").is_empty());
    }

    #[test]
    fn test_fetch_reads_history_link() {
        let mock = Arc::new(MockTransport::new().on_exec("cat .pisth_history", "uptime\r\nsudo reboot\r\n", 0));
        let profile = ConnectionProfile::new("pi".into(), "pi.local".into(), "pi".into());
        let session = TransportSession::from_transport(profile, AppSettings::default(), mock.clone());

        let record = HistoryRecord::fetch(&CommandRunner::new(session)).unwrap();
        assert_eq!(record.into_commands(), vec!["uptime", "sudo reboot"]);
    }
}
