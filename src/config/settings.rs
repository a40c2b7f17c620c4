use crate::error::AppResult;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Application settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppSettings {
    #[serde(default)]
    pub ssh: SshSettings,
    #[serde(default)]
    pub terminal: TerminalSettings,
    #[serde(default)]
    pub transfer: TransferSettings,
}

/// What to do with a host key that is missing from, or differs from, known_hosts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum KnownHostsPolicy {
    /// Unknown and changed keys are both rejected
    Strict,
    /// Unknown keys are recorded, changed keys are rejected
    AcceptNew,
    /// Anything goes
    Accept,
}

impl Default for KnownHostsPolicy {
    fn default() -> Self {
        KnownHostsPolicy::AcceptNew
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SshSettings {
    #[serde(default = "default_port")]
    pub default_port: u16,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_io_timeout")]
    pub io_timeout_secs: u64,
    #[serde(default = "default_keepalive")]
    pub keepalive_interval: u32,
    #[serde(default)]
    pub known_hosts_policy: KnownHostsPolicy,
    #[serde(default = "default_exec_timeout")]
    pub exec_timeout_secs: u64,
}

fn default_port() -> u16 {
    22
}

fn default_connect_timeout() -> u64 {
    30
}

fn default_io_timeout() -> u64 {
    30
}

fn default_keepalive() -> u32 {
    60
}

fn default_exec_timeout() -> u64 {
    120
}

impl Default for SshSettings {
    fn default() -> Self {
        Self {
            default_port: default_port(),
            connect_timeout_secs: default_connect_timeout(),
            io_timeout_secs: default_io_timeout(),
            keepalive_interval: default_keepalive(),
            known_hosts_policy: KnownHostsPolicy::default(),
            exec_timeout_secs: default_exec_timeout(),
        }
    }
}

impl SshSettings {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_secs(self.io_timeout_secs)
    }

    pub fn exec_timeout(&self) -> Duration {
        Duration::from_secs(self.exec_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerminalSettings {
    #[serde(default = "default_term")]
    pub term: String,
    #[serde(default = "default_cols")]
    pub cols: u32,
    #[serde(default = "default_rows")]
    pub rows: u32,
    /// Upper bound for the raw and decorated shell buffers
    #[serde(default = "default_scrollback_bytes")]
    pub scrollback_bytes: usize,
    /// Send the alias/history setup lines to every new shell
    #[serde(default = "default_true")]
    pub startup_script: bool,
}

fn default_term() -> String {
    "xterm-256color".to_string()
}

fn default_cols() -> u32 {
    80
}

fn default_rows() -> u32 {
    24
}

fn default_scrollback_bytes() -> usize {
    1024 * 1024
}

fn default_true() -> bool {
    true
}

impl Default for TerminalSettings {
    fn default() -> Self {
        Self {
            term: default_term(),
            cols: default_cols(),
            rows: default_rows(),
            scrollback_bytes: default_scrollback_bytes(),
            startup_script: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferSettings {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
}

fn default_chunk_size() -> usize {
    32 * 1024
}

impl Default for TransferSettings {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
        }
    }
}

impl AppSettings {
    pub fn load(config_dir: &Path) -> AppResult<Self> {
        let config_path = config_dir.join("config.toml");
        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            let settings: AppSettings = toml::from_str(&content)?;
            Ok(settings)
        } else {
            let settings = AppSettings::default();
            settings.save(config_dir)?;
            Ok(settings)
        }
    }

    pub fn save(&self, config_dir: &Path) -> AppResult<()> {
        std::fs::create_dir_all(config_dir)?;
        let config_path = config_dir.join("config.toml");
        let content = toml::to_string_pretty(self)?;
        std::fs::write(config_path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_creates_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = AppSettings::load(dir.path()).unwrap();
        assert!(dir.path().join("config.toml").exists());
        assert_eq!(settings.ssh.default_port, 22);
        assert_eq!(settings.transfer.chunk_size, 32 * 1024);
        assert_eq!(settings.ssh.known_hosts_policy, KnownHostsPolicy::AcceptNew);
        assert!(settings.terminal.startup_script);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("config.toml"),
            "[ssh]\nknown_hosts_policy = \"strict\"\nexec_timeout_secs = 5\n\n[terminal]\nstartup_script = false\n",
        )
        .unwrap();

        let settings = AppSettings::load(dir.path()).unwrap();
        assert_eq!(settings.ssh.known_hosts_policy, KnownHostsPolicy::Strict);
        assert_eq!(settings.ssh.exec_timeout(), Duration::from_secs(5));
        assert_eq!(settings.ssh.connect_timeout_secs, 30);
        assert!(!settings.terminal.startup_script);
        assert_eq!(settings.terminal.term, "xterm-256color");
    }

    #[test]
    fn test_invalid_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("config.toml"), "[ssh\nbroken").unwrap();
        assert!(matches!(
            AppSettings::load(dir.path()),
            Err(crate::error::AppError::Config(_))
        ));
    }
}
