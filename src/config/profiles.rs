use crate::error::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Authentication method
///
/// The string fields are references into the credential store, never the
/// secrets themselves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AuthMethod {
    #[serde(rename = "password")]
    Password {
        #[serde(default)]
        password_key: String,
    },
    #[serde(rename = "key")]
    Key {
        #[serde(default)]
        key_id: String,
    },
    #[serde(rename = "agent")]
    Agent,
}

impl Default for AuthMethod {
    fn default() -> Self {
        AuthMethod::Agent
    }
}

/// Identity of a remote account: two profiles with the same identity reach
/// the same shell.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProfileIdentity {
    pub host: String,
    pub port: u16,
    pub username: String,
}

impl std::fmt::Display for ProfileIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}:{}", self.username, self.host, self.port)
    }
}

/// Connection profile
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionProfile {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub username: String,
    #[serde(default)]
    pub auth: AuthMethod,
    /// Remote shell to exec under the PTY instead of the login shell
    #[serde(default)]
    pub shell_path: Option<String>,
    /// Open the SFTP subsystem on connect
    #[serde(default = "default_true")]
    pub use_sftp: bool,
    #[serde(default)]
    pub created_at: i64,
    #[serde(default)]
    pub updated_at: i64,
}

fn default_port() -> u16 {
    22
}

fn default_true() -> bool {
    true
}

impl ConnectionProfile {
    pub fn new(name: String, host: String, username: String) -> Self {
        let now = chrono::Utc::now().timestamp();
        Self {
            id: Uuid::new_v4().to_string(),
            name,
            host,
            port: 22,
            username,
            auth: AuthMethod::Agent,
            shell_path: None,
            use_sftp: true,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn identity(&self) -> ProfileIdentity {
        ProfileIdentity {
            host: self.host.clone(),
            port: self.port,
            username: self.username.clone(),
        }
    }

    /// Name shown in connection lists; falls back to `user@host`
    pub fn display_name(&self) -> String {
        if self.name.is_empty() {
            format!("{}@{}", self.username, self.host)
        } else {
            self.name.clone()
        }
    }
}

/// Profile file format
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProfilesFile {
    #[serde(default)]
    pub profiles: Vec<ConnectionProfile>,
}

/// Profile manager
pub struct ProfileManager {
    profiles: HashMap<String, ConnectionProfile>,
    config_path: PathBuf,
}

impl ProfileManager {
    pub fn load(config_dir: &Path) -> AppResult<Self> {
        let config_path = config_dir.join("profiles.toml");
        let profiles = if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            let file: ProfilesFile = toml::from_str(&content)?;
            file.profiles
                .into_iter()
                .map(|p| (p.id.clone(), p))
                .collect()
        } else {
            HashMap::new()
        };

        Ok(Self {
            profiles,
            config_path,
        })
    }

    pub fn save(&self) -> AppResult<()> {
        let mut profiles: Vec<_> = self.profiles.values().cloned().collect();
        profiles.sort_by_key(|p| p.created_at);
        let file = ProfilesFile { profiles };
        let content = toml::to_string_pretty(&file)?;
        if let Some(parent) = self.config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.config_path, content)?;
        Ok(())
    }

    pub fn list(&self) -> Vec<ConnectionProfile> {
        let mut profiles: Vec<_> = self.profiles.values().cloned().collect();
        profiles.sort_by(|a, b| a.display_name().to_lowercase().cmp(&b.display_name().to_lowercase()));
        profiles
    }

    pub fn get(&self, id: &str) -> Option<ConnectionProfile> {
        self.profiles.get(id).cloned()
    }

    /// Look a profile up by id, then by display name
    pub fn find(&self, id_or_name: &str) -> Option<ConnectionProfile> {
        self.get(id_or_name).or_else(|| {
            self.profiles
                .values()
                .find(|p| p.display_name() == id_or_name)
                .cloned()
        })
    }

    pub fn add(&mut self, profile: ConnectionProfile) -> AppResult<()> {
        if profile.host.is_empty() || profile.username.is_empty() {
            return Err(AppError::InvalidConfig("Host and username are required".to_string()));
        }
        self.profiles.insert(profile.id.clone(), profile);
        self.save()
    }

    pub fn update(&mut self, profile: ConnectionProfile) -> AppResult<()> {
        if !self.profiles.contains_key(&profile.id) {
            return Err(AppError::ProfileNotFound(profile.id));
        }
        let mut profile = profile;
        profile.updated_at = chrono::Utc::now().timestamp();
        self.profiles.insert(profile.id.clone(), profile);
        self.save()
    }

    pub fn delete(&mut self, id: &str) -> AppResult<ConnectionProfile> {
        let removed = self
            .profiles
            .remove(id)
            .ok_or_else(|| AppError::ProfileNotFound(id.to_string()))?;
        self.save()?;
        Ok(removed)
    }
}

/// Parse OpenSSH config file
pub fn parse_openssh_config(content: &str) -> Vec<ConnectionProfile> {
    let mut profiles = Vec::new();
    let mut current_profile: Option<ConnectionProfile> = None;

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let parts: Vec<&str> = line.splitn(2, char::is_whitespace).collect();
        if parts.len() != 2 {
            continue;
        }

        let key = parts[0].to_lowercase();
        let value = parts[1].trim();

        match key.as_str() {
            "host" => {
                if let Some(profile) = current_profile.take() {
                    profiles.push(profile);
                }
                current_profile = Some(ConnectionProfile::new(
                    value.to_string(),
                    String::new(),
                    String::new(),
                ));
            }
            "hostname" => {
                if let Some(ref mut profile) = current_profile {
                    profile.host = value.to_string();
                }
            }
            "user" => {
                if let Some(ref mut profile) = current_profile {
                    profile.username = value.to_string();
                }
            }
            "port" => {
                if let Some(ref mut profile) = current_profile {
                    if let Ok(port) = value.parse() {
                        profile.port = port;
                    }
                }
            }
            "identityfile" => {
                if let Some(ref mut profile) = current_profile {
                    profile.auth = AuthMethod::Key {
                        key_id: format!("imported:{}", value),
                    };
                }
            }
            _ => {}
        }
    }

    if let Some(profile) = current_profile {
        profiles.push(profile);
    }

    // Wildcard blocks and blocks without a HostName are not connectable
    profiles
        .into_iter()
        .filter(|p| !p.host.is_empty() && !p.host.contains('*') && !p.host.contains('?'))
        .collect()
}

/// Export profiles to OpenSSH config format
pub fn export_openssh_config(profiles: &[ConnectionProfile]) -> String {
    let mut output = String::new();
    output.push_str("# Generated by sshdeck\n\n");

    for profile in profiles {
        output.push_str(&format!("Host {}\n", profile.display_name().replace(' ', "-")));
        output.push_str(&format!("    HostName {}\n", profile.host));
        output.push_str(&format!("    User {}\n", profile.username));
        if profile.port != 22 {
            output.push_str(&format!("    Port {}\n", profile.port));
        }

        if let AuthMethod::Key { ref key_id } = profile.auth {
            if let Some(path) = key_id.strip_prefix("imported:") {
                output.push_str(&format!("    IdentityFile {}\n", path));
            }
        }

        output.push('\n');
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_and_display_name() {
        let mut profile = ConnectionProfile::new(String::new(), "pi.local".into(), "pi".into());
        profile.port = 2222;
        assert_eq!(profile.display_name(), "pi@pi.local");
        assert_eq!(profile.identity().to_string(), "pi@pi.local:2222");

        profile.name = "Garage Pi".into();
        assert_eq!(profile.display_name(), "Garage Pi");
    }

    #[test]
    fn test_manager_roundtrip_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let mut manager = ProfileManager::load(dir.path()).unwrap();
        let mut profile = ConnectionProfile::new("box".into(), "10.0.0.2".into(), "root".into());
        profile.auth = AuthMethod::Password {
            password_key: format!("password:{}", profile.id),
        };
        profile.use_sftp = false;
        manager.add(profile.clone()).unwrap();

        let reloaded = ProfileManager::load(dir.path()).unwrap();
        let loaded = reloaded.get(&profile.id).unwrap();
        assert_eq!(loaded.host, "10.0.0.2");
        assert_eq!(loaded.auth, profile.auth);
        assert!(!loaded.use_sftp);
        assert_eq!(reloaded.find("box").unwrap().id, profile.id);
    }

    #[test]
    fn test_add_rejects_incomplete_profile() {
        let dir = tempfile::tempdir().unwrap();
        let mut manager = ProfileManager::load(dir.path()).unwrap();
        let profile = ConnectionProfile::new("empty".into(), String::new(), "me".into());
        assert!(matches!(manager.add(profile), Err(AppError::InvalidConfig(_))));
    }

    #[test]
    fn test_delete_unknown_profile() {
        let dir = tempfile::tempdir().unwrap();
        let mut manager = ProfileManager::load(dir.path()).unwrap();
        assert!(matches!(manager.delete("nope"), Err(AppError::ProfileNotFound(_))));
    }

    #[test]
    fn test_parse_openssh_config() {
        let content = "\
# comment
Host *
    ServerAliveInterval 30

Host web
    HostName web.example.com
    User deploy
    Port 2200
    IdentityFile ~/.ssh/deploy_ed25519

Host nohostname
    User ghost
";
        let profiles = parse_openssh_config(content);
        assert_eq!(profiles.len(), 1);
        let web = &profiles[0];
        assert_eq!(web.name, "web");
        assert_eq!(web.host, "web.example.com");
        assert_eq!(web.username, "deploy");
        assert_eq!(web.port, 2200);
        assert_eq!(
            web.auth,
            AuthMethod::Key {
                key_id: "imported:~/.ssh/deploy_ed25519".into()
            }
        );

        let exported = export_openssh_config(&profiles);
        assert!(exported.contains("Host web\n"));
        assert!(exported.contains("    Port 2200\n"));
        assert!(exported.contains("    IdentityFile ~/.ssh/deploy_ed25519\n"));
    }
}
