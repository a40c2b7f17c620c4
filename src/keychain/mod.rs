pub mod commands;

use crate::config::AuthMethod;
use crate::error::{AppError, AppResult};
use dashmap::DashMap;
use keyring::Entry;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

const SERVICE_NAME: &str = "sshdeck";
const KEYRING_PROBE: &str = "__sshdeck_keyring_test__";

/// Where secrets live. Keys are namespaced strings like `password:<id>`.
pub trait SecretStore: Send + Sync {
    fn get(&self, key: &str) -> AppResult<Option<String>>;
    fn store(&self, key: &str, secret: &str) -> AppResult<()>;
    fn delete(&self, key: &str) -> AppResult<()>;

    fn has(&self, key: &str) -> AppResult<bool> {
        Ok(self.get(key)?.is_some())
    }
}

/// OS keychain with an AES-256-GCM encrypted file as fallback
///
/// The fallback key sits next to the encrypted file, so it only protects
/// against casual reads of the config directory.
pub struct KeychainStore {
    config_dir: PathBuf,
    fallback_lock: Mutex<()>,
}

impl KeychainStore {
    pub fn new(config_dir: &Path) -> Self {
        Self {
            config_dir: config_dir.to_path_buf(),
            fallback_lock: Mutex::new(()),
        }
    }

    fn fallback_path(&self) -> PathBuf {
        self.config_dir.join(".secrets.enc")
    }

    fn key_path(&self) -> PathBuf {
        self.config_dir.join(".keyfile")
    }

    fn get_or_create_fallback_key(&self) -> AppResult<[u8; 32]> {
        use rand::RngCore;

        let key_path = self.key_path();
        if let Ok(key_data) = fs::read(&key_path) {
            if key_data.len() == 32 {
                let mut key = [0u8; 32];
                key.copy_from_slice(&key_data);
                return Ok(key);
            }
        }

        let mut key = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut key);
        fs::create_dir_all(&self.config_dir)?;
        fs::write(&key_path, key)
            .map_err(|e| AppError::Keychain(format!("Failed to write key file: {}", e)))?;
        restrict_permissions(&key_path);

        Ok(key)
    }

    fn load_fallback(&self) -> AppResult<HashMap<String, String>> {
        use aes_gcm::{
            aead::{Aead, KeyInit},
            Aes256Gcm, Nonce,
        };

        let encrypted = match fs::read(self.fallback_path()) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(HashMap::new()),
            Err(e) => return Err(AppError::Keychain(format!("Failed to read secrets file: {}", e))),
        };
        if encrypted.len() < 12 {
            return Ok(HashMap::new());
        }

        let key = self.get_or_create_fallback_key()?;
        let cipher = Aes256Gcm::new_from_slice(&key)
            .map_err(|e| AppError::Keychain(format!("Failed to create cipher: {}", e)))?;

        let (nonce, ciphertext) = encrypted.split_at(12);
        let plaintext = cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|e| AppError::Keychain(format!("Failed to decrypt secrets: {}", e)))?;

        serde_json::from_slice(&plaintext)
            .map_err(|e| AppError::Keychain(format!("Failed to parse secrets: {}", e)))
    }

    fn save_fallback(&self, store: &HashMap<String, String>) -> AppResult<()> {
        use aes_gcm::{
            aead::{Aead, KeyInit},
            Aes256Gcm, Nonce,
        };
        use rand::RngCore;

        let key = self.get_or_create_fallback_key()?;
        let json = serde_json::to_vec(store)?;
        let cipher = Aes256Gcm::new_from_slice(&key)
            .map_err(|e| AppError::Keychain(format!("Failed to create cipher: {}", e)))?;

        let mut nonce_bytes = [0u8; 12];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), json.as_slice())
            .map_err(|e| AppError::Keychain(format!("Failed to encrypt secrets: {}", e)))?;

        // Nonce first, then ciphertext
        let mut output = nonce_bytes.to_vec();
        output.extend(ciphertext);

        let path = self.fallback_path();
        fs::write(&path, &output)
            .map_err(|e| AppError::Keychain(format!("Failed to write secrets file: {}", e)))?;
        restrict_permissions(&path);

        Ok(())
    }

    fn store_fallback(&self, key: &str, secret: &str) -> AppResult<()> {
        let _guard = self.fallback_lock.lock();
        let mut store = self.load_fallback()?;
        store.insert(key.to_string(), secret.to_string());
        self.save_fallback(&store)?;
        tracing::warn!("Stored secret in fallback file storage: {}", secret_kind(key));
        Ok(())
    }
}

impl SecretStore for KeychainStore {
    fn get(&self, key: &str) -> AppResult<Option<String>> {
        match Entry::new(SERVICE_NAME, key).and_then(|entry| entry.get_password()) {
            Ok(password) => return Ok(Some(password)),
            Err(keyring::Error::NoEntry) => {}
            Err(e) => tracing::debug!("OS keychain get failed, trying fallback: {}", e),
        }

        let _guard = self.fallback_lock.lock();
        Ok(self.load_fallback()?.get(key).cloned())
    }

    fn store(&self, key: &str, secret: &str) -> AppResult<()> {
        match Entry::new(SERVICE_NAME, key).and_then(|entry| entry.set_password(secret)) {
            Ok(()) => {
                tracing::debug!("Stored secret in OS keychain: {}", secret_kind(key));
                Ok(())
            }
            Err(e) => {
                tracing::warn!("OS keychain unavailable, using fallback: {}", e);
                self.store_fallback(key, secret)
            }
        }
    }

    fn delete(&self, key: &str) -> AppResult<()> {
        if let Ok(entry) = Entry::new(SERVICE_NAME, key) {
            match entry.delete_password() {
                Ok(()) | Err(keyring::Error::NoEntry) => {}
                Err(e) => tracing::debug!("OS keychain delete failed: {}", e),
            }
        }

        let _guard = self.fallback_lock.lock();
        let mut store = self.load_fallback()?;
        if store.remove(key).is_some() {
            self.save_fallback(&store)?;
        }
        Ok(())
    }
}

/// Process-local store for tests and one-off CLI runs
#[derive(Default)]
pub struct MemoryStore {
    secrets: DashMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SecretStore for MemoryStore {
    fn get(&self, key: &str) -> AppResult<Option<String>> {
        Ok(self.secrets.get(key).map(|s| s.value().clone()))
    }

    fn store(&self, key: &str, secret: &str) -> AppResult<()> {
        self.secrets.insert(key.to_string(), secret.to_string());
        Ok(())
    }

    fn delete(&self, key: &str) -> AppResult<()> {
        self.secrets.remove(key);
        Ok(())
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    let _ = fs::set_permissions(path, fs::Permissions::from_mode(0o600));
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) {}

/// Prefix of a key, safe to log
fn secret_kind(key: &str) -> &str {
    key.split(':').next().unwrap_or("unknown")
}

/// Secret material ready for authentication
#[derive(Clone)]
pub enum Credential {
    Password(String),
    Key {
        private_key: String,
        passphrase: Option<String>,
    },
    Agent,
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Credential::Password(_) => f.write_str("Credential::Password([REDACTED])"),
            Credential::Key { passphrase, .. } => f
                .debug_struct("Credential::Key")
                .field("private_key", &"[REDACTED]")
                .field("has_passphrase", &passphrase.is_some())
                .finish(),
            Credential::Agent => f.write_str("Credential::Agent"),
        }
    }
}

fn with_prefix(prefix: &str, key: &str) -> String {
    if key.starts_with(prefix) {
        key.to_string()
    } else {
        format!("{}{}", prefix, key)
    }
}

/// Turn a profile's secret references into a usable credential
///
/// `imported:<path>` key ids (from OpenSSH config import) are read from disk,
/// with a leading `~/` expanded to the home directory.
pub fn resolve_credential(store: &dyn SecretStore, auth: &AuthMethod) -> AppResult<Credential> {
    match auth {
        AuthMethod::Agent => Ok(Credential::Agent),
        AuthMethod::Password { password_key } => {
            let key = with_prefix("password:", password_key);
            store
                .get(&key)?
                .map(Credential::Password)
                .ok_or_else(|| AppError::Auth("No password stored for this profile".to_string()))
        }
        AuthMethod::Key { key_id } => {
            let id = key_id.strip_prefix("key:").unwrap_or(key_id);
            let private_key = match id.strip_prefix("imported:") {
                Some(path) => read_key_file(path)?,
                None => store
                    .get(&format!("key:{}", id))?
                    .ok_or_else(|| AppError::Auth(format!("Private key '{}' not found", id)))?,
            };
            let passphrase = store.get(&format!("passphrase:{}", id))?;
            Ok(Credential::Key {
                private_key,
                passphrase,
            })
        }
    }
}

fn read_key_file(path: &str) -> AppResult<String> {
    let expanded = match path.strip_prefix("~/") {
        Some(rest) => dirs::home_dir()
            .ok_or_else(|| AppError::Config("Could not find home directory".to_string()))?
            .join(rest),
        None => PathBuf::from(path),
    };
    fs::read_to_string(&expanded)
        .map_err(|e| AppError::Auth(format!("Cannot read key file {}: {}", expanded.display(), e)))
}

/// Check keyring availability and return status info
pub fn get_keyring_status() -> KeyringStatus {
    let probe = Entry::new(SERVICE_NAME, KEYRING_PROBE).and_then(|entry| {
        entry.set_password("test")?;
        let _ = entry.delete_password();
        Ok(())
    });

    match probe {
        Ok(()) => KeyringStatus {
            available: true,
            backend: detect_backend().to_string(),
            using_fallback: false,
            warning: None,
        },
        Err(e) => KeyringStatus {
            available: false,
            backend: "none".to_string(),
            using_fallback: true,
            warning: Some(format!(
                "OS keyring unavailable ({}). Secrets are stored in an encrypted file in the config directory.",
                e
            )),
        },
    }
}

fn detect_backend() -> &'static str {
    if cfg!(target_os = "macos") || cfg!(target_os = "ios") {
        "Apple Keychain"
    } else if cfg!(target_os = "windows") {
        "Windows Credential Manager"
    } else if cfg!(target_os = "linux") {
        "Secret Service (D-Bus)"
    } else {
        "Unknown"
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct KeyringStatus {
    pub available: bool,
    pub backend: String,
    pub using_fallback: bool,
    pub warning: Option<String>,
}
