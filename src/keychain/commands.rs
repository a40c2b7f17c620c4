use super::{get_keyring_status, KeyringStatus};
use crate::error::{AppError, AppResult};
use crate::state::AppState;

/// Allowed key prefixes for credential store access
const ALLOWED_KEY_PREFIXES: &[&str] = &[
    "password:",   // SSH passwords by profile ID
    "key:",        // SSH private keys by key ID
    "passphrase:", // Key passphrases
];

/// Only namespaced keys with a plain identifier may be touched from outside
fn validate_keychain_key(key: &str) -> AppResult<()> {
    if key.is_empty() || key.len() > 256 {
        return Err(AppError::Keychain("Invalid key length".to_string()));
    }

    let id = ALLOWED_KEY_PREFIXES
        .iter()
        .find_map(|prefix| key.strip_prefix(prefix))
        .ok_or_else(|| {
            AppError::Keychain(format!(
                "Key must start with one of: {}",
                ALLOWED_KEY_PREFIXES.join(", ")
            ))
        })?;

    if id.is_empty() {
        return Err(AppError::Keychain("Key ID cannot be empty".to_string()));
    }
    if !id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
        return Err(AppError::Keychain("Key ID contains invalid characters".to_string()));
    }

    Ok(())
}

fn key_type(key: &str) -> &str {
    key.split(':').next().unwrap_or("unknown")
}

/// Store a secret; the value itself is never logged
pub async fn store_secret(state: &AppState, key: String, secret: String) -> AppResult<()> {
    validate_keychain_key(&key)?;
    tracing::info!("Storing secret of type: {}", key_type(&key));

    let secrets = state.secrets.clone();
    tokio::task::spawn_blocking(move || secrets.store(&key, &secret)).await?
}

pub async fn get_secret(state: &AppState, key: String) -> AppResult<Option<String>> {
    validate_keychain_key(&key)?;

    let secrets = state.secrets.clone();
    tokio::task::spawn_blocking(move || secrets.get(&key)).await?
}

pub async fn delete_secret(state: &AppState, key: String) -> AppResult<()> {
    validate_keychain_key(&key)?;
    tracing::info!("Deleting secret of type: {}", key_type(&key));

    let secrets = state.secrets.clone();
    tokio::task::spawn_blocking(move || secrets.delete(&key)).await?
}

pub async fn has_secret(state: &AppState, key: String) -> AppResult<bool> {
    validate_keychain_key(&key)?;

    let secrets = state.secrets.clone();
    tokio::task::spawn_blocking(move || secrets.has(&key)).await?
}

pub async fn keyring_status() -> AppResult<KeyringStatus> {
    Ok(tokio::task::spawn_blocking(get_keyring_status).await?)
}
