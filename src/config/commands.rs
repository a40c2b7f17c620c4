use super::{export_openssh_config, parse_openssh_config, AppSettings, AuthMethod, ConnectionProfile};
use crate::error::{AppError, AppResult};
use crate::state::AppState;
use std::collections::HashSet;

pub async fn list_profiles(state: &AppState) -> AppResult<Vec<ConnectionProfile>> {
    Ok(state.profiles.read().list())
}

/// Look a profile up by id or display name
pub async fn get_profile(state: &AppState, id: String) -> AppResult<ConnectionProfile> {
    state
        .profiles
        .read()
        .find(&id)
        .ok_or(AppError::ProfileNotFound(id))
}

pub async fn save_profile(state: &AppState, profile: ConnectionProfile, is_new: bool) -> AppResult<()> {
    tracing::info!("Saving profile {} ({})", profile.display_name(), profile.identity());
    let mut profiles = state.profiles.write();
    if is_new {
        profiles.add(profile)
    } else {
        profiles.update(profile)
    }
}

/// Delete a profile and the password stored for it
pub async fn delete_profile(state: &AppState, id: String) -> AppResult<()> {
    let removed = state.profiles.write().delete(&id)?;
    if let AuthMethod::Password { password_key } = &removed.auth {
        if let Err(e) = state.secrets.delete(password_key) {
            tracing::warn!("Could not remove stored password for {}: {}", removed.display_name(), e);
        }
    }
    Ok(())
}

/// Add the hosts of an OpenSSH config, skipping identities already saved
pub async fn import_ssh_config(state: &AppState, content: String) -> AppResult<Vec<ConnectionProfile>> {
    let mut manager = state.profiles.write();
    let mut known: HashSet<_> = manager.list().iter().map(|p| p.identity()).collect();

    let mut imported = Vec::new();
    for profile in parse_openssh_config(&content) {
        if known.insert(profile.identity()) {
            manager.add(profile.clone())?;
            imported.push(profile);
        }
    }

    tracing::info!("Imported {} profiles from ssh config", imported.len());
    Ok(imported)
}

pub async fn export_ssh_config(state: &AppState) -> AppResult<String> {
    Ok(export_openssh_config(&state.profiles.read().list()))
}

pub async fn get_settings(state: &AppState) -> AppResult<AppSettings> {
    Ok(state.settings.read().clone())
}

pub async fn save_settings(state: &AppState, settings: AppSettings) -> AppResult<()> {
    if settings.transfer.chunk_size == 0 {
        return Err(AppError::InvalidConfig("transfer.chunk_size must be positive".to_string()));
    }
    settings.save(&state.config_dir)?;
    *state.settings.write() = settings;
    Ok(())
}
