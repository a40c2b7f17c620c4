//! Async session management

use super::{ActiveSession, Role, SessionInfo};
use crate::error::AppResult;
use crate::state::{blocking, AppState};
use std::sync::Arc;

/// Connect a saved profile (by id or display name) for `role`
pub async fn ssh_connect(state: &AppState, profile: String, role: Role) -> AppResult<SessionInfo> {
    state.connect_profile(&profile, role).await
}

/// Disconnect and forget the session for `role`. Returns whether one existed.
pub async fn ssh_disconnect(state: &AppState, role: Role) -> AppResult<bool> {
    tracing::info!("Disconnecting {} session", role);
    let registry = Arc::clone(&state.registry);
    blocking(move || Ok(registry.evict(role).is_some())).await
}

pub async fn ssh_disconnect_all(state: &AppState) -> AppResult<()> {
    let registry = Arc::clone(&state.registry);
    blocking(move || {
        registry.disconnect_all();
        Ok(())
    })
    .await
}

pub async fn list_sessions(state: &AppState) -> AppResult<Vec<ActiveSession>> {
    Ok(state.registry.list())
}

pub async fn get_session(state: &AppState, role: Role) -> AppResult<Option<SessionInfo>> {
    Ok(state.registry.current(role).map(|session| session.info()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ssh::mock::MockTransport;

    #[tokio::test]
    async fn test_disconnect_evicts_role() {
        let dir = tempfile::tempdir().unwrap();
        let state = AppState::for_tests(dir.path());
        let mock = Arc::new(MockTransport::new());
        state.install_transport(Role::Shell, mock.clone());

        assert_eq!(list_sessions(&state).await.unwrap().len(), 1);
        assert!(get_session(&state, Role::Shell).await.unwrap().is_some());

        assert!(ssh_disconnect(&state, Role::Shell).await.unwrap());
        assert!(!ssh_disconnect(&state, Role::Shell).await.unwrap());
        assert!(mock.journal().contains(&"disconnect".to_string()));
        assert!(get_session(&state, Role::Shell).await.unwrap().is_none());
    }
}
