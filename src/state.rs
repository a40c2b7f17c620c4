use crate::config::{known_hosts_path, AppSettings, ProfileManager};
use crate::error::{AppError, AppResult};
use crate::keychain::{resolve_credential, KeychainStore, SecretStore};
use crate::sftp::RemoteFs;
use crate::ssh::client::sanitize_error_message;
use crate::ssh::{Role, SessionInfo, SessionRegistry, TransportSession};
use parking_lot::RwLock;
use std::path::PathBuf;
use std::sync::Arc;

/// Global application state
pub struct AppState {
    pub config_dir: PathBuf,
    pub registry: Arc<SessionRegistry>,
    pub profiles: Arc<RwLock<ProfileManager>>,
    pub settings: Arc<RwLock<AppSettings>>,
    pub secrets: Arc<dyn SecretStore>,
}

impl AppState {
    pub fn new(config_dir: PathBuf) -> AppResult<Self> {
        let secrets = Arc::new(KeychainStore::new(&config_dir));
        Self::with_secret_store(config_dir, secrets)
    }

    pub fn with_secret_store(config_dir: PathBuf, secrets: Arc<dyn SecretStore>) -> AppResult<Self> {
        std::fs::create_dir_all(&config_dir)?;

        let settings = AppSettings::load(&config_dir)?;
        let profiles = ProfileManager::load(&config_dir)?;

        Ok(Self {
            config_dir,
            registry: Arc::new(SessionRegistry::new()),
            profiles: Arc::new(RwLock::new(profiles)),
            settings: Arc::new(RwLock::new(settings)),
            secrets,
        })
    }

    /// Connect a saved profile and install the session for `role`
    pub async fn connect_profile(&self, id_or_name: &str, role: Role) -> AppResult<SessionInfo> {
        let profile = self
            .profiles
            .read()
            .find(id_or_name)
            .ok_or_else(|| AppError::ProfileNotFound(id_or_name.to_string()))?;
        let settings = self.settings.read().clone();
        let secrets = Arc::clone(&self.secrets);
        let registry = Arc::clone(&self.registry);
        let known_hosts = known_hosts_path(&self.config_dir);

        tracing::info!("Connecting {} as {} session", profile.display_name(), role);
        blocking(move || {
            let credential = resolve_credential(secrets.as_ref(), &profile.auth)?;
            let session = TransportSession::connect(&profile, &credential, &settings, &known_hosts)
                .map_err(|e| {
                    tracing::error!("Connection to {} failed: {}", profile.identity(), sanitize_error_message(&e.to_string()));
                    e
                })?;
            registry.set_active(role, Arc::clone(&session));
            Ok(session.info())
        })
        .await
    }

    pub fn files_session(&self) -> AppResult<Arc<TransportSession>> {
        self.registry.require(Role::Files)
    }

    pub fn shell_session(&self) -> AppResult<Arc<TransportSession>> {
        self.registry.require(Role::Shell)
    }

    pub fn files(&self) -> AppResult<RemoteFs> {
        Ok(RemoteFs::new(self.files_session()?))
    }

    #[cfg(test)]
    pub fn for_tests(dir: &std::path::Path) -> Self {
        Self::with_secret_store(dir.to_path_buf(), Arc::new(crate::keychain::MemoryStore::new()))
            .expect("test state")
    }

    /// Install a session over `transport` for `role`
    #[cfg(test)]
    pub fn install_transport(
        &self,
        role: Role,
        transport: Arc<dyn crate::ssh::Transport>,
    ) -> Arc<TransportSession> {
        let profile = crate::config::ConnectionProfile::new("test".into(), "test.local".into(), "pi".into());
        let session = TransportSession::from_transport(profile, self.settings.read().clone(), transport);
        self.registry.set_active(role, Arc::clone(&session));
        session
    }
}

/// Run blocking SSH work off the async caller's thread
pub async fn blocking<T, F>(f: F) -> AppResult<T>
where
    F: FnOnce() -> AppResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConnectionProfile;

    #[test]
    fn test_state_creates_config_files() {
        let dir = tempfile::tempdir().unwrap();
        let state = AppState::for_tests(&dir.path().join("nested"));
        assert!(state.config_dir.join("config.toml").exists());
        assert!(state.registry.list().is_empty());
    }

    #[tokio::test]
    async fn test_connect_unknown_profile() {
        let dir = tempfile::tempdir().unwrap();
        let state = AppState::for_tests(dir.path());
        assert!(matches!(
            state.connect_profile("nowhere", Role::Files).await,
            Err(AppError::ProfileNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_connect_with_missing_password_fails_before_network() {
        let dir = tempfile::tempdir().unwrap();
        let state = AppState::for_tests(dir.path());
        let mut profile = ConnectionProfile::new("pi".into(), "192.0.2.1".into(), "pi".into());
        profile.auth = crate::config::AuthMethod::Password {
            password_key: "password:pi".into(),
        };
        state.profiles.write().add(profile).unwrap();

        assert!(matches!(
            state.connect_profile("pi", Role::Shell).await,
            Err(AppError::Auth(_))
        ));
        assert!(state.registry.current(Role::Shell).is_none());
    }
}
