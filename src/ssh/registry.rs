use super::session::{SessionInfo, TransportSession};
use super::Role;
use crate::error::{AppError, AppResult};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveSession {
    pub role: Role,
    pub info: SessionInfo,
}

/// Role-keyed session slots. A role holds at most one live session.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<Role, Arc<TransportSession>>,
    swap_lock: Mutex<()>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `session` for `role`, releasing the previous one first
    pub fn set_active(&self, role: Role, session: Arc<TransportSession>) {
        let _swap = self.swap_lock.lock();

        if let Some((_, previous)) = self.sessions.remove(&role) {
            let shared = Arc::ptr_eq(&previous, &session)
                || self.sessions.iter().any(|other| Arc::ptr_eq(other.value(), &previous));
            if !shared {
                tracing::info!("Replacing {} session {}", role, previous.id);
                previous.disconnect();
            }
        }

        tracing::debug!("Active {} session is now {}", role, session.id);
        self.sessions.insert(role, session);
    }

    pub fn current(&self, role: Role) -> Option<Arc<TransportSession>> {
        self.sessions.get(&role).map(|entry| Arc::clone(entry.value()))
    }

    /// The connected session for `role`
    pub fn require(&self, role: Role) -> AppResult<Arc<TransportSession>> {
        self.current(role)
            .filter(|session| session.is_connected())
            .ok_or(AppError::NoActiveSession(role))
    }

    /// Drop and disconnect the session for `role`
    pub fn evict(&self, role: Role) -> Option<Arc<TransportSession>> {
        let _swap = self.swap_lock.lock();
        let (_, session) = self.sessions.remove(&role)?;
        if !self.sessions.iter().any(|other| Arc::ptr_eq(other.value(), &session)) {
            session.disconnect();
        }
        Some(session)
    }

    pub fn disconnect_all(&self) {
        let _swap = self.swap_lock.lock();
        let roles: Vec<Role> = self.sessions.iter().map(|entry| *entry.key()).collect();
        for role in roles {
            if let Some((_, session)) = self.sessions.remove(&role) {
                session.disconnect();
            }
        }
    }

    pub fn list(&self) -> Vec<ActiveSession> {
        let mut active: Vec<ActiveSession> = self
            .sessions
            .iter()
            .map(|entry| ActiveSession {
                role: *entry.key(),
                info: entry.value().info(),
            })
            .collect();
        active.sort_by_key(|a| a.role.to_string());
        active
    }
}
