//! Session ownership per WebSocket connection.
//!
//! A session id belongs to the connection that created it. Only that
//! connection sees the session's events and may act on it; its sessions
//! are destroyed when it disconnects.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use rustc_hash::FxHashMap;
use sprout_core::{ExecutionSession, SessionConfig, SessionId, SessionRegistry};
use uuid::Uuid;

use crate::error::{ServerError, ServerResult};

/// Identifies one WebSocket connection.
pub type ConnectionId = Uuid;

/// Owner table for the sessions of a registry.
///
/// Every change to the registry made on behalf of a connection goes through
/// this table, under its lock, so "who owns this id" and "does this id
/// exist" can never disagree.
#[derive(Debug, Default)]
pub struct SessionOwners {
    owners: Mutex<FxHashMap<SessionId, ConnectionId>>,
}

impl SessionOwners {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a session owned by `conn`, or return the one it already owns.
    ///
    /// Fails with [`ServerError::SessionInUse`] when the id is live and
    /// belongs to someone else.
    pub fn create(
        &self,
        registry: &SessionRegistry,
        conn: ConnectionId,
        id: SessionId,
        config: SessionConfig,
    ) -> ServerResult<Arc<ExecutionSession>> {
        let mut owners = self.lock();
        let in_use = match owners.get(&id) {
            Some(owner) => *owner != conn,
            None => registry.get(&id).is_some(),
        };
        if in_use {
            return Err(ServerError::SessionInUse(id));
        }

        owners.insert(id.clone(), conn);
        Ok(registry.create(id, config))
    }

    /// Look up a session owned by `conn`. Sessions of other connections
    /// are reported as not found.
    pub fn session(
        &self,
        registry: &SessionRegistry,
        conn: ConnectionId,
        id: &SessionId,
    ) -> ServerResult<Arc<ExecutionSession>> {
        if !self.owns(conn, id) {
            return Err(sprout_core::Error::SessionNotFound(id.clone()).into());
        }
        Ok(registry.require(id)?)
    }

    pub fn owns(&self, conn: ConnectionId, id: &SessionId) -> bool {
        self.lock().get(id) == Some(&conn)
    }

    /// Ids owned by `conn`, sorted.
    pub fn owned_by(&self, conn: ConnectionId) -> Vec<SessionId> {
        let mut ids: Vec<_> = self
            .lock()
            .iter()
            .filter(|(_, owner)| **owner == conn)
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Destroy a session owned by `conn`.
    pub fn destroy(
        &self,
        registry: &SessionRegistry,
        conn: ConnectionId,
        id: &SessionId,
    ) -> ServerResult<()> {
        let mut owners = self.lock();
        if owners.get(id) != Some(&conn) {
            return Err(sprout_core::Error::SessionNotFound(id.clone()).into());
        }
        registry.destroy(id);
        owners.remove(id);
        Ok(())
    }

    /// Destroy every session owned by `conn`. Returns how many there were.
    pub fn release(&self, registry: &SessionRegistry, conn: ConnectionId) -> usize {
        let mut owners = self.lock();
        let ids: Vec<_> = owners
            .iter()
            .filter(|(_, owner)| **owner == conn)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &ids {
            registry.destroy(id);
            owners.remove(id);
        }
        ids.len()
    }

    fn lock(&self) -> MutexGuard<'_, FxHashMap<SessionId, ConnectionId>> {
        self.owners.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use sprout_core::{PythonLoader, RunnerConfig};

    fn registry() -> SessionRegistry {
        let mut config = RunnerConfig::default();
        config.preload.enabled = false;
        SessionRegistry::with_loader(config, PythonLoader::default())
    }

    #[test]
    fn test_create_is_exclusive() {
        let registry = registry();
        let owners = SessionOwners::new();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let id = SessionId::from("w");

        let first = owners
            .create(&registry, a, id.clone(), SessionConfig::default())
            .unwrap();
        let again = owners
            .create(&registry, a, id.clone(), SessionConfig::default())
            .unwrap();
        assert!(Arc::ptr_eq(&first, &again));

        assert!(matches!(
            owners.create(&registry, b, id.clone(), SessionConfig::default()),
            Err(ServerError::SessionInUse(_))
        ));
        assert!(owners.owns(a, &id));
        assert!(!owners.owns(b, &id));
        assert!(owners.session(&registry, b, &id).is_err());
    }

    #[test]
    fn test_concurrent_create_has_one_owner() {
        let registry = registry();
        let owners = SessionOwners::new();
        let id = SessionId::from("w");

        let created = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    scope.spawn(|| {
                        owners
                            .create(&registry, Uuid::new_v4(), id.clone(), SessionConfig::default())
                            .is_ok()
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().unwrap())
                .filter(|ok| *ok)
                .count()
        });

        assert_eq!(created, 1);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_destroy_requires_ownership() {
        let registry = registry();
        let owners = SessionOwners::new();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let id = SessionId::from("w");
        owners
            .create(&registry, a, id.clone(), SessionConfig::default())
            .unwrap();

        assert!(owners.destroy(&registry, b, &id).is_err());
        assert!(registry.get(&id).is_some());

        owners.destroy(&registry, a, &id).unwrap();
        assert!(registry.get(&id).is_none());
        assert!(owners.owned_by(a).is_empty());
        owners
            .create(&registry, b, id, SessionConfig::default())
            .unwrap();
    }

    #[test]
    fn test_release_destroys_only_own_sessions() {
        let registry = registry();
        let owners = SessionOwners::new();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        for id in ["x", "y"] {
            owners
                .create(&registry, a, SessionId::from(id), SessionConfig::default())
                .unwrap();
        }
        owners
            .create(&registry, b, SessionId::from("z"), SessionConfig::default())
            .unwrap();

        assert_eq!(owners.release(&registry, a), 2);
        assert_eq!(registry.ids(), vec![SessionId::from("z")]);
        assert_eq!(owners.owned_by(b), vec![SessionId::from("z")]);
    }
}
