//! Session registry.
//!
//! Tracks the live sessions of one runner (one page). Creating the first
//! session schedules the background runtime preload; destroying a session
//! removes its output route so late chunks are dropped.

use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard};

use rustc_hash::FxHashMap;
use tokio::sync::broadcast;

use crate::config::{RunnerConfig, SessionConfig};
use crate::error::{Error, Result};
use crate::examples::ExampleTable;
use crate::router::OutputRouter;
use crate::runtime::{RuntimeLoader, RuntimeProvisioner};
use crate::session::{ExecutionSession, SessionEvent, SessionId, SessionServices, SessionSnapshot};

/// Owner of every live session of a runner.
pub struct SessionRegistry {
    sessions: RwLock<FxHashMap<SessionId, Arc<ExecutionSession>>>,
    services: SessionServices,
    config: RunnerConfig,
}

impl SessionRegistry {
    /// Create a registry that shares `provisioner` between its sessions.
    pub fn new(config: RunnerConfig, provisioner: RuntimeProvisioner) -> Self {
        let services = SessionServices::from_config(provisioner, &config);
        Self {
            sessions: RwLock::new(FxHashMap::default()),
            services,
            config,
        }
    }

    /// Create a registry with its own provisioner for `loader`.
    pub fn with_loader(config: RunnerConfig, loader: impl RuntimeLoader) -> Self {
        Self::new(config, RuntimeProvisioner::new(loader))
    }

    /// Create a session, or return the existing one with the same id.
    pub fn create(&self, id: SessionId, config: SessionConfig) -> Arc<ExecutionSession> {
        let session = {
            let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
            if let Some(existing) = sessions.get(&id) {
                return existing.clone();
            }

            let default_snippet = config
                .initial_snippet
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| self.config.default_snippet.clone());
            let session = Arc::new(ExecutionSession::new(
                id.clone(),
                default_snippet,
                config.read_only,
                self.services.clone(),
            ));
            sessions.insert(id.clone(), session.clone());
            session
        };

        tracing::debug!(session = %id, "Session created");

        if self.config.preload.enabled {
            self.services.provisioner.preload(self.config.preload.delay());
        }

        session
    }

    pub fn get(&self, id: &SessionId) -> Option<Arc<ExecutionSession>> {
        self.read().get(id).cloned()
    }

    /// Like [`get`](Self::get), but an unknown id is an error.
    pub fn require(&self, id: &SessionId) -> Result<Arc<ExecutionSession>> {
        self.get(id).ok_or_else(|| Error::SessionNotFound(id.clone()))
    }

    /// Destroy a session. Its output route is removed; a run still in flight
    /// completes against the shared runtime but its output is discarded.
    pub fn destroy(&self, id: &SessionId) -> bool {
        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        let Some(session) = sessions.remove(id) else {
            return false;
        };

        // Still under the table lock: a session created under the same id
        // cannot register its route before the old one is gone.
        session.close();
        self.services.router.unregister(id);
        drop(sessions);

        tracing::debug!(session = %id, "Session destroyed");
        true
    }

    /// Ids of the live sessions, sorted.
    pub fn ids(&self) -> Vec<SessionId> {
        let mut ids: Vec<_> = self.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Snapshots of every live session, sorted by id.
    pub fn snapshots(&self) -> Vec<SessionSnapshot> {
        let mut snapshots: Vec<_> = self.read().values().map(|s| s.snapshot()).collect();
        snapshots.sort_by(|a, b| a.id.cmp(&b.id));
        snapshots
    }

    /// Subscribe to events from every session of this registry.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.services.events.subscribe()
    }

    pub fn provisioner(&self) -> &RuntimeProvisioner {
        &self.services.provisioner
    }

    pub fn router(&self) -> &OutputRouter {
        &self.services.router
    }

    pub fn examples(&self) -> &ExampleTable {
        &self.services.examples
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    fn read(&self) -> RwLockReadGuard<'_, FxHashMap<SessionId, Arc<ExecutionSession>>> {
        self.sessions.read().unwrap_or_else(PoisonError::into_inner)
    }
}
