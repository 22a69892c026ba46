//! Output routing from the interpreter to the originating session.
//!
//! Each session registers its own append callback under its session id.
//! The interpreter never sees a callback directly; it writes to an
//! [`OutputSink`] bound to one session id, so there is no shared "current
//! redirect target" that two overlapping runs could race on.
//!
//! Every registration gets a fresh [`RouteToken`] and a sink only delivers
//! while its token is the registered one. A run that outlives its session
//! cannot write into a later session that reuses the same id.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use rustc_hash::FxHashMap;

use crate::session::SessionId;

/// Callback that appends a chunk of output to a session.
pub type AppendFn = Arc<dyn Fn(&str) + Send + Sync>;

/// Identifies one registration of a session's route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RouteToken(u64);

struct Route {
    token: RouteToken,
    append: AppendFn,
}

/// Routing table from session id to append callback.
///
/// Cloning is cheap and every clone shares the same table.
#[derive(Clone, Default)]
pub struct OutputRouter {
    routes: Arc<RwLock<FxHashMap<SessionId, Route>>>,
    next_token: Arc<AtomicU64>,
}

impl OutputRouter {
    /// Create an empty router.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the append callback for a session.
    ///
    /// Sinks built from an earlier token for the same id stop delivering.
    pub fn register(&self, session_id: SessionId, append: AppendFn) -> RouteToken {
        let token = RouteToken(self.next_token.fetch_add(1, Ordering::Relaxed));
        self.routes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(session_id, Route { token, append });
        token
    }

    /// Remove a session's route. Returns whether a route existed.
    pub fn unregister(&self, session_id: &SessionId) -> bool {
        self.routes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(session_id)
            .is_some()
    }

    /// Check whether a session currently has a route.
    pub fn is_registered(&self, session_id: &SessionId) -> bool {
        self.routes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(session_id)
    }

    /// Deliver a chunk to a session.
    ///
    /// Chunks for unknown or torn-down sessions are dropped: a snippet can
    /// keep printing after its widget is gone. So are chunks carrying a
    /// stale token. Returns whether the chunk was delivered.
    pub fn dispatch(&self, session_id: &SessionId, token: RouteToken, chunk: &str) -> bool {
        // Release the table lock before calling out.
        let append = self
            .routes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(session_id)
            .filter(|route| route.token == token)
            .map(|route| route.append.clone());

        match append {
            Some(append) => {
                append(chunk);
                true
            }
            None => {
                tracing::trace!(session = %session_id, "Dropping output for unregistered route");
                false
            }
        }
    }

    /// Build a sink that dispatches to one registration of a session.
    pub fn sink(&self, session_id: SessionId, token: RouteToken) -> OutputSink {
        OutputSink {
            router: self.clone(),
            session_id,
            token,
        }
    }
}

/// Output target handed to the interpreter for a single run.
#[derive(Clone)]
pub struct OutputSink {
    router: OutputRouter,
    session_id: SessionId,
    token: RouteToken,
}

impl OutputSink {
    /// The session this sink delivers to.
    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// Write a chunk of stdout/stderr text.
    pub fn write(&self, chunk: &str) {
        if !chunk.is_empty() {
            self.router.dispatch(&self.session_id, self.token, chunk);
        }
    }
}
