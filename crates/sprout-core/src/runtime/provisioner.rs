//! Lazy, single-flight provisioning of the shared interpreter runtime.
//!
//! One `RuntimeProvisioner` is constructed at application start and cloned
//! into every session. The first `acquire()` starts the load; everyone who
//! arrives while it is in flight awaits the same outcome.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::error::{Error, Result};

use super::{RuntimeHandle, RuntimeLoader};

/// Outcome broadcast to everyone waiting on a load.
type LoadOutcome = std::result::Result<RuntimeHandle, String>;

/// Observable load state of the shared runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeLoadState {
    NotLoaded,
    Loading,
    Ready,
    Failed,
}

enum Slot {
    NotLoaded,
    Loading {
        attempt: u64,
        outcome: watch::Receiver<Option<LoadOutcome>>,
    },
    Ready(RuntimeHandle),
    Failed(String),
}

impl Slot {
    fn state(&self) -> RuntimeLoadState {
        match self {
            Self::NotLoaded => RuntimeLoadState::NotLoaded,
            Self::Loading { .. } => RuntimeLoadState::Loading,
            Self::Ready(_) => RuntimeLoadState::Ready,
            Self::Failed(_) => RuntimeLoadState::Failed,
        }
    }
}

struct Inner {
    loader: Arc<dyn RuntimeLoader>,
    /// Load state. Every check-and-transition happens under this lock.
    slot: Mutex<Slot>,
    /// Number of load sequences started.
    attempts: AtomicU64,
    /// Whether a background preload is waiting to fire.
    preload_scheduled: AtomicBool,
}

impl Inner {
    fn slot(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Mark a load that never reported as failed, unless a newer load
    /// already replaced it.
    fn abandon(&self, attempt: u64, message: &str) {
        let mut slot = self.slot();
        if matches!(&*slot, Slot::Loading { attempt: current, .. } if *current == attempt) {
            *slot = Slot::Failed(message.to_string());
        }
    }
}

/// Owner of the single shared runtime instance.
///
/// Cloning is cheap; clones share the same runtime and load state.
#[derive(Clone)]
pub struct RuntimeProvisioner {
    inner: Arc<Inner>,
}

impl RuntimeProvisioner {
    /// Create a provisioner that loads with `loader` on first demand.
    pub fn new(loader: impl RuntimeLoader) -> Self {
        Self::from_loader(Arc::new(loader))
    }

    /// Create a provisioner from a shared loader.
    pub fn from_loader(loader: Arc<dyn RuntimeLoader>) -> Self {
        Self {
            inner: Arc::new(Inner {
                loader,
                slot: Mutex::new(Slot::NotLoaded),
                attempts: AtomicU64::new(0),
                preload_scheduled: AtomicBool::new(false),
            }),
        }
    }

    /// Current load state.
    pub fn state(&self) -> RuntimeLoadState {
        self.inner.slot().state()
    }

    /// Whether `acquire()` would return without suspending.
    pub fn is_ready(&self) -> bool {
        self.state() == RuntimeLoadState::Ready
    }

    /// The loaded runtime, if ready.
    pub fn handle(&self) -> Option<RuntimeHandle> {
        match &*self.inner.slot() {
            Slot::Ready(handle) => Some(handle.clone()),
            _ => None,
        }
    }

    /// Message of the last failed load, while in the `Failed` state.
    pub fn last_error(&self) -> Option<String> {
        match &*self.inner.slot() {
            Slot::Failed(message) => Some(message.clone()),
            _ => None,
        }
    }

    /// Number of load sequences started so far.
    pub fn load_attempts(&self) -> u64 {
        self.inner.attempts.load(Ordering::SeqCst)
    }

    /// Get the shared runtime, loading it if necessary.
    ///
    /// Callers that arrive while a load is in flight wait for that load and
    /// receive its outcome; a failed load is broadcast to all of them as
    /// [`Error::RuntimeUnavailable`]. After a failure the next call retries.
    ///
    /// There is no timeout: a load that never finishes blocks its callers.
    // TODO: opt-in load timeout so a hung load surfaces as RuntimeUnavailable.
    pub async fn acquire(&self) -> Result<RuntimeHandle> {
        let (attempt, mut outcome) = {
            let mut slot = self.inner.slot();
            match &*slot {
                Slot::Ready(handle) => return Ok(handle.clone()),
                Slot::Loading { attempt, outcome } => (*attempt, outcome.clone()),
                Slot::NotLoaded | Slot::Failed(_) => {
                    let (attempt, outcome) = self.begin_load();
                    *slot = Slot::Loading {
                        attempt,
                        outcome: outcome.clone(),
                    };
                    (attempt, outcome)
                }
            }
        };

        let result = match outcome.wait_for(Option::is_some).await {
            Ok(value) => Option::clone(&value),
            Err(_) => None,
        };

        match result {
            Some(Ok(handle)) => Ok(handle),
            Some(Err(message)) => Err(Error::RuntimeUnavailable(message)),
            None => {
                let message = "runtime load ended without reporting a result";
                self.inner.abandon(attempt, message);
                Err(Error::RuntimeUnavailable(message.to_string()))
            }
        }
    }

    /// Start a load sequence in its own task.
    ///
    /// Must be called with the slot lock held. The task writes the final
    /// state before broadcasting, so woken waiters observe `Ready`/`Failed`.
    fn begin_load(&self) -> (u64, watch::Receiver<Option<LoadOutcome>>) {
        let attempt = self.inner.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        let (tx, rx) = watch::channel(None);
        let inner = Arc::clone(&self.inner);

        tokio::spawn(async move {
            tracing::info!(
                loader = inner.loader.name(),
                attempt,
                "Loading interpreter runtime"
            );
            let started = Instant::now();

            let outcome = match inner.loader.initialize().await {
                Ok(interpreter) => {
                    let handle = RuntimeHandle::new(interpreter, attempt);
                    tracing::info!(
                        "Interpreter runtime ready ({}) in {:.2}s",
                        handle.describe(),
                        started.elapsed().as_secs_f64()
                    );
                    Ok(handle)
                }
                Err(e) => {
                    let message = match e {
                        Error::RuntimeUnavailable(message) => message,
                        other => other.to_string(),
                    };
                    tracing::warn!("Interpreter runtime failed to load: {}", message);
                    Err(message)
                }
            };

            *inner.slot() = match &outcome {
                Ok(handle) => Slot::Ready(handle.clone()),
                Err(message) => Slot::Failed(message.clone()),
            };
            let _ = tx.send(Some(outcome));
        });

        (attempt, rx)
    }

    /// Opportunistically load the runtime after `delay`, without blocking
    /// anyone.
    ///
    /// Skipped when the runtime is ready or loading, when a preload is
    /// already scheduled, or outside a tokio runtime. Failures are swallowed
    /// and leave the state at `Failed` for the next explicit `acquire()`.
    pub fn preload(&self, delay: Duration) {
        if matches!(
            self.state(),
            RuntimeLoadState::Ready | RuntimeLoadState::Loading
        ) {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::debug!("No async runtime, skipping interpreter preload");
            return;
        };
        if self.inner.preload_scheduled.swap(true, Ordering::SeqCst) {
            return;
        }

        let this = self.clone();
        runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            tracing::debug!("Preloading interpreter runtime");
            if let Err(e) = this.acquire().await {
                tracing::debug!("Interpreter preload failed (ignored): {}", e);
            }
            this.inner.preload_scheduled.store(false, Ordering::SeqCst);
        });
    }
}
