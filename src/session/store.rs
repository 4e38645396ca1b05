use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::watch;
use tracing::debug;

use super::Session;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to access session state at {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("session state is not valid TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to encode session state: {0}")]
    Encode(#[from] toml::ser::Error),
}

/// The two persisted values, each optional on disk
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

impl PersistedState {
    pub fn session(&self) -> Option<Session> {
        self.device_id
            .as_ref()
            .filter(|id| !id.trim().is_empty())
            .map(|id| Session::with_token(id.clone(), self.token.clone()))
    }
}

/// Where persisted state lives
pub trait StateBackend: Send + Sync {
    fn load(&self) -> Result<PersistedState, StoreError>;
    fn save(&self, state: &PersistedState) -> Result<(), StoreError>;
}

/// TOML file holding `device_id` and `token`
#[derive(Debug, Clone)]
pub struct FileBackend {
    path: PathBuf,
}

impl FileBackend {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: std::io::Error) -> StoreError {
        StoreError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

impl StateBackend for FileBackend {
    fn load(&self) -> Result<PersistedState, StoreError> {
        match std::fs::read_to_string(&self.path) {
            Ok(content) => Ok(toml::from_str(&content)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(PersistedState::default()),
            Err(e) => Err(self.io_error(e)),
        }
    }

    fn save(&self, state: &PersistedState) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| self.io_error(e))?;
        }
        let content = toml::to_string_pretty(state)?;
        std::fs::write(&self.path, content).map_err(|e| self.io_error(e))
    }
}

/// Process-local state, used by tests and one-shot runs
#[derive(Debug, Default)]
pub struct MemoryBackend {
    state: Mutex<PersistedState>,
}

impl MemoryBackend {
    pub fn new(state: PersistedState) -> Self {
        Self {
            state: Mutex::new(state),
        }
    }
}

impl StateBackend for MemoryBackend {
    fn load(&self) -> Result<PersistedState, StoreError> {
        Ok(self.state.lock().map(|s| s.clone()).unwrap_or_default())
    }

    fn save(&self, state: &PersistedState) -> Result<(), StoreError> {
        if let Ok(mut current) = self.state.lock() {
            *current = state.clone();
        }
        Ok(())
    }
}

struct StoreInner {
    backend: Box<dyn StateBackend>,
    state: Mutex<PersistedState>,
    tx: watch::Sender<Option<Session>>,
}

/// Shared handle to the persisted session.
///
/// Clones share one backend and one change channel; every `set`/`clear`
/// that changes the session notifies all subscribers.
#[derive(Clone)]
pub struct SessionStore {
    inner: Arc<StoreInner>,
}

impl SessionStore {
    /// Load current state from the backend
    pub fn open(backend: impl StateBackend + 'static) -> Result<Self, StoreError> {
        let state = backend.load()?;
        let (tx, _rx) = watch::channel(state.session());
        Ok(Self {
            inner: Arc::new(StoreInner {
                backend: Box::new(backend),
                state: Mutex::new(state),
                tx,
            }),
        })
    }

    pub fn file(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        Self::open(FileBackend::new(path))
    }

    pub fn in_memory(state: PersistedState) -> Self {
        let session = state.session();
        let (tx, _rx) = watch::channel(session);
        Self {
            inner: Arc::new(StoreInner {
                backend: Box::new(MemoryBackend::new(state.clone())),
                state: Mutex::new(state),
                tx,
            }),
        }
    }

    /// Current session, if bound
    pub fn get(&self) -> Option<Session> {
        self.inner.tx.borrow().clone()
    }

    /// Persist a new binding
    pub fn set(&self, session: Session) -> Result<(), StoreError> {
        self.update(|state| {
            state.device_id = Some(session.device_id.clone());
            state.token = Some(session.token.clone());
        })
    }

    /// Forget the device identifier. The token is kept for the next binding.
    pub fn clear(&self) -> Result<(), StoreError> {
        self.update(|state| state.device_id = None)
    }

    /// Replace the token used for the next binding
    pub fn set_token(&self, token: impl Into<String>) -> Result<(), StoreError> {
        let token = token.into();
        self.update(|state| state.token = Some(token))
    }

    /// Persisted token, if any
    pub fn token(&self) -> Option<String> {
        self.inner.state.lock().ok().and_then(|s| s.token.clone())
    }

    /// Receive a notification whenever the session changes
    pub fn subscribe(&self) -> watch::Receiver<Option<Session>> {
        self.inner.tx.subscribe()
    }

    fn update(&self, apply: impl FnOnce(&mut PersistedState)) -> Result<(), StoreError> {
        let mut next = self
            .inner
            .state
            .lock()
            .map(|s| s.clone())
            .unwrap_or_default();
        apply(&mut next);
        self.inner.backend.save(&next)?;

        let session = next.session();
        if let Ok(mut state) = self.inner.state.lock() {
            *state = next;
        }
        self.inner.tx.send_if_modified(|current| {
            if *current == session {
                false
            } else {
                debug!(device_id = ?session.as_ref().map(|s| &s.device_id), "session changed");
                *current = session;
                true
            }
        });
        Ok(())
    }
}
