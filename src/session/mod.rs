// Session identity and its persisted store

pub mod store;

pub use store::{FileBackend, MemoryBackend, PersistedState, SessionStore, StateBackend, StoreError};

use serde::{Deserialize, Serialize};

/// Token used when none has been persisted
pub const DEFAULT_TOKEN: &str = "viewer";

/// One agent binding
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub device_id: String,
    pub token: String,
}

impl Session {
    /// Create a session with the default viewer token
    pub fn new(device_id: impl Into<String>) -> Self {
        Self::with_token(device_id, None)
    }

    /// Create a session, falling back to the viewer token for a missing or blank token
    pub fn with_token(device_id: impl Into<String>, token: Option<String>) -> Self {
        let token = token
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_TOKEN.to_string());
        Self {
            device_id: device_id.into(),
            token,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_token_is_viewer() {
        assert_eq!(Session::new("dev-1").token, "viewer");
    }

    #[test]
    fn blank_token_falls_back_to_viewer() {
        let session = Session::with_token("dev-1", Some("  ".to_string()));
        assert_eq!(session.token, DEFAULT_TOKEN);
    }

    #[test]
    fn explicit_token_is_kept() {
        let session = Session::with_token("dev-1", Some("operator".to_string()));
        assert_eq!(session.token, "operator");
    }
}
