// Session persistence
// The session file is the only durable copy of the authenticated session

use crate::persist;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

pub const SESSION_FILE_NAME: &str = "lastfm_session.json";

/// An authenticated Last.fm session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    #[serde(rename = "session_key")]
    pub key: String,
    #[serde(rename = "username")]
    pub name: String,
}

/// Reads and writes the session file; every call touches disk
#[derive(Debug, Clone)]
pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store rooted in a data directory
    pub fn in_dir(data_dir: &Path) -> Self {
        Self::new(data_dir.join(SESSION_FILE_NAME))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the stored session. Missing or malformed files count as no session.
    pub fn load(&self) -> Option<Session> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                log::debug!("No session file at {:?}", self.path);
                return None;
            }
            Err(e) => {
                log::error!("Failed to read session file {:?}: {}", self.path, e);
                return None;
            }
        };

        match serde_json::from_str::<Session>(&content) {
            Ok(session) => {
                log::debug!("Session loaded from disk (username: {})", session.name);
                Some(session)
            }
            Err(e) => {
                log::error!("Failed to parse session file {:?}: {}", self.path, e);
                None
            }
        }
    }

    /// Replace the stored session. Failures are logged.
    pub fn save(&self, session: &Session) {
        let result = serde_json::to_string_pretty(session)
            .map_err(io::Error::from)
            .and_then(|content| persist::write_atomic(&self.path, content.as_bytes()));

        match result {
            Ok(()) => log::debug!(
                "Saved session for user {} to {:?}",
                session.name,
                self.path
            ),
            Err(e) => log::error!("Failed to write session file {:?}: {}", self.path, e),
        }
    }

    /// Delete the stored session; nothing stored is not an error
    pub fn clear(&self) {
        match fs::remove_file(&self.path) {
            Ok(()) => log::info!("Session file deleted: {:?}", self.path),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => log::error!("Failed to delete session file {:?}: {}", self.path, e),
        }
    }
}
