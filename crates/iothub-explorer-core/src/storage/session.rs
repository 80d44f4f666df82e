//! Session token cache.
//!
//! `login` writes the service token to a plain-text file; every command
//! that talks to the registry reads it back; `logout` deletes it.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use directories::BaseDirs;
use tokio::fs;

use crate::error::StorageError;

/// Directory name used on macOS and Windows
const APP_DIR: &str = "iothub-explorer";

/// Where the session file lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionLocation {
    pub dir: PathBuf,
    pub file: String,
}

impl SessionLocation {
    pub fn path(&self) -> PathBuf {
        self.dir.join(&self.file)
    }
}

/// Platform-specific session file location for the current host.
pub fn session_location() -> Result<SessionLocation, StorageError> {
    let dirs = BaseDirs::new().ok_or_else(|| {
        StorageError::DirectoryAccess("could not determine the home directory".to_string())
    })?;
    location_for(std::env::consts::OS, &dirs)
}

fn location_for(os: &str, dirs: &BaseDirs) -> Result<SessionLocation, StorageError> {
    match os {
        // ~/Library/Application Support/iothub-explorer/config
        "macos" => Ok(SessionLocation {
            dir: dirs.data_dir().join(APP_DIR),
            file: "config".to_string(),
        }),
        "linux" => Ok(SessionLocation {
            dir: dirs.home_dir().to_path_buf(),
            file: ".iothub-explorer".to_string(),
        }),
        // %LOCALAPPDATA%/iothub-explorer/config
        "windows" => Ok(SessionLocation {
            dir: dirs.data_local_dir().join(APP_DIR),
            file: "config".to_string(),
        }),
        other => Err(StorageError::UnsupportedPlatform(other.to_string())),
    }
}

/// File-backed session token store.
///
/// Takes the file path in the constructor so tests can point it at a
/// temporary directory.
#[derive(Debug, Clone)]
pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Store at the platform default location.
    pub fn open_default() -> Result<Self, StorageError> {
        Ok(Self::new(session_location()?.path()))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the cached token. A missing file means no session.
    pub async fn load(&self) -> Result<Option<String>, StorageError> {
        match fs::read_to_string(&self.path).await {
            Ok(content) => {
                let token = content.trim();
                if token.is_empty() {
                    Ok(None)
                } else {
                    Ok(Some(token.to_string()))
                }
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    /// Write the token, creating the parent directory if needed.
    pub async fn save(&self, token: &str) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await.map_err(|e| {
                StorageError::DirectoryAccess(format!("{}: {}", parent.display(), e))
            })?;
        }

        fs::write(&self.path, token).await?;
        tracing::debug!(path = %self.path.display(), "session token saved");

        Ok(())
    }

    /// Delete the session file. Returns `false` if there was none.
    pub async fn remove(&self) -> Result<bool, StorageError> {
        match fs::remove_file(&self.path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StorageError::Io(e)),
        }
    }
}
