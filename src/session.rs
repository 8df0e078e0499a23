//! Session store: bearer token, refresh token and cached user.
//!
//! SYSTEM CONTEXT
//! ==============
//! A [`Session`] is an explicit object shared by `Arc` between the API client
//! and whoever drives login/logout. There is no process-global token.
//!
//! INVARIANTS
//! ==========
//! - Clearing the token clears the refresh token and cached user in the same
//!   storage write. Never one without the other.
//! - Reads fail soft: a missing key, a corrupt file or unparseable user JSON
//!   all read as `None`.

use std::collections::HashMap;
use std::ffi::OsStr;
use std::fmt;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tracing::warn;
use uuid::Uuid;

use crate::error::ErrorCode;

#[cfg(test)]
#[path = "session_test.rs"]
mod tests;

/// Storage key for the bearer token.
pub const AUTH_TOKEN_KEY: &str = "auth_token";

/// Storage key for the refresh token.
pub const REFRESH_TOKEN_KEY: &str = "refresh_token";

/// Storage key for the JSON-serialized cached user.
pub const CURRENT_USER_KEY: &str = "current_user";

const SESSION_KEYS: [&str; 3] = [AUTH_TOKEN_KEY, REFRESH_TOKEN_KEY, CURRENT_USER_KEY];

// =============================================================================
// ERROR TYPE
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("session storage I/O failed at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("session value could not be serialized: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl ErrorCode for SessionError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Io { .. } => "SESSION_IO",
            Self::Serialize(_) => "SESSION_SERIALIZE",
        }
    }
}

// =============================================================================
// STORAGE
// =============================================================================

/// Durable string key/value storage backing a [`Session`].
pub trait Storage: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;

    /// # Errors
    ///
    /// Returns [`SessionError::Io`] if the backing store cannot be written.
    fn set(&self, key: &str, value: &str) -> Result<(), SessionError>;

    /// # Errors
    ///
    /// Returns [`SessionError::Io`] if the backing store cannot be written.
    fn remove(&self, key: &str) -> Result<(), SessionError>;

    /// Remove several keys. Implementations that can do so in a single write
    /// should override this.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Io`] if the backing store cannot be written.
    fn remove_all(&self, keys: &[&str]) -> Result<(), SessionError> {
        for key in keys {
            self.remove(key)?;
        }
        Ok(())
    }
}

/// In-process storage. Contents vanish with the process.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Storage for MemoryStorage {
    fn get(&self, key: &str) -> Option<String> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<(), SessionError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), SessionError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.remove(key);
        Ok(())
    }

    fn remove_all(&self, keys: &[&str]) -> Result<(), SessionError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        for key in keys {
            entries.remove(*key);
        }
        Ok(())
    }
}

/// A flat JSON object on disk, one string value per key.
///
/// Writes go to a sibling temp file which is then renamed over the target.
/// On unix the file is created with mode `0600`. The file is deleted once
/// its last key is removed.
#[derive(Debug)]
pub struct FileStorage {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileStorage {
    #[must_use]
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), lock: Mutex::new(()) }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_map(&self) -> Map<String, Value> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Map::new(),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "session file unreadable; treating as empty");
                return Map::new();
            }
        };
        match serde_json::from_str::<Value>(&raw) {
            Ok(Value::Object(map)) => map,
            Ok(_) | Err(_) => {
                warn!(path = %self.path.display(), "session file corrupt; treating as empty");
                Map::new()
            }
        }
    }

    fn write_map(&self, map: &Map<String, Value>) -> Result<(), SessionError> {
        let io_err = |source| SessionError::Io { path: self.path.clone(), source };

        if map.is_empty() {
            return match fs::remove_file(&self.path) {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(io_err(e)),
            };
        }

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_err)?;
        }

        let rendered = serde_json::to_vec_pretty(map)?;
        let tmp = temp_path(&self.path);
        let written = write_private(&tmp, &rendered).and_then(|()| fs::rename(&tmp, &self.path));
        if written.is_err() {
            let _ = fs::remove_file(&tmp);
        }
        written.map_err(io_err)
    }

    fn mutate(&self, f: impl FnOnce(&mut Map<String, Value>)) -> Result<(), SessionError> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut map = self.read_map();
        f(&mut map);
        self.write_map(&map)
    }
}

impl Storage for FileStorage {
    fn get(&self, key: &str) -> Option<String> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.read_map()
            .get(key)
            .and_then(Value::as_str)
            .map(ToOwned::to_owned)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), SessionError> {
        self.mutate(|map| {
            map.insert(key.to_owned(), Value::String(value.to_owned()));
        })
    }

    fn remove(&self, key: &str) -> Result<(), SessionError> {
        self.mutate(|map| {
            map.remove(key);
        })
    }

    fn remove_all(&self, keys: &[&str]) -> Result<(), SessionError> {
        self.mutate(|map| {
            for key in keys {
                map.remove(*key);
            }
        })
    }
}

/// Unique sibling of `path`, so concurrent writers never share a temp file.
fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(OsStr::to_os_string)
        .unwrap_or_default();
    name.push(format!(".{}.tmp", Uuid::new_v4().simple()));
    path.with_file_name(name)
}

fn write_private(path: &Path, contents: &[u8]) -> io::Result<()> {
    let mut options = fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;
    // The creation mode is filtered through the umask.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(fs::Permissions::from_mode(0o600))?;
    }
    file.write_all(contents)?;
    file.sync_all()
}

// =============================================================================
// SESSION
// =============================================================================

/// Auth state for one API client: token, refresh token, cached user.
pub struct Session {
    storage: Box<dyn Storage>,
}

impl Session {
    #[must_use]
    pub fn new(storage: impl Storage + 'static) -> Self {
        Self { storage: Box::new(storage) }
    }

    #[must_use]
    pub fn in_memory() -> Self {
        Self::new(MemoryStorage::new())
    }

    /// Session persisted to a JSON file at `path`.
    #[must_use]
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self::new(FileStorage::open(path))
    }

    #[must_use]
    pub fn token(&self) -> Option<String> {
        self.storage.get(AUTH_TOKEN_KEY)
    }

    /// Store the bearer token. `None` (or a blank token) ends the session:
    /// token, refresh token and cached user are removed together.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage write fails.
    pub fn set_token(&self, token: Option<&str>) -> Result<(), SessionError> {
        match token.map(str::trim).filter(|t| !t.is_empty()) {
            Some(token) => self.storage.set(AUTH_TOKEN_KEY, token),
            None => self.clear(),
        }
    }

    #[must_use]
    pub fn refresh_token(&self) -> Option<String> {
        self.storage.get(REFRESH_TOKEN_KEY)
    }

    /// # Errors
    ///
    /// Returns an error if the storage write fails.
    pub fn set_refresh_token(&self, token: Option<&str>) -> Result<(), SessionError> {
        match token.map(str::trim).filter(|t| !t.is_empty()) {
            Some(token) => self.storage.set(REFRESH_TOKEN_KEY, token),
            None => self.storage.remove(REFRESH_TOKEN_KEY),
        }
    }

    /// The cached user, or `None` when absent or unparseable.
    #[must_use]
    pub fn current_user<T: DeserializeOwned>(&self) -> Option<T> {
        let raw = self.storage.get(CURRENT_USER_KEY)?;
        match serde_json::from_str(&raw) {
            Ok(user) => Some(user),
            Err(e) => {
                warn!(key = CURRENT_USER_KEY, error = %e, "discarding unparseable cached user");
                None
            }
        }
    }

    /// Cache `user` as JSON, or drop the cache on `None`.
    ///
    /// # Errors
    ///
    /// Returns an error if `user` cannot be serialized or the write fails.
    pub fn set_current_user<T: Serialize>(&self, user: Option<&T>) -> Result<(), SessionError> {
        match user {
            Some(user) => {
                let raw = serde_json::to_string(user)?;
                self.storage.set(CURRENT_USER_KEY, &raw)
            }
            None => self.storage.remove(CURRENT_USER_KEY),
        }
    }

    /// Logout / 401 teardown.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage write fails.
    pub fn clear(&self) -> Result<(), SessionError> {
        self.storage.remove_all(&SESSION_KEYS)
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.token().is_some()
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("authenticated", &self.is_authenticated())
            .finish_non_exhaustive()
    }
}
