//! Bearer token validation and storage.

use std::io;
use std::path::{Path, PathBuf};

use parking_lot::{Mutex, RwLock};

/// Returns `true` when `token` has exactly three non-empty dot-separated segments.
///
/// This is a shape check only; signatures and claims are never inspected.
pub fn is_valid_token(token: &str) -> bool {
    let mut segments = 0;
    for segment in token.split('.') {
        if segment.is_empty() {
            return false;
        }
        segments += 1;
    }
    segments == 3
}

/// Backing storage for the bearer credential.
pub trait CredentialStore: Send + Sync {
    /// Read the stored token, if any.
    fn load(&self) -> io::Result<Option<String>>;
    fn save(&self, token: &str) -> io::Result<()>;
    /// Remove the stored token. Clearing an empty store is not an error.
    fn clear(&self) -> io::Result<()>;
}

/// Session-scoped store: the token lives only as long as the process.
#[derive(Debug, Default)]
pub struct MemoryStore {
    token: Mutex<Option<String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            token: Mutex::new(Some(token.into())),
        }
    }
}

impl CredentialStore for MemoryStore {
    fn load(&self) -> io::Result<Option<String>> {
        Ok(self.token.lock().clone())
    }

    fn save(&self, token: &str) -> io::Result<()> {
        *self.token.lock() = Some(token.to_string());
        Ok(())
    }

    fn clear(&self) -> io::Result<()> {
        *self.token.lock() = None;
        Ok(())
    }
}

/// Durable store: the token is kept in a single file.
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CredentialStore for FileStore {
    fn load(&self) -> io::Result<Option<String>> {
        match std::fs::read_to_string(&self.path) {
            Ok(content) => {
                let token = content.trim();
                Ok((!token.is_empty()).then(|| token.to_string()))
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn save(&self, token: &str) -> io::Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, token)
    }

    fn clear(&self) -> io::Result<()> {
        match std::fs::remove_file(&self.path) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }
}

/// The client's current credential, mirrored to a [`CredentialStore`].
///
/// The in-memory value is authoritative; storage failures are logged and
/// otherwise ignored.
pub(crate) struct TokenStore {
    backend: Box<dyn CredentialStore>,
    current: RwLock<Option<String>>,
}

impl TokenStore {
    pub(crate) fn new(backend: Box<dyn CredentialStore>) -> Self {
        let current = match backend.load() {
            Ok(Some(token)) if is_valid_token(&token) => Some(token),
            Ok(Some(_)) => {
                tracing::warn!("Stored token is malformed, ignoring it");
                None
            }
            Ok(None) => None,
            Err(e) => {
                tracing::warn!("Failed to load stored token: {e}");
                None
            }
        };
        Self {
            backend,
            current: RwLock::new(current),
        }
    }

    pub(crate) fn get(&self) -> Option<String> {
        self.current.read().clone()
    }

    pub(crate) fn is_authenticated(&self) -> bool {
        self.current.read().is_some()
    }

    /// Store `token`; a malformed value clears the credential instead.
    pub(crate) fn set(&self, token: &str) {
        if !is_valid_token(token) {
            tracing::warn!("Refusing malformed token, clearing credentials");
            self.clear();
            return;
        }
        *self.current.write() = Some(token.to_string());
        if let Err(e) = self.backend.save(token) {
            tracing::warn!("Failed to persist token: {e}");
        }
    }

    pub(crate) fn clear(&self) {
        *self.current.write() = None;
        if let Err(e) = self.backend.clear() {
            tracing::warn!("Failed to purge stored token: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_shape() {
        assert!(is_valid_token("a.b.c"));
        assert!(is_valid_token("eyJhbGciOiJIUzI1NiJ9.eyJzdWIiOiIxIn0.sig"));
        assert!(!is_valid_token("abc"));
        assert!(!is_valid_token("a.b"));
        assert!(!is_valid_token("a.b.c.d"));
        assert!(!is_valid_token("a..c"));
        assert!(!is_valid_token(".b.c"));
        assert!(!is_valid_token("a.b."));
        assert!(!is_valid_token(""));
    }

    #[test]
    fn loads_valid_token_from_backend() {
        let store = TokenStore::new(Box::new(MemoryStore::with_token("a.b.c")));
        assert!(store.is_authenticated());
        assert_eq!(store.get().as_deref(), Some("a.b.c"));
    }

    #[test]
    fn ignores_malformed_stored_token() {
        let store = TokenStore::new(Box::new(MemoryStore::with_token("abc")));
        assert!(!store.is_authenticated());
        assert!(store.get().is_none());
    }

    #[test]
    fn set_malformed_token_clears() {
        let store = TokenStore::new(Box::new(MemoryStore::new()));
        store.set("a.b.c");
        assert!(store.is_authenticated());
        store.set("not-a-token");
        assert!(!store.is_authenticated());
    }

    #[test]
    fn file_store_round_trip_and_purge() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("token");
        let file = FileStore::new(&path);
        assert_eq!(file.load().unwrap(), None);

        let store = TokenStore::new(Box::new(file.clone()));
        store.set("x.y.z");
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "x.y.z");

        let reloaded = TokenStore::new(Box::new(FileStore::new(&path)));
        assert_eq!(reloaded.get().as_deref(), Some("x.y.z"));

        reloaded.clear();
        assert!(!path.exists());
        assert!(!reloaded.is_authenticated());
        // Clearing twice is fine.
        assert!(file.clear().is_ok());
    }

    #[test]
    fn file_store_trims_whitespace() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token");
        std::fs::write(&path, "a.b.c\n").unwrap();
        assert_eq!(FileStore::new(&path).load().unwrap().as_deref(), Some("a.b.c"));
    }
}
