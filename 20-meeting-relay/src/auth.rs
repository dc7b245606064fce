//! Credential checks behind a small trait.
//!
//! The relay only ever asks two questions: can this username be registered,
//! and do these credentials match. [`MemoryAuthenticator`] answers them from
//! an in-memory table that can optionally be persisted as JSON.

use std::{
    collections::HashMap,
    fs, io,
    path::{Path, PathBuf},
    sync::{Mutex, PoisonError},
};

use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::error::AuthError;

pub trait Authenticator: Send + Sync {
    /// Returns `false` if the username is already taken.
    fn register(&self, username: &str, password: &str) -> bool;

    fn authenticate(&self, username: &str, password: &str) -> bool;
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
struct Credential {
    salt: String,
    hash: String,
}

impl Credential {
    fn new(password: &str) -> Self {
        let mut salt = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut salt);
        let salt = to_hex(&salt);
        let hash = digest(&salt, password);
        Self { salt, hash }
    }

    fn matches(&self, password: &str) -> bool {
        digest(&self.salt, password) == self.hash
    }
}

fn digest(salt: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(password.as_bytes());
    to_hex(&hasher.finalize())
}

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|byte| format!("{byte:02x}")).collect()
}

#[derive(Debug, Default)]
pub struct MemoryAuthenticator {
    users: Mutex<HashMap<String, Credential>>,
    path: Option<PathBuf>,
}

impl MemoryAuthenticator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads users from `path` (a missing file means no users yet) and writes
    /// every new registration back to it.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, AuthError> {
        let path = path.into();
        let users = match fs::read(&path) {
            Ok(contents) => {
                serde_json::from_slice(&contents).map_err(|source| AuthError::Parse {
                    path: path.clone(),
                    source,
                })?
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => HashMap::new(),
            Err(source) => return Err(AuthError::Read { path, source }),
        };
        info!(path = %path.display(), users = users.len(), "loaded credential store");

        Ok(Self {
            users: Mutex::new(users),
            path: Some(path),
        })
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Credential>> {
        self.users.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn persist(path: &Path, users: &HashMap<String, Credential>) -> Result<(), AuthError> {
        let encoded = serde_json::to_vec_pretty(users)?;
        let staging = path.with_extension("tmp");
        fs::write(&staging, encoded).map_err(|source| AuthError::Write {
            path: staging.clone(),
            source,
        })?;
        fs::rename(&staging, path).map_err(|source| AuthError::Write {
            path: path.to_path_buf(),
            source,
        })
    }
}

impl Authenticator for MemoryAuthenticator {
    fn register(&self, username: &str, password: &str) -> bool {
        let mut users = self.lock();
        if username.is_empty() || users.contains_key(username) {
            return false;
        }
        users.insert(username.to_string(), Credential::new(password));

        if let Some(path) = &self.path {
            if let Err(err) = Self::persist(path, &users) {
                warn!(error = ?err, "failed to persist registration");
                users.remove(username);
                return false;
            }
        }
        true
    }

    fn authenticate(&self, username: &str, password: &str) -> bool {
        self.lock()
            .get(username)
            .is_some_and(|credential| credential.matches(password))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_rejects_taken_usernames() {
        let auth = MemoryAuthenticator::new();
        assert!(auth.register("alice", "pw1"));
        assert!(!auth.register("alice", "other"));
        assert!(!auth.register("", "pw"));
        assert_eq!(auth.len(), 1);
    }

    #[test]
    fn authenticate_checks_password() {
        let auth = MemoryAuthenticator::new();
        auth.register("alice", "pw1");
        assert!(auth.authenticate("alice", "pw1"));
        assert!(!auth.authenticate("alice", "pw2"));
        assert!(!auth.authenticate("bob", "pw1"));
    }

    #[test]
    fn salts_differ_between_users_with_same_password() {
        let first = Credential::new("same");
        let second = Credential::new("same");
        assert_ne!(first.hash, second.hash);
        assert!(first.matches("same") && second.matches("same"));
    }

    #[test]
    fn registrations_survive_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("users.json");

        let auth = MemoryAuthenticator::open(&path).expect("open new");
        assert!(auth.is_empty());
        assert!(auth.register("alice", "pw1"));

        let reopened = MemoryAuthenticator::open(&path).expect("reopen");
        assert!(reopened.authenticate("alice", "pw1"));
        assert!(!reopened.register("alice", "pw1"));

        let contents = fs::read_to_string(&path).expect("read");
        assert!(!contents.contains("pw1"));
    }

    #[test]
    fn malformed_file_is_reported() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("users.json");
        fs::write(&path, b"not json").expect("write");

        let err = MemoryAuthenticator::open(&path).expect_err("should fail");
        assert!(matches!(err, AuthError::Parse { .. }));
    }
}
