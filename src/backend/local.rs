//! File-backed collaborators for single-machine deployments
//!
//! Layout under the data directory:
//!
//! ```text
//! database/
//!   users.json          registered users keyed by email
//!   <table>.bin.gz      entry table (bincode, gzip-compressed)
//!   storage/<bucket>/   uploaded blobs, one directory per identity
//! ```

use crate::backend::{AuthProvider, BlobStore, Credentials, Identity, RecordStore, SessionEvent};
use crate::entry::{Entry, EntryPatch, NewEntry, sort_newest_first};
use crate::error::{AuthError, StoreError};
use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use async_trait::async_trait;
use bincode::{deserialize_from, serialize_into};
use chrono::Utc;
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, File, create_dir_all};
use std::io::{Read, Write};
use std::path::{Component, Path, PathBuf};
use std::sync::{Mutex, PoisonError, RwLock};
use std::time::{Duration, SystemTime};
use tokio::sync::mpsc::UnboundedSender;
use uuid::Uuid;

// Constants
const USERS_FILE: &str = "users.json";
const TABLE_EXTENSION: &str = "bin.gz";
const STORAGE_DIR: &str = "storage";
const SESSION_DURATION: u64 = 24 * 60 * 60; // 24 hours in seconds
const FILE_SCHEME: &str = "file://";

/// Registered user as stored in `users.json`
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct User {
    /// Stable user id (UUID), used as the blob namespace
    pub id: String,

    pub email: String,

    /// Argon2 hash of the user's password
    pub password_hash: String,

    pub created: SystemTime,
}

/// Active session held in memory
#[derive(Debug, Clone)]
struct Session {
    identity: Identity,
    expires_at: SystemTime,
}

/// Local authentication provider
///
/// Users persist in `users.json`; sessions live in memory and expire after
/// 24 hours. Exactly one session is "current", mirroring a browser client.
pub struct LocalAuth {
    users_file: PathBuf,
    sessions: RwLock<HashMap<String, Session>>,
    current: RwLock<Option<String>>,
    listeners: Mutex<Vec<UnboundedSender<SessionEvent>>>,
}

impl LocalAuth {
    /// Open (or initialise) the user registry under `data_dir`
    ///
    /// Creates the directory and an empty `users.json` if they don't exist.
    ///
    /// # Returns
    /// * `std::io::Result<LocalAuth>` - The provider or an IO error
    pub fn open(data_dir: impl AsRef<Path>) -> std::io::Result<Self> {
        let data_dir = data_dir.as_ref();
        if !data_dir.exists() {
            create_dir_all(data_dir)?;
        }

        let users_file = data_dir.join(USERS_FILE);
        if !users_file.exists() {
            let mut file = File::create(&users_file)?;
            file.write_all(b"{}")?;
        }

        Ok(LocalAuth {
            users_file,
            sessions: RwLock::new(HashMap::new()),
            current: RwLock::new(None),
            listeners: Mutex::new(Vec::new()),
        })
    }

    /// Get all registered users, keyed by email
    ///
    /// # Errors
    /// * Returns an error if the users file cannot be opened, read, or parsed
    pub fn get_users(&self) -> Result<HashMap<String, User>, AuthError> {
        let mut file = File::open(&self.users_file)?;
        let mut contents = String::new();
        file.read_to_string(&mut contents)?;

        serde_json::from_str(&contents)
            .map_err(|e| AuthError::Backend(format!("Failed to parse users data: {}", e)))
    }

    fn save_users(&self, users: &HashMap<String, User>) -> Result<(), AuthError> {
        let json = serde_json::to_string_pretty(users)
            .map_err(|e| AuthError::Backend(format!("Failed to serialize users data: {}", e)))?;
        fs::write(&self.users_file, json)?;
        Ok(())
    }

    /// Register a new user
    ///
    /// The password is hashed with Argon2 before storage.
    ///
    /// # Errors
    /// * `AuthError::MissingField` if email or password is empty
    /// * `AuthError::AlreadyRegistered` if the email is already in use
    pub fn register_user(&self, credentials: &Credentials) -> Result<User, AuthError> {
        credentials.validate()?;
        let email = credentials.email.trim().to_string();

        let mut users = self.get_users()?;
        if users.contains_key(&email) {
            return Err(AuthError::AlreadyRegistered);
        }

        let user = User {
            id: Uuid::new_v4().to_string(),
            email: email.clone(),
            password_hash: hash_password(&credentials.password)?,
            created: SystemTime::now(),
        };

        users.insert(email, user.clone());
        self.save_users(&users)?;
        log::info!("Registered user {}", user.id);

        Ok(user)
    }

    /// Verify credentials, returning the matching user
    pub fn verify_user(&self, credentials: &Credentials) -> Result<Option<User>, AuthError> {
        let users = self.get_users()?;

        match users.get(credentials.email.trim()) {
            Some(user) if verify_password(&credentials.password, &user.password_hash)? => {
                Ok(Some(user.clone()))
            }
            _ => Ok(None),
        }
    }

    fn create_session(&self, user: &User) -> Identity {
        let identity = Identity {
            user_id: user.id.clone(),
            email: user.email.clone(),
            access_token: Uuid::new_v4().to_string(),
        };

        let session = Session {
            identity: identity.clone(),
            expires_at: SystemTime::now() + Duration::from_secs(SESSION_DURATION),
        };

        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(identity.access_token.clone(), session);
        *self.current.write().unwrap_or_else(PoisonError::into_inner) =
            Some(identity.access_token.clone());

        identity
    }

    /// Check a token and return its identity if the session is still live
    pub fn validate_session(&self, token: &str) -> Option<Identity> {
        let sessions = self.sessions.read().unwrap_or_else(PoisonError::into_inner);

        sessions
            .get(token)
            .filter(|session| session.expires_at > SystemTime::now())
            .map(|session| session.identity.clone())
    }

    /// Extend the current session by another full session duration
    ///
    /// Emits `SessionEvent::TokenRefreshed` on success.
    pub fn refresh_session(&self) -> Result<Identity, AuthError> {
        let token = self
            .current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(AuthError::NotSignedIn)?;

        let identity = {
            let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
            let session = sessions
                .get_mut(&token)
                .filter(|session| session.expires_at > SystemTime::now())
                .ok_or(AuthError::NotSignedIn)?;
            session.expires_at = SystemTime::now() + Duration::from_secs(SESSION_DURATION);
            session.identity.clone()
        };

        self.broadcast(SessionEvent::TokenRefreshed(identity.clone()));
        Ok(identity)
    }

    fn broadcast(&self, event: SessionEvent) {
        let mut listeners = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
        // Closed receivers are dropped
        listeners.retain(|listener| listener.send(event.clone()).is_ok());
    }
}

#[async_trait]
impl AuthProvider for LocalAuth {
    async fn get_session(&self) -> Result<Option<Identity>, AuthError> {
        let token = self
            .current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        Ok(token.and_then(|token| self.validate_session(&token)))
    }

    fn on_session_change(&self, listener: UnboundedSender<SessionEvent>) {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }

    async fn sign_up(&self, credentials: &Credentials) -> Result<Option<Identity>, AuthError> {
        self.register_user(credentials)?;
        Ok(None)
    }

    async fn sign_in(&self, credentials: &Credentials) -> Result<Identity, AuthError> {
        credentials.validate()?;
        let user = self
            .verify_user(credentials)?
            .ok_or(AuthError::InvalidCredentials)?;

        let identity = self.create_session(&user);
        self.broadcast(SessionEvent::SignedIn(identity.clone()));
        Ok(identity)
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        let token = self
            .current
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(token) = token {
            self.sessions
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&token);
        }
        self.broadcast(SessionEvent::SignedOut);
        Ok(())
    }
}

/// Hash a password using Argon2
fn hash_password(password: &str) -> Result<String, AuthError> {
    let salt = SaltString::generate(&mut OsRng);

    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|_| AuthError::Backend("Password hashing failed".to_string()))
}

/// Verify a password against a stored hash
fn verify_password(password: &str, hash: &str) -> Result<bool, AuthError> {
    let parsed_hash = PasswordHash::new(hash)
        .map_err(|_| AuthError::Backend("Invalid password hash format".to_string()))?;

    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok())
}

/// Entry table persisted as a gzip-compressed bincode file
pub struct LocalRecordStore {
    path: PathBuf,
    rows: tokio::sync::Mutex<Vec<Entry>>,
}

impl LocalRecordStore {
    /// Load `<table>.bin.gz` from `data_dir`, starting empty if the file doesn't exist
    pub fn open(data_dir: impl AsRef<Path>, table: &str) -> Result<Self, StoreError> {
        let data_dir = data_dir.as_ref();
        create_dir_all(data_dir)?;

        let path = data_dir.join(format!("{}.{}", table, TABLE_EXTENSION));
        let rows = if path.exists() {
            load_entries(&path)?
        } else {
            Vec::new()
        };

        Ok(LocalRecordStore {
            path,
            rows: tokio::sync::Mutex::new(rows),
        })
    }
}

fn save_entries(entries: &[Entry], path: &Path) -> std::io::Result<()> {
    let file = File::create(path)?;
    let encoder = GzEncoder::new(file, Compression::default());
    let mut writer = std::io::BufWriter::new(encoder);

    serialize_into(&mut writer, entries)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
    writer.flush()?;

    Ok(())
}

fn load_entries(path: &Path) -> std::io::Result<Vec<Entry>> {
    let file = File::open(path)?;
    let decoder = GzDecoder::new(file);
    let mut reader = std::io::BufReader::new(decoder);

    deserialize_from(&mut reader).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
}

#[async_trait]
impl RecordStore for LocalRecordStore {
    async fn select(&self, owner: &str) -> Result<Vec<Entry>, StoreError> {
        let rows = self.rows.lock().await;
        let mut owned: Vec<Entry> = rows.iter().filter(|e| e.user_id == owner).cloned().collect();
        sort_newest_first(&mut owned);
        Ok(owned)
    }

    async fn fetch(&self, id: &str) -> Result<Entry, StoreError> {
        let rows = self.rows.lock().await;
        rows.iter()
            .find(|e| e.id == id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    async fn insert(&self, entry: NewEntry) -> Result<Entry, StoreError> {
        let mut rows = self.rows.lock().await;
        let saved = Entry {
            id: Uuid::new_v4().to_string(),
            user_id: entry.user_id,
            medicine_name: entry.medicine_name,
            images: entry.images,
            created_at: Utc::now(),
        };

        rows.push(saved.clone());
        if let Err(e) = save_entries(&rows, &self.path) {
            rows.pop();
            return Err(e.into());
        }
        Ok(saved)
    }

    async fn update(&self, id: &str, patch: EntryPatch) -> Result<(), StoreError> {
        let mut rows = self.rows.lock().await;
        let row = rows
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

        let previous = row.clone();
        row.medicine_name = patch.medicine_name;
        row.images = patch.images;

        if let Err(e) = save_entries(&rows, &self.path) {
            if let Some(row) = rows.iter_mut().find(|e| e.id == id) {
                *row = previous;
            }
            return Err(e.into());
        }
        Ok(())
    }

    async fn delete_by_id(&self, id: &str) -> Result<(), StoreError> {
        let mut rows = self.rows.lock().await;
        let before = rows.len();
        let kept: Vec<Entry> = rows.iter().filter(|e| e.id != id).cloned().collect();
        if kept.len() == before {
            return Err(StoreError::NotFound(id.to_string()));
        }

        save_entries(&kept, &self.path)?;
        *rows = kept;
        Ok(())
    }

    async fn delete_by_owner(&self, owner: &str) -> Result<(), StoreError> {
        let mut rows = self.rows.lock().await;
        let kept: Vec<Entry> = rows.iter().filter(|e| e.user_id != owner).cloned().collect();

        save_entries(&kept, &self.path)?;
        *rows = kept;
        Ok(())
    }
}

/// Blob store rooted at `<data_dir>/storage/<bucket>`
///
/// Resolved locations are `file://` URLs pointing inside the root.
pub struct LocalBlobStore {
    root: PathBuf,
}

impl LocalBlobStore {
    pub fn open(data_dir: impl AsRef<Path>, bucket: &str) -> Result<Self, StoreError> {
        let root = data_dir.as_ref().join(STORAGE_DIR).join(bucket);
        create_dir_all(&root)?;
        let root = root.canonicalize()?;
        Ok(LocalBlobStore { root })
    }

    /// Map a blob path to a file under the root, rejecting traversal
    fn file_for(&self, path: &str) -> Result<PathBuf, StoreError> {
        let relative = Path::new(path);
        let clean = !path.is_empty()
            && !path.contains('\\')
            && relative
                .components()
                .all(|component| matches!(component, Component::Normal(_)));

        if !clean {
            return Err(StoreError::InvalidPath(path.to_string()));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn upload(
        &self,
        path: &str,
        bytes: Vec<u8>,
        _content_type: Option<&str>,
    ) -> Result<(), StoreError> {
        let file = self.file_for(path)?;
        if let Some(parent) = file.parent() {
            create_dir_all(parent)?;
        }
        tokio::fs::write(&file, bytes).await?;
        Ok(())
    }

    async fn remove(&self, paths: &[String]) -> Result<(), StoreError> {
        let mut first_error = None;

        for path in paths {
            let outcome = match self.file_for(path) {
                Ok(file) => tokio::fs::remove_file(&file).await.map_err(StoreError::from),
                Err(e) => Err(e),
            };
            if let Err(e) = outcome {
                log::warn!("Failed to remove blob {}: {}", path, e);
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn resolve(&self, path: &str) -> String {
        format!("{}{}", FILE_SCHEME, self.root.join(path).display())
    }

    async fn fetch(&self, location: &str) -> Result<Vec<u8>, StoreError> {
        let file = location
            .strip_prefix(FILE_SCHEME)
            .map(PathBuf::from)
            .ok_or_else(|| StoreError::InvalidPath(location.to_string()))?;

        let relative = file
            .strip_prefix(&self.root)
            .map_err(|_| StoreError::InvalidPath(location.to_string()))?;
        let file = self.file_for(&relative.to_string_lossy())?;

        match tokio::fs::read(&file).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::NotFound(location.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// The three local collaborators opened against one data directory
pub fn open_all(
    data_dir: impl AsRef<Path>,
    bucket: &str,
    table: &str,
) -> Result<(LocalAuth, LocalRecordStore, LocalBlobStore), StoreError> {
    let data_dir = data_dir.as_ref();
    Ok((
        LocalAuth::open(data_dir)?,
        LocalRecordStore::open(data_dir, table)?,
        LocalBlobStore::open(data_dir, bucket)?,
    ))
}
