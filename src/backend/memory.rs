//! In-process collaborators
//!
//! `MemoryBackend` implements all three collaborator traits over plain
//! in-memory tables. It records every call in order and lets tests make
//! individual operations fail.

use crate::backend::{AuthProvider, BlobStore, Credentials, Identity, RecordStore, SessionEvent};
use crate::entry::{Entry, EntryPatch, NewEntry, sort_newest_first};
use crate::error::{AuthError, StoreError};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc::UnboundedSender;

const LOCATION_PREFIX: &str = "memory://";

/// One collaborator call, as observed by the backend
#[derive(Clone, Debug, PartialEq)]
pub enum Call {
    GetSession,
    SignUp(String),
    SignIn(String),
    SignOut,
    Select(String),
    Fetch(String),
    Insert(NewEntry),
    Update(String, EntryPatch),
    DeleteById(String),
    DeleteByOwner(String),
    Upload(String),
    Remove(Vec<String>),
    FetchBlob(String),
}

/// Which operations should fail
#[derive(Clone, Debug, Default)]
pub struct Failures {
    pub select: bool,
    pub fetch: bool,
    pub insert: bool,
    pub update: bool,
    pub delete: bool,
    pub remove: bool,
    /// Uploads fail when the blob path ends with one of these suffixes
    pub upload_suffixes: Vec<String>,
    /// Blob fetches fail for these stored paths
    pub fetch_paths: HashSet<String>,
}

#[derive(Default)]
struct State {
    users: HashMap<String, (String, String)>,
    current: Option<Identity>,
    listeners: Vec<UnboundedSender<SessionEvent>>,
    rows: Vec<Entry>,
    blobs: BTreeMap<String, Vec<u8>>,
    calls: Vec<Call>,
    failures: Failures,
    next_id: u64,
}

/// In-memory auth provider, record store and blob store in one
#[derive(Default)]
pub struct MemoryBackend {
    state: Mutex<State>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Every call made so far, oldest first
    pub fn calls(&self) -> Vec<Call> {
        self.state().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state().calls.clear();
    }

    pub fn set_failures(&self, failures: Failures) {
        self.state().failures = failures;
    }

    pub fn failures(&self) -> Failures {
        self.state().failures.clone()
    }

    pub fn blob_paths(&self) -> Vec<String> {
        self.state().blobs.keys().cloned().collect()
    }

    pub fn blob(&self, path: &str) -> Option<Vec<u8>> {
        self.state().blobs.get(path).cloned()
    }

    pub fn rows(&self) -> Vec<Entry> {
        self.state().rows.clone()
    }

    /// Put a blob in place without recording a call
    pub fn seed_blob(&self, path: &str, bytes: &[u8]) {
        self.state().blobs.insert(path.to_string(), bytes.to_vec());
    }

    /// Insert a row directly, `age_secs` in the past, without recording a call
    pub fn seed_entry(&self, owner: &str, label: &str, images: &[&str], age_secs: i64) -> Entry {
        let mut state = self.state();
        state.next_id += 1;
        let entry = Entry {
            id: format!("e{}", state.next_id),
            user_id: owner.to_string(),
            medicine_name: label.to_string(),
            images: images.iter().map(|s| s.to_string()).collect(),
            created_at: Utc::now() - Duration::seconds(age_secs),
        };
        state.rows.push(entry.clone());
        entry
    }

    /// Register and sign in a user, returning its identity
    pub fn seed_session(&self, user_id: &str) -> Identity {
        let identity = Identity {
            user_id: user_id.to_string(),
            email: format!("{}@example.test", user_id),
            access_token: format!("token-{}", user_id),
        };
        let mut state = self.state();
        state.users.insert(
            identity.email.clone(),
            (user_id.to_string(), "password".to_string()),
        );
        state.current = Some(identity.clone());
        identity
    }

    fn record(&self, call: Call) -> MutexGuard<'_, State> {
        let mut state = self.state();
        state.calls.push(call);
        state
    }

    fn broadcast(state: &mut State, event: SessionEvent) {
        state
            .listeners
            .retain(|listener| listener.send(event.clone()).is_ok());
    }
}

fn injected(what: &str) -> StoreError {
    StoreError::Injected(what.to_string())
}

#[async_trait]
impl AuthProvider for MemoryBackend {
    async fn get_session(&self) -> Result<Option<Identity>, AuthError> {
        Ok(self.record(Call::GetSession).current.clone())
    }

    fn on_session_change(&self, listener: UnboundedSender<SessionEvent>) {
        self.state().listeners.push(listener);
    }

    async fn sign_up(&self, credentials: &Credentials) -> Result<Option<Identity>, AuthError> {
        let mut state = self.record(Call::SignUp(credentials.email.clone()));
        credentials.validate()?;
        if state.users.contains_key(&credentials.email) {
            return Err(AuthError::AlreadyRegistered);
        }
        let user_id = format!("user-{}", state.users.len() + 1);
        state.users.insert(
            credentials.email.clone(),
            (user_id, credentials.password.clone()),
        );
        Ok(None)
    }

    async fn sign_in(&self, credentials: &Credentials) -> Result<Identity, AuthError> {
        let mut state = self.record(Call::SignIn(credentials.email.clone()));
        credentials.validate()?;
        let user_id = match state.users.get(&credentials.email) {
            Some((user_id, password)) if *password == credentials.password => user_id.clone(),
            _ => return Err(AuthError::InvalidCredentials),
        };

        let identity = Identity {
            access_token: format!("token-{}", user_id),
            user_id,
            email: credentials.email.clone(),
        };
        state.current = Some(identity.clone());
        Self::broadcast(&mut state, SessionEvent::SignedIn(identity.clone()));
        Ok(identity)
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        let mut state = self.record(Call::SignOut);
        state.current = None;
        Self::broadcast(&mut state, SessionEvent::SignedOut);
        Ok(())
    }
}

#[async_trait]
impl RecordStore for MemoryBackend {
    async fn select(&self, owner: &str) -> Result<Vec<Entry>, StoreError> {
        let state = self.record(Call::Select(owner.to_string()));
        if state.failures.select {
            return Err(injected("select"));
        }
        let mut owned: Vec<Entry> = state
            .rows
            .iter()
            .filter(|e| e.user_id == owner)
            .cloned()
            .collect();
        sort_newest_first(&mut owned);
        Ok(owned)
    }

    async fn fetch(&self, id: &str) -> Result<Entry, StoreError> {
        let state = self.record(Call::Fetch(id.to_string()));
        if state.failures.fetch {
            return Err(injected("fetch"));
        }
        state
            .rows
            .iter()
            .find(|e| e.id == id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    async fn insert(&self, entry: NewEntry) -> Result<Entry, StoreError> {
        let mut state = self.record(Call::Insert(entry.clone()));
        if state.failures.insert {
            return Err(injected("insert"));
        }
        state.next_id += 1;
        let saved = Entry {
            id: format!("e{}", state.next_id),
            user_id: entry.user_id,
            medicine_name: entry.medicine_name,
            images: entry.images,
            created_at: Utc::now(),
        };
        state.rows.push(saved.clone());
        Ok(saved)
    }

    async fn update(&self, id: &str, patch: EntryPatch) -> Result<(), StoreError> {
        let mut state = self.record(Call::Update(id.to_string(), patch.clone()));
        if state.failures.update {
            return Err(injected("update"));
        }
        let row = state
            .rows
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        row.medicine_name = patch.medicine_name;
        row.images = patch.images;
        Ok(())
    }

    async fn delete_by_id(&self, id: &str) -> Result<(), StoreError> {
        let mut state = self.record(Call::DeleteById(id.to_string()));
        if state.failures.delete {
            return Err(injected("delete"));
        }
        state.rows.retain(|e| e.id != id);
        Ok(())
    }

    async fn delete_by_owner(&self, owner: &str) -> Result<(), StoreError> {
        let mut state = self.record(Call::DeleteByOwner(owner.to_string()));
        if state.failures.delete {
            return Err(injected("delete"));
        }
        state.rows.retain(|e| e.user_id != owner);
        Ok(())
    }
}

#[async_trait]
impl BlobStore for MemoryBackend {
    async fn upload(
        &self,
        path: &str,
        bytes: Vec<u8>,
        _content_type: Option<&str>,
    ) -> Result<(), StoreError> {
        let mut state = self.record(Call::Upload(path.to_string()));
        if state
            .failures
            .upload_suffixes
            .iter()
            .any(|suffix| path.ends_with(suffix.as_str()))
        {
            return Err(injected("upload"));
        }
        state.blobs.insert(path.to_string(), bytes);
        Ok(())
    }

    async fn remove(&self, paths: &[String]) -> Result<(), StoreError> {
        let mut state = self.record(Call::Remove(paths.to_vec()));
        if state.failures.remove {
            return Err(injected("remove"));
        }
        for path in paths {
            state.blobs.remove(path);
        }
        Ok(())
    }

    fn resolve(&self, path: &str) -> String {
        format!("{}{}", LOCATION_PREFIX, path)
    }

    async fn fetch(&self, location: &str) -> Result<Vec<u8>, StoreError> {
        let state = self.record(Call::FetchBlob(location.to_string()));
        let path = location.strip_prefix(LOCATION_PREFIX).unwrap_or(location);
        if state.failures.fetch_paths.contains(path) {
            return Err(injected("fetch blob"));
        }
        state
            .blobs
            .get(path)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(location.to_string()))
    }
}
