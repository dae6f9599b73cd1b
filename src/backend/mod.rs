//! External collaborators
//!
//! The application delegates authentication, record storage and blob storage
//! to a backend platform. Each concern is a trait so the controllers can run
//! against the local file-backed implementation, the hosted platform, or the
//! in-memory test double.

pub mod local;
pub mod memory;
pub mod remote;

use crate::entry::{Entry, EntryPatch, NewEntry};
use crate::error::{AuthError, StoreError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedSender;

/// The authenticated user reference scoping all data access
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    /// Stable user id; also the blob namespace prefix
    pub user_id: String,
    pub email: String,

    /// Bearer token for the current session
    pub access_token: String,
}

/// Email/password pair for sign-up and sign-in
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

impl Credentials {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Credentials {
            email: email.into(),
            password: password.into(),
        }
    }

    pub fn validate(&self) -> Result<(), AuthError> {
        if self.email.trim().is_empty() {
            return Err(AuthError::MissingField("email"));
        }
        if self.password.is_empty() {
            return Err(AuthError::MissingField("password"));
        }
        Ok(())
    }
}

/// Session change pushed by the auth provider
#[derive(Clone, Debug, PartialEq)]
pub enum SessionEvent {
    SignedIn(Identity),
    TokenRefreshed(Identity),
    SignedOut,
}

#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// Current session, if any
    async fn get_session(&self) -> Result<Option<Identity>, AuthError>;

    /// Register a listener for session changes
    fn on_session_change(&self, listener: UnboundedSender<SessionEvent>);

    /// Create an account; returns an identity when the provider signs the user in immediately
    async fn sign_up(&self, credentials: &Credentials) -> Result<Option<Identity>, AuthError>;

    async fn sign_in(&self, credentials: &Credentials) -> Result<Identity, AuthError>;

    async fn sign_out(&self) -> Result<(), AuthError>;
}

/// Table storage for entries; authorization is the store's job
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// All entries owned by `owner`, newest first
    async fn select(&self, owner: &str) -> Result<Vec<Entry>, StoreError>;

    async fn fetch(&self, id: &str) -> Result<Entry, StoreError>;

    async fn insert(&self, entry: NewEntry) -> Result<Entry, StoreError>;

    async fn update(&self, id: &str, patch: EntryPatch) -> Result<(), StoreError>;

    async fn delete_by_id(&self, id: &str) -> Result<(), StoreError>;

    async fn delete_by_owner(&self, owner: &str) -> Result<(), StoreError>;
}

/// Object storage for image blobs
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn upload(
        &self,
        path: &str,
        bytes: Vec<u8>,
        content_type: Option<&str>,
    ) -> Result<(), StoreError>;

    async fn remove(&self, paths: &[String]) -> Result<(), StoreError>;

    /// Fetchable location for a stored path
    fn resolve(&self, path: &str) -> String;

    /// Retrieve the bytes behind a resolved location
    async fn fetch(&self, location: &str) -> Result<Vec<u8>, StoreError>;
}
