//! Hosted backend-as-a-service client
//!
//! Talks to a platform exposing three HTTP APIs under one base URL:
//! `/auth/v1` (email/password auth), `/rest/v1` (PostgREST-style tables) and
//! `/storage/v1` (object storage with public URLs). Requests carry the
//! project API key plus the signed-in user's bearer token; row ownership is
//! enforced by the platform's policies.

use crate::backend::{AuthProvider, BlobStore, Credentials, Identity, RecordStore, SessionEvent};
use crate::entry::{Entry, EntryPatch, NewEntry};
use crate::error::{AuthError, StoreError};
use async_trait::async_trait;
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::sync::{Mutex, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;

const USER_AGENT: &str = concat!("medlog/", env!("CARGO_PKG_VERSION"));
const REQUEST_TIMEOUT_SECS: u64 = 30;
const SINGLE_OBJECT: &str = "application/vnd.pgrst.object+json";

#[derive(Debug, Deserialize)]
struct AuthUser {
    id: String,
    #[serde(default)]
    email: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    user: AuthUser,
}

/// Sign-up answers with either a full session or just the pending user
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SignUpResponse {
    Session(TokenResponse),
    User(AuthUser),
}

#[derive(Debug, Clone)]
struct RemoteSession {
    identity: Identity,
    refresh_token: Option<String>,
}

/// Client for the hosted platform; implements all three collaborator traits
pub struct RemoteBackend {
    http_client: reqwest::Client,
    base_url: String,
    api_key: String,
    bucket: String,
    table: String,
    session: RwLock<Option<RemoteSession>>,
    listeners: Mutex<Vec<UnboundedSender<SessionEvent>>>,
}

impl RemoteBackend {
    pub fn new(base_url: &str, api_key: &str, bucket: &str, table: &str) -> Result<Self, StoreError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            bucket: bucket.to_string(),
            table: table.to_string(),
            session: RwLock::new(None),
            listeners: Mutex::new(Vec::new()),
        })
    }

    fn bearer(&self) -> String {
        self.session
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|s| s.identity.access_token.clone())
            .unwrap_or_else(|| self.api_key.clone())
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("apikey", &self.api_key)
            .bearer_auth(self.bearer())
    }

    fn table_url(&self) -> String {
        format!("{}/rest/v1/{}", self.base_url, self.table)
    }

    fn object_url(&self, path: &str) -> String {
        format!(
            "{}/storage/v1/object/{}/{}",
            self.base_url,
            self.bucket,
            encode_path(path)
        )
    }

    fn set_session(&self, session: Option<RemoteSession>) {
        *self.session.write().unwrap_or_else(PoisonError::into_inner) = session;
    }

    fn broadcast(&self, event: SessionEvent) {
        let mut listeners = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
        listeners.retain(|listener| listener.send(event.clone()).is_ok());
    }

    fn identity_from(token: TokenResponse, fallback_email: &str) -> RemoteSession {
        RemoteSession {
            identity: Identity {
                user_id: token.user.id,
                email: token.user.email.unwrap_or_else(|| fallback_email.to_string()),
                access_token: token.access_token,
            },
            refresh_token: token.refresh_token,
        }
    }

    /// Exchange the refresh token for a new access token
    ///
    /// Emits `SessionEvent::TokenRefreshed` on success.
    pub async fn refresh_session(&self) -> Result<Identity, AuthError> {
        let current = self
            .session
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(AuthError::NotSignedIn)?;
        let refresh_token = current.refresh_token.ok_or(AuthError::NotSignedIn)?;

        let response = self
            .http_client
            .post(format!("{}/auth/v1/token?grant_type=refresh_token", self.base_url))
            .header("apikey", &self.api_key)
            .json(&json!({ "refresh_token": refresh_token }))
            .send()
            .await
            .map_err(|e| AuthError::Backend(e.to_string()))?;
        let token: TokenResponse = auth_json(response).await?;

        let session = Self::identity_from(token, &current.identity.email);
        let identity = session.identity.clone();
        self.set_session(Some(session));
        self.broadcast(SessionEvent::TokenRefreshed(identity.clone()));
        Ok(identity)
    }
}

/// Percent-encode each segment of a blob path, keeping the separators
fn encode_path(path: &str) -> String {
    path.split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// Turn a non-success response into `StoreError::Api`
async fn check(response: Response) -> Result<Response, StoreError> {
    check_status(response, false).await
}

/// Like [`check`], for requests sent with the single-object `Accept` header
async fn check_single(response: Response) -> Result<Response, StoreError> {
    check_status(response, true).await
}

async fn check_status(response: Response, single_object: bool) -> Result<Response, StoreError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = response.text().await.unwrap_or_default();
    Err(status_error(status, message, single_object))
}

/// Map a failed status onto the store error taxonomy
///
/// PostgREST answers 406 when a single-object request matches no row.
fn status_error(status: StatusCode, message: String, single_object: bool) -> StoreError {
    if status == StatusCode::NOT_FOUND
        || (single_object && status == StatusCode::NOT_ACCEPTABLE)
    {
        return StoreError::NotFound(message);
    }
    StoreError::Api {
        status: status.as_u16(),
        message,
    }
}

async fn auth_json<T: serde::de::DeserializeOwned>(response: Response) -> Result<T, AuthError> {
    let status = response.status();
    if status == StatusCode::BAD_REQUEST || status == StatusCode::UNAUTHORIZED {
        return Err(AuthError::InvalidCredentials);
    }
    if status == StatusCode::UNPROCESSABLE_ENTITY {
        return Err(AuthError::AlreadyRegistered);
    }
    if !status.is_success() {
        let message = response.text().await.unwrap_or_default();
        return Err(AuthError::Backend(format!("{}: {}", status.as_u16(), message)));
    }
    response
        .json()
        .await
        .map_err(|e| AuthError::Backend(e.to_string()))
}

#[async_trait]
impl AuthProvider for RemoteBackend {
    async fn get_session(&self) -> Result<Option<Identity>, AuthError> {
        let current = self
            .session
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let Some(current) = current else {
            return Ok(None);
        };

        let response = self
            .authorized(self.http_client.get(format!("{}/auth/v1/user", self.base_url)))
            .send()
            .await
            .map_err(|e| AuthError::Backend(e.to_string()))?;

        if response.status() == StatusCode::UNAUTHORIZED {
            log::info!("Stored session was rejected; treating as signed out");
            self.set_session(None);
            self.broadcast(SessionEvent::SignedOut);
            return Ok(None);
        }
        let _user: AuthUser = auth_json(response).await?;
        Ok(Some(current.identity))
    }

    fn on_session_change(&self, listener: UnboundedSender<SessionEvent>) {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }

    async fn sign_up(&self, credentials: &Credentials) -> Result<Option<Identity>, AuthError> {
        credentials.validate()?;
        let response = self
            .http_client
            .post(format!("{}/auth/v1/signup", self.base_url))
            .header("apikey", &self.api_key)
            .json(credentials)
            .send()
            .await
            .map_err(|e| AuthError::Backend(e.to_string()))?;

        match auth_json::<SignUpResponse>(response).await? {
            SignUpResponse::Session(token) => {
                let session = Self::identity_from(token, &credentials.email);
                let identity = session.identity.clone();
                self.set_session(Some(session));
                self.broadcast(SessionEvent::SignedIn(identity.clone()));
                Ok(Some(identity))
            }
            SignUpResponse::User(user) => {
                log::info!("Registered user {}; confirmation pending", user.id);
                Ok(None)
            }
        }
    }

    async fn sign_in(&self, credentials: &Credentials) -> Result<Identity, AuthError> {
        credentials.validate()?;
        let response = self
            .http_client
            .post(format!("{}/auth/v1/token?grant_type=password", self.base_url))
            .header("apikey", &self.api_key)
            .json(credentials)
            .send()
            .await
            .map_err(|e| AuthError::Backend(e.to_string()))?;
        let token: TokenResponse = auth_json(response).await?;

        let session = Self::identity_from(token, &credentials.email);
        let identity = session.identity.clone();
        self.set_session(Some(session));
        self.broadcast(SessionEvent::SignedIn(identity.clone()));
        Ok(identity)
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        let response = self
            .authorized(self.http_client.post(format!("{}/auth/v1/logout", self.base_url)))
            .send()
            .await;

        // The local session ends regardless of what the server says
        self.set_session(None);
        self.broadcast(SessionEvent::SignedOut);

        match response {
            Ok(r) if r.status().is_success() => Ok(()),
            Ok(r) => Err(AuthError::Backend(format!("logout returned {}", r.status()))),
            Err(e) => Err(AuthError::Backend(e.to_string())),
        }
    }
}

#[async_trait]
impl RecordStore for RemoteBackend {
    async fn select(&self, owner: &str) -> Result<Vec<Entry>, StoreError> {
        let response = self
            .authorized(self.http_client.get(self.table_url()))
            .query(&[
                ("select", "*".to_string()),
                ("user_id", format!("eq.{}", owner)),
                ("order", "created_at.desc".to_string()),
            ])
            .send()
            .await?;

        check(response)
            .await?
            .json()
            .await
            .map_err(|e| StoreError::Parse(e.to_string()))
    }

    async fn fetch(&self, id: &str) -> Result<Entry, StoreError> {
        let response = self
            .authorized(self.http_client.get(self.table_url()))
            .header("Accept", SINGLE_OBJECT)
            .query(&[("select", "*".to_string()), ("id", format!("eq.{}", id))])
            .send()
            .await?;

        check_single(response)
            .await?
            .json()
            .await
            .map_err(|e| StoreError::Parse(e.to_string()))
    }

    async fn insert(&self, entry: NewEntry) -> Result<Entry, StoreError> {
        let response = self
            .authorized(self.http_client.post(self.table_url()))
            .header("Prefer", "return=representation")
            .header("Accept", SINGLE_OBJECT)
            .json(&entry)
            .send()
            .await?;

        check(response)
            .await?
            .json()
            .await
            .map_err(|e| StoreError::Parse(e.to_string()))
    }

    async fn update(&self, id: &str, patch: EntryPatch) -> Result<(), StoreError> {
        let response = self
            .authorized(self.http_client.patch(self.table_url()))
            .query(&[("id", format!("eq.{}", id))])
            .json(&patch)
            .send()
            .await?;
        check(response).await?;
        Ok(())
    }

    async fn delete_by_id(&self, id: &str) -> Result<(), StoreError> {
        let response = self
            .authorized(self.http_client.delete(self.table_url()))
            .query(&[("id", format!("eq.{}", id))])
            .send()
            .await?;
        check(response).await?;
        Ok(())
    }

    async fn delete_by_owner(&self, owner: &str) -> Result<(), StoreError> {
        let response = self
            .authorized(self.http_client.delete(self.table_url()))
            .query(&[("user_id", format!("eq.{}", owner))])
            .send()
            .await?;
        check(response).await?;
        Ok(())
    }
}

#[async_trait]
impl BlobStore for RemoteBackend {
    async fn upload(
        &self,
        path: &str,
        bytes: Vec<u8>,
        content_type: Option<&str>,
    ) -> Result<(), StoreError> {
        let response = self
            .authorized(self.http_client.post(self.object_url(path)))
            .header(
                "Content-Type",
                content_type.unwrap_or("application/octet-stream"),
            )
            .body(bytes)
            .send()
            .await?;
        check(response).await?;
        Ok(())
    }

    async fn remove(&self, paths: &[String]) -> Result<(), StoreError> {
        let response = self
            .authorized(self.http_client.delete(format!(
                "{}/storage/v1/object/{}",
                self.base_url, self.bucket
            )))
            .json(&json!({ "prefixes": paths }))
            .send()
            .await?;
        check(response).await?;
        Ok(())
    }

    fn resolve(&self, path: &str) -> String {
        format!(
            "{}/storage/v1/object/public/{}/{}",
            self.base_url,
            self.bucket,
            encode_path(path)
        )
    }

    async fn fetch(&self, location: &str) -> Result<Vec<u8>, StoreError> {
        let response = self.http_client.get(location).send().await?;
        let bytes = check(response).await?.bytes().await?;
        Ok(bytes.to_vec())
    }
}
