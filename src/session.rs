use crate::backend::{AuthProvider, Credentials, Identity, SessionEvent};
use crate::error::AuthError;
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedReceiver};

/// Local mirror of the auth provider's session
///
/// The provider pushes `SessionEvent`s into a channel owned by the manager;
/// the owner of the application context calls [`SessionManager::sync`] to
/// apply them. The mirror is the only session state the application keeps.
pub struct SessionManager {
    auth: Arc<dyn AuthProvider>,
    current: Option<Identity>,
    events: UnboundedReceiver<SessionEvent>,
}

impl SessionManager {
    /// Subscribe to the provider and load whatever session already exists
    pub async fn start(auth: Arc<dyn AuthProvider>) -> Self {
        let (tx, events) = mpsc::unbounded_channel();
        auth.on_session_change(tx);

        let current = match auth.get_session().await {
            Ok(current) => current,
            Err(e) => {
                log::error!("Failed to read current session: {}", e);
                None
            }
        };

        let mut manager = SessionManager {
            auth,
            current,
            events,
        };
        // Anything emitted while reading the session is already reflected
        manager.sync();
        manager
    }

    pub fn identity(&self) -> Option<&Identity> {
        self.current.as_ref()
    }

    pub fn is_signed_in(&self) -> bool {
        self.current.is_some()
    }

    /// Apply every pending session event; returns whether the identity changed
    pub fn sync(&mut self) -> bool {
        let before = self.current.as_ref().map(|i| i.user_id.clone());

        while let Ok(event) = self.events.try_recv() {
            match event {
                SessionEvent::SignedIn(identity) | SessionEvent::TokenRefreshed(identity) => {
                    log::debug!("Session event for {}", identity.user_id);
                    self.current = Some(identity);
                }
                SessionEvent::SignedOut => {
                    log::debug!("Session ended");
                    self.current = None;
                }
            }
        }

        before != self.current.as_ref().map(|i| i.user_id.clone())
    }

    pub async fn sign_up(&mut self, credentials: &Credentials) -> Result<Option<Identity>, AuthError> {
        let outcome = self.auth.sign_up(credentials).await;
        self.sync();
        outcome
    }

    pub async fn sign_in(&mut self, credentials: &Credentials) -> Result<Identity, AuthError> {
        let identity = self.auth.sign_in(credentials).await?;
        self.sync();
        // Providers without push notifications still leave us signed in
        if self.current.is_none() {
            self.current = Some(identity.clone());
        }
        Ok(identity)
    }

    /// End the session; the mirror is cleared even when the provider errors
    pub async fn sign_out(&mut self) -> Result<(), AuthError> {
        let outcome = self.auth.sign_out().await;
        self.sync();
        self.current = None;
        outcome
    }
}
