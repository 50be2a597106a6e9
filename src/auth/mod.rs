//! Authentication client and the session change stream.
//!
//! [`Auth`] owns the process-wide mirror of the remote session. Every
//! successful operation that changes the session updates the store and then
//! broadcasts an [`AuthEvent`]; failed operations do neither. Components
//! that track the session subscribe to the stream instead of polling.

mod session;
mod types;

use log::debug;
use reqwest::Client;
use std::sync::{Arc, RwLock};
use tokio::sync::broadcast;

use crate::config::ClientOptions;
use crate::error::AuthError;

pub use types::{AuthEvent, AuthEventKind, AuthResponse, Profile, Session, User, UserAttributes};

/// Client for the authentication endpoints
pub struct Auth {
    /// The base URL for the project
    url: String,

    /// The anonymous API key for the project
    key: String,

    /// HTTP client used for requests
    http_client: Client,

    /// The current session
    current_session: Arc<RwLock<Option<Session>>>,

    /// Session change stream
    events: broadcast::Sender<AuthEvent>,
}

impl Auth {
    /// Create a new Auth client
    pub(crate) fn new(url: &str, key: &str, http_client: Client, options: &ClientOptions) -> Self {
        let (events, _) = broadcast::channel(options.auth_event_capacity.max(1));
        Self {
            url: url.to_string(),
            key: key.to_string(),
            http_client,
            current_session: Arc::new(RwLock::new(None)),
            events,
        }
    }

    fn auth_url(&self, path: &str) -> String {
        format!("{}/auth/v1{}", self.url, path)
    }

    /// Subscribe to session changes.
    ///
    /// Events sent before this call are not replayed; read
    /// [`Auth::get_session`] after subscribing to pick up the current value.
    pub fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }

    pub(crate) fn receiver_count(&self) -> usize {
        self.events.receiver_count()
    }

    /// Get the current session
    pub fn get_session(&self) -> Option<Session> {
        let current_session = self.current_session.read().unwrap();
        current_session.clone()
    }

    /// Restore a previously issued session, for example one loaded from
    /// disk at startup. Emits a `SignedIn` event.
    pub fn set_session(&self, mut session: Session) {
        session.backfill_expiry();
        self.store_session(Some(session), AuthEventKind::SignedIn);
    }

    // Store and emission happen under one write guard so subscribers see
    // events in store order.
    fn store_session(&self, session: Option<Session>, kind: AuthEventKind) {
        let mut current_session = self.current_session.write().unwrap();
        *current_session = session.clone();
        debug!("auth event: {:?}", kind);
        if self.events.send(AuthEvent { kind, session }).is_err() {
            debug!("auth event {:?} had no subscribers", kind);
        }
    }

    fn patch_user(&self, user: User) {
        let mut current_session = self.current_session.write().unwrap();
        if let Some(session) = current_session.as_mut() {
            session.user = user;
            let event = AuthEvent {
                kind: AuthEventKind::UserUpdated,
                session: Some(session.clone()),
            };
            debug!("auth event: {:?}", event.kind);
            if self.events.send(event).is_err() {
                debug!("auth event UserUpdated had no subscribers");
            }
        }
    }

    /// Register a new user with email, password and optional profile
    /// metadata.
    ///
    /// Depending on project settings the response carries either a ready
    /// session (auto-confirm) or only the pending user (email confirmation
    /// required). A session is stored and announced only when one was
    /// actually issued.
    pub async fn sign_up(
        &self,
        email: &str,
        password: &str,
        data: Option<serde_json::Value>,
    ) -> Result<AuthResponse, AuthError> {
        let url = self.auth_url("/signup");

        let mut payload = serde_json::json!({
            "email": email,
            "password": password,
        });
        if let Some(data) = data {
            payload["data"] = data;
        }

        let response = self
            .http_client
            .post(&url)
            .header("apikey", &self.key)
            .header("Content-Type", "application/json")
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await?;
            return Err(AuthError::from_response(status, &body));
        }

        let body = response.json::<serde_json::Value>().await?;

        if body.get("access_token").is_some() {
            let mut session: Session = serde_json::from_value(body)?;
            session.backfill_expiry();
            let user = session.user.clone();
            self.store_session(Some(session.clone()), AuthEventKind::SignedIn);
            Ok(AuthResponse {
                user: Some(user),
                session: Some(session),
            })
        } else {
            let user: User = serde_json::from_value(body)?;
            Ok(AuthResponse {
                user: Some(user),
                session: None,
            })
        }
    }

    /// Sign in with email and password
    pub async fn sign_in(&self, email: &str, password: &str) -> Result<Session, AuthError> {
        let url = self.auth_url("/token?grant_type=password");

        let payload = serde_json::json!({
            "email": email,
            "password": password,
        });

        let response = self
            .http_client
            .post(&url)
            .header("apikey", &self.key)
            .header("Content-Type", "application/json")
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await?;
            return Err(AuthError::from_response(status, &body));
        }

        let mut session: Session = response.json().await?;
        session.backfill_expiry();
        self.store_session(Some(session.clone()), AuthEventKind::SignedIn);

        Ok(session)
    }

    /// Sign out the current user
    pub async fn sign_out(&self) -> Result<(), AuthError> {
        let session = self.get_session().ok_or(AuthError::MissingSession)?;

        let url = self.auth_url("/logout");

        let response = self
            .http_client
            .post(&url)
            .header("apikey", &self.key)
            .header("Authorization", format!("Bearer {}", session.access_token))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await?;
            return Err(AuthError::from_response(status, &body));
        }

        self.store_session(None, AuthEventKind::SignedOut);

        Ok(())
    }

    /// Exchange the refresh token for a new session
    pub async fn refresh_session(&self) -> Result<Session, AuthError> {
        let session = self.get_session().ok_or(AuthError::MissingSession)?;

        let url = self.auth_url("/token?grant_type=refresh_token");

        let payload = serde_json::json!({
            "refresh_token": session.refresh_token,
        });

        let response = self
            .http_client
            .post(&url)
            .header("apikey", &self.key)
            .header("Content-Type", "application/json")
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await?;
            return Err(AuthError::from_response(status, &body));
        }

        let mut new_session: Session = response.json().await?;
        new_session.backfill_expiry();
        self.store_session(Some(new_session.clone()), AuthEventKind::TokenRefreshed);

        Ok(new_session)
    }

    /// Fetch the user data for the currently authenticated user
    pub async fn get_user(&self) -> Result<User, AuthError> {
        let session = self.get_session().ok_or(AuthError::MissingSession)?;

        let url = self.auth_url("/user");

        let response = self
            .http_client
            .get(&url)
            .header("apikey", &self.key)
            .header("Authorization", format!("Bearer {}", session.access_token))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await?;
            return Err(AuthError::from_response(status, &body));
        }

        let user: User = response.json().await?;

        Ok(user)
    }

    /// Update the authenticated user's attributes.
    ///
    /// On success the stored session is patched with the returned user and
    /// a `UserUpdated` event announces the change.
    pub async fn update_user(&self, attributes: UserAttributes) -> Result<User, AuthError> {
        let session = self.get_session().ok_or(AuthError::MissingSession)?;

        let url = self.auth_url("/user");

        let response = self
            .http_client
            .put(&url)
            .header("apikey", &self.key)
            .header("Authorization", format!("Bearer {}", session.access_token))
            .header("Content-Type", "application/json")
            .json(&attributes)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await?;
            return Err(AuthError::from_response(status, &body));
        }

        let user: User = response.json().await?;
        self.patch_user(user.clone());

        Ok(user)
    }

    /// Send a password reset email
    pub async fn reset_password_for_email(&self, email: &str) -> Result<(), AuthError> {
        let url = self.auth_url("/recover");

        let payload = serde_json::json!({
            "email": email,
        });

        let response = self
            .http_client
            .post(&url)
            .header("apikey", &self.key)
            .header("Content-Type", "application/json")
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await?;
            return Err(AuthError::from_response(status, &body));
        }

        Ok(())
    }
}
