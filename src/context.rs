//! Session mirror shared by the user-facing parts of an application.
//!
//! [`SessionContext`] tracks the authentication session as a piece of
//! observable state. The mirror is only ever written from the auth change
//! stream: the sign-in/out operations here delegate to the remote service
//! and pick up the result through the stream like any other subscriber,
//! so every consumer sees the same sequence of states no matter who
//! triggered the change.

use log::{debug, warn};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use crate::auth::{Auth, AuthEvent, Profile, Session, UserAttributes};
use crate::error::AuthError;

/// Lifecycle phase of the session mirror
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// Startup reconciliation has not finished yet
    Initializing,
    /// A session is present
    Authenticated,
    /// No session
    Anonymous,
}

/// Snapshot of the mirrored session
#[derive(Debug, Clone)]
pub struct SessionState {
    pub phase: SessionPhase,
    pub session: Option<Session>,
    /// Display projection of the session's user, recomputed on every change
    pub profile: Option<Profile>,
}

impl SessionState {
    fn initializing() -> Self {
        Self {
            phase: SessionPhase::Initializing,
            session: None,
            profile: None,
        }
    }

    fn from_session(session: Option<Session>) -> Self {
        match session {
            Some(session) => {
                let profile = Profile::from_user(&session.user);
                Self {
                    phase: SessionPhase::Authenticated,
                    session: Some(session),
                    profile: Some(profile),
                }
            }
            None => Self {
                phase: SessionPhase::Anonymous,
                session: None,
                profile: None,
            },
        }
    }
}

/// Profile fields that can be changed through [`SessionContext::update_profile`]
#[derive(Debug, Clone, Default)]
pub struct ProfileUpdate {
    pub name: Option<String>,
    pub avatar_url: Option<String>,
}

/// Read-only mirror of the authentication session.
///
/// Constructed once at startup and handed to the components that need it;
/// dropping it stops the mirror task and releases the stream subscription.
pub struct SessionContext {
    auth: Arc<Auth>,
    state: watch::Receiver<SessionState>,
    mirror: JoinHandle<()>,
}

impl SessionContext {
    /// Start mirroring the session.
    ///
    /// The stream subscription is installed before the store snapshot is
    /// read, so a change landing between the two is buffered on the
    /// subscription instead of being lost; buffered events supersede the
    /// snapshot because they are newer.
    pub fn start(auth: Arc<Auth>) -> Self {
        let events = auth.subscribe();
        let snapshot = auth.get_session();

        let (state_tx, state_rx) = watch::channel(SessionState::initializing());

        let task_auth = auth.clone();
        let mirror = tokio::spawn(async move {
            Self::run_mirror(task_auth, events, snapshot, state_tx).await;
        });

        Self {
            auth,
            state: state_rx,
            mirror,
        }
    }

    async fn run_mirror(
        auth: Arc<Auth>,
        mut events: broadcast::Receiver<AuthEvent>,
        snapshot: Option<Session>,
        state: watch::Sender<SessionState>,
    ) {
        let mut current = snapshot;
        loop {
            match events.try_recv() {
                Ok(event) => current = event.session,
                Err(TryRecvError::Lagged(_)) => current = auth.get_session(),
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
            }
        }

        let initial = SessionState::from_session(current);
        debug!("session mirror ready: {:?}", initial.phase);
        state.send_replace(initial);

        loop {
            match events.recv().await {
                Ok(event) => {
                    debug!("session event: {:?}", event.kind);
                    state.send_replace(SessionState::from_session(event.session));
                }
                Err(RecvError::Lagged(missed)) => {
                    warn!("session stream lagged by {} events, reconciling", missed);
                    state.send_replace(SessionState::from_session(auth.get_session()));
                }
                Err(RecvError::Closed) => break,
            }
        }
    }

    /// Wait until startup reconciliation has finished
    pub async fn ready(&self) {
        let mut receiver = self.state.clone();
        while receiver.borrow_and_update().phase == SessionPhase::Initializing {
            if receiver.changed().await.is_err() {
                return;
            }
        }
    }

    /// Subscribe to mirror changes
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    /// Current mirror snapshot
    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    /// Display projection of the signed-in user, if any
    pub fn profile(&self) -> Option<Profile> {
        self.state.borrow().profile.clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.state.borrow().phase == SessionPhase::Authenticated
    }

    /// Sign in with email and password.
    ///
    /// On success the mirror updates through the stream; the error case
    /// leaves it untouched.
    pub async fn sign_in(&self, email: &str, password: &str) -> Result<(), AuthError> {
        self.auth.sign_in(email, password).await?;
        Ok(())
    }

    /// Register a new user.
    ///
    /// Projects that require email confirmation answer without a session;
    /// the call still succeeds and the mirror stays anonymous until the
    /// user signs in after confirming.
    pub async fn sign_up(
        &self,
        email: &str,
        password: &str,
        name: Option<&str>,
    ) -> Result<(), AuthError> {
        let data = name.map(|name| serde_json::json!({ "name": name }));
        self.auth.sign_up(email, password, data).await?;
        Ok(())
    }

    /// Sign out the current user
    pub async fn sign_out(&self) -> Result<(), AuthError> {
        self.auth.sign_out().await
    }

    /// Update the signed-in user's profile metadata.
    ///
    /// Concurrent updates resolve last-writer-wins at the service; the
    /// mirror applies the resulting events in the order they arrive.
    pub async fn update_profile(&self, update: ProfileUpdate) -> Result<(), AuthError> {
        let mut data = serde_json::Map::new();
        if let Some(name) = update.name {
            data.insert("name".to_string(), Value::String(name));
        }
        if let Some(avatar_url) = update.avatar_url {
            data.insert("avatar_url".to_string(), Value::String(avatar_url));
        }

        let attributes = UserAttributes {
            email: None,
            password: None,
            data: Some(Value::Object(data)),
        };
        self.auth.update_user(attributes).await?;
        Ok(())
    }
}

impl Drop for SessionContext {
    fn drop(&mut self) {
        self.mirror.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::User;
    use crate::config::ClientOptions;
    use reqwest::Client;
    use std::collections::HashMap;
    use std::time::Duration;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_auth(url: &str) -> Arc<Auth> {
        Arc::new(Auth::new(
            url,
            "test-key",
            Client::new(),
            &ClientOptions::default(),
        ))
    }

    fn test_session(name: &str) -> Session {
        let mut user_metadata = HashMap::new();
        user_metadata.insert(
            "name".to_string(),
            Value::String(name.to_string()),
        );
        Session {
            access_token: "access-1".to_string(),
            refresh_token: "refresh-1".to_string(),
            token_type: "bearer".to_string(),
            expires_in: 3600,
            expires_at: Some(4102444800),
            user: User {
                id: "user-1".to_string(),
                email: Some("ada@example.com".to_string()),
                phone: None,
                user_metadata,
                app_metadata: HashMap::new(),
                created_at: "2024-01-01T00:00:00Z".to_string(),
                updated_at: "2024-01-01T00:00:00Z".to_string(),
            },
        }
    }

    fn session_body() -> serde_json::Value {
        serde_json::json!({
            "access_token": "access-1",
            "refresh_token": "refresh-1",
            "token_type": "bearer",
            "expires_in": 3600,
            "user": {
                "id": "user-1",
                "email": "ada@example.com",
                "phone": null,
                "user_metadata": {"name": "Ada", "avatar_url": "https://cdn.example.com/ada.png"},
                "app_metadata": {},
                "created_at": "2024-01-01T00:00:00Z",
                "updated_at": "2024-01-01T00:00:00Z"
            }
        })
    }

    async fn wait_for<F>(receiver: &mut watch::Receiver<SessionState>, predicate: F) -> SessionState
    where
        F: Fn(&SessionState) -> bool,
    {
        loop {
            {
                let state = receiver.borrow_and_update();
                if predicate(&state) {
                    return state.clone();
                }
            }
            tokio::time::timeout(Duration::from_secs(1), receiver.changed())
                .await
                .expect("timed out waiting for session state")
                .expect("session state channel closed");
        }
    }

    #[test]
    fn test_startup_resolves_anonymous() {
        tokio_test::block_on(async {
            let auth = test_auth("http://localhost:9");
            let context = SessionContext::start(auth);
            context.ready().await;

            let state = context.state();
            assert_eq!(state.phase, SessionPhase::Anonymous);
            assert!(state.session.is_none());
            assert!(state.profile.is_none());
            assert!(!context.is_authenticated());
        });
    }

    #[test]
    fn test_startup_with_restored_session() {
        tokio_test::block_on(async {
            let auth = test_auth("http://localhost:9");
            auth.set_session(test_session("Ada"));

            let context = SessionContext::start(auth);
            context.ready().await;

            let state = context.state();
            assert_eq!(state.phase, SessionPhase::Authenticated);
            assert_eq!(context.profile().unwrap().name.as_deref(), Some("Ada"));
        });
    }

    #[test]
    fn test_sign_in_updates_mirror_through_stream() {
        tokio_test::block_on(async {
            let mock_server = MockServer::start().await;
            Mock::given(method("POST"))
                .and(path("/auth/v1/token"))
                .and(query_param("grant_type", "password"))
                .respond_with(ResponseTemplate::new(200).set_body_json(session_body()))
                .mount(&mock_server)
                .await;

            let auth = test_auth(&mock_server.uri());
            let context = SessionContext::start(auth);
            context.ready().await;
            assert!(!context.is_authenticated());

            let mut receiver = context.subscribe();
            context
                .sign_in("ada@example.com", "password123")
                .await
                .unwrap();

            let state = wait_for(&mut receiver, |state| {
                state.phase == SessionPhase::Authenticated
            })
            .await;

            let profile = state.profile.unwrap();
            assert_eq!(profile.id, "user-1");
            assert_eq!(profile.email, "ada@example.com");
            assert_eq!(profile.name.as_deref(), Some("Ada"));
            assert_eq!(
                profile.avatar_url.as_deref(),
                Some("https://cdn.example.com/ada.png")
            );
        });
    }

    #[test]
    fn test_failed_sign_in_leaves_mirror_untouched() {
        tokio_test::block_on(async {
            let mock_server = MockServer::start().await;
            Mock::given(method("POST"))
                .and(path("/auth/v1/token"))
                .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                    "code": 400,
                    "msg": "Invalid login credentials"
                })))
                .mount(&mock_server)
                .await;

            let auth = test_auth(&mock_server.uri());
            let context = SessionContext::start(auth);
            context.ready().await;

            let error = context
                .sign_in("ada@example.com", "wrong")
                .await
                .expect_err("sign-in should fail");
            assert_eq!(error.user_message(), "Invalid login credentials");

            // Give a stray event every chance to arrive before asserting
            tokio::time::sleep(Duration::from_millis(20)).await;
            let state = context.state();
            assert_eq!(state.phase, SessionPhase::Anonymous);
            assert!(state.session.is_none());
            assert!(state.profile.is_none());
        });
    }

    #[test]
    fn test_sign_up_pending_confirmation_stays_anonymous() {
        tokio_test::block_on(async {
            let mock_server = MockServer::start().await;
            Mock::given(method("POST"))
                .and(path("/auth/v1/signup"))
                .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                    "id": "user-2",
                    "email": "grace@example.com",
                    "phone": null,
                    "user_metadata": {},
                    "app_metadata": {},
                    "created_at": "2024-01-01T00:00:00Z",
                    "updated_at": "2024-01-01T00:00:00Z"
                })))
                .mount(&mock_server)
                .await;

            let auth = test_auth(&mock_server.uri());
            let context = SessionContext::start(auth);
            context.ready().await;

            context
                .sign_up("grace@example.com", "password123", Some("Grace"))
                .await
                .unwrap();

            tokio::time::sleep(Duration::from_millis(20)).await;
            assert_eq!(context.state().phase, SessionPhase::Anonymous);
        });
    }

    #[test]
    fn test_sign_out_returns_to_anonymous() {
        tokio_test::block_on(async {
            let mock_server = MockServer::start().await;
            Mock::given(method("POST"))
                .and(path("/auth/v1/logout"))
                .respond_with(ResponseTemplate::new(204))
                .mount(&mock_server)
                .await;

            let auth = test_auth(&mock_server.uri());
            auth.set_session(test_session("Ada"));

            let context = SessionContext::start(auth);
            context.ready().await;
            assert!(context.is_authenticated());

            let mut receiver = context.subscribe();
            context.sign_out().await.unwrap();

            let state =
                wait_for(&mut receiver, |state| state.phase == SessionPhase::Anonymous).await;
            assert!(state.session.is_none());
            assert!(state.profile.is_none());
        });
    }

    #[test]
    fn test_update_profile_updates_projection() {
        tokio_test::block_on(async {
            let mock_server = MockServer::start().await;
            Mock::given(method("PUT"))
                .and(path("/auth/v1/user"))
                .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                    "id": "user-1",
                    "email": "ada@example.com",
                    "phone": null,
                    "user_metadata": {"name": "Ada Lovelace"},
                    "app_metadata": {},
                    "created_at": "2024-01-01T00:00:00Z",
                    "updated_at": "2024-02-01T00:00:00Z"
                })))
                .mount(&mock_server)
                .await;

            let auth = test_auth(&mock_server.uri());
            auth.set_session(test_session("Ada"));

            let context = SessionContext::start(auth);
            context.ready().await;

            let mut receiver = context.subscribe();
            context
                .update_profile(ProfileUpdate {
                    name: Some("Ada Lovelace".to_string()),
                    avatar_url: None,
                })
                .await
                .unwrap();

            let state = wait_for(&mut receiver, |state| {
                state
                    .profile
                    .as_ref()
                    .and_then(|profile| profile.name.as_deref())
                    == Some("Ada Lovelace")
            })
            .await;

            // Still the same session, only the user changed
            assert_eq!(state.session.unwrap().access_token, "access-1");
        });
    }

    #[test]
    fn test_drop_releases_stream_subscription() {
        tokio_test::block_on(async {
            let auth = test_auth("http://localhost:9");
            let context = SessionContext::start(auth.clone());
            context.ready().await;
            assert_eq!(auth.receiver_count(), 1);

            drop(context);
            tokio::time::sleep(Duration::from_millis(20)).await;
            assert_eq!(auth.receiver_count(), 0);
        });
    }

    #[test]
    fn test_lagged_stream_reconciles_from_store() {
        tokio_test::block_on(async {
            let options = ClientOptions::default().with_auth_event_capacity(1);
            let auth = Arc::new(Auth::new(
                "http://localhost:9",
                "test-key",
                Client::new(),
                &options,
            ));

            let context = SessionContext::start(auth.clone());
            context.ready().await;

            // Two back-to-back store changes overflow the single-slot
            // stream; the mirror falls back to the store snapshot.
            let mut first = test_session("Ada");
            first.access_token = "token-a".to_string();
            auth.set_session(first);
            let mut second = test_session("Ada");
            second.access_token = "token-b".to_string();
            auth.set_session(second);

            let mut receiver = context.subscribe();
            let state = wait_for(&mut receiver, |state| {
                state
                    .session
                    .as_ref()
                    .map(|session| session.access_token.as_str())
                    == Some("token-b")
            })
            .await;
            assert_eq!(state.phase, SessionPhase::Authenticated);
        });
    }
}
