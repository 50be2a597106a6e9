//! Types for authentication and session tracking

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// User data as stored by the auth service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    /// The user ID
    pub id: String,

    /// The user's email address
    pub email: Option<String>,

    /// The user's phone number
    pub phone: Option<String>,

    /// Metadata owned by the application (display name, avatar, ...)
    #[serde(default)]
    pub user_metadata: HashMap<String, serde_json::Value>,

    /// Metadata owned by the auth service
    #[serde(default)]
    pub app_metadata: HashMap<String, serde_json::Value>,

    /// The creation time
    pub created_at: String,

    /// The update time
    pub updated_at: String,
}

/// Session data issued by the auth service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// The access token
    pub access_token: String,

    /// The refresh token
    pub refresh_token: String,

    /// The token type
    pub token_type: String,

    /// Lifetime of the access token in seconds
    pub expires_in: i64,

    /// Unix timestamp the access token expires at; not every endpoint
    /// includes it, see [`Session::is_expired`]
    #[serde(default)]
    pub expires_at: Option<i64>,

    /// The user the session belongs to
    pub user: User,
}

/// Result of a sign-up request.
///
/// Projects that require email confirmation answer with the pending user
/// only; auto-confirming projects answer with a ready session.
#[derive(Debug, Clone)]
pub struct AuthResponse {
    pub user: Option<User>,
    pub session: Option<Session>,
}

/// User attributes that can be updated
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserAttributes {
    /// Email address
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    /// Password
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    /// User metadata
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

/// Read-only projection of the signed-in user for display purposes.
///
/// Recomputed from the session on every change; never edited directly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Profile {
    pub id: String,
    /// Empty string when the account has no email
    pub email: String,
    pub name: Option<String>,
    pub avatar_url: Option<String>,
}

impl Profile {
    /// Project a user into its display form.
    pub fn from_user(user: &User) -> Self {
        Self {
            id: user.id.clone(),
            email: user.email.clone().unwrap_or_default(),
            name: metadata_string(user, "name"),
            avatar_url: metadata_string(user, "avatar_url"),
        }
    }
}

fn metadata_string(user: &User, key: &str) -> Option<String> {
    user.user_metadata
        .get(key)
        .and_then(|value| value.as_str())
        .map(String::from)
}

/// What changed about the session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthEventKind {
    SignedIn,
    SignedOut,
    TokenRefreshed,
    UserUpdated,
}

/// A change to the stored session, broadcast to subscribers.
///
/// `session` is the value after the change; `None` means signed out.
#[derive(Debug, Clone)]
pub struct AuthEvent {
    pub kind: AuthEventKind,
    pub session: Option<Session>,
}
