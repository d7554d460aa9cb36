//! Persisted sign-in state.
//!
//! The session is stored as JSON under [`AUTH_KEY`] in the same
//! [`KeyValueStore`] as the task overlay. Its token is attached to gateway
//! requests as a bearer credential.

use serde::{Deserialize, Serialize};

use taskdeck_proto::wire::{LoginResponse, UserProfile};

use crate::storage::KeyValueStore;

/// Storage key of the auth session.
pub const AUTH_KEY: &str = "auth";

/// Signed-in user and credential.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthState {
    /// Profile of the signed-in user.
    pub user: Option<UserProfile>,
    /// Bearer token.
    pub token: Option<String>,
    /// `true` once a login succeeded.
    #[serde(rename = "isAuthenticated", default)]
    pub is_authenticated: bool,
}

impl AuthState {
    /// Id of the signed-in user, if any.
    #[must_use]
    pub fn user_id(&self) -> Option<i64> {
        self.user.as_ref().map(|u| u.id)
    }
}

/// Reads and writes [`AuthState`] through a key-value store.
#[derive(Debug)]
pub struct AuthStore<S: KeyValueStore> {
    store: S,
}

impl<S: KeyValueStore> AuthStore<S> {
    /// Wraps a key-value store.
    pub const fn new(store: S) -> Self {
        Self { store }
    }

    /// Loads the stored session; missing or malformed data reads as signed out.
    #[must_use]
    pub fn load(&self) -> AuthState {
        let Some(raw) = self.store.get(AUTH_KEY) else {
            return AuthState::default();
        };
        serde_json::from_str(&raw).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "malformed auth session, treating as signed out");
            AuthState::default()
        })
    }

    /// Token of an authenticated session.
    #[must_use]
    pub fn token(&self) -> Option<String> {
        let state = self.load();
        if state.is_authenticated { state.token } else { None }
    }

    /// Stores the result of a successful login and returns the new state.
    pub fn login_success(&self, response: LoginResponse) -> AuthState {
        let state = AuthState {
            user: Some(response.user),
            token: Some(response.access_token),
            is_authenticated: true,
        };
        match serde_json::to_string(&state) {
            Ok(raw) => self.store.set(AUTH_KEY, &raw),
            Err(e) => tracing::warn!(error = %e, "failed to encode auth session"),
        }
        tracing::info!(user_id = ?state.user_id(), "signed in");
        state
    }

    /// Forgets the stored session.
    pub fn logout(&self) {
        self.store.remove(AUTH_KEY);
        tracing::info!("signed out");
    }
}
