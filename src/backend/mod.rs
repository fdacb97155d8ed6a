//! The seam between the data-access client and whatever service stores the
//! tables and owns authentication.
//!
//! Two implementations ship with the crate: [`RestBackend`] talks to the hosted
//! service over HTTP, and [`crate::db::SqliteBackend`] keeps everything in an
//! embedded SQLite file for offline use and tests.

mod rest;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;

use crate::config::BackendConfig;
use crate::db::SqliteBackend;
use crate::error::Result;
use crate::query::{FetchOptions, Filter};

pub use rest::RestBackend;

/// Capacity of the auth-state broadcast channel. Slow listeners skip ahead.
pub(crate) const AUTH_EVENT_CAPACITY: usize = 16;

#[async_trait]
pub trait Backend: Send + Sync {
    /// Run a projected, filtered, ordered and limited read.
    async fn select(&self, table: &str, options: &FetchOptions) -> Result<Vec<Value>>;

    /// Insert rows and echo them back as stored.
    async fn insert(&self, table: &str, rows: Vec<Value>) -> Result<Vec<Value>>;

    /// Apply `patch` to every row matching `filters`, echoing the new rows.
    async fn update(&self, table: &str, filters: &[Filter], patch: Value) -> Result<Vec<Value>>;

    /// Delete every row matching `filters`, echoing the removed rows.
    async fn delete(&self, table: &str, filters: &[Filter]) -> Result<Vec<Value>>;

    /// The user behind the active session, if any.
    async fn get_user(&self) -> Result<Option<User>>;

    async fn sign_in_with_password(&self, credentials: &Credentials) -> Result<AuthResponse>;

    async fn sign_up(&self, credentials: &Credentials) -> Result<AuthResponse>;

    async fn sign_out(&self) -> Result<()>;

    /// Subscribe to auth-state changes for as long as the receiver lives.
    fn auth_events(&self) -> broadcast::Receiver<AuthStateChange>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    pub user: User,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
/// Result of a sign-in or sign-up. A sign-up that still needs email
/// confirmation carries a user but no session.
pub struct AuthResponse {
    pub user: Option<User>,
    pub session: Option<Session>,
}

#[derive(Clone, Serialize)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

impl Credentials {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthEvent {
    InitialSession,
    SignedIn,
    SignedOut,
    TokenRefreshed,
    UserUpdated,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthStateChange {
    pub event: AuthEvent,
    pub session: Option<Session>,
}

impl AuthStateChange {
    pub fn signed_in(session: Session) -> Self {
        Self {
            event: AuthEvent::SignedIn,
            session: Some(session),
        }
    }

    pub fn signed_out() -> Self {
        Self {
            event: AuthEvent::SignedOut,
            session: None,
        }
    }

    /// The user this change leaves signed in, if any.
    pub fn user(&self) -> Option<User> {
        if self.event == AuthEvent::SignedOut {
            return None;
        }
        self.session.as_ref().map(|session| session.user.clone())
    }
}

/// Build the backend named by the configuration.
pub fn connect(config: &BackendConfig) -> anyhow::Result<Arc<dyn Backend>> {
    let backend: Arc<dyn Backend> = match config {
        BackendConfig::Remote { url, anon_key } => Arc::new(RestBackend::new(url, anon_key)?),
        BackendConfig::Local { path, seed_demo } => {
            let backend = match path {
                Some(path) => SqliteBackend::open(path)?,
                None => SqliteBackend::open_default()?,
            };
            if *seed_demo {
                backend.seed_demo_data()?;
            }
            Arc::new(backend)
        }
    };
    Ok(backend)
}
