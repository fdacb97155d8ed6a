//! Single choke point for backend I/O and auth state.
//!
//! Every table operation returns its own `Result`. What the UI observes
//! (busy indicator, last error, signed-in user) is derived here:
//!
//! - `in_flight` counts outstanding calls, so an operation finishing never
//!   clears the busy state of another one still running;
//! - `last_error` keeps the most recent failure message for display and is
//!   overwritten by each new failure;
//! - the current user is published through a `watch` channel.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::backend::{AuthResponse, AuthStateChange, Backend, Credentials, User};
use crate::error::{Error, Result};
use crate::query::{FetchOptions, Filter};

pub struct DataAccessClient {
    backend: Arc<dyn Backend>,
    user: Arc<watch::Sender<Option<User>>>,
    in_flight: AtomicUsize,
    last_error: Mutex<Option<String>>,
}

impl DataAccessClient {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        let (user, _) = watch::channel(None);
        Self {
            backend,
            user: Arc::new(user),
            in_flight: AtomicUsize::new(0),
            last_error: Mutex::new(None),
        }
    }

    pub fn user(&self) -> Option<User> {
        self.user.borrow().clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.user.borrow().is_some()
    }

    /// Follow sign-in/sign-out as it happens.
    pub fn watch_user(&self) -> watch::Receiver<Option<User>> {
        self.user.subscribe()
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight() > 0
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error
            .lock()
            .map(|slot| slot.clone())
            .unwrap_or_default()
    }

    pub fn clear_error(&self) {
        self.set_error(None);
    }

    /// Ask the backend who is signed in. Failures are recorded and logged,
    /// never returned: probing the session must not block the caller.
    pub async fn get_current_user(&self) -> Option<User> {
        let _busy = BusyGuard::enter(&self.in_flight);
        match self.backend.get_user().await {
            Ok(user) => {
                self.user.send_replace(user.clone());
                user
            }
            Err(err) => {
                warn!(error = %err, "failed to get current user");
                self.set_error(Some(err.to_string()));
                None
            }
        }
    }

    /// Sign in with email and password. The error is recorded and returned so
    /// the caller can show it next to the form.
    pub async fn sign_in(&self, email: &str, password: &str) -> Result<AuthResponse> {
        let credentials = Credentials::new(email, password);
        let response = self
            .track("sign_in", self.backend.sign_in_with_password(&credentials))
            .await?;
        self.user.send_replace(response.user.clone());
        info!(email, "signed in");
        Ok(response)
    }

    /// Register a new account. The shared user is left alone; the backend's
    /// auth-state stream reports the new session if one was opened.
    pub async fn sign_up(&self, email: &str, password: &str) -> Result<AuthResponse> {
        let credentials = Credentials::new(email, password);
        let response = self
            .track("sign_up", self.backend.sign_up(&credentials))
            .await?;
        info!(email, confirmed = response.session.is_some(), "signed up");
        Ok(response)
    }

    /// Sign out. A failure is recorded and logged but not returned, so
    /// navigation away from an authenticated view is never blocked.
    pub async fn sign_out(&self) {
        let _busy = BusyGuard::enter(&self.in_flight);
        match self.backend.sign_out().await {
            Ok(()) => {
                self.user.send_replace(None);
                info!("signed out");
            }
            Err(err) => {
                error!(error = %err, "failed to sign out");
                self.set_error(Some(err.to_string()));
            }
        }
    }

    /// Probe the current session once, then follow the backend's auth-state
    /// stream until the returned handle is dropped or unsubscribed.
    pub fn init_auth(self: &Arc<Self>) -> AuthSubscription {
        // Subscribe before probing so a change racing the probe is not lost.
        let mut events = self.backend.auth_events();
        let client = Arc::clone(self);

        let task = tokio::spawn(async move {
            client.get_current_user().await;
            loop {
                match events.recv().await {
                    Ok(change) => client.apply_auth_change(&change),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "auth listener lagged behind");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            debug!("auth listener stopped");
        });

        AuthSubscription { task: Some(task) }
    }

    fn apply_auth_change(&self, change: &AuthStateChange) {
        debug!(event = ?change.event, "auth state changed");
        self.user.send_replace(change.user());
    }

    /// Read rows from `table`.
    pub async fn fetch_data(&self, table: &str, options: &FetchOptions) -> Result<Vec<Value>> {
        let rows = self
            .track("fetch", self.backend.select(table, options))
            .await?;
        debug!(table, rows = rows.len(), "fetched rows");
        Ok(rows)
    }

    /// [`fetch_data`](Self::fetch_data) decoded into `T`.
    pub async fn fetch_as<T: DeserializeOwned>(
        &self,
        table: &str,
        options: &FetchOptions,
    ) -> Result<Vec<T>> {
        let rows = self.fetch_data(table, options).await?;
        rows.into_iter()
            .map(|row| serde_json::from_value(row).map_err(|err| self.fail(Error::decode(table, err))))
            .collect()
    }

    /// Insert one row and return what the backend stored.
    pub async fn insert_data<T: Serialize + ?Sized>(&self, table: &str, row: &T) -> Result<Vec<Value>> {
        let row = self.encode(table, row)?;
        self.track("insert", self.backend.insert(table, vec![row]))
            .await
    }

    /// Apply a partial update to the row whose `id` matches and return the
    /// updated row(s).
    pub async fn update_data<T: Serialize + ?Sized>(
        &self,
        table: &str,
        id: i64,
        patch: &T,
    ) -> Result<Vec<Value>> {
        let patch = self.encode(table, patch)?;
        let filters = [Filter::eq("id", id)];
        self.track("update", self.backend.update(table, &filters, patch))
            .await
    }

    /// Delete the row whose `id` matches. Deleting a row that is already gone
    /// still succeeds.
    pub async fn delete_data(&self, table: &str, id: i64) -> Result<bool> {
        self.delete_matching(table, &[Filter::eq("id", id)]).await
    }

    /// Delete every row matching all `filters` (composite keys such as
    /// junction rows).
    pub async fn delete_matching(&self, table: &str, filters: &[Filter]) -> Result<bool> {
        let removed = self
            .track("delete", self.backend.delete(table, filters))
            .await?;
        debug!(table, removed = removed.len(), "deleted rows");
        Ok(true)
    }

    /// Run a backend call with the busy counter held, clearing the last error
    /// up front and recording it on failure.
    async fn track<T, F>(&self, operation: &'static str, call: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let _busy = BusyGuard::enter(&self.in_flight);
        self.clear_error();
        call.await.map_err(|err| {
            error!(operation, error = %err, "backend request failed");
            self.fail(err)
        })
    }

    fn encode<T: Serialize + ?Sized>(&self, table: &str, value: &T) -> Result<Value> {
        serde_json::to_value(value).map_err(|err| self.fail(Error::decode(table, err)))
    }

    fn fail(&self, err: Error) -> Error {
        self.set_error(Some(err.to_string()));
        err
    }

    fn set_error(&self, message: Option<String>) {
        match self.last_error.lock() {
            Ok(mut slot) => *slot = message,
            Err(_) => warn!("last-error lock poisoned"),
        }
    }
}

/// Handle for the auth-state listener started by
/// [`DataAccessClient::init_auth`]. Dropping it stops the listener.
pub struct AuthSubscription {
    task: Option<JoinHandle<()>>,
}

impl AuthSubscription {
    pub fn unsubscribe(mut self) {
        self.stop();
    }

    pub fn is_active(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for AuthSubscription {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Increments the in-flight counter for its lifetime.
struct BusyGuard<'a> {
    counter: &'a AtomicUsize,
}

impl<'a> BusyGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self { counter }
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::SeqCst);
    }
}
