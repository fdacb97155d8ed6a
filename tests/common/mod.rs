#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use music_board::backend::{AuthResponse, AuthStateChange, Backend, Credentials, User};
use music_board::{DataAccessClient, Error, FetchOptions, Filter, MusicBoardStore, Result, SqliteBackend};
use serde_json::Value;
use tokio::sync::broadcast;

/// In-memory SQLite backend that can be told to fail specific calls.
pub struct FlakyBackend {
    inner: SqliteBackend,
    failing_tables: Mutex<HashSet<String>>,
    silent_tables: Mutex<HashSet<String>>,
    fail_auth: AtomicBool,
    select_calls: AtomicUsize,
}

impl FlakyBackend {
    pub fn new() -> Self {
        Self {
            inner: SqliteBackend::open_in_memory().expect("in-memory database"),
            failing_tables: Mutex::new(HashSet::new()),
            silent_tables: Mutex::new(HashSet::new()),
            fail_auth: AtomicBool::new(false),
            select_calls: AtomicUsize::new(0),
        }
    }

    /// Every call touching `table` fails until [`heal`](Self::heal).
    pub fn break_table(&self, table: &str) {
        self.failing_tables.lock().unwrap().insert(table.to_string());
    }

    /// Inserts into `table` are written but echo no rows.
    pub fn hide_echo(&self, table: &str) {
        self.silent_tables.lock().unwrap().insert(table.to_string());
    }

    pub fn heal(&self) {
        self.failing_tables.lock().unwrap().clear();
        self.silent_tables.lock().unwrap().clear();
        self.fail_auth.store(false, Ordering::SeqCst);
    }

    /// `get_user` and `sign_out` fail until [`heal`](Self::heal).
    pub fn break_auth(&self) {
        self.fail_auth.store(true, Ordering::SeqCst);
    }

    pub fn select_calls(&self) -> usize {
        self.select_calls.load(Ordering::SeqCst)
    }

    fn check(&self, table: &str) -> Result<()> {
        if self.failing_tables.lock().unwrap().contains(table) {
            return Err(Error::query(table, format!("{table} is unavailable")));
        }
        Ok(())
    }

    fn check_auth(&self) -> Result<()> {
        if self.fail_auth.load(Ordering::SeqCst) {
            return Err(Error::auth("Auth service unreachable"));
        }
        Ok(())
    }
}

#[async_trait]
impl Backend for FlakyBackend {
    async fn select(&self, table: &str, options: &FetchOptions) -> Result<Vec<Value>> {
        self.select_calls.fetch_add(1, Ordering::SeqCst);
        self.check(table)?;
        self.inner.select(table, options).await
    }

    async fn insert(&self, table: &str, rows: Vec<Value>) -> Result<Vec<Value>> {
        self.check(table)?;
        let echoed = self.inner.insert(table, rows).await?;
        if self.silent_tables.lock().unwrap().contains(table) {
            return Ok(Vec::new());
        }
        Ok(echoed)
    }

    async fn update(&self, table: &str, filters: &[Filter], patch: Value) -> Result<Vec<Value>> {
        self.check(table)?;
        self.inner.update(table, filters, patch).await
    }

    async fn delete(&self, table: &str, filters: &[Filter]) -> Result<Vec<Value>> {
        self.check(table)?;
        self.inner.delete(table, filters).await
    }

    async fn get_user(&self) -> Result<Option<User>> {
        self.check_auth()?;
        self.inner.get_user().await
    }

    async fn sign_in_with_password(&self, credentials: &Credentials) -> Result<AuthResponse> {
        self.inner.sign_in_with_password(credentials).await
    }

    async fn sign_up(&self, credentials: &Credentials) -> Result<AuthResponse> {
        self.inner.sign_up(credentials).await
    }

    async fn sign_out(&self) -> Result<()> {
        self.check_auth()?;
        self.inner.sign_out().await
    }

    fn auth_events(&self) -> broadcast::Receiver<AuthStateChange> {
        self.inner.auth_events()
    }
}

pub struct Harness {
    pub backend: Arc<FlakyBackend>,
    pub client: Arc<DataAccessClient>,
}

impl Harness {
    pub fn new() -> Self {
        let backend = Arc::new(FlakyBackend::new());
        let client = Arc::new(DataAccessClient::new(backend.clone()));
        Self { backend, client }
    }

    pub fn store(&self) -> MusicBoardStore {
        MusicBoardStore::new(Arc::clone(&self.client))
    }
}
