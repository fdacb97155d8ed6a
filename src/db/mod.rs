//! Local stand-in for the hosted backend, built on embedded SQLite.
//!
//! [`SqliteBackend`] answers the same [`Backend`] contract as the REST client
//! so the application can run without network access and the tests can drive
//! the client and store against real tables.

mod auth;
mod connection;
mod seed;
mod tables;

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use rusqlite::Connection;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::backend::{
    AuthResponse, AuthStateChange, Backend, Credentials, Session, User, AUTH_EVENT_CAPACITY,
};
use crate::error::{Error, Result};
use crate::query::{FetchOptions, Filter};

pub use connection::{default_db_path, ensure_schema, open_database, open_in_memory};

pub struct SqliteBackend {
    conn: Mutex<Connection>,
    session: Mutex<Option<Session>>,
    events: broadcast::Sender<AuthStateChange>,
}

impl SqliteBackend {
    /// Open the database at `path`, creating the file and schema as needed.
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        info!(path = %path.display(), "opening local database");
        Ok(Self::from_connection(open_database(path)?))
    }

    /// Open the database in the default data directory.
    pub fn open_default() -> anyhow::Result<Self> {
        Self::open(&default_db_path()?)
    }

    pub fn open_in_memory() -> anyhow::Result<Self> {
        Ok(Self::from_connection(open_in_memory()?))
    }

    fn from_connection(conn: Connection) -> Self {
        let (events, _) = broadcast::channel(AUTH_EVENT_CAPACITY);
        Self {
            conn: Mutex::new(conn),
            session: Mutex::new(None),
            events,
        }
    }

    /// Seed demo songs and a setlist when the database is empty.
    pub fn seed_demo_data(&self) -> anyhow::Result<bool> {
        let conn = self.connection()?;
        let seeded = seed::seed_demo_data(&conn)?;
        if seeded {
            info!("seeded demo data");
        }
        Ok(seeded)
    }

    fn connection(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::Unavailable("database connection lock poisoned".into()))
    }

    fn session(&self) -> Option<Session> {
        self.session
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }

    fn store_session(&self, session: Option<Session>) -> Result<()> {
        let mut guard = self
            .session
            .lock()
            .map_err(|_| Error::Unavailable("session lock poisoned".into()))?;
        *guard = session;
        Ok(())
    }

    fn start_session(&self, user: User) -> Result<AuthResponse> {
        let session = auth::open_session(user.clone());
        self.store_session(Some(session.clone()))?;
        let _ = self.events.send(AuthStateChange::signed_in(session.clone()));
        Ok(AuthResponse {
            user: Some(user),
            session: Some(session),
        })
    }
}

#[async_trait]
impl Backend for SqliteBackend {
    async fn select(&self, table: &str, options: &FetchOptions) -> Result<Vec<Value>> {
        let conn = self.connection()?;
        let rows = tables::select(&conn, table, options)?;
        debug!(table, rows = rows.len(), "local select");
        Ok(rows)
    }

    async fn insert(&self, table: &str, rows: Vec<Value>) -> Result<Vec<Value>> {
        let conn = self.connection()?;
        tables::insert(&conn, table, rows)
    }

    async fn update(&self, table: &str, filters: &[Filter], patch: Value) -> Result<Vec<Value>> {
        let conn = self.connection()?;
        tables::update(&conn, table, filters, patch)
    }

    async fn delete(&self, table: &str, filters: &[Filter]) -> Result<Vec<Value>> {
        let conn = self.connection()?;
        tables::delete(&conn, table, filters)
    }

    async fn get_user(&self) -> Result<Option<User>> {
        Ok(self.session().map(|session| session.user))
    }

    async fn sign_in_with_password(&self, credentials: &Credentials) -> Result<AuthResponse> {
        let user = {
            let conn = self.connection()?;
            auth::verify_user(&conn, credentials)?
        };
        self.start_session(user)
    }

    /// Local accounts are confirmed immediately, so sign-up also signs in.
    async fn sign_up(&self, credentials: &Credentials) -> Result<AuthResponse> {
        let user = {
            let conn = self.connection()?;
            auth::create_user(&conn, credentials)?
        };
        self.start_session(user)
    }

    async fn sign_out(&self) -> Result<()> {
        self.store_session(None)?;
        let _ = self.events.send(AuthStateChange::signed_out());
        Ok(())
    }

    fn auth_events(&self) -> broadcast::Receiver<AuthStateChange> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::backend::AuthEvent;
    use crate::query::FilterOp;

    async fn backend_with_songs() -> SqliteBackend {
        let backend = SqliteBackend::open_in_memory().unwrap();
        backend
            .insert(
                "songs",
                vec![
                    json!({"title": "Zebra Crossing", "artist": "Us", "duration": "3:00", "key": "C", "bpm": 120}),
                    json!({"title": "Anthem", "artist": "Us", "duration": "4:00", "key": "D", "bpm": 90}),
                    json!({"title": "Lullaby", "artist": "Them", "duration": "2:30", "key": "F"}),
                ],
            )
            .await
            .unwrap();
        backend
    }

    #[tokio::test]
    async fn insert_echoes_server_assigned_columns() {
        let backend = SqliteBackend::open_in_memory().unwrap();
        let rows = backend
            .insert(
                "setlists",
                vec![json!({"name": "Summer Tour", "venue": "Arena", "date": "2024-06-01"})],
            )
            .await
            .unwrap();

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["id"], json!(1));
        assert_eq!(rows[0]["description"], Value::Null);
        assert!(rows[0]["created_at"].is_string());
    }

    #[tokio::test]
    async fn select_applies_filters_order_and_limit() {
        let backend = backend_with_songs().await;

        let ordered = backend
            .select("songs", &FetchOptions::new().order_by("title", true))
            .await
            .unwrap();
        let titles: Vec<_> = ordered.iter().map(|row| row["title"].as_str().unwrap()).collect();
        assert_eq!(titles, ["Anthem", "Lullaby", "Zebra Crossing"]);

        let filtered = backend
            .select(
                "songs",
                &FetchOptions::new()
                    .select("title")
                    .filter("artist", FilterOp::Eq, json!("Us"))
                    .filter("bpm", FilterOp::Gte, json!(100)),
            )
            .await
            .unwrap();
        assert_eq!(filtered, vec![json!({"title": "Zebra Crossing"})]);

        let limited = backend
            .select(
                "songs",
                &FetchOptions::new()
                    .filter("id", FilterOp::In, json!([1, 2, 3]))
                    .order_by("id", false)
                    .limit(2),
            )
            .await
            .unwrap();
        let ids: Vec<_> = limited.iter().map(|row| row["id"].as_i64().unwrap()).collect();
        assert_eq!(ids, [3, 2]);

        let unbpm = backend
            .select(
                "songs",
                &FetchOptions::new().filter("bpm", FilterOp::Is, Value::Null),
            )
            .await
            .unwrap();
        assert_eq!(unbpm.len(), 1);
        assert_eq!(unbpm[0]["title"], json!("Lullaby"));

        let fuzzy = backend
            .select(
                "songs",
                &FetchOptions::new().filter("title", FilterOp::Ilike, json!("*LULL*")),
            )
            .await
            .unwrap();
        assert_eq!(fuzzy.len(), 1);
    }

    #[tokio::test]
    async fn embeds_junction_rows_with_joined_songs() {
        let backend = backend_with_songs().await;
        backend
            .insert(
                "setlists",
                vec![json!({"name": "Club Night", "venue": "Basement", "date": "2024-07-04"})],
            )
            .await
            .unwrap();
        backend
            .insert(
                "setlist_songs",
                vec![
                    json!({"setlist_id": 1, "song_id": 1, "position": 2}),
                    json!({"setlist_id": 1, "song_id": 2, "position": 1}),
                ],
            )
            .await
            .unwrap();

        let rows = backend
            .select(
                "setlists",
                &FetchOptions::new().select("*, setlist_songs(song_id, position, songs(*))"),
            )
            .await
            .unwrap();

        let entries = rows[0]["setlist_songs"].as_array().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0]["song_id"], json!(1));
        assert_eq!(entries[0]["songs"]["title"], json!("Zebra Crossing"));
        assert_eq!(entries[1]["songs"]["title"], json!("Anthem"));
        assert!(entries[0].get("setlist_id").is_none());
    }

    #[tokio::test]
    async fn rejects_unknown_columns_relations_and_private_tables() {
        let backend = backend_with_songs().await;

        let err = backend
            .insert("songs", vec![json!({"title": "x", "label": "y"})])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("'label' column"));

        let err = backend
            .select("songs", &FetchOptions::new().select("*, setlists(*)"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("relationship"));

        let err = backend
            .select("auth_users", &FetchOptions::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }

    #[tokio::test]
    async fn update_and_delete_echo_affected_rows() {
        let backend = backend_with_songs().await;

        let updated = backend
            .update("songs", &[Filter::eq("id", 2)], json!({"bpm": 92}))
            .await
            .unwrap();
        assert_eq!(updated.len(), 1);
        assert_eq!(updated[0]["bpm"], json!(92));
        assert_eq!(updated[0]["title"], json!("Anthem"));

        let deleted = backend.delete("songs", &[Filter::eq("id", 2)]).await.unwrap();
        assert_eq!(deleted.len(), 1);
        let again = backend.delete("songs", &[Filter::eq("id", 2)]).await.unwrap();
        assert!(again.is_empty());
    }

    #[tokio::test]
    async fn deleting_a_song_cascades_to_setlist_links() {
        let backend = backend_with_songs().await;
        backend
            .insert(
                "setlists",
                vec![json!({"name": "Gig", "venue": "Bar", "date": "2024-08-01"})],
            )
            .await
            .unwrap();
        backend
            .insert(
                "setlist_songs",
                vec![json!({"setlist_id": 1, "song_id": 3, "position": 1})],
            )
            .await
            .unwrap();

        let duplicate = backend
            .insert(
                "setlist_songs",
                vec![json!({"setlist_id": 1, "song_id": 3, "position": 2})],
            )
            .await;
        assert!(duplicate.is_err());

        backend.delete("songs", &[Filter::eq("id", 3)]).await.unwrap();
        let links = backend
            .select("setlist_songs", &FetchOptions::new())
            .await
            .unwrap();
        assert!(links.is_empty());
    }

    #[tokio::test]
    async fn sign_up_sign_in_and_sign_out_emit_events() {
        let backend = SqliteBackend::open_in_memory().unwrap();
        let mut events = backend.auth_events();
        let credentials = Credentials::new("singer@band.test", "hunter22");

        let signed_up = backend.sign_up(&credentials).await.unwrap();
        assert_eq!(
            signed_up.user.as_ref().and_then(|user| user.email.as_deref()),
            Some("singer@band.test")
        );
        assert_eq!(events.recv().await.unwrap().event, AuthEvent::SignedIn);

        let duplicate = backend.sign_up(&credentials).await.unwrap_err();
        assert_eq!(duplicate.to_string(), "User already registered");

        backend.sign_out().await.unwrap();
        assert_eq!(events.recv().await.unwrap().event, AuthEvent::SignedOut);
        assert_eq!(backend.get_user().await.unwrap(), None);

        let wrong = Credentials::new("singer@band.test", "nope-nope");
        let err = backend.sign_in_with_password(&wrong).await.unwrap_err();
        assert!(err.is_auth());
        assert_eq!(err.to_string(), "Invalid login credentials");

        backend.sign_in_with_password(&credentials).await.unwrap();
        let user = backend.get_user().await.unwrap().unwrap();
        assert_eq!(user.email.as_deref(), Some("singer@band.test"));
    }

    #[tokio::test]
    async fn sign_up_validates_password_length() {
        let backend = SqliteBackend::open_in_memory().unwrap();
        let err = backend
            .sign_up(&Credentials::new("a@b.test", "123"))
            .await
            .unwrap_err();
        assert!(err.to_string().starts_with("Password should be at least"));
    }

    #[tokio::test]
    async fn demo_seed_runs_once() {
        let backend = SqliteBackend::open_in_memory().unwrap();
        assert!(backend.seed_demo_data().unwrap());
        assert!(!backend.seed_demo_data().unwrap());

        let songs = backend.select("songs", &FetchOptions::new()).await.unwrap();
        assert_eq!(songs.len(), 4);
    }
}
