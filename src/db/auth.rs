use rusqlite::{params, Connection, OptionalExtension};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::backend::{Credentials, Session, User};
use crate::error::{Error, Result};

/// Shortest password the sign-up flow accepts.
const MIN_PASSWORD_LEN: usize = 6;

/// Register a new account. Messages match the hosted auth service so the UI
/// reads the same against either backend.
pub(crate) fn create_user(conn: &Connection, credentials: &Credentials) -> Result<User> {
    let email = credentials.email.trim();
    if email.is_empty() || !email.contains('@') {
        return Err(Error::auth("Unable to validate email address: invalid format"));
    }
    if credentials.password.chars().count() < MIN_PASSWORD_LEN {
        return Err(Error::auth(format!(
            "Password should be at least {MIN_PASSWORD_LEN} characters."
        )));
    }
    if find_user(conn, email)?.is_some() {
        return Err(Error::auth("User already registered"));
    }

    let id = Uuid::new_v4().to_string();
    let salt = Uuid::new_v4().simple().to_string();
    let hash = hash_password(&salt, &credentials.password);
    conn.execute(
        "INSERT INTO auth_users (id, email, salt, password_hash) VALUES (?1, ?2, ?3, ?4)",
        params![id, email, salt, hash],
    )
    .map_err(|err| Error::auth(format!("failed to register user: {err}")))?;

    load_user(conn, &id)
}

/// Check an email/password pair against the stored hash.
pub(crate) fn verify_user(conn: &Connection, credentials: &Credentials) -> Result<User> {
    let invalid = || Error::auth("Invalid login credentials");
    let Some(stored) = find_user(conn, credentials.email.trim())? else {
        return Err(invalid());
    };

    if hash_password(&stored.salt, &credentials.password) != stored.password_hash {
        return Err(invalid());
    }
    Ok(stored.user)
}

/// Mint an in-memory session for a verified user.
pub(crate) fn open_session(user: User) -> Session {
    Session {
        access_token: Uuid::new_v4().simple().to_string(),
        refresh_token: Some(Uuid::new_v4().simple().to_string()),
        user,
    }
}

struct StoredUser {
    user: User,
    salt: String,
    password_hash: String,
}

fn find_user(conn: &Connection, email: &str) -> Result<Option<StoredUser>> {
    conn.query_row(
        "SELECT id, email, created_at, salt, password_hash FROM auth_users WHERE email = ?1",
        params![email],
        |row| {
            Ok(StoredUser {
                user: User {
                    id: row.get(0)?,
                    email: row.get(1)?,
                    created_at: row.get(2)?,
                },
                salt: row.get(3)?,
                password_hash: row.get(4)?,
            })
        },
    )
    .optional()
    .map_err(|err| Error::auth(format!("failed to look up user: {err}")))
}

fn load_user(conn: &Connection, id: &str) -> Result<User> {
    conn.query_row(
        "SELECT id, email, created_at FROM auth_users WHERE id = ?1",
        params![id],
        |row| {
            Ok(User {
                id: row.get(0)?,
                email: row.get(1)?,
                created_at: row.get(2)?,
            })
        },
    )
    .map_err(|err| Error::auth(format!("failed to load user: {err}")))
}

fn hash_password(salt: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(b":");
    hasher.update(password.as_bytes());
    format!("{:x}", hasher.finalize())
}
