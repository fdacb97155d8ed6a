//! Error taxonomy shared by the backends, the data-access client and the store.
//!
//! The `Display` output of `Auth` and `Query` is the backend's own message so
//! the UI can show it verbatim.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Credential or session failure reported by the backend's auth subsystem.
    #[error("{message}")]
    Auth { message: String },

    /// A fetch, insert, update or delete rejected by the backend.
    #[error("{message}")]
    Query { table: String, message: String },

    /// The request could not be expressed (bad projection, unknown operator).
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    /// Transport failure or an unusable local connection.
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    /// The backend answered but the payload did not have the expected shape.
    #[error("unexpected response from {table}: {message}")]
    Decode { table: String, message: String },

    /// A write succeeded but no row was echoed back.
    #[error("{table} did not return the affected row")]
    NoRowReturned { table: String },
}

impl Error {
    pub fn auth(message: impl Into<String>) -> Self {
        Error::Auth {
            message: message.into(),
        }
    }

    pub fn query(table: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Query {
            table: table.into(),
            message: message.into(),
        }
    }

    pub fn decode(table: impl Into<String>, err: impl std::fmt::Display) -> Self {
        Error::Decode {
            table: table.into(),
            message: err.to_string(),
        }
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, Error::Auth { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;
