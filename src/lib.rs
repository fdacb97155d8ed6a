//! Music Board: setlists and a song catalog kept in a hosted
//! database-and-auth service, with an embedded SQLite stand-in.
//!
//! Layers, bottom up:
//!
//! - [`backend`]: the [`Backend`] seam and its REST implementation;
//!   [`db`] provides the SQLite one.
//! - [`client`]: [`DataAccessClient`], the single choke point for backend I/O,
//!   auth state, busy tracking and the last error.
//! - [`store`]: [`MusicBoardStore`], typed setlist and song operations with
//!   local cache maintenance.
//! - [`ui`]: the terminal front end.
pub mod backend;
pub mod client;
pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod models;
pub mod query;
pub mod store;
pub mod ui;

pub use backend::{connect, AuthEvent, AuthResponse, AuthStateChange, Backend, RestBackend, User};
pub use client::{AuthSubscription, DataAccessClient};
pub use config::{AppConfig, BackendConfig};
pub use db::SqliteBackend;
pub use error::{Error, Result};
pub use models::{NewSetlist, NewSong, Setlist, SetlistPatch, Song, SongPatch};
pub use query::{FetchOptions, Filter, FilterOp};
pub use store::{setlist_songs, CachePatch, LoadReport, MusicBoardStore};

/// The interactive application entry point and state container.
pub use ui::{run_app, App};
