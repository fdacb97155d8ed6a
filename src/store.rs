//! Setlists and songs: typed CRUD on top of [`DataAccessClient`] plus the
//! in-memory collections the UI renders.
//!
//! The collections mirror the last successful fetch and are patched locally
//! after each write round trip:
//!
//! | action | local patch |
//! |--------|-------------|
//! | create setlist | prepend (most recent first) |
//! | create song | append |
//! | update | shallow-merge the echoed row over the cached entity, if cached |
//! | delete | drop every cached entity with that id |
//!
//! Reads fail safe: a failed fetch empties the collection rather than leaving
//! stale rows on screen. Writes fail loud: the error is recorded and returned.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::client::DataAccessClient;
use crate::error::{Error, Result};
use crate::models::{
    merge_row, NewSetlist, NewSetlistSong, NewSong, Setlist, SetlistEntry, SetlistId, SetlistPatch,
    SetlistSong, Song, SongId, SongPatch,
};
use crate::query::{FetchOptions, Filter};

pub const SETLISTS_TABLE: &str = "setlists";
pub const SONGS_TABLE: &str = "songs";
pub const SETLIST_SONGS_TABLE: &str = "setlist_songs";

/// Setlists with their junction rows and the joined songs.
pub const SETLIST_PROJECTION: &str = "*, setlist_songs(song_id, position, songs(*))";

/// Aggregate message recorded when any branch of [`MusicBoardStore::load_all_data`] fails.
pub const LOAD_ALL_ERROR: &str = "Error loading data";

/// Outcome of an update against the local cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CachePatch {
    /// The cached entity was merged with the backend's row.
    Merged,
    /// Nothing cached under that id (or nothing echoed back); the update
    /// reached the backend and the cache is untouched.
    NotCached,
}

/// What [`MusicBoardStore::load_all_data`] ended up with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadReport {
    pub setlists: usize,
    pub songs: usize,
    pub error: Option<String>,
}

impl LoadReport {
    pub fn is_complete(&self) -> bool {
        self.error.is_none()
    }
}

pub struct MusicBoardStore {
    client: Arc<DataAccessClient>,
    setlists: Vec<Setlist>,
    songs: Vec<Song>,
    error: Option<String>,
}

impl MusicBoardStore {
    pub fn new(client: Arc<DataAccessClient>) -> Self {
        Self {
            client,
            setlists: Vec::new(),
            songs: Vec::new(),
            error: None,
        }
    }

    pub fn client(&self) -> &Arc<DataAccessClient> {
        &self.client
    }

    pub fn setlists(&self) -> &[Setlist] {
        &self.setlists
    }

    pub fn songs(&self) -> &[Song] {
        &self.songs
    }

    pub fn setlists_count(&self) -> usize {
        self.setlists.len()
    }

    pub fn songs_count(&self) -> usize {
        self.songs.len()
    }

    pub fn has_setlists(&self) -> bool {
        !self.setlists.is_empty()
    }

    pub fn has_songs(&self) -> bool {
        !self.songs.is_empty()
    }

    pub fn find_setlist(&self, id: SetlistId) -> Option<&Setlist> {
        self.setlists.iter().find(|setlist| setlist.id == id)
    }

    pub fn find_song(&self, id: SongId) -> Option<&Song> {
        self.songs.iter().find(|song| song.id == id)
    }

    /// Last user-facing error message, if any.
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn clear_error(&mut self) {
        self.error = None;
    }

    /// Replace the cached setlists with a fresh fetch, newest first. On
    /// failure the cache is emptied and the error recorded before returning.
    pub async fn fetch_setlists(&mut self) -> Result<usize> {
        self.error = None;
        let result = self.query_setlists().await;
        self.apply_setlists(result)
    }

    /// Replace the cached songs with a fresh fetch sorted by title. On failure
    /// the cache is emptied and the error recorded before returning.
    pub async fn fetch_songs(&mut self) -> Result<usize> {
        self.error = None;
        let result = self.query_songs().await;
        self.apply_songs(result)
    }

    /// Fetch songs and setlists concurrently. Each branch applies its own
    /// result, so one failing does not stop the other from landing; any
    /// failure is reported under a single aggregate message.
    pub async fn load_all_data(&mut self) -> LoadReport {
        info!("loading all data");
        self.error = None;
        let (songs, setlists) = futures::join!(self.query_songs(), self.query_setlists());

        let songs_ok = self.apply_songs(songs).is_ok();
        let setlists_ok = self.apply_setlists(setlists).is_ok();

        let error = if songs_ok && setlists_ok {
            info!(
                setlists = self.setlists.len(),
                songs = self.songs.len(),
                "all data loaded"
            );
            None
        } else {
            warn!(songs_ok, setlists_ok, "loading data failed");
            self.error = Some(LOAD_ALL_ERROR.to_string());
            self.error.clone()
        };

        LoadReport {
            setlists: self.setlists.len(),
            songs: self.songs.len(),
            error,
        }
    }

    /// Insert a setlist and put it at the top of the cache. `Ok(None)` means
    /// the row was written but not echoed back (for example when a row policy
    /// hides it); the cache is left for the next fetch to fill.
    pub async fn create_setlist(&mut self, data: NewSetlist) -> Result<Option<Setlist>> {
        self.error = None;
        let rows = self
            .client
            .insert_data(SETLISTS_TABLE, &data.normalized())
            .await;
        let Some(setlist) =
            self.echoed_row::<Setlist>(SETLISTS_TABLE, rows, "Error creating setlist")?
        else {
            warn!("created setlist was not echoed back");
            return Ok(None);
        };

        info!(id = setlist.id, name = %setlist.name, "created setlist");
        self.setlists.insert(0, setlist.clone());
        Ok(Some(setlist))
    }

    /// Insert a song and append it to the cache; see
    /// [`create_setlist`](Self::create_setlist) for `Ok(None)`.
    pub async fn create_song(&mut self, data: NewSong) -> Result<Option<Song>> {
        self.error = None;
        let rows = self.client.insert_data(SONGS_TABLE, &data.normalized()).await;
        let Some(song) = self.echoed_row::<Song>(SONGS_TABLE, rows, "Error creating song")? else {
            warn!("created song was not echoed back");
            return Ok(None);
        };

        info!(id = song.id, title = %song.title, "created song");
        self.songs.push(song.clone());
        Ok(Some(song))
    }

    pub async fn update_setlist(&mut self, id: SetlistId, patch: &SetlistPatch) -> Result<CachePatch> {
        self.error = None;
        let rows = self.client.update_data(SETLISTS_TABLE, id, patch).await;
        let rows = self.record(rows, "Error updating setlist")?;

        let Some(row) = rows.first() else {
            return Ok(CachePatch::NotCached);
        };
        match self.setlists.iter_mut().find(|setlist| setlist.id == id) {
            Some(cached) => {
                *cached = merge_row(&*cached, row)
                    .map_err(|err| Error::decode(SETLISTS_TABLE, err))?;
                Ok(CachePatch::Merged)
            }
            None => {
                debug!(id, "updated setlist is not cached");
                Ok(CachePatch::NotCached)
            }
        }
    }

    pub async fn update_song(&mut self, id: SongId, patch: &SongPatch) -> Result<CachePatch> {
        self.error = None;
        let rows = self.client.update_data(SONGS_TABLE, id, patch).await;
        let rows = self.record(rows, "Error updating song")?;

        let Some(row) = rows.first() else {
            return Ok(CachePatch::NotCached);
        };
        match self.songs.iter_mut().find(|song| song.id == id) {
            Some(cached) => {
                *cached =
                    merge_row(&*cached, row).map_err(|err| Error::decode(SONGS_TABLE, err))?;
                Ok(CachePatch::Merged)
            }
            None => {
                debug!(id, "updated song is not cached");
                Ok(CachePatch::NotCached)
            }
        }
    }

    pub async fn delete_setlist(&mut self, id: SetlistId) -> Result<()> {
        self.error = None;
        let result = self.client.delete_data(SETLISTS_TABLE, id).await;
        self.record(result, "Error deleting setlist")?;

        self.setlists.retain(|setlist| setlist.id != id);
        info!(id, "deleted setlist");
        Ok(())
    }

    /// Delete a song from the catalog. The backend drops its setlist links;
    /// cached setlists are pruned to match.
    pub async fn delete_song(&mut self, id: SongId) -> Result<()> {
        self.error = None;
        let result = self.client.delete_data(SONGS_TABLE, id).await;
        self.record(result, "Error deleting song")?;

        self.songs.retain(|song| song.id != id);
        for setlist in &mut self.setlists {
            if let Some(entries) = setlist.setlist_songs.as_mut() {
                entries.retain(|entry| entry.song_id != id);
            }
        }
        info!(id, "deleted song");
        Ok(())
    }

    /// Link a catalog song to a setlist. The new entry is appended to the
    /// cached setlist with the song embedded when the catalog has it.
    pub async fn add_song_to_setlist(
        &mut self,
        setlist_id: SetlistId,
        song_id: SongId,
        position: Option<i64>,
    ) -> Result<SetlistSong> {
        self.error = None;
        let link = NewSetlistSong {
            setlist_id,
            song_id,
            position,
        };
        let rows = self.client.insert_data(SETLIST_SONGS_TABLE, &link).await;
        let stored: SetlistSong =
            self.first_row(SETLIST_SONGS_TABLE, rows, "Error adding song to setlist")?;

        let song = self.find_song(song_id).cloned();
        if let Some(setlist) = self.setlists.iter_mut().find(|setlist| setlist.id == setlist_id) {
            setlist
                .setlist_songs
                .get_or_insert_with(Vec::new)
                .push(SetlistEntry {
                    song_id,
                    position: stored.position,
                    song,
                });
        }
        info!(setlist_id, song_id, "added song to setlist");
        Ok(stored)
    }

    /// Unlink a song from a setlist by exact `(setlist_id, song_id)` match.
    pub async fn remove_song_from_setlist(
        &mut self,
        setlist_id: SetlistId,
        song_id: SongId,
    ) -> Result<()> {
        self.error = None;
        let filters = [
            Filter::eq("setlist_id", setlist_id),
            Filter::eq("song_id", song_id),
        ];
        let result = self
            .client
            .delete_matching(SETLIST_SONGS_TABLE, &filters)
            .await;
        self.record(result, "Error removing song from setlist")?;

        if let Some(entries) = self
            .setlists
            .iter_mut()
            .find(|setlist| setlist.id == setlist_id)
            .and_then(|setlist| setlist.setlist_songs.as_mut())
        {
            entries.retain(|entry| entry.song_id != song_id);
        }
        info!(setlist_id, song_id, "removed song from setlist");
        Ok(())
    }

    async fn query_setlists(&self) -> Result<Vec<Setlist>> {
        let options = FetchOptions::new()
            .select(SETLIST_PROJECTION)
            .order_by("created_at", false);
        self.client.fetch_as(SETLISTS_TABLE, &options).await
    }

    async fn query_songs(&self) -> Result<Vec<Song>> {
        let options = FetchOptions::new().order_by("title", true);
        self.client.fetch_as(SONGS_TABLE, &options).await
    }

    fn apply_setlists(&mut self, result: Result<Vec<Setlist>>) -> Result<usize> {
        match result {
            Ok(setlists) => {
                self.setlists = setlists;
                Ok(self.setlists.len())
            }
            Err(err) => {
                warn!(error = %err, "failed to fetch setlists");
                self.setlists.clear();
                self.error = Some(user_message(&err, "Error loading setlists"));
                Err(err)
            }
        }
    }

    fn apply_songs(&mut self, result: Result<Vec<Song>>) -> Result<usize> {
        match result {
            Ok(songs) => {
                self.songs = songs;
                Ok(self.songs.len())
            }
            Err(err) => {
                warn!(error = %err, "failed to fetch songs");
                self.songs.clear();
                self.error = Some(user_message(&err, "Error loading songs"));
                Err(err)
            }
        }
    }

    /// Record a failed write's message and hand the result back.
    fn record<T>(&mut self, result: Result<T>, fallback: &str) -> Result<T> {
        result.inspect_err(|err| self.error = Some(user_message(err, fallback)))
    }

    /// Decode the first echoed row of a successful insert, if any.
    fn echoed_row<T: DeserializeOwned>(
        &mut self,
        table: &str,
        rows: Result<Vec<Value>>,
        fallback: &str,
    ) -> Result<Option<T>> {
        let decoded = rows.and_then(|rows| {
            rows.into_iter()
                .next()
                .map(|row| serde_json::from_value(row).map_err(|err| Error::decode(table, err)))
                .transpose()
        });
        self.record(decoded, fallback)
    }

    /// Like [`echoed_row`](Self::echoed_row), but a missing row is an error.
    fn first_row<T: DeserializeOwned>(
        &mut self,
        table: &str,
        rows: Result<Vec<Value>>,
        fallback: &str,
    ) -> Result<T> {
        let decoded = self.echoed_row(table, rows, fallback)?;
        let row = decoded.ok_or_else(|| Error::NoRowReturned {
            table: table.to_string(),
        });
        self.record(row, fallback)
    }
}

/// Ordered songs of a setlist, without I/O.
///
/// Junction rows win when present: their joined songs are sorted by
/// `position` (missing counts as 0, ties keep their original order) and rows
/// without a joined song are skipped. Otherwise a flat `songs` list is
/// returned as is, and failing both, nothing.
pub fn setlist_songs(setlist: &Setlist) -> Vec<Song> {
    if let Some(entries) = &setlist.setlist_songs {
        let mut linked: Vec<(i64, &Song)> = entries
            .iter()
            .filter_map(|entry| {
                entry
                    .song
                    .as_ref()
                    .map(|song| (entry.position.unwrap_or(0), song))
            })
            .collect();
        linked.sort_by_key(|(position, _)| *position);
        return linked.into_iter().map(|(_, song)| song.clone()).collect();
    }

    setlist.songs.clone().unwrap_or_default()
}

fn user_message(err: &Error, fallback: &str) -> String {
    let message = err.to_string();
    if message.trim().is_empty() {
        fallback.to_string()
    } else {
        message
    }
}
