//! Domain models mirroring the backend tables. These stay plain data holders:
//! the store owns cache maintenance and the backends own persistence.
//!
//! Row types deserialize leniently (unknown columns are ignored, optional
//! columns default to `None`) because the backend may add columns the app does
//! not care about. Create payloads are the field whitelists: anything not
//! named on them never reaches the backend.

use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

pub type SongId = i64;
pub type SetlistId = i64;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// A song in the band's catalog.
pub struct Song {
    /// Server-assigned identifier.
    pub id: SongId,
    pub title: String,
    pub artist: String,
    /// Free-form running time as entered by the band (for example `4:05`).
    pub duration: String,
    /// Musical key.
    pub key: String,
    #[serde(default)]
    pub bpm: Option<i64>,
    #[serde(default)]
    pub genre: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

impl Song {
    /// `Title - Artist`, omitting the hyphen when the artist is blank.
    pub fn display_title(&self) -> String {
        if self.artist.trim().is_empty() {
            self.title.clone()
        } else {
            format!("{} - {}", self.title, self.artist)
        }
    }
}

impl fmt::Display for Song {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display_title())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// A performance: venue/date metadata plus the songs linked to it.
pub struct Setlist {
    pub id: SetlistId,
    pub name: String,
    pub venue: String,
    /// Performance date as stored by the backend (ISO `YYYY-MM-DD`).
    pub date: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    /// Junction rows with the joined song, present when fetched with the
    /// relational projection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub setlist_songs: Option<Vec<SetlistEntry>>,
    /// Flat song list used by locally seeded data that bypasses the junction
    /// table.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub songs: Option<Vec<Song>>,
}

impl fmt::Display for Setlist {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} @ {} ({})", self.name, self.venue, self.date)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// One junction row as embedded inside a fetched setlist.
pub struct SetlistEntry {
    pub song_id: SongId,
    /// Ordering hint; `None` sorts as position 0.
    #[serde(default)]
    pub position: Option<i64>,
    /// The joined song. The backend names the embedded relation after its
    /// table.
    #[serde(rename = "songs", default)]
    pub song: Option<Song>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// A junction row as stored in `setlist_songs`.
pub struct SetlistSong {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub setlist_id: SetlistId,
    pub song_id: SongId,
    #[serde(default)]
    pub position: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
/// Whitelisted fields accepted when creating a setlist.
pub struct NewSetlist {
    pub name: String,
    pub venue: String,
    pub date: String,
    #[serde(default)]
    pub description: Option<String>,
}

impl NewSetlist {
    /// Blank descriptions are sent as null.
    pub fn normalized(mut self) -> Self {
        self.description = blank_to_none(self.description);
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
/// Whitelisted fields accepted when creating a song.
pub struct NewSong {
    pub title: String,
    pub artist: String,
    pub duration: String,
    pub key: String,
    #[serde(default)]
    pub bpm: Option<i64>,
    #[serde(default)]
    pub genre: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl NewSong {
    /// Blank optionals and a bpm of zero are sent as null.
    pub fn normalized(mut self) -> Self {
        self.bpm = self.bpm.filter(|bpm| *bpm != 0);
        self.genre = blank_to_none(self.genre);
        self.notes = blank_to_none(self.notes);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// Whitelisted fields accepted when linking a song to a setlist.
pub struct NewSetlistSong {
    pub setlist_id: SetlistId,
    pub song_id: SongId,
    pub position: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
/// Partial update for a setlist. `None` leaves the column untouched; for the
/// nullable description `Some(None)` clears it.
pub struct SetlistPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub venue: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "nullable"
    )]
    pub description: Option<Option<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
/// Partial update for a song. `None` leaves the column untouched; the nullable
/// columns take `Some(None)` to clear them.
pub struct SongPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artist: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "nullable"
    )]
    pub bpm: Option<Option<i64>>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "nullable"
    )]
    pub genre: Option<Option<String>>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "nullable"
    )]
    pub notes: Option<Option<String>>,
}

/// A present key is `Some`, even when its value is null; absent keys fall back
/// to `default`.
fn nullable<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// Shallow-merge a backend row over a cached entity: every top-level field of
/// `row` replaces the cached one, everything else is kept.
pub fn merge_row<T>(current: &T, row: &Value) -> serde_json::Result<T>
where
    T: Serialize + DeserializeOwned,
{
    let mut merged = serde_json::to_value(current)?;
    if let (Value::Object(target), Value::Object(patch)) = (&mut merged, row) {
        for (column, value) in patch {
            target.insert(column.clone(), value.clone());
        }
    }
    serde_json::from_value(merged)
}

fn blank_to_none(value: Option<String>) -> Option<String> {
    value.filter(|text| !text.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn song(id: SongId, title: &str) -> Song {
        Song {
            id,
            title: title.to_string(),
            artist: "The Band".to_string(),
            duration: "3:30".to_string(),
            key: "G".to_string(),
            bpm: None,
            genre: None,
            notes: None,
            created_at: None,
        }
    }

    #[test]
    fn new_song_normalizes_empty_optionals() {
        let song = NewSong {
            title: "Intro".into(),
            artist: "Us".into(),
            duration: "1:00".into(),
            key: "C".into(),
            bpm: Some(0),
            genre: Some("  ".into()),
            notes: Some("count in".into()),
        }
        .normalized();

        assert_eq!(song.bpm, None);
        assert_eq!(song.genre, None);
        assert_eq!(song.notes.as_deref(), Some("count in"));
        let body = serde_json::to_value(&song).unwrap();
        assert_eq!(body["bpm"], Value::Null);
    }

    #[test]
    fn new_setlist_sends_null_description() {
        let setlist = NewSetlist {
            name: "Summer Tour".into(),
            venue: "Arena".into(),
            date: "2024-06-01".into(),
            description: Some(String::new()),
        }
        .normalized();
        let body = serde_json::to_value(&setlist).unwrap();
        assert_eq!(
            body,
            json!({"name": "Summer Tour", "venue": "Arena", "date": "2024-06-01", "description": null})
        );
    }

    #[test]
    fn unknown_fields_are_dropped_from_create_payloads() {
        let input = json!({"name": "A", "venue": "B", "date": "2024-01-01", "owner": "mallory"});
        let setlist: NewSetlist = serde_json::from_value(input).unwrap();
        let body = serde_json::to_value(&setlist).unwrap();
        assert!(body.get("owner").is_none());
    }

    #[test]
    fn merge_row_keeps_fields_missing_from_patch() {
        let cached = Setlist {
            id: 3,
            name: "Old".into(),
            venue: "Club".into(),
            date: "2024-05-01".into(),
            description: Some("warm-up".into()),
            created_at: None,
            setlist_songs: Some(vec![SetlistEntry {
                song_id: 1,
                position: Some(1),
                song: Some(song(1, "Opener")),
            }]),
            songs: None,
        };

        let merged = merge_row(&cached, &json!({"id": 3, "name": "New"})).unwrap();
        assert_eq!(merged.name, "New");
        assert_eq!(merged.venue, "Club");
        assert_eq!(merged.description.as_deref(), Some("warm-up"));
        assert_eq!(merged.setlist_songs, cached.setlist_songs);
    }

    #[test]
    fn patch_distinguishes_untouched_from_cleared() {
        let patch = SongPatch {
            title: Some("Anthem".into()),
            genre: Some(None),
            notes: Some(Some("slow intro".into())),
            ..SongPatch::default()
        };
        let body = serde_json::to_value(&patch).unwrap();
        assert_eq!(
            body,
            json!({"title": "Anthem", "genre": null, "notes": "slow intro"})
        );

        let parsed: SongPatch = serde_json::from_value(body).unwrap();
        assert_eq!(parsed, patch);
        assert_eq!(parsed.bpm, None);
    }

    #[test]
    fn display_title_omits_blank_artist() {
        let mut solo = song(1, "Lullaby");
        solo.artist = " ".into();
        assert_eq!(solo.display_title(), "Lullaby");
        assert_eq!(song(2, "Anthem").to_string(), "Anthem - The Band");
    }
}
