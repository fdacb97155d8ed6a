use anyhow::{Context, Result};
use rusqlite::{params, Connection};

/// Demo catalog: title, artist, duration, key, bpm.
const DEMO_SONGS: &[(&str, &str, &str, &str, Option<i64>)] = &[
    ("Midnight Drive", "The Setlisters", "4:12", "Am", Some(118)),
    ("Paper Lanterns", "The Setlisters", "3:48", "D", Some(96)),
    ("Northbound", "The Setlisters", "5:02", "E", Some(132)),
    ("Last Call", "The Setlisters", "3:20", "G", None),
];

/// Junction positions for the demo setlist, matched to `DEMO_SONGS` by index.
/// The last song is deliberately left unordered.
const DEMO_POSITIONS: &[Option<i64>] = &[Some(2), Some(1), Some(3), None];

/// Populate an empty database with a few songs and one setlist linked through
/// `setlist_songs`. Returns `false` without touching anything when data
/// already exists.
pub(crate) fn seed_demo_data(conn: &Connection) -> Result<bool> {
    let existing: i64 = conn
        .query_row(
            "SELECT (SELECT COUNT(*) FROM songs) + (SELECT COUNT(*) FROM setlists)",
            [],
            |row| row.get(0),
        )
        .context("failed to count existing rows")?;
    if existing > 0 {
        return Ok(false);
    }

    let tx = conn
        .unchecked_transaction()
        .context("failed to start seed transaction")?;

    tx.execute(
        "INSERT INTO setlists (name, venue, date, description) VALUES (?1, ?2, ?3, ?4)",
        params![
            "Demo Night",
            "The Local",
            "2024-06-01",
            "Seeded so the board is not empty"
        ],
    )
    .context("failed to insert demo setlist")?;
    let setlist_id = tx.last_insert_rowid();

    for ((title, artist, duration, key, bpm), position) in DEMO_SONGS.iter().zip(DEMO_POSITIONS) {
        tx.execute(
            "INSERT INTO songs (title, artist, duration, key, bpm) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![title, artist, duration, key, bpm],
        )
        .context("failed to insert demo song")?;
        let song_id = tx.last_insert_rowid();

        tx.execute(
            "INSERT INTO setlist_songs (setlist_id, song_id, position) VALUES (?1, ?2, ?3)",
            params![setlist_id, song_id, position],
        )
        .context("failed to link demo song")?;
    }

    tx.commit().context("failed to commit demo data")?;
    Ok(true)
}
