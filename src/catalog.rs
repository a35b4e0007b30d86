//! Local catalog database access: schema bootstrap, candidate loading, and
//! the lookup/mutation queries the reconciliation passes need.

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use rustc_hash::FxHashMap;
use uuid::Uuid;

use crate::models::{Candidate, CatalogAlbum, CatalogArtist, CatalogTrack, HistoryTriple};
use crate::normalize::{normalize, normalize_album_key, normalize_compact};

/// Open a catalog database tuned for the read-heavy match pass.
pub fn open<P: AsRef<std::path::Path>>(path: P) -> Result<Connection> {
    let conn = Connection::open(path.as_ref()).with_context(|| {
        format!("failed to open catalog database: {}", path.as_ref().display())
    })?;
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA synchronous = NORMAL;
         PRAGMA cache_size = -64000;
         PRAGMA temp_store = MEMORY;",
    )?;
    Ok(conn)
}

/// Create all tables if they are missing. Normalized key columns are cached
/// on write so the match pass never re-normalizes catalog rows.
pub fn ensure_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS play_history (
            id          INTEGER PRIMARY KEY,
            track_name  TEXT NOT NULL,
            artist_name TEXT NOT NULL,
            album_name  TEXT,
            played_at   TEXT
        );
        CREATE TABLE IF NOT EXISTS artists (
            id          TEXT PRIMARY KEY,
            name        TEXT NOT NULL,
            name_clean  TEXT NOT NULL,
            catalog_id  TEXT UNIQUE
        );
        CREATE TABLE IF NOT EXISTS albums (
            id          TEXT PRIMARY KEY,
            title       TEXT NOT NULL,
            title_clean TEXT NOT NULL,
            artist_id   TEXT NOT NULL REFERENCES artists(id),
            catalog_id  TEXT UNIQUE
        );
        CREATE TABLE IF NOT EXISTS tracks (
            id            TEXT PRIMARY KEY,
            title         TEXT NOT NULL,
            title_clean   TEXT NOT NULL,
            album_id      TEXT NOT NULL REFERENCES albums(id),
            catalog_id    TEXT UNIQUE,
            isrc          TEXT,
            track_number  INTEGER,
            volume_number INTEGER
        );
        CREATE TABLE IF NOT EXISTS mappings (
            track_name  TEXT NOT NULL,
            artist_name TEXT NOT NULL,
            album_name  TEXT NOT NULL DEFAULT '',
            artist_id   TEXT,
            album_id    TEXT,
            track_id    TEXT,
            confidence  REAL NOT NULL DEFAULT 0,
            phase       TEXT NOT NULL DEFAULT 'none',
            status      TEXT NOT NULL DEFAULT 'INCOMPLETE',
            PRIMARY KEY (track_name, artist_name, album_name)
        );
        CREATE INDEX IF NOT EXISTS idx_artists_name_clean ON artists(name_clean);
        CREATE INDEX IF NOT EXISTS idx_albums_artist ON albums(artist_id);
        CREATE INDEX IF NOT EXISTS idx_tracks_album ON tracks(album_id);",
    )?;
    Ok(())
}

/// Load every (track, album, artist) join as a match candidate, ordered by
/// track id so index construction is deterministic.
pub fn load_candidates(conn: &Connection) -> Result<Vec<Candidate>> {
    let mut stmt = conn.prepare(
        "SELECT t.id, t.title, al.id, al.title, ar.id, ar.name
         FROM tracks t
         JOIN albums al ON al.id = t.album_id
         JOIN artists ar ON ar.id = al.artist_id
         ORDER BY t.id",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok(Candidate::new(
            row.get(0)?,
            row.get(1)?,
            row.get(2)?,
            row.get(3)?,
            row.get(4)?,
            row.get(5)?,
        ))
    })?;
    let mut candidates = Vec::new();
    for row in rows {
        candidates.push(row?);
    }
    Ok(candidates)
}

/// Distinct history triples with play counts, most-played first. Ties break
/// on the triple itself so output order is stable across runs.
pub fn unique_history_triples(conn: &Connection) -> Result<Vec<(HistoryTriple, usize)>> {
    let mut stmt = conn.prepare(
        "SELECT track_name, artist_name, album_name, COUNT(*) AS plays
         FROM play_history
         GROUP BY track_name, artist_name, album_name
         ORDER BY plays DESC, artist_name, track_name, album_name",
    )?;
    let rows = stmt.query_map([], |row| {
        let track: String = row.get(0)?;
        let artist: String = row.get(1)?;
        let album: Option<String> = row.get(2)?;
        let plays: i64 = row.get(3)?;
        Ok((
            HistoryTriple::new(&track, &artist, album.as_deref()),
            plays as usize,
        ))
    })?;
    let mut triples = Vec::new();
    for row in rows {
        triples.push(row?);
    }
    Ok(triples)
}

pub fn artist_by_clean_name(conn: &Connection, name: &str) -> Result<Option<CatalogArtist>> {
    conn.query_row(
        "SELECT id, name, catalog_id FROM artists WHERE name_clean = ?1",
        [normalize(name)],
        |row| {
            Ok(CatalogArtist {
                id: row.get(0)?,
                name: row.get(1)?,
                catalog_id: row.get(2)?,
            })
        },
    )
    .optional()
    .context("artist lookup failed")
}

pub fn artist_by_catalog_id(conn: &Connection, catalog_id: &str) -> Result<Option<CatalogArtist>> {
    conn.query_row(
        "SELECT id, name, catalog_id FROM artists WHERE catalog_id = ?1",
        [catalog_id],
        |row| {
            Ok(CatalogArtist {
                id: row.get(0)?,
                name: row.get(1)?,
                catalog_id: row.get(2)?,
            })
        },
    )
    .optional()
    .context("artist lookup failed")
}

pub fn artist_by_id(conn: &Connection, id: &str) -> Result<Option<CatalogArtist>> {
    conn.query_row(
        "SELECT id, name, catalog_id FROM artists WHERE id = ?1",
        [id],
        |row| {
            Ok(CatalogArtist {
                id: row.get(0)?,
                name: row.get(1)?,
                catalog_id: row.get(2)?,
            })
        },
    )
    .optional()
    .context("artist lookup failed")
}

pub fn all_artists(conn: &Connection) -> Result<Vec<CatalogArtist>> {
    let mut stmt =
        conn.prepare("SELECT id, name, catalog_id FROM artists ORDER BY name_clean, id")?;
    let rows = stmt.query_map([], |row| {
        Ok(CatalogArtist {
            id: row.get(0)?,
            name: row.get(1)?,
            catalog_id: row.get(2)?,
        })
    })?;
    let mut artists = Vec::new();
    for row in rows {
        artists.push(row?);
    }
    Ok(artists)
}

pub fn insert_artist(conn: &Connection, name: &str, catalog_id: Option<&str>) -> Result<String> {
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO artists (id, name, name_clean, catalog_id) VALUES (?1, ?2, ?3, ?4)",
        params![id, name, normalize(name), catalog_id],
    )?;
    Ok(id)
}

pub fn albums_for_artist(conn: &Connection, artist_id: &str) -> Result<Vec<CatalogAlbum>> {
    let mut stmt = conn.prepare(
        "SELECT id, title, artist_id, catalog_id FROM albums WHERE artist_id = ?1 ORDER BY id",
    )?;
    let rows = stmt.query_map([artist_id], |row| {
        Ok(CatalogAlbum {
            id: row.get(0)?,
            title: row.get(1)?,
            artist_id: row.get(2)?,
            catalog_id: row.get(3)?,
        })
    })?;
    let mut albums = Vec::new();
    for row in rows {
        albums.push(row?);
    }
    Ok(albums)
}

/// Album lookup table keyed by the aggressive (noise-stripped, spaceless)
/// title key, scoped to one artist.
pub fn album_keys_for_artist(
    conn: &Connection,
    artist_id: &str,
) -> Result<FxHashMap<String, CatalogAlbum>> {
    let mut keys = FxHashMap::default();
    for album in albums_for_artist(conn, artist_id)? {
        keys.insert(normalize_album_key(&album.title), album);
    }
    Ok(keys)
}

/// Insert an album unless the artist already has one under the same
/// aggressive title key or the same external catalog id.
pub fn insert_album_if_new(
    conn: &Connection,
    artist_id: &str,
    title: &str,
    catalog_id: &str,
) -> Result<Option<String>> {
    let existing: Option<String> = conn
        .query_row(
            "SELECT id FROM albums WHERE catalog_id = ?1",
            [catalog_id],
            |row| row.get(0),
        )
        .optional()?;
    if existing.is_some() {
        return Ok(None);
    }
    let key = normalize_album_key(title);
    if album_keys_for_artist(conn, artist_id)?.contains_key(&key) {
        return Ok(None);
    }
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO albums (id, title, title_clean, artist_id, catalog_id)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![id, title, normalize(title), artist_id, catalog_id],
    )?;
    Ok(Some(id))
}

pub fn album_by_id(conn: &Connection, id: &str) -> Result<Option<CatalogAlbum>> {
    conn.query_row(
        "SELECT id, title, artist_id, catalog_id FROM albums WHERE id = ?1",
        [id],
        |row| {
            Ok(CatalogAlbum {
                id: row.get(0)?,
                title: row.get(1)?,
                artist_id: row.get(2)?,
                catalog_id: row.get(3)?,
            })
        },
    )
    .optional()
    .context("album lookup failed")
}

pub fn album_by_catalog_id(conn: &Connection, catalog_id: &str) -> Result<Option<CatalogAlbum>> {
    conn.query_row(
        "SELECT id, title, artist_id, catalog_id FROM albums WHERE catalog_id = ?1",
        [catalog_id],
        |row| {
            Ok(CatalogAlbum {
                id: row.get(0)?,
                title: row.get(1)?,
                artist_id: row.get(2)?,
                catalog_id: row.get(3)?,
            })
        },
    )
    .optional()
    .context("album lookup failed")
}

pub fn track_exists(conn: &Connection, id: &str) -> Result<bool> {
    let n: i64 = conn.query_row("SELECT COUNT(*) FROM tracks WHERE id = ?1", [id], |row| {
        row.get(0)
    })?;
    Ok(n > 0)
}

pub fn track_by_catalog_id(conn: &Connection, catalog_id: &str) -> Result<Option<CatalogTrack>> {
    conn.query_row(
        "SELECT id, title, album_id, catalog_id, isrc, track_number, volume_number
         FROM tracks WHERE catalog_id = ?1",
        [catalog_id],
        |row| {
            Ok(CatalogTrack {
                id: row.get(0)?,
                title: row.get(1)?,
                album_id: row.get(2)?,
                catalog_id: row.get(3)?,
                isrc: row.get(4)?,
                track_number: row.get(5)?,
                volume_number: row.get(6)?,
            })
        },
    )
    .optional()
    .context("track lookup failed")
}

pub fn tracks_for_album(conn: &Connection, album_id: &str) -> Result<Vec<CatalogTrack>> {
    let mut stmt = conn.prepare(
        "SELECT id, title, album_id, catalog_id, isrc, track_number, volume_number
         FROM tracks WHERE album_id = ?1 ORDER BY id",
    )?;
    let rows = stmt.query_map([album_id], |row| {
        Ok(CatalogTrack {
            id: row.get(0)?,
            title: row.get(1)?,
            album_id: row.get(2)?,
            catalog_id: row.get(3)?,
            isrc: row.get(4)?,
            track_number: row.get(5)?,
            volume_number: row.get(6)?,
        })
    })?;
    let mut tracks = Vec::new();
    for row in rows {
        tracks.push(row?);
    }
    Ok(tracks)
}

/// Track lookup table keyed by the spaceless normalized title, scoped to
/// one album.
pub fn track_keys_for_album(
    conn: &Connection,
    album_id: &str,
) -> Result<FxHashMap<String, CatalogTrack>> {
    let mut keys = FxHashMap::default();
    for track in tracks_for_album(conn, album_id)? {
        keys.insert(normalize_compact(&track.title), track);
    }
    Ok(keys)
}

pub struct NewTrack<'a> {
    pub title: &'a str,
    pub catalog_id: &'a str,
    pub isrc: Option<&'a str>,
    pub track_number: Option<i64>,
    pub volume_number: Option<i64>,
}

/// Insert a track unless the album already holds the same compact title or
/// the same external catalog id.
pub fn insert_track_if_new(
    conn: &Connection,
    album_id: &str,
    track: &NewTrack,
) -> Result<Option<String>> {
    let existing: Option<String> = conn
        .query_row(
            "SELECT id FROM tracks WHERE catalog_id = ?1",
            [track.catalog_id],
            |row| row.get(0),
        )
        .optional()?;
    if existing.is_some() {
        return Ok(None);
    }
    let key = normalize_compact(track.title);
    if track_keys_for_album(conn, album_id)?.contains_key(&key) {
        return Ok(None);
    }
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO tracks (id, title, title_clean, album_id, catalog_id, isrc, track_number, volume_number)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            id,
            track.title,
            key,
            album_id,
            track.catalog_id,
            track.isrc,
            track.track_number,
            track.volume_number
        ],
    )?;
    Ok(Some(id))
}

/// Remove an artist and everything hanging off it, in one transaction so a
/// partial cascade can never survive.
pub fn delete_artist_cascade(conn: &mut Connection, artist_id: &str) -> Result<()> {
    let tx = conn.transaction()?;
    tx.execute(
        "DELETE FROM tracks WHERE album_id IN (SELECT id FROM albums WHERE artist_id = ?1)",
        [artist_id],
    )?;
    tx.execute("DELETE FROM albums WHERE artist_id = ?1", [artist_id])?;
    tx.execute("DELETE FROM artists WHERE id = ?1", [artist_id])?;
    tx.commit()?;
    Ok(())
}

/// Groups of artists that collapse to the same normalized name, for
/// doppelganger review. Only names with more than one row are returned.
pub fn duplicate_artist_groups(conn: &Connection) -> Result<Vec<Vec<CatalogArtist>>> {
    let mut groups: FxHashMap<String, Vec<CatalogArtist>> = FxHashMap::default();
    for artist in all_artists(conn)? {
        groups.entry(normalize(&artist.name)).or_default().push(artist);
    }
    let mut dupes: Vec<Vec<CatalogArtist>> = groups
        .into_values()
        .filter(|g| g.len() > 1)
        .collect();
    dupes.sort_by(|a, b| a[0].name.cmp(&b[0].name));
    Ok(dupes)
}

#[cfg(test)]
pub fn open_in_memory() -> Result<Connection> {
    let conn = Connection::open_in_memory()?;
    ensure_schema(&conn)?;
    Ok(conn)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seed_play(conn: &Connection, track: &str, artist: &str, album: Option<&str>) {
        conn.execute(
            "INSERT INTO play_history (track_name, artist_name, album_name) VALUES (?1, ?2, ?3)",
            params![track, artist, album],
        )
        .unwrap();
    }

    #[test]
    fn schema_bootstrap_is_idempotent() {
        let conn = open_in_memory().unwrap();
        ensure_schema(&conn).unwrap();
        ensure_schema(&conn).unwrap();
    }

    #[test]
    fn history_triples_deduplicate_and_count() {
        let conn = open_in_memory().unwrap();
        seed_play(&conn, "SongA", "ArtistX", Some("AlbumY"));
        seed_play(&conn, "SongA", "ArtistX", Some("AlbumY"));
        seed_play(&conn, "SongB", "ArtistX", None);

        let triples = unique_history_triples(&conn).unwrap();
        assert_eq!(triples.len(), 2);
        assert_eq!(triples[0].0.track_name, "SongA");
        assert_eq!(triples[0].1, 2);
        assert_eq!(triples[1].0.album_name, None);
    }

    #[test]
    fn candidates_join_all_three_levels() {
        let conn = open_in_memory().unwrap();
        let artist = insert_artist(&conn, "The Weeknd", Some("cat-ar-1")).unwrap();
        let album = insert_album_if_new(&conn, &artist, "Starboy", "cat-al-1")
            .unwrap()
            .unwrap();
        insert_track_if_new(
            &conn,
            &album,
            &NewTrack {
                title: "Die For You",
                catalog_id: "cat-tr-1",
                isrc: None,
                track_number: Some(17),
                volume_number: Some(1),
            },
        )
        .unwrap()
        .unwrap();

        let candidates = load_candidates(&conn).unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].artist_name, "The Weeknd");
        assert_eq!(candidates[0].track_title, "Die For You");
        assert_eq!(candidates[0].album_title, "Starboy");
    }

    #[test]
    fn album_insert_skips_duplicates_by_key_and_catalog_id() {
        let conn = open_in_memory().unwrap();
        let artist = insert_artist(&conn, "ArtistX", None).unwrap();
        assert!(insert_album_if_new(&conn, &artist, "AlbumY", "cat-1").unwrap().is_some());
        // Same catalog id.
        assert!(insert_album_if_new(&conn, &artist, "Other", "cat-1").unwrap().is_none());
        // Same aggressive title key despite noise decorations.
        assert!(insert_album_if_new(&conn, &artist, "AlbumY (Deluxe Edition)", "cat-2")
            .unwrap()
            .is_none());
    }

    #[test]
    fn track_insert_skips_duplicates() {
        let conn = open_in_memory().unwrap();
        let artist = insert_artist(&conn, "ArtistX", None).unwrap();
        let album = insert_album_if_new(&conn, &artist, "AlbumY", "cat-1")
            .unwrap()
            .unwrap();
        let track = NewTrack {
            title: "SongA",
            catalog_id: "tr-1",
            isrc: None,
            track_number: None,
            volume_number: None,
        };
        assert!(insert_track_if_new(&conn, &album, &track).unwrap().is_some());
        let dupe = NewTrack { catalog_id: "tr-2", ..track };
        assert!(insert_track_if_new(&conn, &album, &dupe).unwrap().is_none());
    }

    #[test]
    fn cascade_delete_removes_albums_and_tracks() {
        let mut conn = open_in_memory().unwrap();
        let artist = insert_artist(&conn, "ArtistX", None).unwrap();
        let album = insert_album_if_new(&conn, &artist, "AlbumY", "cat-1")
            .unwrap()
            .unwrap();
        insert_track_if_new(
            &conn,
            &album,
            &NewTrack {
                title: "SongA",
                catalog_id: "tr-1",
                isrc: None,
                track_number: None,
                volume_number: None,
            },
        )
        .unwrap();

        delete_artist_cascade(&mut conn, &artist).unwrap();
        assert!(load_candidates(&conn).unwrap().is_empty());
        let albums: i64 = conn
            .query_row("SELECT COUNT(*) FROM albums", [], |r| r.get(0))
            .unwrap();
        assert_eq!(albums, 0);
    }

    #[test]
    fn duplicate_groups_collapse_on_normalized_name() {
        let conn = open_in_memory().unwrap();
        insert_artist(&conn, "Beyoncé", Some("cat-1")).unwrap();
        insert_artist(&conn, "beyonce", Some("cat-2")).unwrap();
        insert_artist(&conn, "Solo Act", Some("cat-3")).unwrap();

        let dupes = duplicate_artist_groups(&conn).unwrap();
        assert_eq!(dupes.len(), 1);
        assert_eq!(dupes[0].len(), 2);
    }
}
