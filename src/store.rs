//! Persistence for the mapping table.
//!
//! Regeneration is a full rewrite: the table is cleared and every mapping is
//! reinserted in deterministic order, in batched transactions so an
//! interrupted run leaves whole batches, not torn rows.

use anyhow::Result;
use rusqlite::{params, Connection};

use crate::models::{round_confidence, HistoryTriple, Link, Mapping, MappingStatus, SearchPhase};

const WRITE_BATCH_SIZE: usize = 500;

pub struct ReconcileCounts {
    pub total: usize,
    pub mapped: usize,
    pub incomplete: usize,
    pub discarded: usize,
}

/// Replace the whole mapping table with `mappings`, preserving their order.
/// Each batch commits independently and acts as a checkpoint.
pub fn rewrite_all(conn: &mut Connection, mappings: &[Mapping]) -> Result<()> {
    conn.execute("DELETE FROM mappings", [])?;
    for chunk in mappings.chunks(WRITE_BATCH_SIZE) {
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO mappings
                 (track_name, artist_name, album_name, artist_id, album_id, track_id,
                  confidence, phase, status)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            )?;
            for m in chunk {
                stmt.execute(params![
                    m.triple.track_name,
                    m.triple.artist_name,
                    m.triple.album_name.as_deref().unwrap_or(""),
                    m.artist.as_db(),
                    m.album.as_db(),
                    m.track.as_db(),
                    round_confidence(m.confidence),
                    m.phase.as_str(),
                    m.status.as_str(),
                ])?;
            }
        }
        tx.commit()?;
    }
    Ok(())
}

/// All mappings in primary-key order.
pub fn load_all(conn: &Connection) -> Result<Vec<Mapping>> {
    let mut stmt = conn.prepare(
        "SELECT track_name, artist_name, album_name, artist_id, album_id, track_id,
                confidence, phase, status
         FROM mappings
         ORDER BY track_name, artist_name, album_name",
    )?;
    let rows = stmt.query_map([], |row| {
        let track_name: String = row.get(0)?;
        let artist_name: String = row.get(1)?;
        let album_name: String = row.get(2)?;
        let artist: Option<String> = row.get(3)?;
        let album: Option<String> = row.get(4)?;
        let track: Option<String> = row.get(5)?;
        let confidence: f64 = row.get(6)?;
        let phase: String = row.get(7)?;
        let status: String = row.get(8)?;
        let album_name = if album_name.is_empty() { None } else { Some(album_name) };
        Ok(Mapping {
            triple: HistoryTriple {
                track_name,
                artist_name,
                album_name,
            },
            artist: Link::from_db(artist),
            album: Link::from_db(album),
            track: Link::from_db(track),
            confidence,
            phase: SearchPhase::from_str(&phase),
            status: MappingStatus::from_str(&status),
        })
    })?;
    let mut mappings = Vec::new();
    for row in rows {
        mappings.push(row?);
    }
    Ok(mappings)
}

/// Mappings still missing a track link and not written off.
pub fn load_incomplete(conn: &Connection) -> Result<Vec<Mapping>> {
    Ok(load_all(conn)?
        .into_iter()
        .filter(|m| m.status == MappingStatus::Incomplete)
        .collect())
}

/// Point one mapping row at a resolved track and flip it to MAPPED.
/// Committed immediately so each rescued track is a checkpoint.
pub fn bind_track(
    conn: &Connection,
    triple: &HistoryTriple,
    artist_id: &str,
    album_id: &str,
    track_id: &str,
    confidence: f64,
) -> Result<()> {
    conn.execute(
        "UPDATE mappings
         SET artist_id = ?1, album_id = ?2, track_id = ?3, confidence = ?4,
             status = ?5
         WHERE track_name = ?6 AND artist_name = ?7 AND album_name = ?8",
        params![
            artist_id,
            album_id,
            track_id,
            round_confidence(confidence),
            MappingStatus::Mapped.as_str(),
            triple.track_name,
            triple.artist_name,
            triple.album_name.as_deref().unwrap_or(""),
        ],
    )?;
    Ok(())
}

pub fn counts(conn: &Connection) -> Result<ReconcileCounts> {
    let count_for = |status: &str| -> Result<usize> {
        let n: i64 = conn.query_row(
            "SELECT COUNT(*) FROM mappings WHERE status = ?1",
            [status],
            |row| row.get(0),
        )?;
        Ok(n as usize)
    };
    let mapped = count_for(MappingStatus::Mapped.as_str())?;
    let incomplete = count_for(MappingStatus::Incomplete.as_str())?;
    let discarded = count_for(MappingStatus::Discarded.as_str())?;
    Ok(ReconcileCounts {
        total: mapped + incomplete + discarded,
        mapped,
        incomplete,
        discarded,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::open_in_memory;
    use crate::models::ABSENT_SENTINEL;

    fn mapping(track: &str, artist: &str, album: Option<&str>) -> Mapping {
        Mapping::unresolved(HistoryTriple::new(track, artist, album))
    }

    #[test]
    fn rewrite_and_load_round_trip() {
        let mut conn = open_in_memory().unwrap();
        let mut m = mapping("SongA", "ArtistX", Some("AlbumY"));
        m.artist = Link::Id("ar-1".into());
        m.album = Link::Id("al-1".into());
        m.track = Link::Id("tr-1".into());
        m.confidence = 0.951234567;
        m.phase = SearchPhase::Fast;
        m.derive_status();

        rewrite_all(&mut conn, &[m, mapping("SongB", "ArtistX", None)]).unwrap();

        let loaded = load_all(&conn).unwrap();
        assert_eq!(loaded.len(), 2);
        let a = loaded.iter().find(|m| m.triple.track_name == "SongA").unwrap();
        assert_eq!(a.track.id(), Some("tr-1"));
        assert_eq!(a.confidence, 0.9512);
        assert_eq!(a.status, MappingStatus::Mapped);
        let b = loaded.iter().find(|m| m.triple.track_name == "SongB").unwrap();
        assert_eq!(b.triple.album_name, None);
        assert_eq!(b.status, MappingStatus::Incomplete);
    }

    #[test]
    fn rewrite_replaces_previous_contents() {
        let mut conn = open_in_memory().unwrap();
        rewrite_all(&mut conn, &[mapping("Old", "ArtistX", None)]).unwrap();
        rewrite_all(&mut conn, &[mapping("New", "ArtistX", None)]).unwrap();
        let loaded = load_all(&conn).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].triple.track_name, "New");
    }

    #[test]
    fn rewrite_spans_multiple_batches() {
        let mut conn = open_in_memory().unwrap();
        let mappings: Vec<Mapping> = (0..WRITE_BATCH_SIZE + 7)
            .map(|i| mapping(&format!("Song{:05}", i), "ArtistX", None))
            .collect();
        rewrite_all(&mut conn, &mappings).unwrap();
        assert_eq!(load_all(&conn).unwrap().len(), WRITE_BATCH_SIZE + 7);
    }

    #[test]
    fn absent_sentinel_survives_round_trip() {
        let mut conn = open_in_memory().unwrap();
        let mut m = mapping("SongA", "Ghost Band", None);
        m.track = Link::Absent;
        m.status = MappingStatus::Discarded;
        rewrite_all(&mut conn, &[m]).unwrap();

        let raw: String = conn
            .query_row("SELECT track_id FROM mappings", [], |row| row.get(0))
            .unwrap();
        assert_eq!(raw, ABSENT_SENTINEL);

        let loaded = load_all(&conn).unwrap();
        assert_eq!(loaded[0].track, Link::Absent);
        assert_eq!(loaded[0].status, MappingStatus::Discarded);
    }

    #[test]
    fn bind_track_flips_to_mapped() {
        let mut conn = open_in_memory().unwrap();
        let triple = HistoryTriple::new("SongA", "ArtistX", Some("AlbumY"));
        rewrite_all(&mut conn, &[Mapping::unresolved(triple.clone())]).unwrap();

        bind_track(&conn, &triple, "ar-1", "al-1", "tr-1", 1.0).unwrap();

        let loaded = load_all(&conn).unwrap();
        assert_eq!(loaded[0].status, MappingStatus::Mapped);
        assert_eq!(loaded[0].track.id(), Some("tr-1"));

        let c = counts(&conn).unwrap();
        assert_eq!(c.total, 1);
        assert_eq!(c.mapped, 1);
        assert_eq!(c.incomplete, 0);
    }
}
