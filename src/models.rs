//! Core data model: history triples, catalog entities, mappings.

use serde::Serialize;

use crate::normalize::normalize;

/// One unique (track, artist, album) combination observed in listening
/// history. Many plays share a triple; resolution runs once per triple.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct HistoryTriple {
    pub track_name: String,
    pub artist_name: String,
    pub album_name: Option<String>,
}

impl HistoryTriple {
    pub fn new(track: &str, artist: &str, album: Option<&str>) -> Self {
        Self {
            track_name: track.to_string(),
            artist_name: artist.to_string(),
            album_name: album.map(str::to_string),
        }
    }
}

/// Sentinel stored in resolved link columns for ledger-confirmed absence.
pub const ABSENT_SENTINEL: &str = "ABSENT";

/// A resolved (or not) link from a history triple to a catalog entity.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Link {
    /// Not resolved yet; a later pass may fill it in.
    Unresolved,
    /// Ledger-confirmed absent from the catalog; never retried.
    Absent,
    /// Local surrogate id of the catalog entity.
    Id(String),
}

impl Link {
    pub fn from_db(v: Option<String>) -> Self {
        match v {
            None => Link::Unresolved,
            Some(s) if s == ABSENT_SENTINEL => Link::Absent,
            Some(s) => Link::Id(s),
        }
    }

    pub fn as_db(&self) -> Option<&str> {
        match self {
            Link::Unresolved => None,
            Link::Absent => Some(ABSENT_SENTINEL),
            Link::Id(s) => Some(s),
        }
    }

    pub fn id(&self) -> Option<&str> {
        match self {
            Link::Id(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_unresolved(&self) -> bool {
        matches!(self, Link::Unresolved)
    }
}

/// Which search tier produced a match.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum SearchPhase {
    Fast,
    Deep,
    None,
}

impl SearchPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            SearchPhase::Fast => "fast",
            SearchPhase::Deep => "deep",
            SearchPhase::None => "none",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "fast" => SearchPhase::Fast,
            "deep" => SearchPhase::Deep,
            _ => SearchPhase::None,
        }
    }
}

/// Mapping lifecycle state. Terminal within one regeneration pass; the whole
/// store is re-derived on the next pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum MappingStatus {
    Mapped,
    Incomplete,
    Discarded,
}

impl MappingStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            MappingStatus::Mapped => "MAPPED",
            MappingStatus::Incomplete => "INCOMPLETE",
            MappingStatus::Discarded => "DISCARDED",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "MAPPED" => MappingStatus::Mapped,
            "DISCARDED" => MappingStatus::Discarded,
            _ => MappingStatus::Incomplete,
        }
    }
}

/// The resolved (or attempted) link state for one unique history triple.
#[derive(Clone, Debug, PartialEq)]
pub struct Mapping {
    pub triple: HistoryTriple,
    pub artist: Link,
    pub album: Link,
    pub track: Link,
    pub confidence: f64,
    pub phase: SearchPhase,
    pub status: MappingStatus,
}

impl Mapping {
    /// Fresh unresolved mapping for a triple the matcher has not accepted.
    pub fn unresolved(triple: HistoryTriple) -> Self {
        Self {
            triple,
            artist: Link::Unresolved,
            album: Link::Unresolved,
            track: Link::Unresolved,
            confidence: 0.0,
            phase: SearchPhase::None,
            status: MappingStatus::Incomplete,
        }
    }

    /// Re-derive status from the current link state. MAPPED iff the track
    /// link is set; DISCARDED is decided by the ledger before this is called.
    pub fn derive_status(&mut self) {
        self.status = if matches!(self.track, Link::Id(_)) {
            MappingStatus::Mapped
        } else {
            MappingStatus::Incomplete
        };
    }
}

/// Confidence is persisted at 4 decimal places so regeneration output is
/// byte-stable across runs.
pub fn round_confidence(score: f64) -> f64 {
    (score * 10_000.0).round() / 10_000.0
}

// ============================================================================
// Catalog entities
// ============================================================================

/// Canonical artist from the external catalog.
#[derive(Clone, Debug)]
pub struct CatalogArtist {
    pub id: String,
    pub name: String,
    pub catalog_id: Option<String>,
}

#[derive(Clone, Debug)]
pub struct CatalogAlbum {
    pub id: String,
    pub title: String,
    pub artist_id: String,
    pub catalog_id: Option<String>,
}

#[derive(Clone, Debug)]
pub struct CatalogTrack {
    pub id: String,
    pub title: String,
    pub album_id: String,
    pub catalog_id: Option<String>,
    pub isrc: Option<String>,
    pub track_number: Option<i64>,
    pub volume_number: Option<i64>,
}

/// One joined (track, album, artist) row from the local catalog, with the
/// normalized keys the matcher compares against precomputed once.
#[derive(Clone, Debug)]
pub struct Candidate {
    pub track_id: String,
    pub track_title: String,
    pub album_id: String,
    pub album_title: String,
    pub artist_id: String,
    pub artist_name: String,
    pub artist_norm: String,
    pub track_norm: String,
}

impl Candidate {
    pub fn new(
        track_id: String,
        track_title: String,
        album_id: String,
        album_title: String,
        artist_id: String,
        artist_name: String,
    ) -> Self {
        let artist_norm = normalize(&artist_name);
        let track_norm = normalize(&track_title);
        Self {
            track_id,
            track_title,
            album_id,
            album_title,
            artist_id,
            artist_name,
            artist_norm,
            track_norm,
        }
    }
}

// ============================================================================
// Statistics
// ============================================================================

/// Match-pass instrumentation, logged as a JSON block per phase.
#[derive(Default, Debug, Clone, Serialize)]
pub struct MatchStats {
    pub total_triples: usize,
    pub accepted: usize,
    pub fast_hits: usize,
    pub deep_hits: usize,
    pub unmatched: usize,
    pub deep_scans: usize,
    pub elapsed_seconds: f64,
}

impl MatchStats {
    pub fn match_rate(&self) -> f64 {
        if self.total_triples == 0 {
            0.0
        } else {
            100.0 * self.accepted as f64 / self.total_triples as f64
        }
    }

    pub fn log_phase(&self, phase: &str) {
        if let Ok(json) = serde_json::to_string_pretty(self) {
            eprintln!("[STATS:{}]\n{}", phase, json);
        }
    }
}

/// Regeneration / reporting tallies. The final summary of every batch run.
#[derive(Default, Debug, Clone, Serialize)]
pub struct ReconcileStats {
    pub total: usize,
    pub mapped: usize,
    pub incomplete: usize,
    pub discarded: usize,
}

impl ReconcileStats {
    pub fn percent_resolved(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            100.0 * self.mapped as f64 / self.total as f64
        }
    }

    pub fn print_summary(&self, title: &str) {
        println!("\n{:=<50}", "");
        println!("{}", title);
        println!("{:=<50}", "");
        println!("  Total entries : {}", self.total);
        println!("  Mapped        : {}", self.mapped);
        println!("  Incomplete    : {}", self.incomplete);
        println!("  Discarded     : {}", self.discarded);
        println!("  Resolved      : {:.1}%", self.percent_resolved());
        println!("{:=<50}", "");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn link_db_round_trip() {
        assert_eq!(Link::from_db(None), Link::Unresolved);
        assert_eq!(Link::from_db(Some(ABSENT_SENTINEL.to_string())), Link::Absent);
        assert_eq!(Link::from_db(Some("abc".into())), Link::Id("abc".into()));
        assert_eq!(Link::Absent.as_db(), Some(ABSENT_SENTINEL));
        assert_eq!(Link::Unresolved.as_db(), None);
    }

    #[test]
    fn status_follows_track_link() {
        let mut m = Mapping::unresolved(HistoryTriple::new("t", "a", Some("al")));
        m.derive_status();
        assert_eq!(m.status, MappingStatus::Incomplete);
        m.track = Link::Id("x".into());
        m.derive_status();
        assert_eq!(m.status, MappingStatus::Mapped);
    }

    #[test]
    fn confidence_rounding() {
        assert_eq!(round_confidence(0.123_456), 0.1235);
        assert_eq!(round_confidence(1.0), 1.0);
    }

    #[test]
    fn stats_rates() {
        let s = ReconcileStats { total: 4, mapped: 1, incomplete: 2, discarded: 1 };
        assert_eq!(s.percent_resolved(), 25.0);
        assert_eq!(ReconcileStats::default().percent_resolved(), 0.0);
    }
}
