//! Two-phase candidate search over the local catalog.
//!
//! The catalog is pre-partitioned into buckets keyed by the first character
//! of the normalized artist name. The fast phase scans only the history
//! entry's bucket, so the overwhelming common case of correctly-named artists
//! stays O(bucket). Only when the fast phase misses the acceptance threshold
//! does the deep phase scan the whole catalog, catching misspelled or
//! oddly-credited artists.

use rustc_hash::FxHashMap;

use crate::models::{Candidate, SearchPhase};
use crate::normalize::normalize;
use crate::scoring::{similarity_normalized, MatchConfig};

/// Bucketed view of the joined catalog rows.
///
/// Candidates are held in ascending track-id order; scans only replace the
/// incumbent on a strictly greater score, so equal-score ties always keep
/// the lowest track id.
pub struct CatalogIndex {
    candidates: Vec<Candidate>,
    buckets: FxHashMap<char, Vec<usize>>,
}

impl CatalogIndex {
    pub fn build(mut candidates: Vec<Candidate>) -> Self {
        candidates.sort_by(|a, b| a.track_id.cmp(&b.track_id));
        let mut buckets: FxHashMap<char, Vec<usize>> = FxHashMap::default();
        for (i, c) in candidates.iter().enumerate() {
            if let Some(first) = c.artist_norm.chars().next() {
                buckets.entry(first).or_default().push(i);
            }
        }
        Self { candidates, buckets }
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    pub fn candidate(&self, idx: usize) -> &Candidate {
        &self.candidates[idx]
    }

    fn bucket(&self, first: Option<char>) -> &[usize] {
        first
            .and_then(|c| self.buckets.get(&c))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

/// Result of one search: index into the catalog (if accepted), the best
/// combined score seen, and the phase that produced it.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MatchOutcome {
    pub candidate: Option<usize>,
    pub score: f64,
    pub phase: SearchPhase,
}

/// Call-count instrumentation for the cost-boundary guarantees.
#[derive(Default, Debug, Clone, Copy)]
pub struct MatchCounters {
    pub fast_scored: usize,
    pub deep_scans: usize,
}

pub struct Matcher<'a> {
    index: &'a CatalogIndex,
    config: MatchConfig,
    pub counters: MatchCounters,
}

impl<'a> Matcher<'a> {
    pub fn new(index: &'a CatalogIndex, config: MatchConfig) -> Self {
        Self { index, config, counters: MatchCounters::default() }
    }

    /// Find the best catalog candidate for one history (artist, track) pair.
    pub fn best_match(&mut self, artist_name: &str, track_name: &str) -> MatchOutcome {
        let artist_norm = normalize(artist_name);
        let track_norm = normalize(track_name);

        let bucket = self.index.bucket(artist_norm.chars().next());
        let (mut best, mut best_score) = self.scan(bucket.iter().copied(), &artist_norm, &track_norm, true);
        let mut phase = SearchPhase::Fast;

        if best_score < self.config.accept_threshold {
            self.counters.deep_scans += 1;
            let all = 0..self.index.candidates.len();
            let (deep_best, deep_score) = self.scan(all, &artist_norm, &track_norm, false);
            if deep_score > best_score {
                best = deep_best;
                best_score = deep_score;
                phase = SearchPhase::Deep;
            }
        }

        if best.is_some() && best_score >= self.config.accept_threshold {
            MatchOutcome { candidate: best, score: best_score, phase }
        } else {
            MatchOutcome { candidate: None, score: best_score, phase: SearchPhase::None }
        }
    }

    fn scan(
        &mut self,
        indices: impl Iterator<Item = usize>,
        artist_norm: &str,
        track_norm: &str,
        count_fast: bool,
    ) -> (Option<usize>, f64) {
        let mut best: Option<usize> = None;
        let mut best_score = 0.0f64;

        for i in indices {
            let c = &self.index.candidates[i];
            if count_fast {
                self.counters.fast_scored += 1;
            }
            let s_artist = similarity_normalized(artist_norm, &c.artist_norm);
            let s_track = similarity_normalized(track_norm, &c.track_norm);
            let avg = (s_artist + s_track) / 2.0;
            if avg > best_score {
                best_score = avg;
                best = Some(i);
            }
            // Nothing can beat a perfect score; stop comparing.
            if best_score >= 1.0 {
                break;
            }
        }

        (best, best_score)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cand(tid: &str, track: &str, album: &str, artist: &str) -> Candidate {
        Candidate::new(
            tid.to_string(),
            track.to_string(),
            format!("al-{tid}"),
            album.to_string(),
            format!("ar-{tid}"),
            artist.to_string(),
        )
    }

    fn weeknd_index() -> CatalogIndex {
        CatalogIndex::build(vec![
            cand("t1", "Call Out My Name", "My Dear Melancholy,", "The Weeknd"),
            cand("t2", "Blinding Lights", "After Hours", "The Weeknd"),
            cand("t3", "Creep", "Pablo Honey", "Radiohead"),
        ])
    }

    #[test]
    fn exact_triple_is_fast_and_perfect() {
        let index = weeknd_index();
        let mut m = Matcher::new(&index, MatchConfig::default());
        let out = m.best_match("The Weeknd", "Call Out My Name");
        assert_eq!(out.score, 1.0);
        assert_eq!(out.phase, SearchPhase::Fast);
        assert_eq!(index.candidate(out.candidate.unwrap()).track_id, "t1");
    }

    #[test]
    fn deep_phase_not_run_when_fast_suffices() {
        let index = weeknd_index();
        let mut m = Matcher::new(&index, MatchConfig::default());
        let out = m.best_match("Radiohead", "Creep");
        assert_eq!(out.phase, SearchPhase::Fast);
        assert_eq!(m.counters.deep_scans, 0);
    }

    #[test]
    fn deep_phase_rescues_wrong_first_letter() {
        // "Zhe Weeknd" lands in the 'z' bucket, which is empty; the deep
        // scan still finds the right artist.
        let index = weeknd_index();
        let mut m = Matcher::new(&index, MatchConfig::default());
        let out = m.best_match("Zhe Weeknd", "Blinding Lights");
        assert_eq!(m.counters.deep_scans, 1);
        assert_eq!(out.phase, SearchPhase::Deep);
        assert!(out.score >= 0.90);
        assert_eq!(index.candidate(out.candidate.unwrap()).track_id, "t2");
    }

    #[test]
    fn below_threshold_is_rejected_with_phase_none() {
        let index = weeknd_index();
        let mut m = Matcher::new(&index, MatchConfig::default());
        let out = m.best_match("Ghost Band", "Spectral Song");
        assert_eq!(out.candidate, None);
        assert_eq!(out.phase, SearchPhase::None);
        assert!(out.score < 0.90);
    }

    #[test]
    fn empty_catalog() {
        let index = CatalogIndex::build(Vec::new());
        let mut m = Matcher::new(&index, MatchConfig::default());
        let out = m.best_match("Anyone", "Anything");
        assert_eq!(out, MatchOutcome { candidate: None, score: 0.0, phase: SearchPhase::None });
    }

    #[test]
    fn punctuation_only_artist_still_maps() {
        // "!!!" normalizes to the empty key, so it has no fast bucket; the
        // deep scan must still pair it with its catalog row.
        let index = CatalogIndex::build(vec![
            cand("t1", "Me and Giuliani Down by the School Yard", "Louden Up Now", "!!!"),
            cand("t2", "Creep", "Pablo Honey", "Radiohead"),
        ]);
        let mut m = Matcher::new(&index, MatchConfig::default());
        let out = m.best_match("!!!", "Me and Giuliani Down by the School Yard");
        assert_eq!(out.score, 1.0);
        assert_eq!(out.phase, SearchPhase::Deep);
        assert_eq!(index.candidate(out.candidate.unwrap()).track_id, "t1");
    }

    #[test]
    fn equal_scores_keep_lowest_track_id() {
        // Same track title on two albums: identical combined score.
        let index = CatalogIndex::build(vec![
            cand("t9", "Song", "Reissue", "Band"),
            cand("t1", "Song", "Original", "Band"),
        ]);
        let mut m = Matcher::new(&index, MatchConfig::default());
        let out = m.best_match("Band", "Song");
        assert_eq!(index.candidate(out.candidate.unwrap()).track_id, "t1");
    }

    #[test]
    fn accepted_implies_threshold() {
        let index = weeknd_index();
        let mut m = Matcher::new(&index, MatchConfig::default());
        for (artist, track) in [
            ("The Weeknd", "Call Out My Name"),
            ("The Weekbut", "Call Out My Nme"),
            ("Ghost Band", "Nope"),
            ("Radiohead", "Creep"),
        ] {
            let out = m.best_match(artist, track);
            if out.phase != SearchPhase::None {
                assert!(out.score >= 0.90);
                assert!(out.candidate.is_some());
            } else {
                assert!(out.candidate.is_none());
            }
        }
    }
}
