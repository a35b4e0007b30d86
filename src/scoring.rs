//! Similarity scoring and threshold tiers.
//!
//! One parameterized scorer replaces the slightly-different thresholds that
//! used to be scattered across per-stage scripts. The aggregate acceptance
//! threshold lives in [`MatchConfig`]; the looser per-title binding passes go
//! through [`flexible_match`] with a named [`EditTolerance`] tier.

use crate::normalize::normalize;

/// Matcher acceptance policy. A combined artist+track score below
/// `accept_threshold` is never accepted, whichever phase produced it.
#[derive(Debug, Clone, Copy)]
pub struct MatchConfig {
    pub accept_threshold: f64,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self { accept_threshold: 0.90 }
    }
}

/// Edit-distance budget for the flexible title binding used during harvest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditTolerance {
    /// Roughly one error per 10 characters, never less than one.
    Lenient,
    /// One error per 5 characters, capped at 3 edits.
    Strict,
}

impl EditTolerance {
    pub fn max_edits(self, len: usize) -> usize {
        match self {
            EditTolerance::Lenient => (len / 10).max(1),
            EditTolerance::Strict => (len / 5).min(3),
        }
    }
}

/// Bounded similarity between two raw strings, in `[0, 1]`.
///
/// Both sides are light-normalized first; an empty raw input scores zero.
/// Containment counts as a perfect match: catalog titles frequently carry
/// extra parenthetical or feature annotations, and recall matters more than
/// strictness here. Otherwise normalized edit distance: `1 - lev/max_len`.
/// Symmetric by construction.
pub fn similarity(a: &str, b: &str) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    similarity_normalized(&normalize(a), &normalize(b))
}

/// Same contract as [`similarity`] over keys the caller already normalized.
/// The matcher hot loop uses this to avoid re-normalizing per candidate.
/// Equality wins before the empty check, so names that normalize away
/// entirely (punctuation-only artists) still match themselves.
pub fn similarity_normalized(s1: &str, s2: &str) -> f64 {
    if s1 == s2 {
        return 1.0;
    }
    if s1.is_empty() || s2.is_empty() {
        return 0.0;
    }
    if s1.contains(s2) || s2.contains(s1) {
        return 1.0;
    }
    let max_len = s1.chars().count().max(s2.chars().count());
    let dist = strsim::levenshtein(s1, s2);
    1.0 - dist as f64 / max_len as f64
}

/// Loose title equality used when binding harvested catalog titles to
/// history names: exact, containment, or within the tolerance's edit budget
/// for the history-side length.
pub fn flexible_match(history_name: &str, catalog_name: &str, tolerance: EditTolerance) -> bool {
    let h = normalize(history_name);
    let t = normalize(catalog_name);
    if h.is_empty() || t.is_empty() {
        return h == t;
    }
    if h == t || h.contains(&t) || t.contains(&h) {
        return true;
    }
    strsim::levenshtein(&h, &t) <= tolerance.max_edits(h.chars().count())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_is_perfect() {
        for s in ["The Weeknd", "Call Out My Name", "x", "Björk", "!!!", "¿?"] {
            assert_eq!(similarity(s, s), 1.0);
        }
    }

    #[test]
    fn punctuation_only_names_match_each_other() {
        // Both normalize to the empty key; equality still wins.
        assert_eq!(similarity("!!!", "!?!"), 1.0);
        assert_eq!(similarity_normalized("", ""), 1.0);
    }

    #[test]
    fn empty_scores_zero() {
        assert_eq!(similarity("", ""), 0.0);
        assert_eq!(similarity("something", ""), 0.0);
        assert_eq!(similarity("", "something"), 0.0);
        assert_eq!(similarity_normalized("something", ""), 0.0);
    }

    #[test]
    fn symmetric() {
        let pairs = [
            ("The Weeknd", "Weeknd"),
            ("Raw (Live)", "Raw"),
            ("Nirvana", "Nirvna"),
            ("abc", "xyz"),
        ];
        for (a, b) in pairs {
            assert_eq!(similarity(a, b), similarity(b, a));
        }
    }

    #[test]
    fn containment_is_perfect() {
        assert_eq!(similarity("Raw (Live)", "Raw"), 1.0);
        assert_eq!(similarity("Call Out My Name", "Call Out My Name - Single"), 1.0);
    }

    #[test]
    fn edit_distance_fraction() {
        // "nirvana" vs "nirvna": one deletion over 7 chars
        let s = similarity("nirvana", "nirvna");
        assert!((s - (1.0 - 1.0 / 7.0)).abs() < 1e-9);
    }

    #[test]
    fn tolerance_tiers() {
        assert_eq!(EditTolerance::Lenient.max_edits(4), 1);
        assert_eq!(EditTolerance::Lenient.max_edits(25), 2);
        assert_eq!(EditTolerance::Strict.max_edits(10), 2);
        assert_eq!(EditTolerance::Strict.max_edits(40), 3);
        assert_eq!(EditTolerance::Strict.max_edits(4), 0);
    }

    #[test]
    fn flexible_match_binding() {
        assert!(flexible_match("AlbumY (Deluxe)", "AlbumY", EditTolerance::Strict));
        assert!(flexible_match("In Raibows", "In Rainbows", EditTolerance::Strict));
        assert!(!flexible_match("Completely Different", "Nothing Alike", EditTolerance::Strict));
        assert!(flexible_match("", "", EditTolerance::Strict));
        assert!(!flexible_match("x", "", EditTolerance::Strict));
    }

    #[test]
    fn default_accept_threshold() {
        assert_eq!(MatchConfig::default().accept_threshold, 0.90);
    }
}
