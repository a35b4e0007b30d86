//! Normalization tiers for matching history text against catalog text.
//!
//! Three tiers, chosen per entity type:
//! - light: the comparable key used for artist names and similarity scoring
//! - compact: light with spaces removed, for strict track/album equality keys
//! - album (strong): noise-stripped, for album titles only; reissue titles
//!   carry years, "(Deluxe Edition)" and friends that artist names never do
//!
//! All tiers are total (empty in, empty out) and idempotent.

use any_ascii::any_ascii;
use once_cell::sync::Lazy;
use regex::Regex;
use unicode_normalization::UnicodeNormalization;

/// Bracketed or parenthetical substrings: "(Deluxe Edition)", "[Live at X]".
static PARENTHETICAL: Lazy<Regex> = Lazy::new(|| Regex::new(r"[(\[][^)\]]*[)\]]").unwrap());

/// Noise tokens stripped from album titles after the light pass.
/// The light pass has already removed punctuation, so "feat." arrives as "feat".
static NOISE_WORDS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(?:remaster(?:ed)?|deluxe|edition|version|live|feat|ft|featuring)\b").unwrap()
});

/// Standalone 4-digit years, common in reissue titles.
static YEAR_TOKEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b\d{4}\b").unwrap());

static MULTI_SPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s{2,}").unwrap());

/// Check if a character is a Unicode combining mark (diacritical mark).
fn is_combining_mark(c: char) -> bool {
    matches!(c as u32, 0x0300..=0x036F | 0x1AB0..=0x1AFF | 0x1DC0..=0x1DFF | 0xFE20..=0xFE2F)
}

/// Light normalization: the comparable key.
/// Lowercase, NFKD-decompose and drop combining marks, transliterate any
/// remaining non-Latin script to ASCII, then keep only `[a-z0-9 ]` with
/// single spaces.
pub fn normalize(text: &str) -> String {
    let stripped: String = text.nfkd().filter(|c| !is_combining_mark(*c)).collect();
    let folded = any_ascii(&stripped).to_lowercase();
    let kept: String = folded
        .chars()
        .map(|c| if c.is_whitespace() { ' ' } else { c })
        .filter(|c| matches!(c, 'a'..='z' | '0'..='9' | ' '))
        .collect();
    MULTI_SPACE.replace_all(&kept, " ").trim().to_string()
}

/// Compact normalization: light with spaces removed.
/// Used where equality must survive inconsistent spacing ("A Team" / "ATeam").
pub fn normalize_compact(text: &str) -> String {
    normalize(text).replace(' ', "")
}

/// Strong normalization for album titles.
/// Drops parenthetical/bracketed substrings and reissue noise words before
/// the light pass. Never applied to artist names.
pub fn normalize_album(text: &str) -> String {
    let no_parens = PARENTHETICAL.replace_all(text, " ");
    let light = normalize(&no_parens);
    let no_noise = NOISE_WORDS.replace_all(&light, " ");
    let no_years = YEAR_TOKEN.replace_all(&no_noise, " ");
    MULTI_SPACE.replace_all(&no_years, " ").trim().to_string()
}

/// Strong normalization collapsed to a spaceless equality key.
pub fn normalize_album_key(text: &str) -> String {
    normalize_album(text).replace(' ', "")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn light_strips_diacritics_and_punctuation() {
        assert_eq!(normalize("Beyoncé"), "beyonce");
        assert_eq!(normalize("My Dear Melancholy,"), "my dear melancholy");
        assert_eq!(normalize("AC/DC"), "acdc");
        assert_eq!(normalize("  Motörhead  "), "motorhead");
    }

    #[test]
    fn light_is_total() {
        assert_eq!(normalize(""), "");
        assert_eq!(normalize("   "), "");
        assert_eq!(normalize("!!!"), "");
    }

    #[test]
    fn light_is_idempotent() {
        for s in ["Björk", "The Weeknd", "Call Out My Name", "déjà-vu (2021)"] {
            let once = normalize(s);
            assert_eq!(normalize(&once), once);
        }
    }

    #[test]
    fn compact_removes_spaces() {
        assert_eq!(normalize_compact("Call Out My Name"), "calloutmyname");
        assert_eq!(normalize_compact(""), "");
    }

    #[test]
    fn album_strips_noise() {
        assert_eq!(normalize_album("AlbumY (Deluxe)"), "albumy");
        assert_eq!(normalize_album("Nevermind (2011 Remaster)"), "nevermind");
        assert_eq!(normalize_album("OK Computer - Deluxe Edition"), "ok computer");
        assert_eq!(normalize_album("Abbey Road 2019"), "abbey road");
        assert_eq!(normalize_album("Unplugged [Live]"), "unplugged");
    }

    #[test]
    fn album_is_idempotent() {
        for s in ["AlbumY (Deluxe)", "Greatest Hits 1999", "Live at Wembley"] {
            let once = normalize_album(s);
            assert_eq!(normalize_album(&once), once);
        }
    }

    #[test]
    fn album_key_examples() {
        assert_eq!(normalize_album_key("My Dear Melancholy,"), "mydearmelancholy");
        assert_eq!(normalize_album_key("AlbumY (Deluxe)"), "albumy");
    }
}
