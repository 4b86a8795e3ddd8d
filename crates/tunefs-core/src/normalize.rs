//! Display-name to identifier normalization.
//!
//! Every artist, album, song, and playlist name becomes a directory or
//! file name in the mounted tree, so raw names are reduced to ASCII
//! alphanumerics and underscores before they are used as storage keys.
//! The raw name is kept separately in the store for description records.

use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Turn an arbitrary display name into a filesystem-safe identifier.
///
/// Rules, in order: `&` becomes `and`, diacritics are stripped via NFD
/// decomposition, whitespace runs collapse into a single underscore,
/// and every remaining character outside `[A-Za-z0-9_]` is dropped.
///
/// The function is idempotent: normalizing an already-normalized name
/// returns it unchanged. Two raw names that normalize to the same
/// identifier are treated as the same entity by the store.
pub fn normalize(raw: &str) -> String {
    let replaced = raw.replace('&', "and");
    let mut out = String::with_capacity(replaced.len());
    let mut pending_sep = false;

    for c in replaced.nfd().filter(|c| !is_combining_mark(*c)) {
        if c.is_whitespace() {
            pending_sep = !out.is_empty();
            continue;
        }
        if c.is_ascii_alphanumeric() || c == '_' {
            if pending_sep {
                out.push('_');
                pending_sep = false;
            }
            out.push(c);
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_name_unchanged() {
        assert_eq!(normalize("Nirvana"), "Nirvana");
    }

    #[test]
    fn test_spaces_become_underscores() {
        assert_eq!(normalize("Pink Floyd"), "Pink_Floyd");
        assert_eq!(normalize("The  Dark   Side"), "The_Dark_Side");
    }

    #[test]
    fn test_ampersand_becomes_and() {
        assert_eq!(normalize("Simon & Garfunkel"), "Simon_and_Garfunkel");
    }

    #[test]
    fn test_diacritics_stripped() {
        assert_eq!(normalize("Sigur Rós"), "Sigur_Ros");
        assert_eq!(normalize("Björk"), "Bjork");
        assert_eq!(normalize("Café Tacvba"), "Cafe_Tacvba");
    }

    #[test]
    fn test_punctuation_dropped() {
        assert_eq!(normalize("AC/DC"), "ACDC");
        assert_eq!(normalize("Don't Stop Me Now!"), "Dont_Stop_Me_Now");
        assert_eq!(normalize("(What's the Story) Morning Glory?"), "Whats_the_Story_Morning_Glory");
    }

    #[test]
    fn test_leading_trailing_whitespace_trimmed() {
        assert_eq!(normalize("  spaced out  "), "spaced_out");
    }

    #[test]
    fn test_idempotent() {
        for raw in ["Sigur Rós", "Simon & Garfunkel", "AC/DC", "  a  b  ", "já_tá"] {
            let once = normalize(raw);
            assert_eq!(normalize(&once), once, "not idempotent for {raw:?}");
        }
    }

    #[test]
    fn test_output_is_ascii_word_chars() {
        for raw in ["Мелодия", "東京事変", "naïve & bold", "semi;colon"] {
            let n = normalize(raw);
            assert!(
                n.chars().all(|c| c.is_ascii_alphanumeric() || c == '_'),
                "bad chars in {n:?}"
            );
        }
    }

    #[test]
    fn test_collision_example() {
        // Differently punctuated names collapse onto one identifier.
        assert_eq!(normalize("Guns N' Roses"), normalize("Guns N Roses"));
    }
}
