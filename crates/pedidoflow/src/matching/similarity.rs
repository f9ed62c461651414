//! Normalized string similarity used by all fuzzy matching.
//!
//! Cheap rules short-circuit the common chat-text cases (exact hits,
//! abbreviations, prefixes) before paying for edit distance. Scores are
//! always in `[0, 1]` and symmetric.

use strsim::levenshtein;

/// Minimum length for the prefix rule to apply.
const PREFIX_MIN_LEN: usize = 3;

/// Edit-distance similarity above this gets the substitution boost.
const BOOST_THRESHOLD: f64 = 0.6;

/// Flat boost compensating for common character substitutions in
/// colloquial Spanish (b/v, s/z, missing accents).
const BOOST: f64 = 0.1;

/// Scores the similarity of two strings, case-insensitively.
///
/// Rules, first applicable wins:
/// 1. trimmed case-insensitive equality -> 1.0
/// 2. containment -> 0.8 + 0.2 * (min_len / max_len)
/// 3. prefix with min length >= 3 -> 0.85
/// 4. normalized Levenshtein, boosted when both strings are longer than
///    3 chars and the base similarity exceeds 0.6.
pub fn score(a: &str, b: &str) -> f64 {
    let a = a.trim().to_lowercase();
    let b = b.trim().to_lowercase();

    if a == b {
        return 1.0;
    }
    // Equality covered "" == ""; one empty side can never match.
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }

    let a_len = a.chars().count();
    let b_len = b.chars().count();
    let (min_len, max_len) = if a_len < b_len {
        (a_len, b_len)
    } else {
        (b_len, a_len)
    };

    if a.contains(&b) || b.contains(&a) {
        return 0.8 + 0.2 * (min_len as f64 / max_len as f64);
    }

    if min_len >= PREFIX_MIN_LEN && (a.starts_with(&b) || b.starts_with(&a)) {
        return 0.85;
    }

    let distance = levenshtein(&a, &b);
    let similarity = 1.0 - distance as f64 / max_len as f64;

    if min_len > 3 && similarity > BOOST_THRESHOLD {
        (similarity + BOOST).min(1.0)
    } else {
        similarity.max(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_scores_one() {
        for s in ["a", "Daniel", "pañales", "aceite de oliva"] {
            assert_eq!(score(s, s), 1.0, "score({s:?}, {s:?})");
        }
    }

    #[test]
    fn test_both_empty_scores_one() {
        assert_eq!(score("", ""), 1.0);
        assert_eq!(score("  ", ""), 1.0);
    }

    #[test]
    fn test_empty_vs_nonempty_scores_zero() {
        assert_eq!(score("", "Daniel"), 0.0);
        assert_eq!(score("Daniel", ""), 0.0);
    }

    #[test]
    fn test_symmetry() {
        let pairs = [("Daniel", "Danie"), ("papas", "papa"), ("aceite", "azeite")];
        for (a, b) in pairs {
            assert_eq!(score(a, b), score(b, a), "score({a:?}, {b:?})");
        }
    }

    #[test]
    fn test_case_and_whitespace_insensitive() {
        assert_eq!(score(" Daniel ", "daniel"), 1.0);
        assert_eq!(score("PAÑALES", "pañales"), 1.0);
    }

    #[test]
    fn test_containment_scales_with_length_ratio() {
        // "dani" inside "daniela": 0.8 + 0.2 * 4/7
        let s = score("dani", "daniela");
        assert!((s - (0.8 + 0.2 * 4.0 / 7.0)).abs() < 1e-9);
        // Closer lengths score higher.
        assert!(score("daniel", "daniela") > score("dan", "daniela"));
    }

    #[test]
    fn test_containment_beats_prefix_rule() {
        // A prefix is also containment, so rule 2 applies first.
        let s = score("mar", "maria");
        assert!((s - (0.8 + 0.2 * 3.0 / 5.0)).abs() < 1e-9);
    }

    #[test]
    fn test_levenshtein_with_boost() {
        // "azeite" vs "aceite": distance 1 over 6 chars -> 0.833.., boosted.
        let s = score("azeite", "aceite");
        assert!(s > 0.9, "expected boosted similarity, got {s}");
        assert!(s < 1.0);
    }

    #[test]
    fn test_short_strings_not_boosted() {
        // "cas" vs "car": distance 1 over 3 -> 0.666.., min_len is not > 3.
        let s = score("cas", "car");
        assert!((s - (1.0 - 1.0 / 3.0)).abs() < 1e-9);
    }

    #[test]
    fn test_unrelated_strings_score_low() {
        assert!(score("Daniel", "zzzzzz") < 0.3);
    }

    #[test]
    fn test_never_exceeds_one() {
        assert!(score("aceites", "aceite1") <= 1.0);
    }
}
