//! Fuzzy lookup of reference entities by display name.
//!
//! Exact case-insensitive matches always win outright; otherwise the best
//! similarity score above a per-entity-kind threshold is returned. Ties
//! prefer the shorter display name (the closer-to-exact hit), then input
//! order.

use super::similarity;

/// Thresholds tuned per entity kind.
pub mod thresholds {
    /// Best-match threshold for clients.
    pub const CLIENT_MATCH: f64 = 0.7;
    /// Suggestion threshold for "similar clients" listings.
    pub const CLIENT_SUGGEST: f64 = 0.6;
    /// Best-match threshold for products.
    pub const PRODUCT_MATCH: f64 = 0.7;
    /// Suggestion threshold for "similar products" listings.
    pub const PRODUCT_SUGGEST: f64 = 0.65;
    /// Best-match threshold for variants.
    pub const VARIANT_MATCH: f64 = 0.7;
}

/// A candidate together with its similarity score.
#[derive(Debug, Clone)]
pub struct Scored<'a, T> {
    pub entity: &'a T,
    pub score: f64,
}

/// Finds the best-scoring candidate above `threshold`, or `None`.
///
/// `display` extracts the candidate's display name. Never panics or
/// errors; an empty candidate set simply yields `None`.
pub fn find_best<'a, T, F>(
    name: &str,
    candidates: &'a [T],
    display: F,
    threshold: f64,
) -> Option<&'a T>
where
    F: Fn(&T) -> &str,
{
    let needle = name.trim().to_lowercase();
    if needle.is_empty() {
        return None;
    }

    // Exact case-insensitive match bypasses the threshold entirely.
    if let Some(exact) = candidates
        .iter()
        .find(|c| display(c).trim().to_lowercase() == needle)
    {
        return Some(exact);
    }

    let mut best: Option<(&T, f64, usize)> = None;
    for candidate in candidates {
        let label = display(candidate);
        let s = similarity::score(name, label);
        let len = label.chars().count();
        let wins = match best {
            None => true,
            Some((_, best_score, best_len)) => {
                s > best_score || (s == best_score && len < best_len)
            }
        };
        if wins {
            best = Some((candidate, s, len));
        }
    }

    best.filter(|(_, s, _)| *s > threshold).map(|(c, _, _)| c)
}

/// Returns all candidates scoring above `threshold`, sorted descending.
///
/// Used to surface near-miss suggestions for human correction.
pub fn find_similar<'a, T, F>(
    name: &str,
    candidates: &'a [T],
    display: F,
    threshold: f64,
) -> Vec<Scored<'a, T>>
where
    F: Fn(&T) -> &str,
{
    if name.trim().is_empty() {
        return Vec::new();
    }

    let mut scored: Vec<Scored<'a, T>> = candidates
        .iter()
        .map(|c| Scored {
            entity: c,
            score: similarity::score(name, display(c)),
        })
        .filter(|s| s.score > threshold)
        .collect();

    scored.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    scored
}
