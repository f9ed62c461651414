//! Fuzzy matching of free-text names against reference entities.

pub mod entity;
pub mod similarity;

pub use entity::{find_best, find_similar, thresholds, Scored};
pub use similarity::score;
