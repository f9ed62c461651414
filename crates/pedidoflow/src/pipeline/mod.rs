//! Message-to-order pipeline stages.
//!
//! Parsing lives in [`crate::parser`]; this module owns what happens to
//! the drafts afterwards: validation against the catalog, optional AI
//! refinement and grouping into per-client orders.

pub mod grouping;
pub mod item;
pub mod refine;
pub mod validate;

pub use grouping::{group_items, GroupedOrder};
pub use item::{LineStatus, OrderLineItem};
pub use refine::{refine, RefineOutcome};
pub use validate::validate;
