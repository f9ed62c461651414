//! Validated order line items.

use serde::{Deserialize, Serialize};

use crate::catalog::{Client, Product, Variant};
use crate::parser::DraftLineItem;

/// Review status of a line item. Severity order: error > warning > valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LineStatus {
    Valid,
    Warning,
    Error,
}

impl LineStatus {
    /// Returns the more severe of the two statuses.
    pub fn worst(self, other: LineStatus) -> LineStatus {
        self.max(other)
    }
}

impl std::fmt::Display for LineStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LineStatus::Valid => write!(f, "valid"),
            LineStatus::Warning => write!(f, "warning"),
            LineStatus::Error => write!(f, "error"),
        }
    }
}

/// A draft line item enriched with catalog matches and review issues.
///
/// Invariants: `Error` iff the client or product match is missing;
/// `Valid` iff all three matches resolved with no issues.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderLineItem {
    pub client_name_raw: String,
    pub product_name_raw: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variant_hint_raw: Option<String>,
    pub quantity: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_match: Option<Client>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product_match: Option<Product>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variant_match: Option<Variant>,
    pub status: LineStatus,
    pub issues: Vec<String>,
}

impl OrderLineItem {
    /// Starts from a draft with no matches and no issues yet.
    pub fn from_draft(draft: &DraftLineItem) -> Self {
        Self {
            client_name_raw: draft.client_name.clone(),
            product_name_raw: draft.product_name.clone(),
            variant_hint_raw: draft.variant_hint.clone(),
            quantity: draft.quantity,
            client_match: None,
            product_match: None,
            variant_match: None,
            status: LineStatus::Valid,
            issues: Vec::new(),
        }
    }

    /// Records an issue and raises the status to at least `severity`.
    pub fn flag(&mut self, severity: LineStatus, issue: impl Into<String>) {
        self.issues.push(issue.into());
        self.status = self.status.worst(severity);
    }
}
