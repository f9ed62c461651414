//! Client-centric derived view over validated line items.
//!
//! Recomputed on demand from `OrderLineItem[]`; never persisted.

use serde::{Deserialize, Serialize};

use crate::catalog::Client;

use super::item::{LineStatus, OrderLineItem};

/// All line items for one resolved (or unresolved) client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupedOrder {
    /// Client id when matched, else the lowercased raw name.
    pub client_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_match: Option<Client>,
    pub items: Vec<OrderLineItem>,
    /// Worst status among the group's items.
    pub status: LineStatus,
}

/// Groups items by client, preserving first-seen group order.
pub fn group_items(items: &[OrderLineItem]) -> Vec<GroupedOrder> {
    let mut groups: Vec<GroupedOrder> = Vec::new();

    for item in items {
        let key = match &item.client_match {
            Some(client) => client.id.clone(),
            None => item.client_name_raw.to_lowercase(),
        };

        match groups.iter_mut().find(|g| g.client_key == key) {
            Some(group) => {
                group.status = group.status.worst(item.status);
                group.items.push(item.clone());
            }
            None => groups.push(GroupedOrder {
                client_key: key,
                client_match: item.client_match.clone(),
                status: item.status,
                items: vec![item.clone()],
            }),
        }
    }

    groups
}
