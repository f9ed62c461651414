//! Reference entities (clients, products, variants) and the store port.
//!
//! The relational store that owns this data lives outside the core; the
//! pipeline only receives snapshots of it. `CatalogStore` is the CRUD
//! port a real backend implements; `InMemoryCatalog` backs tests and the
//! CLI demo.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A known client. Externally owned; immutable within one pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Client {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
}

/// A sellable variant of a product (size, presentation, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variant {
    pub id: String,
    pub name: String,
    pub price: f64,
}

/// A known product with its variants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub variants: Vec<Variant>,
}

/// One line of a persisted order, as accepted by `save_order`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewOrderItem {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product_id: Option<String>,
    pub product_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variant_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variant_name: Option<String>,
    pub quantity: u32,
}

/// A persisted order as returned by the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub client_id: String,
    pub items: Vec<NewOrderItem>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Client not found: {0}")]
    ClientNotFound(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Port to the external reference-data store.
///
/// Change notification from the real backend is consumed elsewhere to
/// refresh snapshots; it is not part of this port.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    async fn list_clients(&self) -> Result<Vec<Client>, CatalogError>;
    async fn list_products(&self) -> Result<Vec<Product>, CatalogError>;
    async fn save_order(
        &self,
        client_id: &str,
        items: Vec<NewOrderItem>,
    ) -> Result<Order, CatalogError>;
}

/// In-memory catalog used by tests and the CLI demo.
#[derive(Default)]
pub struct InMemoryCatalog {
    clients: RwLock<Vec<Client>>,
    products: RwLock<Vec<Product>>,
    orders: RwLock<HashMap<String, Order>>,
}

impl InMemoryCatalog {
    pub fn new(clients: Vec<Client>, products: Vec<Product>) -> Self {
        Self {
            clients: RwLock::new(clients),
            products: RwLock::new(products),
            orders: RwLock::new(HashMap::new()),
        }
    }

    pub fn order_count(&self) -> usize {
        self.orders.read().map(|o| o.len()).unwrap_or(0)
    }
}

#[async_trait]
impl CatalogStore for InMemoryCatalog {
    async fn list_clients(&self) -> Result<Vec<Client>, CatalogError> {
        Ok(self.clients.read().map(|c| c.clone()).unwrap_or_default())
    }

    async fn list_products(&self) -> Result<Vec<Product>, CatalogError> {
        Ok(self.products.read().map(|p| p.clone()).unwrap_or_default())
    }

    async fn save_order(
        &self,
        client_id: &str,
        items: Vec<NewOrderItem>,
    ) -> Result<Order, CatalogError> {
        let known = self
            .clients
            .read()
            .map(|c| c.iter().any(|cl| cl.id == client_id))
            .unwrap_or(false);
        if !known {
            return Err(CatalogError::ClientNotFound(client_id.to_string()));
        }

        let order = Order {
            id: uuid::Uuid::new_v4().to_string(),
            client_id: client_id.to_string(),
            items,
            created_at: chrono::Utc::now(),
        };
        if let Ok(mut orders) = self.orders.write() {
            orders.insert(order.id.clone(), order.clone());
        }
        Ok(order)
    }
}
