//! Pedidoflow: turns free-form Spanish chat messages into structured,
//! validated orders.
//!
//! A submitted message becomes a [`task::ProcessingTask`] that moves
//! through parsing, catalog matching, validation, optional AI refinement
//! and grouping, streaming a full snapshot to subscribers after every
//! stage. Results are grouped per client and persisted locally with an
//! optional remote mirror.

pub mod ai;
pub mod broadcast;
pub mod catalog;
pub mod config;
pub mod db;
pub mod error;
pub mod matching;
pub mod parser;
pub mod pipeline;
pub mod task;
pub mod telemetry;

pub use ai::{ConnectionState, GenerationOptions, HttpTextGenerator, TextGenerator};
pub use broadcast::TaskProgressBroadcaster;
pub use catalog::{CatalogStore, Client, InMemoryCatalog, Product, Variant};
pub use config::{load_config, ServiceConfig};
pub use db::Database;
pub use error::{PedidoflowError, Result};
pub use pipeline::{GroupedOrder, LineStatus, OrderLineItem};
pub use task::{ProcessingTask, SyncScheduler, TaskMirror, TaskService, TaskStage, TaskStatus};
