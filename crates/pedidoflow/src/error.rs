//! Crate-level error aggregation.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PedidoflowError {
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),

    #[error("Catalog error: {0}")]
    Catalog(#[from] crate::catalog::CatalogError),

    #[error("Task error: {0}")]
    Task(#[from] crate::task::service::TaskError),

    #[error("Generation error: {0}")]
    Generator(#[from] crate::ai::GeneratorError),

    #[error("Mirror error: {0}")]
    Mirror(#[from] crate::task::MirrorError),
}

pub type Result<T> = std::result::Result<T, PedidoflowError>;
