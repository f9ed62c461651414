//! Command-line front end: processes one message and prints the grouped
//! orders as JSON.
//!
//! Usage: `pedidoflow [--config <path>] <message>`. Reads the message
//! from stdin when no positional argument is given.

use std::io::Read;
use std::sync::Arc;
use std::time::Duration;

use pedidoflow::ai::GenerationOptions;
use pedidoflow::catalog::{Client, InMemoryCatalog, Product, Variant};
use pedidoflow::parser::ParserOptions;
use pedidoflow::task::{TaskService, TaskStatus};
use pedidoflow::{
    db, telemetry, Database, HttpTextGenerator, ServiceConfig, TaskProgressBroadcaster,
    TextGenerator,
};
use tracing::info;

#[tokio::main]
async fn main() {
    telemetry::init();

    if let Err(e) = run().await {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

async fn run() -> pedidoflow::Result<()> {
    let (config, message) = parse_args()?;

    let db_path = match &config.database_path {
        Some(path) => path.clone(),
        None => db::default_database_path().unwrap_or_else(|| "pedidoflow.db".into()),
    };
    let database = Database::open(&db_path)?;

    let generator: Arc<dyn TextGenerator> = Arc::new(HttpTextGenerator::new(
        config.ai.endpoint.clone(),
        config.ai.api_key.clone(),
        Duration::from_secs(config.ai.request_timeout_secs),
    )?);
    if !config.ai.endpoint.is_empty() {
        let connected = generator.check_connection().await;
        info!("text-generation service connected: {connected}");
    }

    let service = Arc::new(TaskService::new(
        database,
        Arc::new(demo_catalog()),
        generator,
        config.broadcast_capacity,
        ParserOptions {
            tolerate_typos: config.parser.tolerate_typos,
            detect_partial_names: config.parser.detect_partial_names,
        },
        GenerationOptions {
            temperature: Some(config.ai.temperature),
            top_p: Some(config.ai.top_p),
            max_output_tokens: Some(config.ai.max_output_tokens),
        },
        config.retention_hours,
    ));
    service.load()?;
    service.purge_expired()?;

    let task = service.submit(&message)?;
    let (initial, mut rx) = service.subscribe(&task.id);

    let done = match initial.filter(|t| t.status.is_terminal()) {
        Some(task) => task,
        None => loop {
            match TaskProgressBroadcaster::next_for(&mut rx, &task.id).await {
                Some(snapshot) if snapshot.status.is_terminal() => break snapshot,
                Some(snapshot) => {
                    info!("{} {}%", snapshot.stage, snapshot.progress);
                }
                None => {
                    eprintln!("error: task stream closed unexpectedly");
                    std::process::exit(1);
                }
            }
        },
    };

    if done.status == TaskStatus::Error {
        eprintln!(
            "error: {}",
            done.error.as_deref().unwrap_or("task failed")
        );
        std::process::exit(1);
    }

    let groups = done.result.unwrap_or_default();
    match serde_json::to_string_pretty(&groups) {
        Ok(json) => println!("{json}"),
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(1);
        }
    }
    Ok(())
}

fn parse_args() -> pedidoflow::Result<(ServiceConfig, String)> {
    let mut args = std::env::args().skip(1);
    let mut config = ServiceConfig::default();
    let mut message_parts: Vec<String> = Vec::new();

    while let Some(arg) = args.next() {
        if arg == "--config" {
            if let Some(path) = args.next() {
                config = pedidoflow::load_config(&path)?;
            }
        } else {
            message_parts.push(arg);
        }
    }

    let message = if message_parts.is_empty() {
        let mut buffer = String::new();
        let _ = std::io::stdin().read_to_string(&mut buffer);
        buffer
    } else {
        message_parts.join(" ")
    };

    Ok((config, message))
}

/// Small built-in catalog so the binary is usable without a backend.
fn demo_catalog() -> InMemoryCatalog {
    InMemoryCatalog::new(
        vec![
            Client {
                id: "c1".to_string(),
                name: "Daniel".to_string(),
                phone: None,
            },
            Client {
                id: "c2".to_string(),
                name: "Ana".to_string(),
                phone: None,
            },
        ],
        vec![
            Product {
                id: "p1".to_string(),
                name: "Pañales".to_string(),
                variants: vec![
                    Variant {
                        id: "v1".to_string(),
                        name: "M".to_string(),
                        price: 10.0,
                    },
                    Variant {
                        id: "v2".to_string(),
                        name: "G".to_string(),
                        price: 12.0,
                    },
                ],
            },
            Product {
                id: "p2".to_string(),
                name: "Papas".to_string(),
                variants: vec![],
            },
        ],
    )
}
