//! AI refinement stage.
//!
//! Asks the text-generation service to re-read the original message with
//! the catalog in hand and returns corrected line items. Strictly
//! best-effort: on any failure the validated items pass through unchanged
//! and the task keeps going.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::ai::schema::{self, Confianza, RefinedOrders};
use crate::ai::{ConnectionState, GenerationOptions, TextGenerator};
use crate::catalog::{Client, Product};

use super::item::{LineStatus, OrderLineItem};

/// Outcome of a refinement attempt. `raw_response` carries the model's
/// unparsed text for auditing even when it was unusable.
pub struct RefineOutcome {
    pub items: Vec<OrderLineItem>,
    pub raw_response: Option<String>,
}

/// Refines validated items against the original message.
///
/// Skipped entirely (items returned as-is) when there is nothing to
/// refine or the service is not connected.
pub async fn refine(
    message: &str,
    items: Vec<OrderLineItem>,
    clients: &[Client],
    products: &[Product],
    generator: &Arc<dyn TextGenerator>,
    options: &GenerationOptions,
) -> RefineOutcome {
    if items.is_empty() {
        return RefineOutcome {
            items,
            raw_response: None,
        };
    }
    if generator.connection_state() != ConnectionState::Connected {
        debug!("refinement skipped: service not connected");
        return RefineOutcome {
            items,
            raw_response: None,
        };
    }

    let prompt = build_prompt(message, &items, clients, products);

    let raw = match generator.generate_content(&prompt, options).await {
        Ok(Some(text)) => text,
        Ok(None) => {
            warn!("refinement skipped: empty model response");
            return RefineOutcome {
                items,
                raw_response: None,
            };
        }
        Err(e) => {
            warn!("refinement skipped: {e}");
            return RefineOutcome {
                items,
                raw_response: None,
            };
        }
    };

    match schema::parse_response(&raw) {
        Ok(refined) => {
            let rebuilt = rebuild_items(&refined, clients, products);
            if rebuilt.is_empty() {
                warn!("refinement skipped: model returned no line items");
                RefineOutcome {
                    items,
                    raw_response: Some(raw),
                }
            } else {
                RefineOutcome {
                    items: rebuilt,
                    raw_response: Some(raw),
                }
            }
        }
        Err(e) => {
            warn!("refinement skipped: {e}");
            RefineOutcome {
                items,
                raw_response: Some(raw),
            }
        }
    }
}

fn build_prompt(
    message: &str,
    items: &[OrderLineItem],
    clients: &[Client],
    products: &[Product],
) -> String {
    let client_dir: String = clients
        .iter()
        .map(|c| format!("- {} (id: {})", c.name, c.id))
        .collect::<Vec<_>>()
        .join("\n");

    let product_dir: String = products
        .iter()
        .map(|p| {
            let variants: Vec<String> = p
                .variants
                .iter()
                .map(|v| format!("{} (id: {})", v.name, v.id))
                .collect();
            if variants.is_empty() {
                format!("- {} (id: {}), sin variantes", p.name, p.id)
            } else {
                format!("- {} (id: {}), variantes: {}", p.name, p.id, variants.join(", "))
            }
        })
        .collect::<Vec<_>>()
        .join("\n");

    let detected: String = items
        .iter()
        .map(|item| {
            format!(
                "- cliente: {}, producto: {}, variante: {}, cantidad: {}",
                item.client_name_raw,
                if item.product_name_raw.is_empty() {
                    "(inferido)"
                } else {
                    &item.product_name_raw
                },
                item.variant_hint_raw.as_deref().unwrap_or("(ninguna)"),
                item.quantity,
            )
        })
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        r#"Eres un asistente que estructura pedidos de clientes a partir de mensajes de chat en español.

Catálogo de clientes:
{client_dir}

Catálogo de productos:
{product_dir}

Mensaje original:
{message}

Interpretación preliminar:
{detected}

Corrige la interpretación usando el mensaje original y el catálogo. Usa los ids del catálogo cuando el nombre corresponda; omite el id si no hay correspondencia. Responde SOLO con un objeto JSON con esta forma exacta:
{{"pedidos": [{{"cliente": "...", "cliente_id": "...", "items": [{{"producto": "...", "producto_id": "...", "cantidad": 1, "variante": "...", "variante_id": "...", "confianza": "alta"}}]}}]}}

"confianza" debe ser "alta", "media" o "baja"."#
    )
}

/// Rebuilds line items from the model payload, re-resolving every
/// reference against the live catalog. Ids win over names; names are the
/// fallback when an id is absent or unknown.
fn rebuild_items(
    refined: &RefinedOrders,
    clients: &[Client],
    products: &[Product],
) -> Vec<OrderLineItem> {
    let mut items = Vec::new();

    for order in &refined.pedidos {
        let client_match = resolve_client(order.cliente_id.as_deref(), &order.cliente, clients);

        for entry in &order.items {
            let product_match =
                resolve_product(entry.producto_id.as_deref(), &entry.producto, products);
            let variant_match = product_match.as_ref().and_then(|p| {
                resolve_variant(
                    entry.variante_id.as_deref(),
                    entry.variante.as_deref(),
                    &p.variants,
                )
            });

            let mut item = OrderLineItem {
                client_name_raw: order.cliente.clone(),
                product_name_raw: entry.producto.clone(),
                variant_hint_raw: entry.variante.clone(),
                quantity: entry.cantidad.max(1),
                client_match: client_match.clone(),
                product_match: product_match.clone(),
                variant_match,
                status: LineStatus::Valid,
                issues: Vec::new(),
            };

            if item.client_match.is_none() {
                item.flag(
                    LineStatus::Error,
                    format!("No se encontró el cliente \"{}\"", order.cliente),
                );
            }
            if item.product_match.is_none() {
                item.flag(
                    LineStatus::Error,
                    format!("No se encontró el producto \"{}\"", entry.producto),
                );
            } else if item.variant_match.is_none() {
                match &entry.variante {
                    Some(hint) => item.flag(
                        LineStatus::Warning,
                        format!("No se encontró la variante \"{}\"", hint),
                    ),
                    None => {
                        let has_variants = item
                            .product_match
                            .as_ref()
                            .map(|p| !p.variants.is_empty())
                            .unwrap_or(false);
                        if has_variants {
                            item.flag(LineStatus::Warning, "Variante no especificada");
                        }
                    }
                }
            }
            if entry.confianza == Confianza::Baja {
                item.flag(LineStatus::Warning, "Confianza baja del asistente");
            }

            items.push(item);
        }
    }

    items
}

fn resolve_client(id: Option<&str>, name: &str, clients: &[Client]) -> Option<Client> {
    if let Some(id) = id {
        if let Some(client) = clients.iter().find(|c| c.id == id) {
            return Some(client.clone());
        }
    }
    clients
        .iter()
        .find(|c| c.name.eq_ignore_ascii_case(name))
        .cloned()
}

fn resolve_product(id: Option<&str>, name: &str, products: &[Product]) -> Option<Product> {
    if let Some(id) = id {
        if let Some(product) = products.iter().find(|p| p.id == id) {
            return Some(product.clone());
        }
    }
    products
        .iter()
        .find(|p| p.name.eq_ignore_ascii_case(name))
        .cloned()
}

fn resolve_variant(
    id: Option<&str>,
    name: Option<&str>,
    variants: &[crate::catalog::Variant],
) -> Option<crate::catalog::Variant> {
    if let Some(id) = id {
        if let Some(variant) = variants.iter().find(|v| v.id == id) {
            return Some(variant.clone());
        }
    }
    let name = name?;
    variants
        .iter()
        .find(|v| v.name.eq_ignore_ascii_case(name))
        .cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::stub::{FailingGenerator, StaticGenerator};
    use crate::catalog::Variant;

    fn catalog() -> (Vec<Client>, Vec<Product>) {
        let clients = vec![Client {
            id: "c1".to_string(),
            name: "Daniel".to_string(),
            phone: None,
        }];
        let products = vec![Product {
            id: "p1".to_string(),
            name: "Pañales".to_string(),
            variants: vec![Variant {
                id: "v1".to_string(),
                name: "M".to_string(),
                price: 10.0,
            }],
        }];
        (clients, products)
    }

    fn baseline_item() -> OrderLineItem {
        OrderLineItem {
            client_name_raw: "Daniel".to_string(),
            product_name_raw: String::new(),
            variant_hint_raw: Some("M".to_string()),
            quantity: 3,
            client_match: None,
            product_match: None,
            variant_match: None,
            status: LineStatus::Warning,
            issues: vec!["Producto inferido del contexto".to_string()],
        }
    }

    #[tokio::test]
    async fn test_skips_when_no_items() {
        let (clients, products) = catalog();
        let generator: Arc<dyn TextGenerator> =
            Arc::new(StaticGenerator::connected("{\"pedidos\": []}"));
        let outcome = refine(
            "hola",
            vec![],
            &clients,
            &products,
            &generator,
            &GenerationOptions::default(),
        )
        .await;
        assert!(outcome.items.is_empty());
        assert!(outcome.raw_response.is_none());
    }

    #[tokio::test]
    async fn test_skips_when_disconnected() {
        let (clients, products) = catalog();
        let generator: Arc<dyn TextGenerator> = Arc::new(StaticGenerator::disconnected());
        let outcome = refine(
            "Daniel M 3",
            vec![baseline_item()],
            &clients,
            &products,
            &generator,
            &GenerationOptions::default(),
        )
        .await;
        assert_eq!(outcome.items.len(), 1);
        assert_eq!(outcome.items[0].status, LineStatus::Warning);
    }

    #[tokio::test]
    async fn test_generator_failure_keeps_original_items() {
        let (clients, products) = catalog();
        let generator: Arc<dyn TextGenerator> = Arc::new(FailingGenerator);
        let outcome = refine(
            "Daniel M 3",
            vec![baseline_item()],
            &clients,
            &products,
            &generator,
            &GenerationOptions::default(),
        )
        .await;
        assert_eq!(outcome.items.len(), 1);
        assert_eq!(outcome.items[0].issues.len(), 1);
    }

    #[tokio::test]
    async fn test_unparseable_response_keeps_original_but_records_raw() {
        let (clients, products) = catalog();
        let generator: Arc<dyn TextGenerator> =
            Arc::new(StaticGenerator::connected("no entiendo el mensaje"));
        let outcome = refine(
            "Daniel M 3",
            vec![baseline_item()],
            &clients,
            &products,
            &generator,
            &GenerationOptions::default(),
        )
        .await;
        assert_eq!(outcome.items.len(), 1);
        assert_eq!(
            outcome.raw_response.as_deref(),
            Some("no entiendo el mensaje")
        );
    }

    #[tokio::test]
    async fn test_missing_confianza_keeps_original_items() {
        let (clients, products) = catalog();
        // No confianza field: the payload is rejected wholesale.
        let response = r#"{"pedidos":[{"cliente":"Daniel","cliente_id":"c1","items":[{"producto":"Pañales","producto_id":"p1","cantidad":9}]}]}"#;
        let generator: Arc<dyn TextGenerator> = Arc::new(StaticGenerator::connected(response));
        let outcome = refine(
            "Daniel M 3",
            vec![baseline_item()],
            &clients,
            &products,
            &generator,
            &GenerationOptions::default(),
        )
        .await;
        assert_eq!(outcome.items.len(), 1);
        assert_eq!(outcome.items[0].quantity, 3);
        assert_eq!(outcome.items[0].status, LineStatus::Warning);
    }

    #[tokio::test]
    async fn test_refined_items_reresolved_by_id() {
        let (clients, products) = catalog();
        let response = r#"{"pedidos":[{"cliente":"Daniel","cliente_id":"c1","items":[{"producto":"Pañales","producto_id":"p1","cantidad":3,"variante":"M","variante_id":"v1","confianza":"alta"}]}]}"#;
        let generator: Arc<dyn TextGenerator> = Arc::new(StaticGenerator::connected(response));
        let outcome = refine(
            "Daniel M 3",
            vec![baseline_item()],
            &clients,
            &products,
            &generator,
            &GenerationOptions::default(),
        )
        .await;
        let item = &outcome.items[0];
        assert_eq!(item.client_match.as_ref().unwrap().id, "c1");
        assert_eq!(item.product_match.as_ref().unwrap().id, "p1");
        assert_eq!(item.variant_match.as_ref().unwrap().id, "v1");
        assert_eq!(item.status, LineStatus::Valid);
    }

    #[tokio::test]
    async fn test_unknown_id_falls_back_to_name() {
        let (clients, products) = catalog();
        let response = r#"{"pedidos":[{"cliente":"daniel","cliente_id":"c99","items":[{"producto":"pañales","producto_id":"p99","cantidad":1,"confianza":"media"}]}]}"#;
        let generator: Arc<dyn TextGenerator> = Arc::new(StaticGenerator::connected(response));
        let outcome = refine(
            "daniel pañales",
            vec![baseline_item()],
            &clients,
            &products,
            &generator,
            &GenerationOptions::default(),
        )
        .await;
        let item = &outcome.items[0];
        assert_eq!(item.client_match.as_ref().unwrap().id, "c1");
        assert_eq!(item.product_match.as_ref().unwrap().id, "p1");
    }

    #[tokio::test]
    async fn test_low_confidence_flags_warning() {
        let (clients, products) = catalog();
        let response = r#"{"pedidos":[{"cliente":"Daniel","cliente_id":"c1","items":[{"producto":"Pañales","producto_id":"p1","cantidad":2,"variante_id":"v1","confianza":"baja"}]}]}"#;
        let generator: Arc<dyn TextGenerator> = Arc::new(StaticGenerator::connected(response));
        let outcome = refine(
            "Daniel 2",
            vec![baseline_item()],
            &clients,
            &products,
            &generator,
            &GenerationOptions::default(),
        )
        .await;
        let item = &outcome.items[0];
        assert_eq!(item.status, LineStatus::Warning);
        assert!(item.issues.iter().any(|i| i.contains("Confianza baja")));
    }

    #[tokio::test]
    async fn test_prompt_includes_catalog_and_message() {
        let (clients, products) = catalog();
        let generator = Arc::new(StaticGenerator::connected("{\"pedidos\": []}"));
        let as_trait: Arc<dyn TextGenerator> = generator.clone();
        let _ = refine(
            "Daniel M 3",
            vec![baseline_item()],
            &clients,
            &products,
            &as_trait,
            &GenerationOptions::default(),
        )
        .await;
        let prompts = generator.prompts.lock().unwrap();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].contains("Daniel (id: c1)"));
        assert!(prompts[0].contains("Pañales (id: p1)"));
        assert!(prompts[0].contains("Daniel M 3"));
    }
}
