//! Validation stage: resolves drafts against live reference data.
//!
//! Pure and deterministic; safe to re-run. Resolution failures become
//! data (status + issue strings), never errors.

use crate::catalog::{Client, Product};
use crate::matching::{find_best, thresholds};
use crate::parser::DraftLineItem;

use super::item::{LineStatus, OrderLineItem};

/// Resolves each draft's client, product and variant and annotates it
/// with review status and Spanish issue strings.
pub fn validate(
    drafts: &[DraftLineItem],
    clients: &[Client],
    products: &[Product],
) -> Vec<OrderLineItem> {
    drafts
        .iter()
        .map(|draft| validate_one(draft, clients, products))
        .collect()
}

fn validate_one(
    draft: &DraftLineItem,
    clients: &[Client],
    products: &[Product],
) -> OrderLineItem {
    let mut item = OrderLineItem::from_draft(draft);

    item.client_match = find_best(
        &draft.client_name,
        clients,
        |c| &c.name,
        thresholds::CLIENT_MATCH,
    )
    .cloned();
    if item.client_match.is_none() {
        item.flag(
            LineStatus::Error,
            format!("No se encontró el cliente \"{}\"", draft.client_name),
        );
    }

    item.product_match = if draft.inferred_product {
        infer_product(draft, products)
    } else {
        find_best(
            &draft.product_name,
            products,
            |p| &p.name,
            thresholds::PRODUCT_MATCH,
        )
        .cloned()
    };

    match item.product_match.clone() {
        None => {
            let label = if draft.inferred_product {
                draft.variant_hint.as_deref().unwrap_or("")
            } else {
                &draft.product_name
            };
            item.flag(
                LineStatus::Error,
                format!("No se encontró el producto \"{}\"", label),
            );
        }
        Some(product) => {
            if draft.inferred_product {
                item.flag(LineStatus::Warning, "Producto inferido del contexto");
            }
            if product.variants.is_empty() {
                item.flag(LineStatus::Warning, "El producto no tiene variantes disponibles");
            } else {
                match &draft.variant_hint {
                    None => {
                        item.flag(LineStatus::Warning, "Variante no especificada");
                    }
                    Some(hint) => {
                        item.variant_match = find_best(
                            hint,
                            &product.variants,
                            |v| &v.name,
                            thresholds::VARIANT_MATCH,
                        )
                        .cloned();
                        if item.variant_match.is_none() {
                            item.flag(
                                LineStatus::Warning,
                                format!("No se encontró la variante \"{}\"", hint),
                            );
                        }
                    }
                }
            }
        }
    }

    item
}

/// Resolves an implicit product by finding a catalog product that owns a
/// variant matching the draft's variant hint.
fn infer_product(draft: &DraftLineItem, products: &[Product]) -> Option<Product> {
    let hint = draft.variant_hint.as_deref()?;
    products
        .iter()
        .find(|p| {
            find_best(hint, &p.variants, |v| &v.name, thresholds::VARIANT_MATCH).is_some()
        })
        .cloned()
}
