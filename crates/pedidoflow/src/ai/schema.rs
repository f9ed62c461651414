//! Response contract for the refinement stage.
//!
//! The service is asked for a single JSON document; anything around it
//! (prose, code fences) is tolerated and stripped before parsing.

use serde::{Deserialize, Serialize};

use super::GeneratorError;

/// Top-level refinement payload.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RefinedOrders {
    #[serde(default)]
    pub pedidos: Vec<RefinedOrder>,
}

/// One client's refined order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefinedOrder {
    #[serde(default)]
    pub cliente: String,
    #[serde(default)]
    pub cliente_id: Option<String>,
    #[serde(default)]
    pub items: Vec<RefinedItem>,
}

/// One refined line item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefinedItem {
    #[serde(default)]
    pub producto: String,
    #[serde(default)]
    pub producto_id: Option<String>,
    #[serde(default = "default_cantidad")]
    pub cantidad: u32,
    #[serde(default)]
    pub variante: Option<String>,
    #[serde(default)]
    pub variante_id: Option<String>,
    pub confianza: Confianza,
}

fn default_cantidad() -> u32 {
    1
}

/// Model self-reported confidence in a line item. Required on the wire:
/// a payload with a missing or unknown value is rejected as a whole, so
/// the refinement stage falls back to the pre-refinement items.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confianza {
    Alta,
    Media,
    Baja,
}

/// Parses the model's raw text into the refinement payload.
pub fn parse_response(raw: &str) -> Result<RefinedOrders, GeneratorError> {
    let candidate = extract_json(raw)
        .ok_or_else(|| GeneratorError::BadResponse("no JSON object found".to_string()))?;
    serde_json::from_str(candidate)
        .map_err(|e| GeneratorError::BadResponse(format!("invalid JSON: {e}")))
}

/// Extracts the first balanced JSON object from free-form model output.
///
/// Brace counting is string-aware so braces inside string values do not
/// unbalance the scan. Code fences are stripped first.
fn extract_json(raw: &str) -> Option<&str> {
    let text = strip_code_fences(raw);

    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + ch.len_utf8()]);
                }
            }
            _ => {}
        }
    }
    None
}

fn strip_code_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop an optional language tag on the fence line.
    let body = match rest.find('\n') {
        Some(idx) => &rest[idx + 1..],
        None => rest,
    };
    body.strip_suffix("```").unwrap_or(body).trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_plain_json() {
        let raw = r#"{"pedidos":[{"cliente":"Daniel","cliente_id":"c1","items":[{"producto":"Pañales","producto_id":"p1","cantidad":3,"variante":"M","variante_id":"v1","confianza":"alta"}]}]}"#;
        let parsed = parse_response(raw).unwrap();
        assert_eq!(parsed.pedidos.len(), 1);
        let item = &parsed.pedidos[0].items[0];
        assert_eq!(item.producto_id.as_deref(), Some("p1"));
        assert_eq!(item.cantidad, 3);
        assert_eq!(item.confianza, Confianza::Alta);
    }

    #[test]
    fn test_parses_fenced_json_with_prose() {
        let raw = "Aquí está el resultado:\n```json\n{\"pedidos\": []}\n```";
        // Prose before the fence means the fence prefix check fails, but
        // the balanced scan still finds the object.
        let parsed = parse_response(raw).unwrap();
        assert!(parsed.pedidos.is_empty());
    }

    #[test]
    fn test_parses_fenced_json() {
        let raw = "```json\n{\"pedidos\": [{\"cliente\": \"Ana\", \"items\": []}]}\n```";
        let parsed = parse_response(raw).unwrap();
        assert_eq!(parsed.pedidos[0].cliente, "Ana");
    }

    #[test]
    fn test_braces_inside_strings_do_not_unbalance() {
        let raw = r#"texto {"pedidos":[{"cliente":"A{B}","items":[]}]} cola"#;
        let parsed = parse_response(raw).unwrap();
        assert_eq!(parsed.pedidos[0].cliente, "A{B}");
    }

    #[test]
    fn test_missing_fields_take_defaults() {
        let raw =
            r#"{"pedidos":[{"cliente":"Ana","items":[{"producto":"Arroz","confianza":"media"}]}]}"#;
        let parsed = parse_response(raw).unwrap();
        let item = &parsed.pedidos[0].items[0];
        assert_eq!(item.cantidad, 1);
        assert!(item.variante.is_none());
    }

    #[test]
    fn test_missing_confianza_is_rejected() {
        let raw = r#"{"pedidos":[{"cliente":"Ana","items":[{"producto":"Arroz"}]}]}"#;
        assert!(parse_response(raw).is_err());
    }

    #[test]
    fn test_unknown_confianza_is_rejected() {
        let raw = r#"{"pedidos":[{"cliente":"Ana","items":[{"producto":"Arroz","confianza":"altisima"}]}]}"#;
        assert!(parse_response(raw).is_err());
    }

    #[test]
    fn test_no_json_is_error() {
        assert!(parse_response("no puedo procesar este mensaje").is_err());
    }

    #[test]
    fn test_truncated_json_is_error() {
        assert!(parse_response(r#"{"pedidos":[{"cliente":"Ana""#).is_err());
    }

    #[test]
    fn test_confianza_lowercase_wire_form() {
        assert_eq!(serde_json::to_string(&Confianza::Baja).unwrap(), "\"baja\"");
        let c: Confianza = serde_json::from_str("\"alta\"").unwrap();
        assert_eq!(c, Confianza::Alta);
    }
}
