//! Tokenizer and state-machine parser for raw order messages.
//!
//! Converts messy chat text ("Daniel 2 kilos papas, Ana M 3") into draft
//! line items with no database knowledge. A four-state machine consumes
//! tokens left to right; lookahead handles the common shorthand where a
//! variant code and quantity follow the client name with no product.

use serde::{Deserialize, Serialize};

/// Connector words skipped during tokenization.
const STOP_WORDS: &[&str] = &["de", "y", "para", "con", "el", "la", "los", "las"];

/// Measure words that qualify a quantity rather than naming a product.
const UNIT_WORDS: &[&str] = &[
    "kilo", "kilos", "kg", "kgs", "gramo", "gramos", "litro", "litros", "lt", "unidad",
    "unidades", "docena", "docenas", "paquete", "paquetes", "caja", "cajas", "bolsa", "bolsas",
];

/// Tokens at most this long are candidate variant codes.
const SHORT_TOKEN_LEN: usize = 2;

/// Parsing options. Both heuristics default to on.
#[derive(Debug, Clone)]
pub struct ParserOptions {
    /// Lenient numeric parsing: accepts digit runs glued to a unit or
    /// multiplier suffix ("3kg", "2x", "x2").
    pub tolerate_typos: bool,
    /// Enables the short-token lookahead that reads "Ana M 3" as
    /// client + variant code + quantity.
    pub detect_partial_names: bool,
}

impl Default for ParserOptions {
    fn default() -> Self {
        Self {
            tolerate_typos: true,
            detect_partial_names: true,
        }
    }
}

/// A parsed-but-unvalidated order entry. Ephemeral; never persisted
/// standalone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DraftLineItem {
    pub client_name: String,
    /// Empty when the product was not stated and must be inferred.
    pub product_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variant_hint: Option<String>,
    pub quantity: u32,
    /// Set when the segment named no product (client + variant + qty
    /// shorthand, or a flushed remainder).
    #[serde(default)]
    pub inferred_product: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum State {
    Client,
    Variant,
    Quantity,
    Product,
}

/// Parses a raw message into merged draft line items.
pub fn parse(message: &str, options: &ParserOptions) -> Vec<DraftLineItem> {
    let mut items = Vec::new();
    for segment in split_segments(message) {
        parse_segment(&segment, options, &mut items);
    }
    merge_duplicates(items)
}

/// Splits on newlines, commas and semicolons; the whole message is one
/// segment when no delimiter is present.
fn split_segments(message: &str) -> Vec<String> {
    let segments: Vec<String> = message
        .split(['\n', ',', ';'])
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    if segments.is_empty() {
        vec![message.trim().to_string()]
    } else {
        segments
    }
}

/// Tokenizes a segment: whitespace split, punctuation trimmed, stop
/// words removed.
fn tokenize(segment: &str) -> Vec<String> {
    segment
        .split_whitespace()
        .map(|t| t.trim_matches(|c: char| !c.is_alphanumeric()).to_string())
        .filter(|t| !t.is_empty())
        .filter(|t| !STOP_WORDS.contains(&t.to_lowercase().as_str()))
        .collect()
}

/// Parses a numeric token. With `tolerate_typos`, a digit run glued to a
/// multiplier prefix or alphabetic suffix still counts ("x2", "3kg").
fn numeric_value(token: &str, tolerate_typos: bool) -> Option<u32> {
    if token.is_empty() {
        return None;
    }
    if token.chars().all(|c| c.is_ascii_digit()) {
        return token.parse().ok();
    }
    if !tolerate_typos {
        return None;
    }
    let stripped = token
        .strip_prefix(['x', 'X'])
        .unwrap_or(token);
    let digits: String = stripped
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    if digits.is_empty() {
        return None;
    }
    let rest = &stripped[digits.len()..];
    if rest.chars().all(|c| c.is_alphabetic()) {
        digits.parse().ok()
    } else {
        None
    }
}

fn is_unit_word(token: &str) -> bool {
    UNIT_WORDS.contains(&token.to_lowercase().as_str())
}

fn is_short(token: &str, tolerate_typos: bool) -> bool {
    token.chars().count() <= SHORT_TOKEN_LEN && numeric_value(token, tolerate_typos).is_none()
}

/// Per-segment accumulation.
#[derive(Default)]
struct Accumulator {
    client: Vec<String>,
    product: Vec<String>,
    variant: Option<String>,
    quantity: Option<u32>,
}

impl Accumulator {
    fn client_name(&self) -> String {
        self.client.join(" ")
    }

    fn product_name(&self) -> String {
        self.product.join(" ")
    }

    /// Emits the accumulated item if it has a quantity and at least a
    /// client or product name, then clears product/variant/quantity.
    /// The client name is kept for further items in the same segment.
    fn emit(&mut self, items: &mut Vec<DraftLineItem>) {
        let quantity = match self.quantity {
            Some(q) => q,
            None => return,
        };
        if self.client.is_empty() && self.product.is_empty() {
            return;
        }
        let product_name = self.product_name();
        items.push(DraftLineItem {
            client_name: self.client_name(),
            inferred_product: product_name.is_empty(),
            product_name,
            variant_hint: self.variant.take(),
            quantity,
        });
        self.product.clear();
        self.quantity = None;
    }

    /// Full reset, clearing the client too.
    fn reset(&mut self) {
        self.client.clear();
        self.product.clear();
        self.variant = None;
        self.quantity = None;
    }
}

fn parse_segment(segment: &str, options: &ParserOptions, items: &mut Vec<DraftLineItem>) {
    let tokens = tokenize(segment);
    let mut acc = Accumulator::default();
    let mut state = State::Client;

    let mut i = 0;
    while i < tokens.len() {
        let token = &tokens[i];
        let next_numeric = tokens
            .get(i + 1)
            .map(|t| numeric_value(t, options.tolerate_typos).is_some())
            .unwrap_or(false);

        match state {
            State::Client => {
                if let Some(q) = numeric_value(token, options.tolerate_typos) {
                    acc.quantity = Some(q);
                    state = State::Product;
                } else if options.detect_partial_names
                    && is_short(token, options.tolerate_typos)
                    && next_numeric
                {
                    // Lookahead: short code with a trailing number is a
                    // variant, not part of the client name.
                    state = State::Variant;
                    continue; // reprocess this token in the variant state
                } else {
                    acc.client.push(token.clone());
                }
            }
            State::Variant => {
                acc.variant = Some(token.clone());
                state = State::Quantity;
            }
            State::Quantity => {
                if let Some(q) = numeric_value(token, options.tolerate_typos) {
                    acc.quantity = Some(q);
                    if !acc.client.is_empty() && acc.variant.is_some() && acc.product.is_empty() {
                        // "ClientName VariantCode Qty" shorthand with an
                        // implicit product.
                        acc.emit(items);
                        acc.reset();
                        state = State::Client;
                    } else {
                        state = State::Product;
                    }
                } else if acc.variant.is_some() {
                    // A word where a quantity was expected: it names the
                    // product after all.
                    if !is_unit_word(token) {
                        acc.product.push(token.clone());
                    }
                    state = State::Product;
                } else {
                    // Lookahead false positive; fold back into the client.
                    acc.client.push(token.clone());
                    state = State::Client;
                }
            }
            State::Product => {
                if let Some(q) = numeric_value(token, options.tolerate_typos) {
                    // A new quantity closes the current item.
                    acc.emit(items);
                    acc.quantity = Some(q);
                } else if is_unit_word(token) {
                    // measure word, qualifies the quantity
                } else if options.detect_partial_names
                    && is_short(token, options.tolerate_typos)
                    && !acc.product.is_empty()
                {
                    acc.variant = Some(token.clone());
                    acc.emit(items);
                } else {
                    acc.product.push(token.clone());
                }
            }
        }
        i += 1;
    }

    // Segment end: flush whatever carries a quantity. A bare client
    // accumulation without one is dropped.
    acc.emit(items);
}

/// Merges duplicates by lowercased (client, product, variant) key,
/// summing quantities and preserving first-seen order.
fn merge_duplicates(items: Vec<DraftLineItem>) -> Vec<DraftLineItem> {
    let mut merged: Vec<DraftLineItem> = Vec::with_capacity(items.len());
    for item in items {
        let key = (
            item.client_name.to_lowercase(),
            item.product_name.to_lowercase(),
            item.variant_hint
                .as_deref()
                .unwrap_or("")
                .to_lowercase(),
        );
        let existing = merged.iter_mut().find(|m| {
            (
                m.client_name.to_lowercase(),
                m.product_name.to_lowercase(),
                m.variant_hint.as_deref().unwrap_or("").to_lowercase(),
            ) == key
        });
        match existing {
            Some(m) => m.quantity += item.quantity,
            None => merged.push(item),
        }
    }
    merged
}
