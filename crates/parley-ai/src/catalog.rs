//! Model catalog: alias resolution and per-1k-token pricing.

use std::collections::HashMap;

use tracing::warn;

use crate::TokenUsage;

/// USD price per 1000 tokens.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelPrice {
    pub input_per_1k: f64,
    pub output_per_1k: f64,
}

impl ModelPrice {
    pub fn cost(&self, usage: &TokenUsage) -> f64 {
        (usage.input_tokens as f64 / 1000.0) * self.input_per_1k
            + (usage.output_tokens as f64 / 1000.0) * self.output_per_1k
    }
}

#[derive(Debug, Clone)]
struct CatalogEntry {
    model_id: String,
    price: ModelPrice,
}

/// Maps user-facing model aliases to backend ids and prices.
#[derive(Debug, Clone)]
pub struct ModelCatalog {
    entries: HashMap<String, CatalogEntry>,
}

const BUILTIN: &[(&str, &str, f64, f64)] = &[
    ("claude-v3-haiku", "claude-3-haiku-20240307", 0.00025, 0.00125),
    ("claude-v3-sonnet", "claude-3-sonnet-20240229", 0.003, 0.015),
    ("claude-v3.5-sonnet", "claude-3-5-sonnet-20240620", 0.003, 0.015),
    ("claude-v3-opus", "claude-3-opus-20240229", 0.015, 0.075),
];

impl ModelCatalog {
    /// Empty catalog; every alias passes through unpriced.
    pub fn empty() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Catalog preloaded with the Claude 3 family.
    pub fn builtin() -> Self {
        let mut catalog = Self::empty();
        for (alias, model_id, input, output) in BUILTIN {
            catalog.insert(
                *alias,
                *model_id,
                ModelPrice {
                    input_per_1k: *input,
                    output_per_1k: *output,
                },
            );
        }
        catalog
    }

    /// Add or replace an alias.
    pub fn insert(&mut self, alias: impl Into<String>, model_id: impl Into<String>, price: ModelPrice) {
        self.entries.insert(
            alias.into(),
            CatalogEntry {
                model_id: model_id.into(),
                price,
            },
        );
    }

    pub fn contains(&self, alias: &str) -> bool {
        self.entries.contains_key(alias)
    }

    /// Backend id for an alias. Unknown aliases are assumed to be backend ids already.
    pub fn resolve<'a>(&'a self, alias: &'a str) -> &'a str {
        self.entries
            .get(alias)
            .map(|e| e.model_id.as_str())
            .unwrap_or(alias)
    }

    pub fn price(&self, alias: &str) -> Option<ModelPrice> {
        self.entries.get(alias).map(|e| e.price)
    }

    /// Cost of a call in USD. Unknown models cost zero.
    pub fn cost(&self, alias: &str, usage: &TokenUsage) -> f64 {
        match self.price(alias) {
            Some(price) => price.cost(usage),
            None => {
                warn!(model = alias, "No pricing for model, recording zero cost");
                0.0
            }
        }
    }
}

impl Default for ModelCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}
