//! Token usage tracking across model calls.

use std::collections::HashMap;

use crate::TokenUsage;

/// Cumulative token usage, per model and in total.
#[derive(Debug, Clone, Default)]
pub struct TokenTracker {
    total: TokenUsage,
    by_model: HashMap<String, TokenUsage>,
    call_count: u64,
}

impl TokenTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record token usage from one call.
    pub fn record(&mut self, model: &str, usage: &TokenUsage) {
        add(&mut self.total, usage);
        add(self.by_model.entry(model.to_string()).or_default(), usage);
        self.call_count += 1;
    }

    /// Fold another tracker into this one.
    pub fn merge(&mut self, other: &TokenTracker) {
        add(&mut self.total, &other.total);
        for (model, usage) in &other.by_model {
            add(self.by_model.entry(model.clone()).or_default(), usage);
        }
        self.call_count += other.call_count;
    }

    pub fn total(&self) -> &TokenUsage {
        &self.total
    }

    pub fn for_model(&self, model: &str) -> Option<&TokenUsage> {
        self.by_model.get(model)
    }

    /// Iterate `(model, usage)` pairs.
    pub fn models(&self) -> impl Iterator<Item = (&str, &TokenUsage)> {
        self.by_model.iter().map(|(m, u)| (m.as_str(), u))
    }

    pub fn total_tokens(&self) -> u64 {
        self.total.total_tokens()
    }

    pub fn call_count(&self) -> u64 {
        self.call_count
    }

    /// Price everything recorded, using a per-model cost function.
    pub fn cost_with(&self, cost: impl Fn(&str, &TokenUsage) -> f64) -> f64 {
        self.by_model.iter().map(|(m, u)| cost(m, u)).sum()
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

fn add(into: &mut TokenUsage, usage: &TokenUsage) {
    into.input_tokens = into.input_tokens.saturating_add(usage.input_tokens);
    into.output_tokens = into.output_tokens.saturating_add(usage.output_tokens);
}
