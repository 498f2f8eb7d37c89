//! Per-section validators.

use std::collections::HashSet;

use crate::schema::{ParleyConfig, AGENT_TOOLS};

use super::helpers::{validate_range, validate_range_f64};

pub(crate) fn validate_server(errors: &mut Vec<String>, config: &ParleyConfig) {
    if config.server.listen.parse::<std::net::SocketAddr>().is_err() {
        errors.push(format!(
            "server.listen = {:?} is not a socket address",
            config.server.listen
        ));
    }
    validate_range(
        errors,
        "server.max_frame_bytes",
        config.server.max_frame_bytes as u64,
        1024,
        16 * 1024 * 1024,
    );
}

pub(crate) fn validate_session(errors: &mut Vec<String>, config: &ParleyConfig) {
    validate_range(errors, "session.ttl_secs", config.session.ttl_secs, 1, 86_400);
    validate_range(
        errors,
        "session.reap_interval_secs",
        config.session.reap_interval_secs,
        1,
        86_400,
    );
    validate_range(
        errors,
        "session.page_size",
        config.session.page_size as u64,
        1,
        10_000,
    );
}

pub(crate) fn validate_retry(errors: &mut Vec<String>, config: &ParleyConfig) {
    validate_range(
        errors,
        "retry.max_retries",
        u64::from(config.retry.max_retries),
        0,
        10,
    );
    validate_range(
        errors,
        "retry.backoff_step_secs",
        config.retry.backoff_step_secs,
        0,
        60,
    );
}

pub(crate) fn validate_agent(errors: &mut Vec<String>, config: &ParleyConfig) {
    validate_range(
        errors,
        "agent.max_iterations",
        u64::from(config.agent.max_iterations),
        1,
        100,
    );
}

pub(crate) fn validate_models(errors: &mut Vec<String>, config: &ParleyConfig) {
    let mut seen = HashSet::new();
    for entry in &config.models {
        if entry.alias.is_empty() || entry.model_id.is_empty() {
            errors.push("models entries need both alias and model_id".into());
        }
        if !seen.insert(entry.alias.as_str()) {
            errors.push(format!("models.{} is defined twice", entry.alias));
        }
        if entry.input_price_per_1k < 0.0 || entry.output_price_per_1k < 0.0 {
            errors.push(format!("models.{} has a negative price", entry.alias));
        }
    }
}

pub(crate) fn validate_bots(errors: &mut Vec<String>, config: &ParleyConfig) {
    let mut seen = HashSet::new();
    for bot in &config.bots {
        if bot.id.is_empty() {
            errors.push("bots entries need an id".into());
            continue;
        }
        if !seen.insert(bot.id.as_str()) {
            errors.push(format!("bots.{} is defined twice", bot.id));
        }
        let prefix = format!("bots.{}", bot.id);
        for tool in &bot.tools {
            if !AGENT_TOOLS.contains(&tool.as_str()) {
                errors.push(format!(
                    "{prefix}.tools: unknown tool {tool:?} (expected one of {})",
                    AGENT_TOOLS.join(", ")
                ));
            }
        }
        validate_range(
            errors,
            &format!("{prefix}.generation.max_tokens"),
            u64::from(bot.generation.max_tokens),
            1,
            200_000,
        );
        validate_range_f64(
            errors,
            &format!("{prefix}.generation.temperature"),
            bot.generation.temperature,
            0.0,
            1.0,
        );
        validate_range_f64(
            errors,
            &format!("{prefix}.generation.top_p"),
            bot.generation.top_p,
            0.0,
            1.0,
        );
        validate_range(
            errors,
            &format!("{prefix}.search.max_results"),
            bot.search.max_results as u64,
            1,
            100,
        );
    }
}
