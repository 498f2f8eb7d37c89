//! Model Invocation Gateway.
//!
//! Wraps any [`AiClient`] with bounded retry. Only throttling is retried;
//! every other failure surfaces on the first occurrence.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::{AiClient, AiError, AiResponse, ChatRequest, TokenSender};

/// Retry budget and linear backoff step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay before retry `n` is `backoff_step * n`.
    pub backoff_step: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_step: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, backoff_step: Duration) -> Self {
        Self {
            max_retries,
            backoff_step,
        }
    }

    /// Wait before the given retry (1-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        self.backoff_step.saturating_mul(retry)
    }
}

/// Single entry point for model calls.
#[derive(Clone)]
pub struct ModelGateway {
    client: Arc<dyn AiClient>,
    policy: RetryPolicy,
}

impl ModelGateway {
    pub fn new(client: Arc<dyn AiClient>, policy: RetryPolicy) -> Self {
        Self { client, policy }
    }

    /// Non-streaming call with retry on throttling.
    pub async fn invoke(&self, request: &ChatRequest) -> Result<AiResponse, AiError> {
        let mut retry = 0;
        loop {
            match self.client.send_message(request).await {
                Ok(response) => return Ok(response),
                Err(e) => {
                    retry += 1;
                    self.backoff_or_fail(e, retry, &request.model).await?;
                }
            }
        }
    }

    /// Streaming call with retry on throttling.
    ///
    /// Throttling is reported before the backend emits any token, so a retried
    /// attempt never duplicates output already sent on `tokens`.
    pub async fn invoke_streaming(
        &self,
        request: &ChatRequest,
        tokens: TokenSender,
    ) -> Result<AiResponse, AiError> {
        let mut retry = 0;
        loop {
            match self
                .client
                .send_message_streaming(request, tokens.clone())
                .await
            {
                Ok(response) => return Ok(response),
                Err(e) => {
                    retry += 1;
                    self.backoff_or_fail(e, retry, &request.model).await?;
                }
            }
        }
    }

    async fn backoff_or_fail(&self, error: AiError, retry: u32, model: &str) -> Result<(), AiError> {
        if !error.is_transient() {
            warn!(model, error = %error, "Model call failed");
            return Err(error);
        }
        if retry > self.policy.max_retries {
            warn!(
                model,
                attempts = retry,
                "Model throttled, retry budget exhausted"
            );
            return Err(error);
        }
        let delay = self.policy.delay_for(retry);
        info!(model, retry, delay_secs = delay.as_secs(), "Model throttled, backing off");
        tokio::time::sleep(delay).await;
        Ok(())
    }
}
