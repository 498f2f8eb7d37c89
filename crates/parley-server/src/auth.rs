//! Token verification for START frames.

use jsonwebtoken::{decode, DecodingKey, Validation};
use parley_chat::ChatError;
use serde::{Deserialize, Serialize};

/// JWT claims. `sub` is the user id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: usize,
}

/// Resolves an auth token to a user id.
pub trait TokenVerifier: Send + Sync {
    fn verify(&self, token: &str) -> Result<String, ChatError>;
}

/// HS256 JWT verification with expiry checking.
pub struct JwtVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl JwtVerifier {
    pub fn hs256(secret: &str) -> Self {
        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::default(),
        }
    }

    /// Read the secret from environment variable `var`.
    pub fn from_env(var: &str) -> Option<Self> {
        std::env::var(var)
            .ok()
            .filter(|s| !s.is_empty())
            .map(|secret| Self::hs256(&secret))
    }
}

impl TokenVerifier for JwtVerifier {
    fn verify(&self, token: &str) -> Result<String, ChatError> {
        let data = decode::<Claims>(token, &self.key, &self.validation).map_err(|e| {
            tracing::debug!(error = %e, "Token rejected");
            ChatError::AuthInvalid
        })?;
        if data.claims.sub.is_empty() {
            return Err(ChatError::AuthInvalid);
        }
        Ok(data.claims.sub)
    }
}

/// Fixed token table.
#[cfg(test)]
#[derive(Default)]
pub struct StaticVerifier {
    tokens: std::collections::HashMap<String, String>,
}

#[cfg(test)]
impl StaticVerifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(mut self, token: impl Into<String>, user_id: impl Into<String>) -> Self {
        self.tokens.insert(token.into(), user_id.into());
        self
    }
}

#[cfg(test)]
impl TokenVerifier for StaticVerifier {
    fn verify(&self, token: &str) -> Result<String, ChatError> {
        self.tokens.get(token).cloned().ok_or(ChatError::AuthInvalid)
    }
}
