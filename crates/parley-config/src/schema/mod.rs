//! Configuration schema types for the parley server.
//!
//! All structs use `serde(default)` so partial configs work correctly.

mod bots;
mod model;
mod server;
mod system;

pub use bots::*;
pub use model::*;
pub use server::*;
pub use system::*;

use serde::{Deserialize, Serialize};

/// Current config schema version.
pub const CONFIG_SCHEMA_VERSION: u32 = 1;

/// Root configuration.
///
/// Only override what you want to change.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ParleyConfig {
    pub server: ServerConfig,
    pub session: SessionConfig,
    pub model: ModelConfig,
    pub retry: RetryConfig,
    pub agent: AgentConfig,
    pub auth: AuthConfig,
    pub logging: LoggingConfig,
    /// Extra or overriding model catalog entries.
    pub models: Vec<ModelEntry>,
    /// Bots available at startup.
    pub bots: Vec<BotConfig>,
}
