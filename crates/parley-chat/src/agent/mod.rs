//! Tool-using agent loop.
//!
//! Tools form a closed set ([`AgentTool`]); the executor is generic over
//! anything implementing [`Tool`].

mod calculator;
mod executor;
mod knowledge_tool;
mod meters;
mod trace;
mod tools;

pub use calculator::evaluate;
pub use executor::{AgentExecutor, AgentOutcome, AgentStep, FORCED_STOP_MESSAGE};
pub use knowledge_tool::KnowledgeTool;
pub use meters::{ChunkCollector, UsageMeter};
pub use tools::{AgentTool, Tool, ToolError};
pub use trace::format_steps;
