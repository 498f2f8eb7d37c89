use async_trait::async_trait;
use parley_ai::ToolDefinition;

use super::calculator;
use super::knowledge_tool::KnowledgeTool;
use crate::model::ToolKind;

#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    /// Bad arguments from the model. Fed back as an observation.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// The tool itself failed. Ends the turn.
    #[error("{0}")]
    Execution(String),
}

/// Something the agent can call.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON schema of the input object.
    fn parameters(&self) -> serde_json::Value;

    async fn invoke(&self, input: &serde_json::Value) -> Result<String, ToolError>;

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters(),
        }
    }
}

/// The closed set of agent tools.
pub enum AgentTool {
    Today,
    Calculator,
    Knowledge(KnowledgeTool),
}

impl AgentTool {
    pub fn from_kind(kind: ToolKind) -> Self {
        match kind {
            ToolKind::Today => Self::Today,
            ToolKind::Calculator => Self::Calculator,
        }
    }
}

#[async_trait]
impl Tool for AgentTool {
    fn name(&self) -> &str {
        match self {
            Self::Today => "today",
            Self::Calculator => "calculator",
            Self::Knowledge(_) => "knowledge_base_tool",
        }
    }

    fn description(&self) -> &str {
        match self {
            Self::Today => "Get today's date in YYYY-MM-DD format.",
            Self::Calculator => {
                "Evaluate an arithmetic expression with + - * / ^ and parentheses."
            }
            Self::Knowledge(_) => {
                "Answer a question using the knowledge attached to this assistant. \
Use it for anything the documents may cover."
            }
        }
    }

    fn parameters(&self) -> serde_json::Value {
        match self {
            Self::Today => serde_json::json!({
                "type": "object",
                "properties": {},
            }),
            Self::Calculator => serde_json::json!({
                "type": "object",
                "properties": {
                    "expression": {
                        "type": "string",
                        "description": "Expression to evaluate, e.g. (2 + 3) * 4",
                    },
                },
                "required": ["expression"],
            }),
            Self::Knowledge(_) => serde_json::json!({
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "The question to answer",
                    },
                },
                "required": ["query"],
            }),
        }
    }

    async fn invoke(&self, input: &serde_json::Value) -> Result<String, ToolError> {
        match self {
            Self::Today => Ok(chrono::Local::now().format("%Y-%m-%d").to_string()),
            Self::Calculator => {
                let expression = string_arg(input, "expression")?;
                let value = calculator::evaluate(expression).map_err(ToolError::InvalidInput)?;
                Ok(calculator::format_number(value))
            }
            Self::Knowledge(tool) => tool.answer(string_arg(input, "query")?).await,
        }
    }
}

fn string_arg<'a>(input: &'a serde_json::Value, key: &str) -> Result<&'a str, ToolError> {
    input[key]
        .as_str()
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| ToolError::InvalidInput(format!("missing string field `{key}`")))
}
