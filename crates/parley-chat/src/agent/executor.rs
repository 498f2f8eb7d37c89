use parley_ai::{ChatRequest, GenerationParams, Message, ModelGateway, Role, ToolDefinition};
use tracing::{debug, info, warn};

use super::meters::UsageMeter;
use super::tools::{Tool, ToolError};
use crate::error::ChatError;

/// Output when the iteration bound is hit before any text was produced.
pub const FORCED_STOP_MESSAGE: &str = "Agent stopped due to iteration limit or time limit.";

/// One tool invocation inside the loop.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentStep {
    /// Model text that accompanied the tool call.
    pub thought: String,
    pub tool: String,
    pub input: serde_json::Value,
    pub observation: String,
}

#[derive(Debug, Clone)]
pub struct AgentOutcome {
    pub output: String,
    pub steps: Vec<AgentStep>,
    /// Model calls made.
    pub iterations: u32,
    /// The iteration bound ended the loop.
    pub forced_stop: bool,
}

/// Alternates model calls and tool calls until the model answers without
/// calling a tool, or `max_iterations` model calls have been made.
pub struct AgentExecutor<T: Tool> {
    gateway: ModelGateway,
    tools: Vec<T>,
    model_alias: String,
    model_id: String,
    system: Option<String>,
    params: GenerationParams,
    max_iterations: u32,
    meter: UsageMeter,
}

impl<T: Tool> AgentExecutor<T> {
    pub fn new(
        gateway: ModelGateway,
        tools: Vec<T>,
        model_alias: impl Into<String>,
        model_id: impl Into<String>,
    ) -> Self {
        Self {
            gateway,
            tools,
            model_alias: model_alias.into(),
            model_id: model_id.into(),
            system: None,
            params: GenerationParams::default(),
            max_iterations: 15,
            meter: UsageMeter::new(),
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        let system = system.into();
        self.system = (!system.is_empty()).then_some(system);
        self
    }

    pub fn with_params(mut self, params: GenerationParams) -> Self {
        self.params = params;
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_meter(mut self, meter: UsageMeter) -> Self {
        self.meter = meter;
        self
    }

    pub fn tool_names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    pub async fn run(&self, input: &str) -> Result<AgentOutcome, ChatError> {
        let definitions: Vec<ToolDefinition> = self.tools.iter().map(|t| t.definition()).collect();
        let mut messages = vec![Message::user(input)];
        let mut steps = Vec::new();
        let mut partial = String::new();

        for iteration in 1..=self.max_iterations {
            let mut request = ChatRequest::new(self.model_id.clone(), messages.clone())
                .with_tools(definitions.clone())
                .with_params(self.params.clone());
            if let Some(system) = &self.system {
                request = request.with_system(system.clone());
            }

            let response = self.gateway.invoke(&request).await?;
            self.meter.record(&self.model_alias, &response.usage);

            if response.tool_calls.is_empty() {
                info!(iteration, steps = steps.len(), "Agent finished");
                return Ok(AgentOutcome {
                    output: response.content,
                    steps,
                    iterations: iteration,
                    forced_stop: false,
                });
            }

            if !response.content.trim().is_empty() {
                partial = response.content.clone();
            }
            messages.push(Message::assistant(response.content.clone()));

            for call in &response.tool_calls {
                let observation = self.call_tool(&call.name, &call.arguments).await?;
                messages.push(Message::text(
                    Role::Tool,
                    format!("[Tool Result: {}]\n{}", call.name, observation),
                ));
                steps.push(AgentStep {
                    thought: response.content.clone(),
                    tool: call.name.clone(),
                    input: call.arguments.clone(),
                    observation,
                });
            }
        }

        warn!(
            max_iterations = self.max_iterations,
            "Agent hit the iteration limit, forcing a stop"
        );
        let output = if partial.is_empty() {
            FORCED_STOP_MESSAGE.to_string()
        } else {
            partial
        };
        Ok(AgentOutcome {
            output,
            steps,
            iterations: self.max_iterations,
            forced_stop: true,
        })
    }

    /// Observation for one call. Unknown tools and bad input become
    /// observations; execution failures end the turn.
    async fn call_tool(&self, name: &str, arguments: &serde_json::Value) -> Result<String, ChatError> {
        let Some(tool) = self.tools.iter().find(|t| t.name() == name) else {
            warn!(tool = name, "Model called an unknown tool");
            return Ok(format!(
                "{name} is not a valid tool, try one of [{}].",
                self.tool_names().join(", ")
            ));
        };
        match tool.invoke(arguments).await {
            Ok(output) => {
                debug!(tool = name, "Tool call succeeded");
                Ok(output)
            }
            Err(ToolError::InvalidInput(message)) => {
                warn!(tool = name, error = %message, "Tool rejected its input");
                Ok(format!("Error: {message}"))
            }
            Err(ToolError::Execution(message)) => Err(ChatError::ToolExecution {
                tool: name.to_string(),
                message,
            }),
        }
    }
}
