use super::executor::AgentStep;

/// Render intermediate steps as a readable thinking trace.
pub fn format_steps(steps: &[AgentStep]) -> String {
    let mut out = String::new();
    for step in steps {
        let thought = step.thought.trim();
        if !thought.is_empty() {
            out.push_str(thought);
            out.push('\n');
        }
        out.push_str(&format!(
            "Action: {}\nAction Input: {}\nObservation: {}\n",
            step.tool, step.input, step.observation
        ));
    }
    out
}
