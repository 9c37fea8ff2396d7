use std::collections::HashMap;

use serde_json::Value as Json;

use super::ToolAdapter;

/// Trivial smoke-test tool: prints the task path. Used throughout the test
/// suite as the minimal well-behaved tool (spec §8 scenario 1).
#[derive(Default)]
pub struct EchoTool;

impl ToolAdapter for EchoTool {
    fn version(&self) -> Option<String> {
        Some("1.0".to_string())
    }

    fn cmdline(&self, _parameters: &HashMap<String, Json>, task: &str) -> Vec<String> {
        vec!["echo".to_string(), task.to_string()]
    }
}
