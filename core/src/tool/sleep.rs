use std::collections::HashMap;

use serde_json::Value as Json;

use super::ToolAdapter;

/// Smoke-test tool for exercising the wall-time limit: sleeps for the
/// `duration` parameter (seconds, default 1).
#[derive(Default)]
pub struct SleepTool;

impl ToolAdapter for SleepTool {
    fn cmdline(&self, parameters: &HashMap<String, Json>, _task: &str) -> Vec<String> {
        let duration = parameters.get("duration").and_then(Json::as_f64).unwrap_or(1.0);
        vec!["sleep".to_string(), duration.to_string()]
    }
}
