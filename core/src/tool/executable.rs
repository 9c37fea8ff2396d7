use std::collections::HashMap;

use serde_json::Value as Json;

use super::ToolAdapter;

/// Default executable-argv rendering (spec §4.6): `{binary} {prefix}key=value
/// ...} {task}`, parameters in sorted-key order for determinism.
pub struct ExecutableTool {
    pub binary: String,
    pub prefix: String,
}

impl ExecutableTool {
    pub fn new(binary: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self { binary: binary.into(), prefix: prefix.into() }
    }
}

impl ToolAdapter for ExecutableTool {
    fn cmdline(&self, parameters: &HashMap<String, Json>, task: &str) -> Vec<String> {
        let mut keys: Vec<&String> = parameters.keys().collect();
        keys.sort();
        let mut argv = vec![self.binary.clone()];
        for key in keys {
            let value = display_json(&parameters[key]);
            argv.push(format!("{}{key}={value}", self.prefix));
        }
        argv.push(task.to_string());
        argv
    }
}

fn display_json(value: &Json) -> String {
    match value {
        Json::String(s) => s.clone(),
        Json::Number(n) => n.to_string(),
        Json::Bool(b) => b.to_string(),
        Json::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_sorted_prefixed_arguments_then_task() {
        let tool = ExecutableTool::new("cadical", "--");
        let mut params = HashMap::new();
        params.insert("seed".to_string(), Json::from(1));
        params.insert("solver".to_string(), Json::from("glucose"));
        let argv = tool.cmdline(&params, "/inputs/a.cnf");
        assert_eq!(argv, vec!["cadical", "--seed=1", "--solver=glucose", "/inputs/a.cnf"]);
    }
}
