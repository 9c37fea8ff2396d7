use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use super::{IndexValue, Record, now_ms};

/// A concrete, named assignment of a tool's parameters: one point in the
/// cartesian product of its ranged dimensions (or the sole `default` group
/// when there are none). Unique per (tool, name).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParameterGroup {
    pub id: String,
    pub tool: String,
    pub name: String,
    pub created_at: i64,
}

impl ParameterGroup {
    pub fn new(tool: impl Into<String>, name: impl Into<String>) -> Self {
        let tool = tool.into();
        let name = name.into();
        debug!(%tool, %name, "ParameterGroup::new: called");
        Self {
            id: format!("{tool}::{name}"),
            tool,
            name,
            created_at: now_ms(),
        }
    }
}

impl Record for ParameterGroup {
    fn id(&self) -> &str {
        &self.id
    }

    fn updated_at(&self) -> i64 {
        self.created_at
    }

    fn collection_name() -> &'static str {
        "parameter_groups"
    }

    fn indexed_fields(&self) -> HashMap<String, IndexValue> {
        let mut fields = HashMap::new();
        fields.insert("tool".to_string(), IndexValue::String(self.tool.clone()));
        fields
    }
}

/// One key/value pair within a `ParameterGroup`. Inserted replace-on-conflict
/// at bootstrap so re-running with a changed constant value updates in place
/// without altering the group's cartesian-product identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Parameter {
    pub id: String,
    pub group: String,
    pub key: String,
    pub value: Value,
    pub updated_at: i64,
}

impl Parameter {
    pub fn new(group: impl Into<String>, key: impl Into<String>, value: Value) -> Self {
        let group = group.into();
        let key = key.into();
        debug!(%group, %key, "Parameter::new: called");
        Self {
            id: format!("{group}::{key}"),
            group,
            key,
            value,
            updated_at: now_ms(),
        }
    }
}

impl Record for Parameter {
    fn id(&self) -> &str {
        &self.id
    }

    fn updated_at(&self) -> i64 {
        self.updated_at
    }

    fn collection_name() -> &'static str {
        "parameters"
    }

    fn indexed_fields(&self) -> HashMap<String, IndexValue> {
        let mut fields = HashMap::new();
        fields.insert("group".to_string(), IndexValue::String(self.group.clone()));
        fields
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parameter_group_id_is_tool_name() {
        let g = ParameterGroup::new("glucose", "g[solver=glucose,seed=1]");
        assert_eq!(g.id, "glucose::g[solver=glucose,seed=1]");
    }
}
