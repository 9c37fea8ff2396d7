use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{IndexValue, Record, now_ms};

/// A named collection of tasks resolved from one `tasks:` entry in the
/// campaign file (one glob/url/doi source each).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskGroup {
    pub name: String,
    pub created_at: i64,
}

impl TaskGroup {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        debug!(%name, "TaskGroup::new: called");
        Self {
            name,
            created_at: now_ms(),
        }
    }
}

impl Record for TaskGroup {
    fn id(&self) -> &str {
        &self.name
    }

    fn updated_at(&self) -> i64 {
        self.created_at
    }

    fn collection_name() -> &'static str {
        "task_groups"
    }

    fn indexed_fields(&self) -> HashMap<String, IndexValue> {
        HashMap::new()
    }
}

/// A single filesystem path resolved by a task-source adapter, belonging to
/// one `TaskGroup`. `path` is the unique key (per the data model table) and
/// is used directly as the record id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub path: String,
    pub group: String,
    pub created_at: i64,
}

impl Task {
    pub fn new(path: impl Into<String>, group: impl Into<String>) -> Self {
        let path = path.into();
        let group = group.into();
        debug!(%path, %group, "Task::new: called");
        Self {
            path,
            group,
            created_at: now_ms(),
        }
    }

    /// The file's basename, used to build a run's directory segment.
    pub fn basename(&self) -> &str {
        std::path::Path::new(&self.path)
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or(&self.path)
    }
}

impl Record for Task {
    fn id(&self) -> &str {
        &self.path
    }

    fn updated_at(&self) -> i64 {
        self.created_at
    }

    fn collection_name() -> &'static str {
        "tasks"
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
    fn task_basename() {
        let t = Task::new("/data/instances/a.cnf", "sat-instances");
        assert_eq!(t.basename(), "a.cnf");
    }
}
