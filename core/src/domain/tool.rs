use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{IndexValue, Record, now_ms};

/// A registered tool: the plugin-registry module id plus an optional pinned
/// version string. Inserted replace-on-conflict at bootstrap (§4.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tool {
    pub module_id: String,
    pub version: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Tool {
    pub fn new(module_id: impl Into<String>) -> Self {
        let module_id = module_id.into();
        debug!(%module_id, "Tool::new: called");
        let now = now_ms();
        Self {
            module_id,
            version: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }
}

impl Record for Tool {
    fn id(&self) -> &str {
        &self.module_id
    }

    fn updated_at(&self) -> i64 {
        self.updated_at
    }

    fn collection_name() -> &'static str {
        "tools"
    }

    fn indexed_fields(&self) -> HashMap<String, IndexValue> {
        HashMap::new()
    }
}
