use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use super::{IndexValue, Record, now_ms};

/// A registered server-side observer: the plugin-registry module id plus its
/// static config block. Tail-appended at bootstrap like `Step` (§4.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObserverRow {
    pub module_id: String,
    pub ordinal: u32,
    #[serde(default)]
    pub config: Value,
    pub created_at: i64,
}

impl ObserverRow {
    pub fn new(module_id: impl Into<String>, ordinal: u32, config: Value) -> Self {
        let module_id = module_id.into();
        debug!(%module_id, ordinal, "ObserverRow::new: called");
        Self {
            module_id,
            ordinal,
            config,
            created_at: now_ms(),
        }
    }
}

impl Record for ObserverRow {
    fn id(&self) -> &str {
        &self.module_id
    }

    fn updated_at(&self) -> i64 {
        self.created_at
    }

    fn collection_name() -> &'static str {
        "observers"
    }

    fn indexed_fields(&self) -> HashMap<String, IndexValue> {
        let mut fields = HashMap::new();
        fields.insert("ordinal".to_string(), IndexValue::Int(self.ordinal as i64));
        fields
    }
}
