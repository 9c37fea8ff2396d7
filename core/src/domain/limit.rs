use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{IndexValue, Record, now_ms};

/// A single named resource ceiling (`time_s`, `memory_bytes`, `output_bytes`,
/// `cores`). The campaign's `limits` block is flattened into one `Limit` row
/// per recognized key at bootstrap time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Limit {
    pub name: String,
    pub value: f64,
    pub created_at: i64,
}

impl Limit {
    pub fn new(name: impl Into<String>, value: f64) -> Self {
        let name = name.into();
        debug!(%name, value, "Limit::new: called");
        Self {
            name,
            value,
            created_at: now_ms(),
        }
    }
}

impl Record for Limit {
    fn id(&self) -> &str {
        &self.name
    }

    fn updated_at(&self) -> i64 {
        self.created_at
    }

    fn collection_name() -> &'static str {
        "limits"
    }

    fn indexed_fields(&self) -> HashMap<String, IndexValue> {
        HashMap::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limit_id_is_name() {
        let l = Limit::new("time_s", 60.0);
        assert_eq!(l.id(), "time_s");
        assert_eq!(l.value, 60.0);
    }
}
