use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use super::{IndexValue, Record, now_ms};

/// Which of a run's two step lists this step belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepCategory {
    Run,
    Analysis,
}

impl std::fmt::Display for StepCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Run => write!(f, "run"),
            Self::Analysis => write!(f, "analysis"),
        }
    }
}

/// A pluggable unit of work, executed by a worker as part of a run's step
/// list, or by a post-processing analysis pass. Ordinal is monotone within
/// its category and is tail-appended on re-bootstrap (§4.1 idempotence).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub id: String,
    pub category: StepCategory,
    pub ordinal: u32,
    pub module: String,
    #[serde(default)]
    pub config: Value,
    pub created_at: i64,
}

impl Step {
    pub fn new(category: StepCategory, ordinal: u32, module: impl Into<String>, config: Value) -> Self {
        let module = module.into();
        debug!(?category, ordinal, %module, "Step::new: called");
        Self {
            id: format!("{category}:{ordinal}"),
            category,
            ordinal,
            module,
            config,
            created_at: now_ms(),
        }
    }
}

impl Record for Step {
    fn id(&self) -> &str {
        &self.id
    }

    fn updated_at(&self) -> i64 {
        self.created_at
    }

    fn collection_name() -> &'static str {
        "steps"
    }

    fn indexed_fields(&self) -> HashMap<String, IndexValue> {
        let mut fields = HashMap::new();
        fields.insert("category".to_string(), IndexValue::String(self.category.to_string()));
        fields.insert("ordinal".to_string(), IndexValue::Int(self.ordinal as i64));
        fields
    }
}
