use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{IndexValue, Record, now_ms};

/// The worked custom-observer example (SPEC_FULL.md §2): a SAT solver run's
/// self-reported satisfiability, validated against the instance by
/// `SatVerdictObserver`. Demonstrates the plugin pattern; not required by
/// any core invariant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SatVerdict {
    pub run: String,
    pub is_valid: bool,
    pub created_at: i64,
}

impl SatVerdict {
    pub fn new(run: impl Into<String>, is_valid: bool) -> Self {
        let run = run.into();
        debug!(%run, is_valid, "SatVerdict::new: called");
        Self {
            run,
            is_valid,
            created_at: now_ms(),
        }
    }
}

impl Record for SatVerdict {
    fn id(&self) -> &str {
        &self.run
    }

    fn updated_at(&self) -> i64 {
        self.created_at
    }

    fn collection_name() -> &'static str {
        "sat_verdicts"
    }

    fn indexed_fields(&self) -> HashMap<String, IndexValue> {
        let mut fields = HashMap::new();
        fields.insert("is_valid".to_string(), IndexValue::Bool(self.is_valid));
        fields
    }
}
