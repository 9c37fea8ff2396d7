use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{IndexValue, Record, now_ms};

/// A run's outcome classification. Precedence when multiple conditions
/// co-occur, top-down: `Tle > Mem > Rte > Ole > Ok` (spec §4.5/§8).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Verdict {
    Tle,
    Mem,
    Rte,
    Ole,
    Ok,
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Tle => "TLE",
            Self::Mem => "MEM",
            Self::Rte => "RTE",
            Self::Ole => "OLE",
            Self::Ok => "OK",
        };
        write!(f, "{s}")
    }
}

/// Resource-usage results for a completed run, written at most once by the
/// bounded executor (§4.5, §8 "at-most-one RunStatistic"). `id` is the
/// owning run's id, enforcing the 1:1 keying resolved in SPEC_FULL.md §4.7.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunStatistic {
    pub run: String,
    pub verdict: Verdict,
    pub cpu_time: f64,
    pub wall_time: f64,
    pub max_memory: u64,
    pub return_code: Option<i32>,
    pub created_at: i64,
}

impl RunStatistic {
    pub fn new(
        run: impl Into<String>,
        verdict: Verdict,
        cpu_time: f64,
        wall_time: f64,
        max_memory: u64,
        return_code: Option<i32>,
    ) -> Self {
        let run = run.into();
        debug!(%run, ?verdict, cpu_time, wall_time, max_memory, ?return_code, "RunStatistic::new: called");
        Self {
            run,
            verdict,
            cpu_time,
            wall_time,
            max_memory,
            return_code,
            created_at: now_ms(),
        }
    }
}

impl Record for RunStatistic {
    fn id(&self) -> &str {
        &self.run
    }

    fn updated_at(&self) -> i64 {
        self.created_at
    }

    fn collection_name() -> &'static str {
        "run_statistics"
    }

    fn indexed_fields(&self) -> HashMap<String, IndexValue> {
        let mut fields = HashMap::new();
        fields.insert("verdict".to_string(), IndexValue::String(self.verdict.to_string()));
        fields
    }
}
