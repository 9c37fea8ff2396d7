use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{IndexValue, Record, now_ms};

/// A worker host's static hardware/OS info, collected once per hostname via
/// `sysinfo` by `SysInfoObserver` (SPEC_FULL.md §3 supplemental entities,
/// grounded on `reprobench/core/sysinfo.py`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub hostname: String,
    pub platform: String,
    pub arch: String,
    pub cpu: String,
    pub cpu_count: usize,
    pub mem_total: u64,
    pub mem_available: u64,
    pub updated_at: i64,
}

impl Node {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        hostname: impl Into<String>,
        platform: impl Into<String>,
        arch: impl Into<String>,
        cpu: impl Into<String>,
        cpu_count: usize,
        mem_total: u64,
        mem_available: u64,
    ) -> Self {
        let hostname = hostname.into();
        debug!(%hostname, cpu_count, mem_total, "Node::new: called");
        Self {
            hostname,
            platform: platform.into(),
            arch: arch.into(),
            cpu: cpu.into(),
            cpu_count,
            mem_total,
            mem_available,
            updated_at: now_ms(),
        }
    }
}

impl Record for Node {
    fn id(&self) -> &str {
        &self.hostname
    }

    fn updated_at(&self) -> i64 {
        self.updated_at
    }

    fn collection_name() -> &'static str {
        "nodes"
    }

    fn indexed_fields(&self) -> HashMap<String, IndexValue> {
        HashMap::new()
    }
}

/// Join row recording which node a run executed on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunNode {
    pub run: String,
    pub hostname: String,
    pub created_at: i64,
}

impl RunNode {
    pub fn new(run: impl Into<String>, hostname: impl Into<String>) -> Self {
        let run = run.into();
        let hostname = hostname.into();
        debug!(%run, %hostname, "RunNode::new: called");
        Self {
            run,
            hostname,
            created_at: now_ms(),
        }
    }
}

impl Record for RunNode {
    fn id(&self) -> &str {
        &self.run
    }

    fn updated_at(&self) -> i64 {
        self.created_at
    }

    fn collection_name() -> &'static str {
        "run_nodes"
    }

    fn indexed_fields(&self) -> HashMap<String, IndexValue> {
        let mut fields = HashMap::new();
        fields.insert("hostname".to_string(), IndexValue::String(self.hostname.clone()));
        fields
    }
}
