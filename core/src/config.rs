//! Campaign specification types: the validated shape the bootstrap planner
//! consumes (spec §4.1). YAML parsing into this structure is the one piece
//! of "configuration" the core still owns; full schema validation is out of
//! scope per §1 ("YAML configuration parsing") beyond what's needed to
//! populate these fields.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Top-level campaign specification, deserialized directly from a YAML
/// (or embedded-over-the-wire JSON, for the `BOOTSTRAP` event) document.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CampaignSpec {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub limits: LimitsSpec,
    #[serde(default)]
    pub steps: StepsSpec,
    #[serde(default)]
    pub observers: Vec<PluginSpec>,
    #[serde(default)]
    pub tools: BTreeMap<String, ToolSpec>,
    #[serde(default)]
    pub tasks: BTreeMap<String, TaskGroupSpec>,
}

/// `limits:` block. `time` is in seconds, `memory` in MiB (default 8192
/// per spec §4.1), `output` in bytes (optional), `cores` optional.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsSpec {
    pub time: f64,
    #[serde(default = "default_memory_mib")]
    pub memory: f64,
    #[serde(default)]
    pub output: Option<u64>,
    #[serde(default)]
    pub cores: Option<u32>,
}

fn default_memory_mib() -> f64 {
    8192.0
}

impl Default for LimitsSpec {
    fn default() -> Self {
        Self {
            time: 60.0,
            memory: default_memory_mib(),
            output: None,
            cores: None,
        }
    }
}

/// `steps:` block: ordered `run` and `analysis` step sequences.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StepsSpec {
    #[serde(default)]
    pub run: Vec<PluginSpec>,
    #[serde(default)]
    pub analysis: Vec<PluginSpec>,
}

/// A `{module, config?}` pair used for steps and observers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginSpec {
    pub module: String,
    #[serde(default)]
    pub config: Value,
}

/// One `tools:` entry: `{module, parameters?}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    pub module: String,
    #[serde(default)]
    pub version: Option<String>,
    /// `group-name -> {key -> raw value}`. Values are expanded by
    /// `crate::planner::expand` per spec §4.1.
    #[serde(default)]
    pub parameters: BTreeMap<String, BTreeMap<String, Value>>,
}

/// One `tasks:` entry: a named task-source declaration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskGroupSpec {
    #[serde(rename = "type")]
    pub source_type: TaskSourceType,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub patterns: Option<PatternsSpec>,
    #[serde(default)]
    pub urls: Option<Vec<String>>,
    #[serde(default)]
    pub doi: Option<String>,
}

/// Either a single glob pattern or a list of them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PatternsSpec {
    One(String),
    Many(Vec<String>),
}

impl PatternsSpec {
    pub fn as_vec(&self) -> Vec<String> {
        match self {
            PatternsSpec::One(s) => vec![s.clone()],
            PatternsSpec::Many(v) => v.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskSourceType {
    Local,
    Url,
    Doi,
}

/// `repeat`/`output_dir` live alongside the campaign body in the
/// `BOOTSTRAP` event payload (spec §4.2) rather than inside the YAML file
/// itself, since they are invocation parameters, not campaign content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BootstrapRequest {
    pub config: CampaignSpec,
    pub output_dir: String,
    #[serde(default = "default_repeat")]
    pub repeat: u32,
}

fn default_repeat() -> u32 {
    1
}
