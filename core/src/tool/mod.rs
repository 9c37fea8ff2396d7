//! Tool Adapter (spec §4.6): the plugin seam a campaign's `tools:` entries
//! bind to by module id. SPEC_FULL.md's redesign point replaces dynamic
//! plugin loading with a static registry (`lookup`) of compiled-in tools.

mod echo;
mod executable;
mod sleep;

pub use echo::EchoTool;
pub use executable::ExecutableTool;
pub use sleep::SleepTool;

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value as Json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("tool setup failed: {0}")]
    Setup(String),
    #[error("unknown tool module: {0}")]
    UnknownModule(String),
}

pub type ToolResult<T> = Result<T, ToolError>;

/// Capability seam every registered tool implements (spec §4.6). Default
/// methods cover the common case so a minimal tool only needs `cmdline`.
#[async_trait]
pub trait ToolAdapter: Send + Sync {
    /// One-time, idempotent preparation (build steps, binary staging).
    async fn setup(&self) -> ToolResult<()> {
        Ok(())
    }

    /// Cheap readiness check run before dispatching the first run.
    fn is_ready(&self) -> bool {
        true
    }

    /// The version string persisted on the `Run` (spec §4.1's `tool_version`).
    fn version(&self) -> Option<String> {
        None
    }

    /// Hook run immediately before a run's command line is built.
    async fn pre_run(&self, _parameters: &HashMap<String, Json>, _task: &str) -> ToolResult<()> {
        Ok(())
    }

    /// Render the subprocess argv for one run.
    fn cmdline(&self, parameters: &HashMap<String, Json>, task: &str) -> Vec<String>;

    /// Hook run immediately after the subprocess exits.
    async fn post_run(&self, _parameters: &HashMap<String, Json>, _task: &str) -> ToolResult<()> {
        Ok(())
    }

    /// One-time teardown, mirror of `setup`.
    async fn teardown(&self) -> ToolResult<()> {
        Ok(())
    }
}

/// Resolve a campaign's `tools.<name>.module` string to a constructed
/// adapter. Grounded on the teacher's static dispatch tables rather than a
/// dynamic-library plugin loader (SPEC_FULL.md §9 redesign point).
pub fn lookup(module: &str) -> ToolResult<Box<dyn ToolAdapter>> {
    match module {
        "Echo" => Ok(Box::new(EchoTool::default())),
        "Sleep" => Ok(Box::new(SleepTool::default())),
        other => Err(ToolError::UnknownModule(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_resolves_known_modules() {
        assert!(lookup("Echo").is_ok());
        assert!(lookup("Sleep").is_ok());
    }

    #[test]
    fn lookup_rejects_unknown_modules() {
        assert!(matches!(lookup("Nope"), Err(ToolError::UnknownModule(_))));
    }
}
