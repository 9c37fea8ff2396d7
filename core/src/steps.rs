//! Pluggable worker-side step handlers beyond the bounded executor (spec
//! §4.4 "invoke step.execute(context, config)"). `SysInfo` and `SatVerdict`
//! are optional run-category steps a campaign can list in `steps.run`,
//! each paired with the observer of the same name that persists its event
//! (spec §2: "domain observers (SAT verdict, sudoku validator, system info,
//! statistics) consume their own event kinds").

use std::collections::BTreeMap;

use sysinfo::System;

use crate::codec::Value;
use crate::dispatcher::RunContext;
use crate::events::{SATVERDICT_STORE, SYSINFO_STORE};

/// Collect this host's static hardware info and build a `sysinfo:store`
/// event payload, grounded on `reprobench/core/sysinfo.py`'s
/// `CollectSystemInfo.execute`. CPU/memory figures come from the `sysinfo`
/// crate; platform/arch come from `std::env::consts` rather than
/// guessing at a version-specific `sysinfo` platform API.
pub fn sysinfo_event(ctx: &RunContext) -> (&'static str, Value) {
    let mut system = System::new_all();
    system.refresh_cpu_all();
    system.refresh_memory();

    let hostname = System::host_name().unwrap_or_else(|| "unknown".to_string());
    let cpu = system.cpus().first().map(|c| c.brand().to_string()).unwrap_or_default();

    let mut payload = BTreeMap::new();
    payload.insert("hostname".to_string(), Value::Str(hostname));
    payload.insert("run".to_string(), Value::Str(ctx.id.clone()));
    payload.insert("platform".to_string(), Value::Str(std::env::consts::OS.to_string()));
    payload.insert("arch".to_string(), Value::Str(std::env::consts::ARCH.to_string()));
    payload.insert("cpu".to_string(), Value::Str(cpu));
    payload.insert("cpu_count".to_string(), Value::Int(system.cpus().len() as i64));
    payload.insert("mem_total".to_string(), Value::Int(system.total_memory() as i64));
    payload.insert("mem_available".to_string(), Value::Int(system.available_memory() as i64));
    (SYSINFO_STORE, Value::Map(payload))
}

/// Validate a SAT solver's self-reported verdict against the task file's
/// `c NOTE: Satisfiable` marker comment and build a `satverdict:store`
/// event, grounded on `examples/sat/sat/validate.py`'s `SATValidator.execute`.
/// Returns `None` if the task file or the run's captured stdout (`run.out`,
/// written by the bounded executor) can't be read.
pub fn sat_verdict_event(ctx: &RunContext) -> Option<(&'static str, Value)> {
    let task_text = std::fs::read_to_string(&ctx.task).ok()?;
    let out_path = std::path::Path::new(&ctx.directory).join("run.out");
    let output = std::fs::read_to_string(&out_path).ok()?;

    let satisfiable = task_text.to_lowercase().contains("c note: satisfiable");
    let is_valid =
        (satisfiable && output.contains("s SATISFIABLE")) || (!satisfiable && output.contains("s UNSATISFIABLE"));

    let mut payload = BTreeMap::new();
    payload.insert("run".to_string(), Value::Str(ctx.id.clone()));
    payload.insert("is_valid".to_string(), Value::Bool(is_valid));
    Some((SATVERDICT_STORE, Value::Map(payload)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    fn context(task: String, directory: String) -> RunContext {
        RunContext {
            id: "run-1".to_string(),
            task,
            tool: "Cadical".to_string(),
            tool_module: "Cadical".to_string(),
            directory,
            parameters: HashMap::new(),
            steps: Vec::new(),
            limits: HashMap::new(),
        }
    }

    #[test]
    fn sysinfo_event_reports_this_host() {
        let ctx = context("task.cnf".to_string(), "dir".to_string());
        let (kind, payload) = sysinfo_event(&ctx);
        assert_eq!(kind, SYSINFO_STORE);
        let map = payload.as_map().unwrap();
        assert!(map.contains_key("hostname"));
        assert!(map.get("cpu_count").and_then(Value::as_int).unwrap_or(0) >= 0);
    }

    #[test]
    fn sat_verdict_matches_satisfiable_marker() {
        let dir = tempdir().unwrap();
        let task_path = dir.path().join("a.cnf");
        std::fs::write(&task_path, "c NOTE: Satisfiable\np cnf 1 1\n1 0\n").unwrap();
        std::fs::write(dir.path().join("run.out"), "s SATISFIABLE\nv 1 0\n").unwrap();

        let ctx = context(task_path.to_string_lossy().to_string(), dir.path().to_string_lossy().to_string());
        let (kind, payload) = sat_verdict_event(&ctx).unwrap();
        assert_eq!(kind, SATVERDICT_STORE);
        assert_eq!(payload.map_get("is_valid"), Some(&Value::Bool(true)));
    }

    #[test]
    fn sat_verdict_flags_mismatched_claim() {
        let dir = tempdir().unwrap();
        let task_path = dir.path().join("b.cnf");
        std::fs::write(&task_path, "c NOTE: Satisfiable\np cnf 1 1\n1 0\n").unwrap();
        std::fs::write(dir.path().join("run.out"), "s UNSATISFIABLE\n").unwrap();

        let ctx = context(task_path.to_string_lossy().to_string(), dir.path().to_string_lossy().to_string());
        let (_, payload) = sat_verdict_event(&ctx).unwrap();
        assert_eq!(payload.map_get("is_valid"), Some(&Value::Bool(false)));
    }

    #[test]
    fn sat_verdict_is_none_without_output_file() {
        let dir = tempdir().unwrap();
        let task_path = dir.path().join("c.cnf");
        std::fs::write(&task_path, "p cnf 1 1\n1 0\n").unwrap();
        let ctx = context(task_path.to_string_lossy().to_string(), dir.path().to_string_lossy().to_string());
        assert!(sat_verdict_event(&ctx).is_none());
    }
}
