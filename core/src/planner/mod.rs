//! Bootstrap Planner (spec §4.1): idempotently expands a campaign
//! specification into the persisted rows the dispatcher serves runs from.
//! Grounded on `reprobench/core/bootstrap/server.py`.

mod expand;
mod task_source;

pub use expand::ExpandError;
pub use task_source::TaskSourceError;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::CampaignSpec;
use crate::domain::{
    Filter, IndexValue, Limit, Parameter, ParameterGroup, Record, Run, RunStatus, Step, StepCategory, Store, Task, TaskGroup,
    Tool,
};

#[derive(Debug, Error)]
pub enum PlannerError {
    #[error("store error: {0}")]
    Store(#[from] crate::domain::StoreError),
    #[error("parameter expansion error: {0}")]
    Expand(#[from] ExpandError),
    #[error("task source error: {0}")]
    TaskSource(#[from] TaskSourceError),
    #[error("io error creating output directory {path}: {source}")]
    Io { path: String, source: std::io::Error },
}

pub type PlannerResult<T> = Result<T, PlannerError>;

/// Run the full bootstrap: limits, steps, observers, tools, parameter
/// groups, task groups/tasks, and one Run per (ParameterGroup, Task,
/// iteration). Safe to call repeatedly on the same store (spec §4.1
/// idempotence).
pub fn bootstrap(store: &mut Store, config: &CampaignSpec, output_dir: &str, repeat: u32) -> PlannerResult<()> {
    info!(output_dir, repeat, "bootstrap: starting");
    std::fs::create_dir_all(output_dir).map_err(|e| PlannerError::Io { path: output_dir.to_string(), source: e })?;

    bootstrap_limits(store, config)?;
    bootstrap_steps(store, StepCategory::Run, &config.steps.run)?;
    bootstrap_steps(store, StepCategory::Analysis, &config.steps.analysis)?;
    bootstrap_observers(store, &config.observers)?;

    for tool_spec in config.tools.values() {
        bootstrap_tool(store, tool_spec)?;
    }

    for (group_name, task_spec) in &config.tasks {
        bootstrap_task_group(store, group_name, task_spec)?;
    }

    bootstrap_runs(store, config, output_dir, repeat)?;

    let requeued = requeue_stale_runs(store)?;
    debug!(requeued = requeued.len(), "bootstrap: requeued stale runs");
    info!("bootstrap: complete");
    Ok(())
}

fn insert_ignore<T: Record>(store: &mut Store, record: &T) -> PlannerResult<()> {
    match store.create(record) {
        Ok(_) => Ok(()),
        Err(crate::domain::StoreError::Conflict { .. }) => Ok(()),
        Err(e) => Err(e.into()),
    }
}

fn insert_replace<T: Record>(store: &mut Store, record: &T) -> PlannerResult<()> {
    match store.create(record) {
        Ok(_) => Ok(()),
        Err(crate::domain::StoreError::Conflict { .. }) => Ok(store.update(record)?),
        Err(e) => Err(e.into()),
    }
}

fn bootstrap_limits(store: &mut Store, config: &CampaignSpec) -> PlannerResult<()> {
    insert_ignore(store, &Limit::new("time_s", config.limits.time))?;
    insert_ignore(store, &Limit::new("memory_bytes", config.limits.memory * 1024.0 * 1024.0))?;
    if let Some(output) = config.limits.output {
        insert_ignore(store, &Limit::new("output_bytes", output as f64))?;
    }
    if let Some(cores) = config.limits.cores {
        insert_ignore(store, &Limit::new("cores", cores as f64))?;
    }
    Ok(())
}

/// Tail-append idempotence (spec §4.1): only the suffix of `configured`
/// beyond the current row count for `category` is inserted.
fn bootstrap_steps(store: &mut Store, category: StepCategory, configured: &[crate::config::PluginSpec]) -> PlannerResult<()> {
    let existing: Vec<Step> = store.list(&[Filter::eq("category", IndexValue::String(category.to_string()))])?;
    let count = existing.len();
    for (offset, plugin) in configured.iter().enumerate().skip(count) {
        let step = Step::new(category, offset as u32, plugin.module.clone(), plugin.config.clone());
        insert_ignore(store, &step)?;
    }
    Ok(())
}

fn bootstrap_observers(store: &mut Store, configured: &[crate::config::PluginSpec]) -> PlannerResult<()> {
    let existing: Vec<crate::domain::ObserverRow> = store.list(&[])?;
    let count = existing.len();
    for (offset, plugin) in configured.iter().enumerate().skip(count) {
        let row = crate::domain::ObserverRow::new(plugin.module.clone(), offset as u32, plugin.config.clone());
        insert_ignore(store, &row)?;
    }
    Ok(())
}

/// `tool_name` is the campaign's `tools:` map key (a human label, possibly
/// aliasing the same plugin module under two different configurations);
/// `tool_spec.module` is the plugin-registry id and the actual join key
/// used for `Tool`/`ParameterGroup`/`Run` linkage.
fn bootstrap_tool(store: &mut Store, tool_spec: &crate::config::ToolSpec) -> PlannerResult<()> {
    let module = tool_spec.module.as_str();
    let mut tool = Tool::new(module);
    if let Some(version) = &tool_spec.version {
        tool = tool.with_version(version.clone());
    }
    insert_replace(store, &tool)?;

    for (group_name, raw_params) in &tool_spec.parameters {
        let expanded = expand::expand_group(group_name, raw_params)?;
        for (expanded_name, values) in expanded {
            let group = ParameterGroup::new(module, &expanded_name);
            insert_ignore(store, &group)?;
            for (key, value) in values {
                let param = Parameter::new(&group.id, key, value);
                insert_replace(store, &param)?;
            }
        }
    }
    if tool_spec.parameters.is_empty() {
        // Scenario 1 in spec §8: a tool with no declared parameters gets one
        // "default" group and no Parameter rows.
        let group = ParameterGroup::new(module, "default");
        insert_ignore(store, &group)?;
    }
    Ok(())
}

fn bootstrap_task_group(store: &mut Store, group_name: &str, task_spec: &crate::config::TaskGroupSpec) -> PlannerResult<()> {
    insert_ignore(store, &TaskGroup::new(group_name))?;
    let paths = task_source::resolve(task_spec)?;
    for path in paths {
        insert_ignore(store, &Task::new(path, group_name))?;
    }
    Ok(())
}

fn bootstrap_runs(store: &mut Store, config: &CampaignSpec, output_dir: &str, repeat: u32) -> PlannerResult<()> {
    let modules: Vec<String> = config.tools.values().map(|t| t.module.clone()).collect();
    for module in modules {
        let groups: Vec<ParameterGroup> = store.list(&[Filter::eq("tool", IndexValue::String(module.clone()))])?;
        for group in &groups {
            for (task_group_name, _) in &config.tasks {
                let tasks: Vec<Task> = store.list(&[Filter::eq("group", IndexValue::String(task_group_name.clone()))])?;
                for task in &tasks {
                    for iteration in 0..repeat {
                        // Iteration segment is always present, including for
                        // repeat=1 (iteration 0) -- SPEC_FULL.md §4.1.
                        let directory = format!(
                            "{output_dir}/{module}/{}/{task_group_name}/{}/{iteration}",
                            group.name,
                            task.basename()
                        );
                        let run = Run::new(&module, &group.id, &task.path, iteration, directory);
                        insert_ignore(store, &run)?;
                    }
                }
            }
        }
    }
    Ok(())
}

/// Recompute the max run-category step ordinal, requeue every run whose
/// status is not DONE or whose `last_step` doesn't match it to PENDING, and
/// return the ids that were touched. Shared by `bootstrap` (resume-on-
/// reconfigure, spec §4.1) and the dispatcher's `REQUEST_PENDING` handler
/// (spec §4.3 `get_pending_run_ids`).
pub fn requeue_stale_runs(store: &mut Store) -> PlannerResult<Vec<String>> {
    let mut run_steps: Vec<Step> = store.list(&[Filter::eq("category", IndexValue::String(StepCategory::Run.to_string()))])?;
    run_steps.sort_by_key(|s| s.ordinal);
    let max_ordinal = run_steps.last().map(|s| s.ordinal);

    let all_runs: Vec<Run> = store.list(&[])?;
    let mut ids = Vec::new();
    for mut run in all_runs {
        let stale = run.status.code() < RunStatus::Done.code() || run.last_step != max_ordinal;
        if stale {
            if run.status != RunStatus::Pending {
                run.set_status(RunStatus::Pending);
                store.update(&run)?;
            }
            ids.push(run.id.clone());
        }
    }
    ids.sort();
    if !ids.is_empty() {
        warn!(count = ids.len(), "requeue_stale_runs: runs returned to PENDING");
    }
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LimitsSpec, PatternsSpec, PluginSpec, StepsSpec, TaskGroupSpec, TaskSourceType, ToolSpec};
    use serde_json::Value as Json;
    use std::collections::BTreeMap;
    use tempfile::tempdir;

    fn campaign(input_dir: &std::path::Path) -> CampaignSpec {
        let mut tools = BTreeMap::new();
        let mut params: BTreeMap<String, BTreeMap<String, Json>> = BTreeMap::new();
        let mut g = BTreeMap::new();
        g.insert("solver".to_string(), Json::Array(vec![Json::from("glucose"), Json::from("lingeling")]));
        g.insert("seed".to_string(), Json::from("1..3"));
        params.insert("g".to_string(), g);
        tools.insert("cadical".to_string(), ToolSpec { module: "Cadical".to_string(), version: None, parameters: params });

        let mut tasks = BTreeMap::new();
        tasks.insert(
            "t".to_string(),
            TaskGroupSpec {
                source_type: TaskSourceType::Local,
                path: Some(input_dir.to_string_lossy().to_string()),
                patterns: Some(PatternsSpec::One("*.txt".to_string())),
                urls: None,
                doi: None,
            },
        );

        CampaignSpec {
            title: None,
            description: None,
            limits: LimitsSpec { time: 1.0, memory: 256.0, output: None, cores: None },
            steps: StepsSpec { run: vec![PluginSpec { module: "Executor".to_string(), config: Json::Null }], analysis: vec![] },
            observers: vec![],
            tools,
            tasks,
        }
    }

    #[test]
    fn range_expansion_cardinality() {
        let dir = tempdir().unwrap();
        let input_dir = dir.path().join("inputs");
        std::fs::create_dir_all(&input_dir).unwrap();
        std::fs::write(input_dir.join("a.txt"), "x").unwrap();
        std::fs::write(input_dir.join("b.txt"), "x").unwrap();

        let mut store = Store::open(dir.path().join("bench.db")).unwrap();
        let cfg = campaign(&input_dir);
        bootstrap(&mut store, &cfg, &dir.path().join("out").to_string_lossy(), 1).unwrap();

        let groups: Vec<ParameterGroup> = store.list(&[]).unwrap();
        assert_eq!(groups.len(), 6, "2 solvers x 3 seeds = 6 groups");

        let runs: Vec<Run> = store.list(&[]).unwrap();
        assert_eq!(runs.len(), 6 * 2, "6 groups x 2 tasks x 1 iteration");
    }

    #[test]
    fn bootstrap_is_idempotent() {
        let dir = tempdir().unwrap();
        let input_dir = dir.path().join("inputs");
        std::fs::create_dir_all(&input_dir).unwrap();
        std::fs::write(input_dir.join("a.txt"), "x").unwrap();

        let mut store = Store::open(dir.path().join("bench.db")).unwrap();
        let cfg = campaign(&input_dir);
        let output_dir = dir.path().join("out").to_string_lossy().to_string();
        bootstrap(&mut store, &cfg, &output_dir, 1).unwrap();
        let first: Vec<Run> = store.list(&[]).unwrap();

        bootstrap(&mut store, &cfg, &output_dir, 1).unwrap();
        let second: Vec<Run> = store.list(&[]).unwrap();

        assert_eq!(first.len(), second.len());
    }

    #[test]
    fn adding_a_step_requeues_every_run_to_pending() {
        let dir = tempdir().unwrap();
        let input_dir = dir.path().join("inputs");
        std::fs::create_dir_all(&input_dir).unwrap();
        std::fs::write(input_dir.join("a.txt"), "x").unwrap();

        let mut store = Store::open(dir.path().join("bench.db")).unwrap();
        let mut cfg = campaign(&input_dir);
        cfg.tools.clear();
        let mut tools = BTreeMap::new();
        tools.insert("echo".to_string(), ToolSpec { module: "Echo".to_string(), version: None, parameters: BTreeMap::new() });
        cfg.tools = tools;
        let output_dir = dir.path().join("out").to_string_lossy().to_string();
        bootstrap(&mut store, &cfg, &output_dir, 1).unwrap();

        // Drive the single run to DONE with last_step at the current max.
        let mut runs: Vec<Run> = store.list(&[]).unwrap();
        assert_eq!(runs.len(), 1);
        let mut run = runs.remove(0);
        run.advance_step(0);
        run.set_status(RunStatus::Done);
        store.update(&run).unwrap();

        // Append a new run-category step and re-bootstrap.
        cfg.steps.run.push(PluginSpec { module: "Validator".to_string(), config: Json::Null });
        bootstrap(&mut store, &cfg, &output_dir, 1).unwrap();

        let steps: Vec<Step> = store.list(&[Filter::eq("category", IndexValue::String(StepCategory::Run.to_string()))]).unwrap();
        assert_eq!(steps.len(), 2);

        let after: Run = store.get(&run.id).unwrap().unwrap();
        assert_eq!(after.status, RunStatus::Pending, "run must re-enter PENDING once a new step exists");
    }
}
