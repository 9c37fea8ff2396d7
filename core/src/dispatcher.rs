//! Core Observer / Dispatcher (spec §4.3): the authoritative state machine
//! for runs. Implemented as a single actor task exclusively owning the
//! `Store`, directly mirroring the teacher's `StateManager`/`actor_loop`
//! shape (`state/manager.rs`) generalized from `StateCommand` to
//! `DispatchCommand`. Because only this task ever calls `store.update()` on
//! a `Run`, command processing being strictly sequential gives the
//! single-row CAS atomicity spec §4.3 requires "for free".

use std::collections::HashMap;

use serde_json::Value as Json;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::config::{BootstrapRequest, CampaignSpec};
use crate::domain::{
    Filter, FilterOp, IndexValue, Limit, Parameter, ParameterGroup, Record, Run, RunStatus, Step, StepCategory, Store, Tool,
};
use crate::planner;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("store error: {0}")]
    Store(#[from] crate::domain::StoreError),
    #[error("planner error: {0}")]
    Planner(#[from] planner::PlannerError),
    #[error("run not found: {0}")]
    RunNotFound(String),
    #[error("dispatcher actor has shut down")]
    ActorGone,
}

pub type DispatchResult<T> = Result<T, DispatchError>;

/// The run's full dispatch context, handed to a worker (spec §4.3).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct RunContext {
    pub id: String,
    pub task: String,
    pub tool: String,
    pub tool_module: String,
    pub directory: String,
    pub parameters: HashMap<String, Json>,
    pub steps: Vec<StepContext>,
    pub limits: HashMap<String, f64>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct StepContext {
    pub module: String,
    pub ordinal: u32,
    pub config: Json,
}

#[derive(Debug)]
enum DispatchCommand {
    Bootstrap {
        request: BootstrapRequest,
        reply: oneshot::Sender<DispatchResult<usize>>,
    },
    WorkerJoin {
        preassigned: Option<String>,
        reply: oneshot::Sender<DispatchResult<Option<RunContext>>>,
    },
    RunStart {
        run_id: String,
        tool_version: Option<String>,
        reply: oneshot::Sender<DispatchResult<()>>,
    },
    RunStep {
        run_id: String,
        step_module: String,
        ordinal: u32,
        reply: oneshot::Sender<DispatchResult<()>>,
    },
    RunFinish {
        run_id: String,
        reply: oneshot::Sender<DispatchResult<()>>,
    },
    RunInterrupt {
        run_id: String,
        reply: oneshot::Sender<DispatchResult<()>>,
    },
    RequestPending {
        reply: oneshot::Sender<DispatchResult<Vec<String>>>,
    },
    Shutdown,
}

/// Handle to send commands to the dispatcher actor. Cheaply cloneable; every
/// clone shares the same underlying actor task and `Store`.
#[derive(Clone)]
pub struct Dispatcher {
    tx: mpsc::Sender<DispatchCommand>,
}

impl Dispatcher {
    /// Open the store at `store_path`, rebuild its indexes, and spawn the
    /// actor task. Mirrors `StateManager::spawn`.
    pub fn spawn(store_path: impl AsRef<std::path::Path>) -> DispatchResult<Self> {
        let store_path = store_path.as_ref();
        debug!(?store_path, "Dispatcher::spawn: called");
        let mut store = Store::open(store_path)?;
        let _ = store.rebuild_indexes::<Run>()?;
        let _ = store.rebuild_indexes::<Step>()?;
        let _ = store.rebuild_indexes::<ParameterGroup>()?;
        let _ = store.rebuild_indexes::<Parameter>()?;

        let (tx, rx) = mpsc::channel(256);
        tokio::spawn(actor_loop_run(store, rx));
        Ok(Self { tx })
    }

    pub async fn bootstrap(&self, request: BootstrapRequest) -> DispatchResult<usize> {
        self.call(|reply| DispatchCommand::Bootstrap { request, reply }).await
    }

    pub async fn worker_join(&self, preassigned: Option<String>) -> DispatchResult<Option<RunContext>> {
        self.call(|reply| DispatchCommand::WorkerJoin { preassigned, reply }).await
    }

    pub async fn run_start(&self, run_id: impl Into<String>, tool_version: Option<String>) -> DispatchResult<()> {
        let run_id = run_id.into();
        self.call(|reply| DispatchCommand::RunStart { run_id, tool_version, reply }).await
    }

    pub async fn run_step(&self, run_id: impl Into<String>, step_module: impl Into<String>, ordinal: u32) -> DispatchResult<()> {
        let run_id = run_id.into();
        let step_module = step_module.into();
        self.call(|reply| DispatchCommand::RunStep { run_id, step_module, ordinal, reply }).await
    }

    pub async fn run_finish(&self, run_id: impl Into<String>) -> DispatchResult<()> {
        let run_id = run_id.into();
        self.call(|reply| DispatchCommand::RunFinish { run_id, reply }).await
    }

    pub async fn run_interrupt(&self, run_id: impl Into<String>) -> DispatchResult<()> {
        let run_id = run_id.into();
        self.call(|reply| DispatchCommand::RunInterrupt { run_id, reply }).await
    }

    pub async fn request_pending(&self) -> DispatchResult<Vec<String>> {
        self.call(|reply| DispatchCommand::RequestPending { reply }).await
    }

    pub async fn shutdown(&self) {
        let _ = self.tx.send(DispatchCommand::Shutdown).await;
    }

    async fn call<T>(&self, make: impl FnOnce(oneshot::Sender<DispatchResult<T>>) -> DispatchCommand) -> DispatchResult<T> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(make(reply)).await.map_err(|_| DispatchError::ActorGone)?;
        rx.await.map_err(|_| DispatchError::ActorGone)?
    }
}

async fn actor_loop_run(mut store: Store, mut rx: mpsc::Receiver<DispatchCommand>) {
    info!("dispatcher actor: started");
    while let Some(cmd) = rx.recv().await {
        match cmd {
            DispatchCommand::Bootstrap { request, reply } => {
                let result = handle_bootstrap(&mut store, request);
                let _ = reply.send(result);
            }
            DispatchCommand::WorkerJoin { preassigned, reply } => {
                let result = handle_worker_join(&mut store, preassigned);
                let _ = reply.send(result);
            }
            DispatchCommand::RunStart { run_id, tool_version, reply } => {
                let result = handle_run_start(&mut store, &run_id, tool_version);
                let _ = reply.send(result);
            }
            DispatchCommand::RunStep { run_id, step_module, ordinal, reply } => {
                let result = handle_run_step(&mut store, &run_id, &step_module, ordinal);
                let _ = reply.send(result);
            }
            DispatchCommand::RunFinish { run_id, reply } => {
                let result = handle_run_finish(&mut store, &run_id);
                let _ = reply.send(result);
            }
            DispatchCommand::RunInterrupt { run_id, reply } => {
                let result = handle_run_interrupt(&mut store, &run_id);
                let _ = reply.send(result);
            }
            DispatchCommand::RequestPending { reply } => {
                let result = handle_request_pending(&mut store);
                let _ = reply.send(result);
            }
            DispatchCommand::Shutdown => {
                info!("dispatcher actor: shutdown requested");
                break;
            }
        }
    }
    let _ = store.sync();
    info!("dispatcher actor: stopped");
}

fn handle_bootstrap(store: &mut Store, request: BootstrapRequest) -> DispatchResult<usize> {
    planner::bootstrap(store, &request.config, &request.output_dir, request.repeat)?;
    let pending = count_pending(store)?;
    Ok(pending)
}

fn count_pending(store: &Store) -> DispatchResult<usize> {
    let runs: Vec<Run> = store.list(&[Filter::eq("status", IndexValue::Int(RunStatus::Pending.code()))])?;
    Ok(runs.len())
}

/// Atomically claim the lowest-id PENDING run, or `None` if the campaign is
/// exhausted. In array mode `preassigned` names a specific run id to claim
/// instead of picking the lowest pending one.
fn handle_worker_join(store: &mut Store, preassigned: Option<String>) -> DispatchResult<Option<RunContext>> {
    let mut pending: Vec<Run> = store.list(&[Filter::eq("status", IndexValue::Int(RunStatus::Pending.code()))])?;
    pending.sort_by(|a, b| a.id.cmp(&b.id));

    let claimed = match preassigned {
        Some(id) => pending.into_iter().find(|r| r.id == id),
        None => pending.into_iter().next(),
    };

    let Some(mut run) = claimed else {
        debug!("handle_worker_join: no pending run available");
        return Ok(None);
    };

    run.set_status(RunStatus::Submitted);
    store.update(&run)?;
    info!(run_id = %run.id, "handle_worker_join: claimed run");

    let context = build_run_context(store, &run)?;
    Ok(Some(context))
}

fn build_run_context(store: &Store, run: &Run) -> DispatchResult<RunContext> {
    let params: Vec<Parameter> = store.list(&[Filter::eq("group", IndexValue::String(run.parameter_group.clone()))])?;
    let parameters = params.into_iter().map(|p| (p.key, p.value)).collect();

    let mut steps: Vec<Step> = store.list(&[Filter::eq(
        "category",
        IndexValue::String(StepCategory::Run.to_string()),
    )])?;
    steps.sort_by_key(|s| s.ordinal);
    let last = run.last_step;
    let steps = steps
        .into_iter()
        .filter(|s| last.is_none_or(|l| s.ordinal > l))
        .map(|s| StepContext { module: s.module, ordinal: s.ordinal, config: s.config })
        .collect();

    let limits: Vec<Limit> = store.list(&[])?;
    let limits = limits.into_iter().map(|l| (l.name, l.value)).collect();

    let tool_module = store.get::<Tool>(&run.tool)?.map(|t| t.module_id).unwrap_or_else(|| run.tool.clone());

    Ok(RunContext {
        id: run.id.clone(),
        task: run.task.clone(),
        tool: run.tool.clone(),
        tool_module,
        directory: run.directory.clone(),
        parameters,
        steps,
        limits,
    })
}

fn load_run(store: &Store, run_id: &str) -> DispatchResult<Run> {
    store
        .get::<Run>(run_id)?
        .ok_or_else(|| DispatchError::RunNotFound(run_id.to_string()))
}

fn handle_run_start(store: &mut Store, run_id: &str, tool_version: Option<String>) -> DispatchResult<()> {
    let mut run = load_run(store, run_id)?;
    run.set_status(RunStatus::Running);
    run.tool_version = tool_version;
    store.update(&run)?;
    debug!(%run_id, "handle_run_start: done");
    Ok(())
}

fn handle_run_step(store: &mut Store, run_id: &str, step_module: &str, ordinal: u32) -> DispatchResult<()> {
    let mut run = load_run(store, run_id)?;
    run.advance_step(ordinal);
    store.update(&run)?;
    debug!(%run_id, step_module, ordinal, "handle_run_step: advanced last_step");
    Ok(())
}

fn handle_run_finish(store: &mut Store, run_id: &str) -> DispatchResult<()> {
    let mut run = load_run(store, run_id)?;
    run.set_status(RunStatus::Done);
    store.update(&run)?;
    info!(%run_id, "handle_run_finish: run is DONE");
    Ok(())
}

fn handle_run_interrupt(store: &mut Store, run_id: &str) -> DispatchResult<()> {
    let mut run = load_run(store, run_id)?;
    run.set_status(RunStatus::Pending);
    store.update(&run)?;
    warn!(%run_id, "handle_run_interrupt: requeued to PENDING");
    Ok(())
}

/// Recompute the max run-step ordinal, requeue every run whose status is
/// not DONE or whose `last_step` doesn't match it, and return the full
/// resulting pending id list (spec §4.3 `get_pending_run_ids`). Shares its
/// recompute logic with `planner::bootstrap`'s resume step.
fn handle_request_pending(store: &mut Store) -> DispatchResult<Vec<String>> {
    let ids = planner::requeue_stale_runs(store)?;
    debug!(count = ids.len(), "handle_request_pending: recomputed pending list");
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CampaignSpec, LimitsSpec, PluginSpec, StepsSpec, TaskGroupSpec, TaskSourceType, ToolSpec};
    use std::collections::BTreeMap;
    use tempfile::tempdir;

    fn echo_campaign(input_dir: &std::path::Path) -> CampaignSpec {
        let mut tools = BTreeMap::new();
        tools.insert(
            "echo".to_string(),
            ToolSpec { module: "Echo".to_string(), version: None, parameters: BTreeMap::new() },
        );
        let mut tasks = BTreeMap::new();
        tasks.insert(
            "t".to_string(),
            TaskGroupSpec {
                source_type: TaskSourceType::Local,
                path: Some(input_dir.to_string_lossy().to_string()),
                patterns: Some(crate::config::PatternsSpec::One("*.txt".to_string())),
                urls: None,
                doi: None,
            },
        );
        CampaignSpec {
            title: Some("smoke".to_string()),
            description: None,
            limits: LimitsSpec { time: 1.0, memory: 256.0, output: None, cores: None },
            steps: StepsSpec { run: vec![PluginSpec { module: "Executor".to_string(), config: Json::Null }], analysis: vec![] },
            observers: vec![],
            tools,
            tasks,
        }
    }

    #[tokio::test]
    async fn single_task_bootstrap_yields_one_pending_run() {
        let dir = tempdir().unwrap();
        let input_dir = dir.path().join("inputs");
        std::fs::create_dir_all(&input_dir).unwrap();
        std::fs::write(input_dir.join("a.txt"), "hi").unwrap();

        let dispatcher = Dispatcher::spawn(dir.path().join("bench.db")).unwrap();
        let request = BootstrapRequest {
            config: echo_campaign(&input_dir),
            output_dir: dir.path().join("out").to_string_lossy().to_string(),
            repeat: 1,
        };
        let pending = dispatcher.bootstrap(request).await.unwrap();
        assert_eq!(pending, 1);

        let ctx = dispatcher.worker_join(None).await.unwrap().unwrap();
        assert_eq!(ctx.tool, "Echo");
        assert_eq!(ctx.tool_module, "Echo");
        assert_eq!(ctx.steps.len(), 1);

        // No more pending runs left.
        assert!(dispatcher.worker_join(None).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn two_worker_race_dispatches_distinct_runs() {
        let dir = tempdir().unwrap();
        let input_dir = dir.path().join("inputs");
        std::fs::create_dir_all(&input_dir).unwrap();
        for i in 0..10 {
            std::fs::write(input_dir.join(format!("t{i}.txt")), "x").unwrap();
        }

        let dispatcher = Dispatcher::spawn(dir.path().join("bench.db")).unwrap();
        let request = BootstrapRequest {
            config: echo_campaign(&input_dir),
            output_dir: dir.path().join("out").to_string_lossy().to_string(),
            repeat: 1,
        };
        dispatcher.bootstrap(request).await.unwrap();

        let mut ids = std::collections::HashSet::new();
        loop {
            match dispatcher.worker_join(None).await.unwrap() {
                Some(ctx) => assert!(ids.insert(ctx.id), "no run id dispatched twice"),
                None => break,
            }
        }
        assert_eq!(ids.len(), 10);
    }

    #[tokio::test]
    async fn run_lifecycle_transitions() {
        let dir = tempdir().unwrap();
        let input_dir = dir.path().join("inputs");
        std::fs::create_dir_all(&input_dir).unwrap();
        std::fs::write(input_dir.join("a.txt"), "hi").unwrap();

        let dispatcher = Dispatcher::spawn(dir.path().join("bench.db")).unwrap();
        dispatcher
            .bootstrap(BootstrapRequest {
                config: echo_campaign(&input_dir),
                output_dir: dir.path().join("out").to_string_lossy().to_string(),
                repeat: 1,
            })
            .await
            .unwrap();
        let ctx = dispatcher.worker_join(None).await.unwrap().unwrap();

        dispatcher.run_start(&ctx.id, Some("1.0".to_string())).await.unwrap();
        dispatcher.run_step(&ctx.id, "Executor", 0).await.unwrap();
        dispatcher.run_finish(&ctx.id).await.unwrap();

        // Interrupting afterward requeues to PENDING (the override edge).
        dispatcher.run_interrupt(&ctx.id).await.unwrap();
        let again = dispatcher.worker_join(None).await.unwrap().unwrap();
        assert_eq!(again.id, ctx.id);
    }
}
