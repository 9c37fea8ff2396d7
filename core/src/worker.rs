//! Worker (spec §4.4): connects to the server, claims runs, executes their
//! step list, and reports outcomes back. `ClaimGuard` is the crash-safety
//! net: drop it without marking a run finished and it requeues the run
//! instead of leaving it stuck SUBMITTED/RUNNING forever.

use std::collections::BTreeMap;
use std::time::Duration;

use thiserror::Error;
use tokio::net::TcpStream;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::codec::{self, CodecError, Frame, Value, read_frame, write_frame};
use crate::dispatcher::RunContext;
use crate::events::{RUN_FINISH, RUN_INTERRUPT, RUN_START, RUN_STEP, RUNSTATS_STORE, WORKER_JOIN, WORKER_LEAVE, WORKER_REQUEST};
use crate::executor::{self, Limits};
use crate::tool;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
    #[error("executor error: {0}")]
    Executor(#[from] executor::ExecutorError),
    #[error("server closed the connection")]
    ServerGone,
}

pub type WorkerResult<T> = Result<T, WorkerError>;

/// How long a worker waits for a run before giving up this poll attempt
/// and retrying (spec §4.4).
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);
const MAX_BACKOFF: Duration = Duration::from_secs(5);

pub struct Worker {
    id: String,
    addr: String,
}

impl Worker {
    pub fn new(id: impl Into<String>, addr: impl Into<String>) -> Self {
        Self { id: id.into(), addr: addr.into() }
    }

    /// Connect, join, and loop claiming and executing runs until the server
    /// reports no more pending work.
    pub async fn run(&self) -> WorkerResult<()> {
        let mut stream = TcpStream::connect(&self.addr).await?;
        info!(worker = %self.id, addr = %self.addr, "worker: connected");

        let mut backoff = Duration::from_millis(100);
        let mut joined = false;
        loop {
            // `WORKER_JOIN` marks this connection live exactly once (the server
            // counts it against `connected_workers`); every later poll on this
            // same connection -- including retries after a transient claim
            // failure, once the join round-trip has actually completed -- is a
            // `WORKER_REQUEST`, which does not (spec §4.4, §6).
            let kind = if joined { WORKER_REQUEST } else { WORKER_JOIN };
            let ctx = match self.claim(&mut stream, kind).await {
                Ok(Some(ctx)) => {
                    joined = true;
                    backoff = Duration::from_millis(100);
                    ctx
                }
                Ok(None) => {
                    info!(worker = %self.id, "worker: no pending runs, leaving");
                    let _ = self.send_event(&mut stream, WORKER_LEAVE, Value::Nil).await;
                    return Ok(());
                }
                Err(e) => {
                    warn!(worker = %self.id, error = %e, backoff_ms = backoff.as_millis(), "worker: claim failed, retrying");
                    sleep(backoff).await;
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                    continue;
                }
            };

            let guard = ClaimGuard::new(self.id.clone(), self.addr.clone(), ctx.id.clone());
            if let Err(e) = self.execute_run(&mut stream, &ctx).await {
                warn!(worker = %self.id, run = %ctx.id, error = %e, "worker: run execution failed");
            }
            guard.disarm();
        }
    }

    async fn claim(&self, stream: &mut TcpStream, kind: &'static str) -> WorkerResult<Option<RunContext>> {
        self.send_event(stream, kind, Value::Nil).await?;
        let reply = tokio::time::timeout(REQUEST_TIMEOUT, read_frame(stream))
            .await
            .map_err(|_| WorkerError::ServerGone)??
            .ok_or(WorkerError::ServerGone)?;
        Ok(codec::from_json_value(&reply.payload)?)
    }

    async fn execute_run(&self, stream: &mut TcpStream, ctx: &RunContext) -> WorkerResult<()> {
        std::fs::create_dir_all(&ctx.directory)?;

        let adapter = tool::lookup(&ctx.tool_module).ok();

        let mut start_payload = BTreeMap::new();
        start_payload.insert("run_id".to_string(), Value::Str(ctx.id.clone()));
        start_payload.insert(
            "tool_version".to_string(),
            adapter.as_ref().and_then(|a| a.version()).map(Value::Str).unwrap_or(Value::Nil),
        );
        self.send_event(stream, RUN_START, Value::Map(start_payload)).await?;

        let limits = Limits {
            time_s: ctx.limits.get("time_s").copied(),
            memory_bytes: ctx.limits.get("memory_bytes").map(|v| *v as u64),
            output_bytes: ctx.limits.get("output_bytes").map(|v| *v as u64),
        };

        for step in &ctx.steps {
            match step.module.as_str() {
                "Executor" => {
                    let argv = adapter
                        .as_ref()
                        .map(|a| a.cmdline(&ctx.parameters, &ctx.task))
                        .unwrap_or_else(|| vec![ctx.task.clone()]);
                    let stat = executor::execute(&ctx.id, &argv, &ctx.directory, limits).await?;
                    self.send_runstats(stream, &stat).await?;
                }
                "SysInfo" => {
                    let (kind, payload) = crate::steps::sysinfo_event(ctx);
                    self.send_event(stream, kind, payload).await?;
                }
                "SatVerdict" => {
                    if let Some((kind, payload)) = crate::steps::sat_verdict_event(ctx) {
                        self.send_event(stream, kind, payload).await?;
                    }
                }
                _ => {}
            }

            let mut step_payload = BTreeMap::new();
            step_payload.insert("run_id".to_string(), Value::Str(ctx.id.clone()));
            step_payload.insert("step_module".to_string(), Value::Str(step.module.clone()));
            step_payload.insert("ordinal".to_string(), Value::Int(step.ordinal as i64));
            self.send_event(stream, RUN_STEP, Value::Map(step_payload)).await?;
        }

        let mut finish_payload = BTreeMap::new();
        finish_payload.insert("run_id".to_string(), Value::Str(ctx.id.clone()));
        self.send_event(stream, RUN_FINISH, Value::Map(finish_payload)).await?;
        Ok(())
    }

    async fn send_runstats(&self, stream: &mut TcpStream, stat: &crate::domain::RunStatistic) -> WorkerResult<()> {
        let mut payload = BTreeMap::new();
        payload.insert("run".to_string(), Value::Str(stat.run.clone()));
        payload.insert("verdict".to_string(), Value::Str(stat.verdict.to_string()));
        payload.insert("cpu_time".to_string(), Value::Float(stat.cpu_time));
        payload.insert("wall_time".to_string(), Value::Float(stat.wall_time));
        payload.insert("max_memory".to_string(), Value::Int(stat.max_memory as i64));
        payload.insert("return_code".to_string(), stat.return_code.map(|c| Value::Int(c as i64)).unwrap_or(Value::Nil));
        self.send_event(stream, RUNSTATS_STORE, Value::Map(payload)).await
    }

    /// Send one event with exponential backoff retry (100ms doubling,
    /// capped at 5s, unlimited retries -- spec §4.4).
    async fn send_event(&self, stream: &mut TcpStream, kind: &'static str, payload: Value) -> WorkerResult<()> {
        let mut backoff = Duration::from_millis(100);
        loop {
            let frame = Frame::new(self.id.clone(), kind, payload.clone());
            match write_frame(stream, &frame).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    warn!(worker = %self.id, kind, error = %e, backoff_ms = backoff.as_millis(), "worker: send_event retrying");
                    sleep(backoff).await;
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                }
            }
        }
    }
}

/// RAII crash-safety net (spec §4.4): if dropped without `disarm()` having
/// been called (panic, process kill, connection loss before RUN_FINISH),
/// fires a best-effort RUN_INTERRUPT on a fresh connection so the run goes
/// back to PENDING instead of being stuck.
struct ClaimGuard {
    worker_id: String,
    addr: String,
    run_id: String,
    armed: bool,
}

impl ClaimGuard {
    fn new(worker_id: String, addr: String, run_id: String) -> Self {
        Self { worker_id, addr, run_id, armed: true }
    }

    fn disarm(mut self) {
        self.armed = false;
        debug!(worker = %self.worker_id, run = %self.run_id, "claim guard: disarmed");
    }
}

impl Drop for ClaimGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        warn!(worker = %self.worker_id, run = %self.run_id, "claim guard: firing RUN_INTERRUPT on drop");
        let worker_id = self.worker_id.clone();
        let addr = self.addr.clone();
        let run_id = self.run_id.clone();
        tokio::spawn(async move {
            if let Ok(mut stream) = TcpStream::connect(&addr).await {
                let mut payload = BTreeMap::new();
                payload.insert("run_id".to_string(), Value::Str(run_id));
                let frame = Frame::new(worker_id, RUN_INTERRUPT, Value::Map(payload));
                let _ = write_frame(&mut stream, &frame).await;
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claim_guard_disarm_prevents_interrupt_on_drop() {
        let guard = ClaimGuard::new("w1".to_string(), "127.0.0.1:1".to_string(), "run-1".to_string());
        guard.disarm();
        // Dropping here must not spawn anything armed; nothing to assert
        // directly without a live server, but disarm() must not panic.
    }
}
