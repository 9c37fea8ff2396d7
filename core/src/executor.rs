//! Bounded Executor (spec §4.5): launches a tool's rendered command line as
//! a subprocess under CPU-time, wall-time, and memory ceilings, samples its
//! resource tree, and classifies the outcome into a `Verdict`.

use std::os::unix::process::CommandExt;
use std::process::Stdio;
use std::time::{Duration, Instant};

use nix::sys::signal::{Signal, killpg};
use nix::unistd::Pid;
use sysinfo::{Pid as SysPid, ProcessRefreshKind, ProcessesToUpdate, System};
use thiserror::Error;
use tokio::process::Command;
use tokio::time::interval;
use tracing::{debug, warn};

use crate::domain::{RunStatistic, Verdict};

/// Sampling rate for the resource-tree watcher (spec §4.5: 20 Hz).
const SAMPLE_INTERVAL: Duration = Duration::from_millis(50);
/// Grace period between SIGTERM and SIGKILL when a limit is exceeded.
const TERM_GRACE: Duration = Duration::from_secs(3);
/// Added to the CPU-time limit to derive the wall-clock ceiling (spec
/// §4.5 `WallTimeLimiter(cpu_time + wall_grace)`): a CPU-idle process
/// (e.g. sleeping on I/O) gets this much extra wall clock beyond the
/// CPU-time budget before it's considered hung.
const WALL_GRACE_S: f64 = 15.0;

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("io error launching process: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to create process group: {0}")]
    Setsid(#[from] nix::Error),
    #[error("command line is empty")]
    EmptyCommand,
}

pub type ExecutorResult<T> = Result<T, ExecutorError>;

/// Resource ceilings passed to one execution, resolved from the campaign's
/// `Limit` rows (spec §3).
#[derive(Debug, Clone, Copy, Default)]
pub struct Limits {
    pub time_s: Option<f64>,
    pub memory_bytes: Option<u64>,
    pub output_bytes: Option<u64>,
}

/// Conventional stdout/stderr artifact names a run directory holds (spec
/// §4.6: tools "read stdout/stderr from conventional `run.out`/`run.err`").
const STDOUT_FILE: &str = "run.out";
const STDERR_FILE: &str = "run.err";

/// Launch `argv` in `working_dir` under `limits`, wait for it to finish (or
/// be killed for exceeding a limit), and return the resulting statistic.
/// `run_id` is only used to stamp the returned `RunStatistic`. stdout/stderr
/// are captured to `run.out`/`run.err` in `working_dir` (spec §4.5 step 1:
/// "open output files truncating").
pub async fn execute(run_id: &str, argv: &[String], working_dir: &str, limits: Limits) -> ExecutorResult<RunStatistic> {
    let (program, args) = argv.split_first().ok_or(ExecutorError::EmptyCommand)?;
    debug!(%run_id, program, ?limits, "executor: launching");

    let out_path = std::path::Path::new(working_dir).join(STDOUT_FILE);
    let err_path = std::path::Path::new(working_dir).join(STDERR_FILE);
    let out_file = std::fs::File::create(&out_path)?;
    let err_file = std::fs::File::create(&err_path)?;

    let mut command = Command::new(program);
    command
        .args(args)
        .current_dir(working_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::from(out_file))
        .stderr(Stdio::from(err_file));
    // SAFETY: `setsid` is async-signal-safe and runs in the forked child
    // before exec, giving the whole process tree one killable group
    // (spec §4.5 "process-group teardown").
    unsafe {
        command.pre_exec(|| {
            nix::unistd::setsid().map_err(|e| std::io::Error::from_raw_os_error(e as i32))?;
            Ok(())
        });
    }

    let mut child = command.spawn()?;
    let pid = child.id().ok_or(ExecutorError::EmptyCommand)?;
    let pgid = Pid::from_raw(pid as i32);

    let started = Instant::now();
    let mut system = System::new();
    let mut peak_memory = 0u64;
    let mut cpu_time = 0.0f64;
    let mut last_sample = started;
    let mut verdict = None;

    let mut ticker = interval(SAMPLE_INTERVAL);
    let wait_result = loop {
        tokio::select! {
            _ = ticker.tick() => {
                let elapsed_since_last = last_sample.elapsed().as_secs_f64();
                last_sample = Instant::now();
                sample_process_tree(&mut system, pid, elapsed_since_last, &mut peak_memory, &mut cpu_time);
                let wall = started.elapsed().as_secs_f64();

                if let Some(mem_limit) = limits.memory_bytes {
                    if peak_memory > mem_limit {
                        verdict = Some(Verdict::Mem);
                    }
                }
                if let Some(time_limit) = limits.time_s {
                    // CpuTimeLimiter: CPU-seconds across the tree vs. the raw limit.
                    // WallTimeLimiter: wall clock vs. the limit plus wall_grace, so a
                    // CPU-idle child (blocked on I/O) isn't killed before it is truly
                    // hung (spec §4.5).
                    if cpu_time > time_limit || wall > time_limit + WALL_GRACE_S {
                        verdict = Some(Verdict::Tle);
                    }
                }
                if verdict.is_some() {
                    warn!(%run_id, ?verdict, wall, cpu_time, peak_memory, "executor: limit exceeded, terminating");
                    terminate_group(pgid).await;
                    break child.wait().await;
                }
            }
            status = child.wait() => break status,
        }
    };

    let output_bytes = out_path.metadata().map(|m| m.len()).unwrap_or(0) + err_path.metadata().map(|m| m.len()).unwrap_or(0);

    let wall_time = started.elapsed().as_secs_f64();
    let final_elapsed = last_sample.elapsed().as_secs_f64();
    sample_process_tree(&mut system, pid, final_elapsed, &mut peak_memory, &mut cpu_time);

    let return_code = match wait_result {
        Ok(status) => status.code(),
        Err(e) => {
            warn!(%run_id, error = %e, "executor: wait() failed after process exit");
            None
        }
    };

    // Precedence is TLE > MEM > RTE > OLE > OK (spec §4.5, §8): a limiter trip
    // (already in `verdict`) wins outright; otherwise a nonzero/signal exit is
    // RTE even if the output also overflowed, and only a clean exit falls
    // through to the output-size check.
    let verdict = verdict.unwrap_or_else(|| match classify(return_code) {
        Verdict::Rte => Verdict::Rte,
        _ => match limits.output_bytes {
            Some(output_limit) if output_bytes > output_limit => Verdict::Ole,
            _ => Verdict::Ok,
        },
    });
    debug!(%run_id, ?verdict, wall_time, cpu_time, peak_memory, return_code, output_bytes, "executor: finished");

    Ok(RunStatistic::new(run_id, verdict, cpu_time, wall_time, peak_memory, return_code))
}

/// Verdict precedence when no limit fired: non-zero/signal exit is RTE,
/// otherwise OK (spec §4.5 "TLE > MEM > RTE > OLE > OK").
fn classify(return_code: Option<i32>) -> Verdict {
    match return_code {
        Some(0) => Verdict::Ok,
        _ => Verdict::Rte,
    }
}

/// Refreshes the process table and folds one sample into the running
/// totals: `peak_memory` tracks the high-water mark of the tree's summed
/// RSS, `cpu_time` accumulates `cpu_usage% * elapsed` across samples as an
/// estimate of total CPU-seconds consumed.
fn sample_process_tree(system: &mut System, root_pid: u32, elapsed: f64, peak_memory: &mut u64, cpu_time: &mut f64) {
    system.refresh_processes_specifics(ProcessesToUpdate::All, true, ProcessRefreshKind::everything());
    let root = SysPid::from_u32(root_pid);
    let mut total_memory = 0u64;
    let mut total_cpu_pct = 0.0f64;
    for process in system.processes().values() {
        if process.pid() == root || process.parent().is_some_and(|p| is_descendant(system, p, root)) {
            total_memory += process.memory();
            total_cpu_pct += process.cpu_usage() as f64;
        }
    }
    *peak_memory = (*peak_memory).max(total_memory);
    *cpu_time += total_cpu_pct / 100.0 * elapsed;
}

fn is_descendant(system: &System, pid: SysPid, ancestor: SysPid) -> bool {
    let mut current = Some(pid);
    while let Some(p) = current {
        if p == ancestor {
            return true;
        }
        current = system.process(p).and_then(|proc| proc.parent());
    }
    false
}

async fn terminate_group(pgid: Pid) {
    let _ = killpg(pgid, Signal::SIGTERM);
    tokio::time::sleep(TERM_GRACE).await;
    let _ = killpg(pgid, Signal::SIGKILL);
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn successful_command_yields_ok_verdict() {
        let dir = tempdir().unwrap();
        let argv = vec!["true".to_string()];
        let stat = execute("run-1", &argv, &dir.path().to_string_lossy(), Limits::default()).await.unwrap();
        assert_eq!(stat.verdict, Verdict::Ok);
        assert_eq!(stat.return_code, Some(0));
    }

    #[tokio::test]
    async fn nonzero_exit_yields_rte_verdict() {
        let dir = tempdir().unwrap();
        let argv = vec!["false".to_string()];
        let stat = execute("run-2", &argv, &dir.path().to_string_lossy(), Limits::default()).await.unwrap();
        assert_eq!(stat.verdict, Verdict::Rte);
    }

    #[tokio::test]
    async fn cpu_time_limit_terminates_process() {
        let dir = tempdir().unwrap();
        // A busy loop burns CPU fast enough to trip the `cpu_time > time_limit`
        // branch within a couple of 50ms samples, well short of `wall_grace`.
        let argv = vec!["bash".to_string(), "-c".to_string(), "while :; do :; done".to_string()];
        let limits = Limits { time_s: Some(0.2), memory_bytes: None, output_bytes: None };
        let stat = execute("run-3", &argv, &dir.path().to_string_lossy(), limits).await.unwrap();
        assert_eq!(stat.verdict, Verdict::Tle);
        assert!(stat.wall_time < 4.0);
    }

    #[tokio::test]
    async fn wall_grace_spares_a_cpu_idle_process_briefly_over_the_limit() {
        let dir = tempdir().unwrap();
        // `sleep` accrues almost no CPU time, so a tight `time_s` limit alone
        // wouldn't fire it -- wall_grace gives it until `time_s + WALL_GRACE_S`
        // before the wall-clock branch kicks in. 1s sleep finishes naturally
        // well inside the 0.2 + 15s ceiling.
        let argv = vec!["sleep".to_string(), "1".to_string()];
        let limits = Limits { time_s: Some(0.2), memory_bytes: None, output_bytes: None };
        let stat = execute("run-4", &argv, &dir.path().to_string_lossy(), limits).await.unwrap();
        assert_eq!(stat.verdict, Verdict::Ok);
        assert_eq!(stat.return_code, Some(0));
    }
}
