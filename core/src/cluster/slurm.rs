use tracing::info;

use super::ClusterResult;

/// A constructed `sbatch` invocation, not yet (or never, in `--dry-run`
/// mode) submitted. Spec §4.8: wall time is `2 * time * ceil(jobs/workers)`
/// minutes, memory is `2 * memory` MiB -- headroom over the per-run limits
/// since Slurm kills the whole job step, not just the offending run.
#[derive(Debug, Clone, PartialEq)]
pub struct SlurmPlan {
    pub array_range: String,
    pub wall_minutes: u64,
    pub memory_mib: u64,
    pub command: Vec<String>,
}

impl SlurmPlan {
    pub fn render(&self) -> String {
        format!(
            "sbatch --array={} --time={} --mem={}M -- {}",
            self.array_range,
            self.wall_minutes,
            self.memory_mib,
            self.command.join(" ")
        )
    }
}

pub struct SlurmManager {
    pub job_count: usize,
    pub worker_count: usize,
    pub time_s: f64,
    pub memory_mib: f64,
    pub server_addr: String,
    pub dry_run: bool,
}

impl SlurmManager {
    pub fn plan(&self) -> SlurmPlan {
        let chunks = (self.job_count as f64 / self.worker_count.max(1) as f64).ceil() as u64;
        let wall_minutes = ((2.0 * self.time_s / 60.0).ceil() as u64 * chunks.max(1)).max(1);
        let memory_mib = (2.0 * self.memory_mib).ceil() as u64;
        let exe = std::env::current_exe().ok().and_then(|p| p.to_str().map(String::from)).unwrap_or_else(|| "benchrunner".to_string());

        SlurmPlan {
            array_range: format!("1-{}", self.worker_count.max(1)),
            wall_minutes,
            memory_mib,
            command: vec![exe, "worker".to_string(), "--addr".to_string(), self.server_addr.clone()],
        }
    }

    pub async fn run(&self) -> ClusterResult<()> {
        let plan = self.plan();
        let rendered = plan.render();
        if self.dry_run {
            info!(command = %rendered, "slurm manager: dry-run, not submitting");
            println!("{rendered}");
            return Ok(());
        }
        info!(command = %rendered, "slurm manager: submitting job array");
        tokio::process::Command::new("sbatch")
            .arg(format!("--array={}", plan.array_range))
            .arg(format!("--time={}", plan.wall_minutes))
            .arg(format!("--mem={}M", plan.memory_mib))
            .arg("--")
            .args(&plan.command)
            .status()
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager(job_count: usize, worker_count: usize) -> SlurmManager {
        SlurmManager {
            job_count,
            worker_count,
            time_s: 60.0,
            memory_mib: 1024.0,
            server_addr: "127.0.0.1:31313".to_string(),
            dry_run: true,
        }
    }

    #[test]
    fn wall_time_doubles_and_accounts_for_chunking() {
        let plan = manager(100, 10).plan();
        // 100 jobs / 10 workers = 10 chunks, 2*60s = 120s = 2min per chunk.
        assert_eq!(plan.wall_minutes, 20);
    }

    #[test]
    fn memory_is_doubled() {
        let plan = manager(10, 10).plan();
        assert_eq!(plan.memory_mib, 2048);
    }

    #[test]
    fn array_range_matches_worker_count() {
        let plan = manager(10, 4).plan();
        assert_eq!(plan.array_range, "1-4");
    }
}
