use tokio::process::Command;
use tracing::{info, warn};

use super::{ClusterError, ClusterResult};

/// Local process-pool manager (spec §4.8): spawns `worker_count` copies of
/// this binary's `worker` subcommand, each connecting back to `server_addr`,
/// and waits for all of them to exit.
pub struct LocalManager {
    pub worker_count: usize,
    pub server_addr: String,
}

impl LocalManager {
    /// `worker_count` defaults to the available parallelism when `None`
    /// (spec §4.8: "local manager sizes its pool to the host's core count").
    pub fn new(worker_count: Option<usize>, server_addr: impl Into<String>) -> Self {
        let worker_count = worker_count.unwrap_or_else(|| {
            std::thread::available_parallelism().map(|n| n.get()).unwrap_or(num_cpus::get())
        });
        Self { worker_count, server_addr: server_addr.into() }
    }

    pub async fn run(&self) -> ClusterResult<()> {
        let exe = std::env::current_exe()?;
        info!(workers = self.worker_count, addr = %self.server_addr, "local manager: spawning pool");

        let mut children = Vec::with_capacity(self.worker_count);
        for i in 0..self.worker_count {
            let child = Command::new(&exe).arg("worker").arg("--addr").arg(&self.server_addr).spawn()?;
            children.push((i, child));
        }

        let mut failures = 0;
        for (i, mut child) in children {
            match child.wait().await {
                Ok(status) if status.success() => {}
                Ok(status) => {
                    warn!(worker = i, ?status, "local manager: worker exited non-zero");
                    failures += 1;
                }
                Err(e) => {
                    warn!(worker = i, error = %e, "local manager: failed to wait on worker");
                    failures += 1;
                }
            }
        }

        if failures == self.worker_count && self.worker_count > 0 {
            return Err(ClusterError::AllWorkersFailed);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_worker_count_to_available_parallelism() {
        let manager = LocalManager::new(None, "127.0.0.1:31313");
        assert!(manager.worker_count >= 1);
    }

    #[test]
    fn explicit_worker_count_is_respected() {
        let manager = LocalManager::new(Some(3), "127.0.0.1:31313");
        assert_eq!(manager.worker_count, 3);
    }
}
