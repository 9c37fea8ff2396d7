//! Cluster Manager (spec §4.8): drives a worker fleet against a bootstrapped
//! campaign, either as a local process pool or via Slurm job-array
//! submission.

mod local;
mod slurm;

pub use local::LocalManager;
pub use slurm::{SlurmManager, SlurmPlan};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("no workers completed successfully")]
    AllWorkersFailed,
}

pub type ClusterResult<T> = Result<T, ClusterError>;
