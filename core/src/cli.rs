//! `benchrunner` command line: thin argument parsing over the library's
//! server/worker/bootstrap/manager entry points.

use clap::{Parser, Subcommand};

use crate::server::DEFAULT_BIND_ADDR;

#[derive(Parser)]
#[command(name = "benchrunner", about = "Distributed benchmark campaign execution engine")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Start the event server (frontend + backend bus + observers)
    Server {
        /// Path to the sqlite store database
        #[arg(long, default_value = "bench.db")]
        db: String,
        /// Address to bind the TCP frontend to
        #[arg(long, default_value = DEFAULT_BIND_ADDR)]
        addr: String,
        /// Keep accepting connections after the campaign is exhausted
        #[arg(long)]
        serve_forever: bool,
        /// Observer module ids to run in addition to the mandatory set
        #[arg(long)]
        observer: Vec<String>,
    },
    /// Connect to a server and execute runs until none remain
    Worker {
        /// Server address to connect to
        #[arg(long, default_value = DEFAULT_BIND_ADDR)]
        addr: String,
        /// Identifier reported in every event this worker sends
        #[arg(long)]
        id: Option<String>,
    },
    /// Load a campaign YAML file and submit it to a running server
    Bootstrap {
        /// Path to the campaign YAML file
        config: String,
        /// Directory runs are written under
        #[arg(long)]
        output_dir: String,
        /// Number of iterations per (tool, parameter group, task)
        #[arg(long, default_value_t = 1)]
        repeat: u32,
        /// Server address to submit the campaign to
        #[arg(long, default_value = DEFAULT_BIND_ADDR)]
        addr: String,
    },
    /// Drive a worker fleet against a bootstrapped server
    Manager {
        #[command(subcommand)]
        command: ManagerCommand,
    },
}

#[derive(Subcommand)]
pub enum ManagerCommand {
    /// Spawn a fixed-size local worker process pool
    Local {
        #[arg(long)]
        workers: Option<usize>,
        #[arg(long, default_value = DEFAULT_BIND_ADDR)]
        addr: String,
    },
    /// Submit (or print, with --dry-run) a Slurm job array
    Slurm {
        #[arg(long)]
        jobs: usize,
        #[arg(long)]
        workers: usize,
        #[arg(long)]
        time: f64,
        #[arg(long)]
        memory: f64,
        #[arg(long, default_value = DEFAULT_BIND_ADDR)]
        addr: String,
        #[arg(long)]
        dry_run: bool,
    },
}
