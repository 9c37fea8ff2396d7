//! `benchrunner` command-line entry point: thin dispatch over the library's
//! server/worker/bootstrap/manager primitives (spec §1's "CLI surface" is
//! out of core scope, but the core needs *some* process entry point to run
//! it from).

use std::fs;

use clap::Parser;
use eyre::{Context, Result, eyre};
use tracing::info;

use benchrunner::cli::{Cli, Command, ManagerCommand};
use benchrunner::codec::{self, Frame, Value, read_frame, write_frame};
use benchrunner::config::{BootstrapRequest, CampaignSpec};
use benchrunner::dispatcher::Dispatcher;
use benchrunner::events::BOOTSTRAP;
use benchrunner::server::Server;
use benchrunner::{cluster, worker};

fn setup_logging() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_logging().context("failed to set up logging")?;
    let cli = Cli::parse();

    match cli.command {
        Command::Server { db, addr, serve_forever, observer } => run_server(&db, &addr, serve_forever, &observer).await,
        Command::Worker { addr, id } => run_worker(&addr, id).await,
        Command::Bootstrap { config, output_dir, repeat, addr } => run_bootstrap(&config, &output_dir, repeat, &addr).await,
        Command::Manager { command } => run_manager(command).await,
    }
}

async fn run_server(db: &str, addr: &str, serve_forever: bool, observer_modules: &[String]) -> Result<()> {
    info!(db, addr, serve_forever, "benchrunner: starting server");
    let dispatcher = Dispatcher::spawn(db).context("failed to open store")?;
    let server = Server::new(dispatcher, db);
    server.serve(addr, serve_forever, observer_modules).await.context("server loop failed")?;
    Ok(())
}

async fn run_worker(addr: &str, id: Option<String>) -> Result<()> {
    let id = id.unwrap_or_else(|| format!("worker-{}", std::process::id()));
    info!(worker = %id, addr, "benchrunner: starting worker");
    let worker = worker::Worker::new(id, addr);
    worker.run().await.context("worker loop failed")?;
    Ok(())
}

/// Load a campaign YAML file and submit it to a running server over the
/// wire `BOOTSTRAP` event (spec §4.2 "bootstrapping-over-the-wire").
async fn run_bootstrap(config_path: &str, output_dir: &str, repeat: u32, addr: &str) -> Result<()> {
    let text = fs::read_to_string(config_path).with_context(|| format!("failed to read campaign file {config_path}"))?;
    let config: CampaignSpec = serde_yaml::from_str(&text).with_context(|| format!("failed to parse campaign file {config_path}"))?;

    let request = BootstrapRequest { config, output_dir: output_dir.to_string(), repeat };
    let payload = codec::to_json_value(&request)?;

    let mut stream = tokio::net::TcpStream::connect(addr).await.with_context(|| format!("failed to connect to {addr}"))?;
    write_frame(&mut stream, &Frame::new("bootstrap-client", BOOTSTRAP, payload)).await?;
    let reply = read_frame(&mut stream).await?.ok_or_else(|| eyre!("server closed the connection before replying"))?;

    match reply.payload {
        Value::Int(pending) => {
            println!("bootstrap complete: {pending} run(s) pending");
            Ok(())
        }
        Value::Str(msg) => Err(eyre!("bootstrap failed: {msg}")),
        other => Err(eyre!("unexpected bootstrap reply: {other:?}")),
    }
}

async fn run_manager(command: ManagerCommand) -> Result<()> {
    match command {
        ManagerCommand::Local { workers, addr } => {
            cluster::LocalManager::new(workers, addr).run().await.context("local manager failed")?;
        }
        ManagerCommand::Slurm { jobs, workers, time, memory, addr, dry_run } => {
            let manager = cluster::SlurmManager {
                job_count: jobs,
                worker_count: workers,
                time_s: time,
                memory_mib: memory,
                server_addr: addr,
                dry_run,
            };
            manager.run().await.context("slurm manager failed")?;
        }
    }
    Ok(())
}
