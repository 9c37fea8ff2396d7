//! Event Router/Server (spec §4.2): the TCP frontend workers and observers
//! connect to, and the in-process backend bus that republishes every frame
//! for observer subscribers. Mirrors the teacher's `events/bus.rs`
//! subscriber fan-out, with a `TcpListener` + per-client reply channel
//! registry standing in for a ROUTER socket (spec §4.2's redesign point).

use std::sync::Arc;

use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::codec::{self, CodecError, Frame, Value, read_frame, write_frame};
use crate::config::BootstrapRequest;
use crate::dispatcher::{Dispatcher, DispatchError};
use crate::events::{
    self, BOOTSTRAP, REQUEST_PENDING, RUN_FINISH, RUN_INTERRUPT, RUN_START, RUN_STEP, RUNSTATS_STORE, SATVERDICT_STORE,
    SERVER_PING, SUDOKUVERDICT_STORE, SYSINFO_STORE, WORKER_DONE, WORKER_JOIN, WORKER_LEAVE, WORKER_REQUEST,
};
use crate::observers;

/// Default bind address (spec §4.2).
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:31313";

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
    #[error("dispatch error: {0}")]
    Dispatch(#[from] DispatchError),
    #[error("malformed event payload for {0}")]
    MalformedPayload(&'static str),
}

pub type ServerResult<T> = Result<T, ServerError>;

/// Connection-bookkeeping counters, separate from run state (spec §4.2
/// "server tracks connected worker count and outstanding job count").
#[derive(Default)]
struct ServerStats {
    connected_workers: usize,
    jobs_waited: usize,
}

pub struct Server {
    dispatcher: Dispatcher,
    bus: Arc<events::EventBus>,
    store_path: std::path::PathBuf,
    stats: Arc<Mutex<ServerStats>>,
}

impl Server {
    pub fn new(dispatcher: Dispatcher, store_path: impl Into<std::path::PathBuf>) -> Self {
        Self {
            dispatcher,
            bus: Arc::new(events::EventBus::default()),
            store_path: store_path.into(),
            stats: Arc::new(Mutex::new(ServerStats::default())),
        }
    }

    /// Bind `addr`, spawn the mandatory (plus any campaign-declared)
    /// observers, and accept connections. If `serve_forever` is false, the
    /// accept loop returns once the dispatcher reports no pending runs and
    /// no worker is connected (spec §4.2: bootstrap-and-run exits when the
    /// campaign is exhausted; `--serve-forever` keeps listening for new
    /// campaigns indefinitely).
    pub async fn serve(&self, addr: &str, serve_forever: bool, observer_modules: &[String]) -> ServerResult<()> {
        let listener = TcpListener::bind(addr).await?;
        info!(addr, serve_forever, "server: listening");

        let mut observer_set = observers::mandatory_observers();
        for module in observer_modules {
            match observers::lookup(module) {
                Some(o) => observer_set.push(o),
                None => warn!(module, "server: unknown observer module, skipping"),
            }
        }
        let bus = self.bus.clone();
        let handles = observers::spawn_all(self.store_path.clone(), move || bus.subscribe(), observer_set);

        loop {
            let (socket, peer) = listener.accept().await?;
            debug!(%peer, "server: accepted connection");
            let dispatcher = self.dispatcher.clone();
            let bus = self.bus.clone();
            let stats = self.stats.clone();
            tokio::spawn(async move {
                if let Err(e) = handle_connection(socket, dispatcher, bus, stats).await {
                    warn!(%peer, error = %e, "server: connection closed with error");
                }
            });

            if !serve_forever {
                let pending = self.dispatcher.request_pending().await.unwrap_or_default();
                let idle = self.stats.lock().await.connected_workers == 0;
                if pending.is_empty() && idle {
                    info!("server: campaign exhausted and no workers connected, stopping accept loop");
                    break;
                }
            }
        }

        for handle in handles {
            handle.abort();
        }
        Ok(())
    }
}

async fn handle_connection(
    mut socket: TcpStream,
    dispatcher: Dispatcher,
    bus: Arc<events::EventBus>,
    stats: Arc<Mutex<ServerStats>>,
) -> ServerResult<()> {
    while let Some(frame) = read_frame(&mut socket).await? {
        bus.publish(frame.clone());
        let reply = route(&frame, &dispatcher, &stats).await;
        match reply {
            Some(reply_frame) => write_frame(&mut socket, &reply_frame).await?,
            None => continue,
        }
    }
    Ok(())
}

async fn route(frame: &Frame, dispatcher: &Dispatcher, stats: &Arc<Mutex<ServerStats>>) -> Option<Frame> {
    let client_id = frame.client_id.clone();
    match frame.event_kind.as_str() {
        SERVER_PING => Some(Frame::new(client_id, SERVER_PING, Value::Nil)),

        BOOTSTRAP => {
            let result: ServerResult<Frame> = async {
                let request: BootstrapRequest = codec::from_json_value(&frame.payload)?;
                let pending = dispatcher.bootstrap(request).await?;
                Ok(Frame::new(client_id.clone(), BOOTSTRAP, Value::Int(pending as i64)))
            }
            .await;
            Some(result.unwrap_or_else(|e| error_frame(client_id, BOOTSTRAP, e)))
        }

        WORKER_JOIN | WORKER_REQUEST => {
            if frame.event_kind == WORKER_JOIN {
                stats.lock().await.connected_workers += 1;
            }
            let preassigned = frame.payload.as_map().and_then(|m| m.get("run_id")).and_then(Value::as_str).map(String::from);
            let result = dispatcher.worker_join(preassigned).await;
            let ctx = match result {
                Ok(ctx) => ctx,
                Err(e) => return Some(error_frame(client_id, frame.event_kind.clone(), e.into())),
            };
            if ctx.is_some() {
                stats.lock().await.jobs_waited += 1;
            }
            let payload = codec::to_json_value(&ctx).unwrap_or(Value::Nil);
            Some(Frame::new(client_id, frame.event_kind.clone(), payload))
        }

        RUN_START => {
            let result: ServerResult<()> = async {
                let map = frame.payload.as_map().ok_or(ServerError::MalformedPayload("run:start"))?;
                let run_id = map.get("run_id").and_then(Value::as_str).unwrap_or_default().to_string();
                let tool_version = map.get("tool_version").and_then(Value::as_str).map(String::from);
                dispatcher.run_start(run_id, tool_version).await?;
                Ok(())
            }
            .await;
            Some(ack_or_error(client_id, RUN_START, result))
        }

        RUN_STEP => {
            let result: ServerResult<()> = async {
                let map = frame.payload.as_map().ok_or(ServerError::MalformedPayload("run:step"))?;
                let run_id = map.get("run_id").and_then(Value::as_str).unwrap_or_default().to_string();
                let step_module = map.get("step_module").and_then(Value::as_str).unwrap_or_default().to_string();
                let ordinal = map.get("ordinal").and_then(Value::as_int).unwrap_or(0) as u32;
                dispatcher.run_step(run_id, step_module, ordinal).await?;
                Ok(())
            }
            .await;
            Some(ack_or_error(client_id, RUN_STEP, result))
        }

        RUN_FINISH => {
            let result: ServerResult<()> = async {
                let run_id = frame.payload.as_map().and_then(|m| m.get("run_id")).and_then(Value::as_str).unwrap_or_default();
                dispatcher.run_finish(run_id).await?;
                Ok(())
            }
            .await;
            if result.is_ok() {
                let mut s = stats.lock().await;
                s.jobs_waited = s.jobs_waited.saturating_sub(1);
            }
            Some(ack_or_error(client_id, RUN_FINISH, result))
        }

        RUN_INTERRUPT => {
            let result: ServerResult<()> = async {
                let run_id = frame.payload.as_map().and_then(|m| m.get("run_id")).and_then(Value::as_str).unwrap_or_default();
                dispatcher.run_interrupt(run_id).await?;
                Ok(())
            }
            .await;
            Some(ack_or_error(client_id, RUN_INTERRUPT, result))
        }

        REQUEST_PENDING => {
            let result = dispatcher.request_pending().await;
            match result {
                Ok(ids) => Some(Frame::new(client_id, REQUEST_PENDING, codec::to_json_value(&ids).unwrap_or(Value::Nil))),
                Err(e) => Some(error_frame(client_id, REQUEST_PENDING, e.into())),
            }
        }

        WORKER_DONE => {
            debug!(%client_id, "server: worker reports done");
            None
        }

        WORKER_LEAVE => {
            let mut s = stats.lock().await;
            s.connected_workers = s.connected_workers.saturating_sub(1);
            None
        }

        SATVERDICT_STORE | SUDOKUVERDICT_STORE | SYSINFO_STORE | RUNSTATS_STORE => None,

        other => {
            warn!(event_kind = other, "server: unrecognized event kind");
            None
        }
    }
}

fn ack_or_error(client_id: String, kind: &'static str, result: ServerResult<()>) -> Frame {
    match result {
        Ok(()) => Frame::new(client_id, kind, Value::Bool(true)),
        Err(e) => error_frame(client_id, kind, e),
    }
}

fn error_frame(client_id: String, kind: &'static str, error: ServerError) -> Frame {
    Frame::new(client_id, kind, Value::Str(error.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CampaignSpec, LimitsSpec, PatternsSpec, PluginSpec, StepsSpec, TaskGroupSpec, TaskSourceType, ToolSpec};
    use std::collections::BTreeMap;
    use tempfile::tempdir;

    fn echo_campaign(input_dir: &std::path::Path) -> CampaignSpec {
        let mut tools = BTreeMap::new();
        tools.insert("echo".to_string(), ToolSpec { module: "Echo".to_string(), version: None, parameters: BTreeMap::new() });
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
            steps: StepsSpec { run: vec![PluginSpec { module: "Executor".to_string(), config: serde_json::Value::Null }], analysis: vec![] },
            observers: vec![],
            tools,
            tasks,
        }
    }

    #[tokio::test]
    async fn ping_gets_a_reply_frame() {
        let dir = tempdir().unwrap();
        let dispatcher = Dispatcher::spawn(dir.path().join("bench.db")).unwrap();
        let server = Server::new(dispatcher, dir.path().join("bench.db"));

        let addr = "127.0.0.1:0";
        let listener = TcpListener::bind(addr).await.unwrap();
        let bound = listener.local_addr().unwrap();
        drop(listener);

        let server_task = {
            let bound_str = bound.to_string();
            tokio::spawn(async move { server.serve(&bound_str, true, &[]).await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let mut stream = TcpStream::connect(bound).await.unwrap();
        write_frame(&mut stream, &Frame::new("c1", SERVER_PING, Value::Nil)).await.unwrap();
        let reply = read_frame(&mut stream).await.unwrap().unwrap();
        assert_eq!(reply.event_kind, SERVER_PING);

        server_task.abort();
    }

    #[tokio::test]
    async fn bootstrap_then_worker_join_over_the_wire() {
        let dir = tempdir().unwrap();
        let input_dir = dir.path().join("inputs");
        std::fs::create_dir_all(&input_dir).unwrap();
        std::fs::write(input_dir.join("a.txt"), "hi").unwrap();

        let dispatcher = Dispatcher::spawn(dir.path().join("bench.db")).unwrap();
        let server = Server::new(dispatcher, dir.path().join("bench.db"));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let bound = listener.local_addr().unwrap();
        drop(listener);

        let server_task = {
            let bound_str = bound.to_string();
            tokio::spawn(async move { server.serve(&bound_str, true, &[]).await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let mut stream = TcpStream::connect(bound).await.unwrap();
        let request = BootstrapRequest {
            config: echo_campaign(&input_dir),
            output_dir: dir.path().join("out").to_string_lossy().to_string(),
            repeat: 1,
        };
        let payload = codec::to_json_value(&request).unwrap();
        write_frame(&mut stream, &Frame::new("c1", BOOTSTRAP, payload)).await.unwrap();
        let reply = read_frame(&mut stream).await.unwrap().unwrap();
        assert_eq!(reply.payload, Value::Int(1));

        write_frame(&mut stream, &Frame::new("c1", WORKER_JOIN, Value::Nil)).await.unwrap();
        let reply = read_frame(&mut stream).await.unwrap().unwrap();
        assert!(matches!(reply.payload, Value::Bytes(_)));

        server_task.abort();
    }
}
