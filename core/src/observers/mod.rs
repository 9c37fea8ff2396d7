//! Server-side observers (spec §4.2/§4.7): tasks subscribed to the
//! `EventBus` that persist specific event kinds into the `Store`. Mirrors
//! the teacher's `events/logger.rs` subscriber shape, generalized from one
//! fixed logger to a small static registry of named observers.

mod run_stats;
mod sat_verdict;
mod sysinfo;

pub use run_stats::RunStatsObserver;
pub use sat_verdict::SatVerdictObserver;
pub use sysinfo::SysInfoObserver;

use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::codec::Frame;
use crate::domain::{Store, StoreError};

#[derive(Debug, Error)]
pub enum ObserverError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("malformed event payload for {0}")]
    MalformedPayload(&'static str),
}

pub type ObserverResult<T> = Result<T, ObserverError>;

/// One persisted-event subscriber: `event_kind` names what it filters for,
/// `handle` does the persisting.
pub trait Observer: Send + Sync + 'static {
    fn event_kind(&self) -> &'static str;
    fn handle(&self, store: &mut Store, frame: &Frame) -> ObserverResult<()>;
}

/// The mandatory observer set (spec §4.7: `RunStatistic` is always
/// recorded) plus any campaign-declared optional ones, run inside one task
/// per server process.
pub fn mandatory_observers() -> Vec<Box<dyn Observer>> {
    vec![Box::new(RunStatsObserver)]
}

/// Resolve a campaign's `observers:` module id to a constructed observer.
pub fn lookup(module_id: &str) -> Option<Box<dyn Observer>> {
    match module_id {
        "RunStats" => Some(Box::new(RunStatsObserver)),
        "SysInfo" => Some(Box::new(SysInfoObserver)),
        "SatVerdict" => Some(Box::new(SatVerdictObserver)),
        _ => None,
    }
}

/// Spawn one task per observer, each independently subscribed to `bus`.
/// Store errors are logged and skipped rather than killing the task, since
/// one bad event must not stop observation of the rest of the campaign.
pub fn spawn_all(
    store_path: std::path::PathBuf,
    bus_subscribe: impl Fn() -> broadcast::Receiver<Frame>,
    observers: Vec<Box<dyn Observer>>,
) -> Vec<tokio::task::JoinHandle<()>> {
    observers
        .into_iter()
        .map(|observer| {
            let mut rx = bus_subscribe();
            let store_path = store_path.clone();
            tokio::spawn(async move {
                let mut store = match Store::open(&store_path) {
                    Ok(s) => s,
                    Err(e) => {
                        warn!(error = %e, "observer: failed to open store, exiting");
                        return;
                    }
                };
                loop {
                    match rx.recv().await {
                        Ok(frame) if frame.event_kind == observer.event_kind() => {
                            if let Err(e) = observer.handle(&mut store, &frame) {
                                warn!(error = %e, kind = observer.event_kind(), "observer: failed to persist event");
                            }
                        }
                        Ok(_) => continue,
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            warn!(skipped = n, "observer: lagged behind the event bus");
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            debug!(kind = observer.event_kind(), "observer: bus closed, exiting");
                            break;
                        }
                    }
                }
            })
        })
        .collect()
}
