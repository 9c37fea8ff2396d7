//! Exact event-kind byte strings from spec §6.

pub const SERVER_PING: &str = "server:ping";
pub const WORKER_JOIN: &str = "worker:join";
pub const WORKER_REQUEST: &str = "worker:request";
pub const WORKER_DONE: &str = "worker:done";
pub const WORKER_LEAVE: &str = "worker:leave";
pub const RUN_START: &str = "run:start";
pub const RUN_STEP: &str = "run:step";
pub const RUN_INTERRUPT: &str = "run:interrupt";
pub const RUN_FINISH: &str = "run:finish";
pub const BOOTSTRAP: &str = "bootstrap";
pub const REQUEST_PENDING: &str = "request:pending";
pub const SATVERDICT_STORE: &str = "satverdict:store";
pub const SUDOKUVERDICT_STORE: &str = "sudokuverdict:store";
pub const SYSINFO_STORE: &str = "sysinfo:store";
pub const RUNSTATS_STORE: &str = "runstats:store";
