use crate::codec::{Frame, Value};
use crate::domain::{RunStatistic, Store, Verdict};
use crate::events::RUNSTATS_STORE;

use super::{Observer, ObserverError, ObserverResult};

/// Persists the `runstats:store` event into a `RunStatistic` row. Mandatory
/// on every server (spec §4.7): this is the one observer that isn't
/// optional, since a run with no statistic can't be distinguished from one
/// that never ran.
pub struct RunStatsObserver;

impl Observer for RunStatsObserver {
    fn event_kind(&self) -> &'static str {
        RUNSTATS_STORE
    }

    fn handle(&self, store: &mut Store, frame: &Frame) -> ObserverResult<()> {
        let map = frame.payload.as_map().ok_or(ObserverError::MalformedPayload("runstats:store"))?;

        let run = map.get("run").and_then(Value::as_str).ok_or(ObserverError::MalformedPayload("runstats:store.run"))?;
        let verdict_str = map
            .get("verdict")
            .and_then(Value::as_str)
            .ok_or(ObserverError::MalformedPayload("runstats:store.verdict"))?;
        let verdict = parse_verdict(verdict_str).ok_or(ObserverError::MalformedPayload("runstats:store.verdict"))?;
        let cpu_time = map.get("cpu_time").and_then(as_f64).unwrap_or(0.0);
        let wall_time = map.get("wall_time").and_then(as_f64).unwrap_or(0.0);
        let max_memory = map.get("max_memory").and_then(Value::as_int).unwrap_or(0) as u64;
        let return_code = map.get("return_code").and_then(Value::as_int).map(|v| v as i32);

        let stat = RunStatistic::new(run, verdict, cpu_time, wall_time, max_memory, return_code);
        store.create(&stat).or_else(|e| match e {
            crate::domain::StoreError::Conflict { .. } => store.update(&stat),
            other => Err(other),
        })?;
        Ok(())
    }
}

fn as_f64(v: &Value) -> Option<f64> {
    match v {
        Value::Float(f) => Some(*f),
        Value::Int(i) => Some(*i as f64),
        _ => None,
    }
}

fn parse_verdict(s: &str) -> Option<Verdict> {
    match s {
        "TLE" => Some(Verdict::Tle),
        "MEM" => Some(Verdict::Mem),
        "RTE" => Some(Verdict::Rte),
        "OLE" => Some(Verdict::Ole),
        "OK" => Some(Verdict::Ok),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use tempfile::tempdir;

    #[test]
    fn persists_runstats_event_as_run_statistic() {
        let dir = tempdir().unwrap();
        let mut store = Store::open(dir.path().join("bench.db")).unwrap();

        let mut payload = BTreeMap::new();
        payload.insert("run".to_string(), Value::Str("out/echo/default/t/a.txt/0".to_string()));
        payload.insert("verdict".to_string(), Value::Str("OK".to_string()));
        payload.insert("cpu_time".to_string(), Value::Float(0.1));
        payload.insert("wall_time".to_string(), Value::Float(0.2));
        payload.insert("max_memory".to_string(), Value::Int(1024));
        payload.insert("return_code".to_string(), Value::Int(0));
        let frame = Frame::new("worker-1", RUNSTATS_STORE, Value::Map(payload));

        RunStatsObserver.handle(&mut store, &frame).unwrap();

        let stat: RunStatistic = store.get("out/echo/default/t/a.txt/0").unwrap().unwrap();
        assert_eq!(stat.verdict, Verdict::Ok);
        assert_eq!(stat.max_memory, 1024);
    }
}
