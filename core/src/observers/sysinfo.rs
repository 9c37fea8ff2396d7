use crate::codec::{Frame, Value};
use crate::domain::{Node, RunNode, Store};
use crate::events::SYSINFO_STORE;

use super::{Observer, ObserverError, ObserverResult};

/// Persists the `sysinfo:store` event into `Node` (replace-on-conflict,
/// keyed by hostname) and a `RunNode` linking the reporting run to it
/// (SPEC_FULL.md supplemental entity, §4.7).
pub struct SysInfoObserver;

impl Observer for SysInfoObserver {
    fn event_kind(&self) -> &'static str {
        SYSINFO_STORE
    }

    fn handle(&self, store: &mut Store, frame: &Frame) -> ObserverResult<()> {
        let map = frame.payload.as_map().ok_or(ObserverError::MalformedPayload("sysinfo:store"))?;

        let hostname = map.get("hostname").and_then(Value::as_str).ok_or(ObserverError::MalformedPayload("sysinfo:store.hostname"))?;
        let run = map.get("run").and_then(Value::as_str).ok_or(ObserverError::MalformedPayload("sysinfo:store.run"))?;
        let platform = map.get("platform").and_then(Value::as_str).unwrap_or("unknown").to_string();
        let arch = map.get("arch").and_then(Value::as_str).unwrap_or("unknown").to_string();
        let cpu = map.get("cpu").and_then(Value::as_str).unwrap_or("unknown").to_string();
        let cpu_count = map.get("cpu_count").and_then(Value::as_int).unwrap_or(0) as usize;
        let mem_total = map.get("mem_total").and_then(Value::as_int).unwrap_or(0) as u64;
        let mem_available = map.get("mem_available").and_then(Value::as_int).unwrap_or(0) as u64;

        let node = Node::new(hostname, platform, arch, cpu, cpu_count, mem_total, mem_available);
        store.create(&node).or_else(|e| match e {
            crate::domain::StoreError::Conflict { .. } => store.update(&node),
            other => Err(other),
        })?;

        let run_node = RunNode::new(run, hostname);
        match store.create(&run_node) {
            Ok(_) | Err(crate::domain::StoreError::Conflict { .. }) => Ok(()),
            Err(other) => Err(other),
        }?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use tempfile::tempdir;

    #[test]
    fn persists_sysinfo_event_as_node_and_run_node() {
        let dir = tempdir().unwrap();
        let mut store = Store::open(dir.path().join("bench.db")).unwrap();

        let mut payload = BTreeMap::new();
        payload.insert("hostname".to_string(), Value::Str("worker-a".to_string()));
        payload.insert("run".to_string(), Value::Str("out/echo/default/t/a.txt/0".to_string()));
        payload.insert("platform".to_string(), Value::Str("linux".to_string()));
        payload.insert("arch".to_string(), Value::Str("x86_64".to_string()));
        payload.insert("cpu".to_string(), Value::Str("generic".to_string()));
        payload.insert("cpu_count".to_string(), Value::Int(8));
        payload.insert("mem_total".to_string(), Value::Int(16_000_000_000));
        payload.insert("mem_available".to_string(), Value::Int(8_000_000_000));
        let frame = Frame::new("worker-1", SYSINFO_STORE, Value::Map(payload));

        SysInfoObserver.handle(&mut store, &frame).unwrap();

        let node: Node = store.get("worker-a").unwrap().unwrap();
        assert_eq!(node.cpu_count, 8);
    }
}
