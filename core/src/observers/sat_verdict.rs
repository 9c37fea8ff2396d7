use crate::codec::{Frame, Value};
use crate::domain::{SatVerdict, Store};
use crate::events::SATVERDICT_STORE;

use super::{Observer, ObserverError, ObserverResult};

/// Worked custom-observer example (SPEC_FULL.md §2): persists a SAT
/// solver's self-reported satisfiability verdict. Demonstrates that an
/// observer is just a `{event_kind, handle}` pair, not a core invariant.
pub struct SatVerdictObserver;

impl Observer for SatVerdictObserver {
    fn event_kind(&self) -> &'static str {
        SATVERDICT_STORE
    }

    fn handle(&self, store: &mut Store, frame: &Frame) -> ObserverResult<()> {
        let map = frame.payload.as_map().ok_or(ObserverError::MalformedPayload("satverdict:store"))?;
        let run = map.get("run").and_then(Value::as_str).ok_or(ObserverError::MalformedPayload("satverdict:store.run"))?;
        let is_valid = match map.get("is_valid") {
            Some(Value::Bool(b)) => *b,
            _ => return Err(ObserverError::MalformedPayload("satverdict:store.is_valid")),
        };

        let verdict = SatVerdict::new(run, is_valid);
        store.create(&verdict).or_else(|e| match e {
            crate::domain::StoreError::Conflict { .. } => store.update(&verdict),
            other => Err(other),
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use tempfile::tempdir;

    #[test]
    fn persists_satverdict_event() {
        let dir = tempdir().unwrap();
        let mut store = Store::open(dir.path().join("bench.db")).unwrap();

        let mut payload = BTreeMap::new();
        payload.insert("run".to_string(), Value::Str("out/cadical/g/t/a.cnf/0".to_string()));
        payload.insert("is_valid".to_string(), Value::Bool(true));
        let frame = Frame::new("worker-1", SATVERDICT_STORE, Value::Map(payload));

        SatVerdictObserver.handle(&mut store, &frame).unwrap();

        let verdict: SatVerdict = store.get("out/cadical/g/t/a.cnf/0").unwrap().unwrap();
        assert!(verdict.is_valid);
    }
}
