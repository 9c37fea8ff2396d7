use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// A value that can be indexed for equality/ordering filters without
/// deserializing the full record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum IndexValue {
    String(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

/// Anything persisted through a [`crate::Store`] implements this. Mirrors
/// the shape consumed by `domain/run.rs` and `state/manager.rs` in the
/// teacher repo: a stable string id, a last-modified timestamp used for
/// conflict bookkeeping, a fixed collection (table) name, and a set of
/// secondary-index fields used by `Store::list`.
pub trait Record: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    fn id(&self) -> &str;
    fn updated_at(&self) -> i64;
    fn collection_name() -> &'static str;
    fn indexed_fields(&self) -> HashMap<String, IndexValue>;
}

/// Current time in milliseconds since the epoch, for `updated_at`/`created_at`
/// fields across every domain entity.
pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before epoch")
        .as_millis() as i64
}
