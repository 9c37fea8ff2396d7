use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::process::Command;

use rusqlite::{Connection, OptionalExtension, params};
use tracing::{debug, warn};

use crate::error::{StoreError, StoreResult};
use crate::filter::Filter;
use crate::record::{IndexValue, Record};

/// Generic SQLite-backed record store with a JSONL audit mirror and a
/// best-effort git snapshot commit on `sync()`.
///
/// Schema: one `records` table holding every collection's rows as JSON
/// blobs keyed by `(collection, id)`, and one `record_index` table holding
/// the flattened `indexed_fields()` of each row for `list()` filtering.
/// Journaling is WAL, matching the write-ahead-journaling requirement for
/// the persistent store.
pub struct Store {
    conn: Connection,
    root: PathBuf,
    dirty: HashSet<(String, String)>,
}

fn index_triplet(value: &IndexValue) -> (&'static str, Option<String>, Option<f64>) {
    match value {
        IndexValue::String(s) => ("str", Some(s.clone()), None),
        IndexValue::Int(i) => ("num", None, Some(*i as f64)),
        IndexValue::Float(f) => ("num", None, Some(*f)),
        IndexValue::Bool(b) => ("str", Some(b.to_string()), None),
    }
}

impl Store {
    /// Open (creating if absent) the store backed by the sqlite file at
    /// `path`. The JSONL mirror lives under `path`'s parent directory in a
    /// `jsonl/` subdirectory.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        debug!(?path, "Store::open: opening");
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS records (
                collection TEXT NOT NULL,
                id TEXT NOT NULL,
                data TEXT NOT NULL,
                updated_at INTEGER NOT NULL,
                PRIMARY KEY (collection, id)
            );
            CREATE TABLE IF NOT EXISTS record_index (
                collection TEXT NOT NULL,
                id TEXT NOT NULL,
                field TEXT NOT NULL,
                kind TEXT NOT NULL,
                str_val TEXT,
                num_val REAL,
                PRIMARY KEY (collection, id, field)
            );
            CREATE INDEX IF NOT EXISTS idx_record_index_lookup
                ON record_index(collection, field, str_val, num_val);",
        )?;
        let root = path.parent().map(Path::to_path_buf).unwrap_or_else(|| PathBuf::from("."));
        Ok(Self { conn, root, dirty: HashSet::new() })
    }

    fn write_indexes(&self, collection: &str, id: &str, fields: &std::collections::HashMap<String, IndexValue>) -> StoreResult<()> {
        self.conn.execute(
            "DELETE FROM record_index WHERE collection = ?1 AND id = ?2",
            params![collection, id],
        )?;
        for (field, value) in fields {
            let (kind, str_val, num_val) = index_triplet(value);
            self.conn.execute(
                "INSERT INTO record_index (collection, id, field, kind, str_val, num_val)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![collection, id, field, kind, str_val, num_val],
            )?;
        }
        Ok(())
    }

    /// Insert a new record. Errors with [`StoreError::Conflict`] if a row
    /// with the same `(collection, id)` already exists.
    pub fn create<T: Record>(&mut self, record: &T) -> StoreResult<String> {
        let collection = T::collection_name();
        let id = record.id().to_string();
        debug!(collection, %id, "Store::create: called");
        let exists: Option<i64> = self
            .conn
            .query_row(
                "SELECT 1 FROM records WHERE collection = ?1 AND id = ?2",
                params![collection, id],
                |row| row.get(0),
            )
            .optional()?;
        if exists.is_some() {
            return Err(StoreError::Conflict { collection: collection.to_string(), id });
        }
        let data = serde_json::to_string(record)?;
        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT INTO records (collection, id, data, updated_at) VALUES (?1, ?2, ?3, ?4)",
            params![collection, id, data, record.updated_at()],
        )?;
        tx.commit()?;
        self.write_indexes(collection, &id, &record.indexed_fields())?;
        self.dirty.insert((collection.to_string(), id.clone()));
        Ok(id)
    }

    /// Fetch one record by id, or `None` if absent.
    pub fn get<T: Record>(&self, id: &str) -> StoreResult<Option<T>> {
        let collection = T::collection_name();
        debug!(collection, id, "Store::get: called");
        let data: Option<String> = self
            .conn
            .query_row(
                "SELECT data FROM records WHERE collection = ?1 AND id = ?2",
                params![collection, id],
                |row| row.get(0),
            )
            .optional()?;
        match data {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    /// Replace an existing record's data and re-derived indexes. Errors
    /// with [`StoreError::NotFound`] if the id is not present.
    pub fn update<T: Record>(&mut self, record: &T) -> StoreResult<()> {
        let collection = T::collection_name();
        let id = record.id().to_string();
        debug!(collection, %id, "Store::update: called");
        let data = serde_json::to_string(record)?;
        let changed = self.conn.execute(
            "UPDATE records SET data = ?3, updated_at = ?4 WHERE collection = ?1 AND id = ?2",
            params![collection, id, data, record.updated_at()],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound { collection: collection.to_string(), id });
        }
        self.write_indexes(collection, &id, &record.indexed_fields())?;
        self.dirty.insert((collection.to_string(), id));
        Ok(())
    }

    /// List records in `T`'s collection matching every filter (ANDed).
    pub fn list<T: Record>(&self, filters: &[Filter]) -> StoreResult<Vec<T>> {
        let collection = T::collection_name();
        debug!(collection, filters = filters.len(), "Store::list: called");
        let mut sql = String::from("SELECT data FROM records WHERE collection = ?1");
        let mut values: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(collection.to_string())];
        for filter in filters {
            let (_, str_val, num_val) = index_triplet(&filter.value);
            let col = if str_val.is_some() { "str_val" } else { "num_val" };
            sql.push_str(&format!(
                " AND id IN (SELECT id FROM record_index WHERE collection = ?1 AND field = ?{} AND {} {} ?{})",
                values.len() + 1,
                col,
                filter.op.sql(),
                values.len() + 2,
            ));
            values.push(Box::new(filter.field.clone()));
            if let Some(s) = str_val {
                values.push(Box::new(s));
            } else {
                values.push(Box::new(num_val.unwrap_or_default()));
            }
        }
        let mut stmt = self.conn.prepare(&sql)?;
        let params_ref: Vec<&dyn rusqlite::ToSql> = values.iter().map(|v| v.as_ref()).collect();
        let rows = stmt.query_map(params_ref.as_slice(), |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(serde_json::from_str(&row?)?);
        }
        Ok(out)
    }

    /// Delete one record by id. Returns whether a row was removed.
    pub fn delete<T: Record>(&mut self, id: &str) -> StoreResult<bool> {
        let collection = T::collection_name();
        debug!(collection, id, "Store::delete: called");
        let changed = self
            .conn
            .execute("DELETE FROM records WHERE collection = ?1 AND id = ?2", params![collection, id])?;
        self.conn
            .execute("DELETE FROM record_index WHERE collection = ?1 AND id = ?2", params![collection, id])?;
        Ok(changed > 0)
    }

    /// Delete every record in `T`'s collection whose indexed `field`
    /// equals `value`. Returns the number of records removed. Used for
    /// cascade deletes (e.g. dropping all `RunStatistic`/log rows for a
    /// run being dropped).
    pub fn delete_by_index<T: Record>(&mut self, field: &str, value: IndexValue) -> StoreResult<usize> {
        let collection = T::collection_name();
        let (_, str_val, num_val) = index_triplet(&value);
        debug!(collection, field, "Store::delete_by_index: called");
        let ids: Vec<String> = {
            let mut stmt = if str_val.is_some() {
                self.conn.prepare(
                    "SELECT id FROM record_index WHERE collection = ?1 AND field = ?2 AND str_val = ?3",
                )?
            } else {
                self.conn.prepare(
                    "SELECT id FROM record_index WHERE collection = ?1 AND field = ?2 AND num_val = ?3",
                )?
            };
            let rows = if let Some(s) = &str_val {
                stmt.query_map(params![collection, field, s], |row| row.get::<_, String>(0))?
                    .collect::<Result<Vec<_>, _>>()?
            } else {
                stmt.query_map(params![collection, field, num_val], |row| row.get::<_, String>(0))?
                    .collect::<Result<Vec<_>, _>>()?
            };
            rows
        };
        for id in &ids {
            self.conn.execute("DELETE FROM records WHERE collection = ?1 AND id = ?2", params![collection, id])?;
            self.conn.execute("DELETE FROM record_index WHERE collection = ?1 AND id = ?2", params![collection, id])?;
        }
        Ok(ids.len())
    }

    /// Recompute `record_index` rows for every record in `T`'s collection
    /// from its current `indexed_fields()`. Returns the number reindexed.
    /// Called at startup before the dispatcher actor begins serving
    /// requests, mirroring the teacher's `StateManager::spawn`.
    pub fn rebuild_indexes<T: Record>(&mut self) -> StoreResult<usize> {
        let collection = T::collection_name();
        debug!(collection, "Store::rebuild_indexes: called");
        let rows: Vec<(String, String)> = {
            let mut stmt = self.conn.prepare("SELECT id, data FROM records WHERE collection = ?1")?;
            let rows = stmt.query_map(params![collection], |row| Ok((row.get(0)?, row.get(1)?)))?;
            rows.collect::<Result<Vec<_>, _>>()?
        };
        let mut count = 0;
        for (id, json) in rows {
            let record: T = serde_json::from_str(&json)?;
            self.write_indexes(collection, &id, &record.indexed_fields())?;
            count += 1;
        }
        Ok(count)
    }

    /// Flush every record dirtied since the last call to its collection's
    /// JSONL mirror, then best-effort `git add -A && git commit` inside
    /// the store root when a `.git` directory is present there.
    pub fn sync(&mut self) -> StoreResult<()> {
        debug!(dirty = self.dirty.len(), "Store::sync: called");
        if self.dirty.is_empty() {
            return Ok(());
        }
        let jsonl_dir = self.root.join("jsonl");
        fs::create_dir_all(&jsonl_dir)?;
        let mut by_collection: std::collections::HashMap<String, Vec<String>> = std::collections::HashMap::new();
        for (collection, id) in self.dirty.drain() {
            let data: Option<String> = self
                .conn
                .query_row(
                    "SELECT data FROM records WHERE collection = ?1 AND id = ?2",
                    params![collection, id],
                    |row| row.get(0),
                )
                .optional()?;
            if let Some(data) = data {
                by_collection.entry(collection).or_default().push(data);
            }
        }
        for (collection, lines) in by_collection {
            let path = jsonl_dir.join(format!("{collection}.jsonl"));
            let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
            for line in lines {
                writeln!(file, "{line}")?;
            }
        }
        self.git_snapshot();
        Ok(())
    }

    fn git_snapshot(&self) {
        if !self.root.join(".git").is_dir() {
            return;
        }
        let add = Command::new("git").arg("add").arg("-A").current_dir(&self.root).output();
        if let Err(e) = add {
            warn!(error = %e, "Store::git_snapshot: git add failed");
            return;
        }
        let commit = Command::new("git")
            .args(["commit", "-m", "store: sync snapshot", "--quiet", "--allow-empty-message"])
            .current_dir(&self.root)
            .output();
        if let Err(e) = commit {
            warn!(error = %e, "Store::git_snapshot: git commit failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    #[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq)]
    struct Widget {
        id: String,
        name: String,
        count: i64,
        updated_at: i64,
    }

    impl Record for Widget {
        fn id(&self) -> &str {
            &self.id
        }
        fn updated_at(&self) -> i64 {
            self.updated_at
        }
        fn collection_name() -> &'static str {
            "widgets"
        }
        fn indexed_fields(&self) -> HashMap<String, IndexValue> {
            let mut m = HashMap::new();
            m.insert("name".to_string(), IndexValue::String(self.name.clone()));
            m.insert("count".to_string(), IndexValue::Int(self.count));
            m
        }
    }

    fn widget(id: &str, name: &str, count: i64) -> Widget {
        Widget { id: id.to_string(), name: name.to_string(), count, updated_at: crate::record::now_ms() }
    }

    #[test]
    fn create_get_roundtrip() {
        let dir = tempdir().unwrap();
        let mut store = Store::open(dir.path().join("test.db")).unwrap();
        let w = widget("w1", "alpha", 3);
        store.create(&w).unwrap();
        let fetched: Widget = store.get("w1").unwrap().unwrap();
        assert_eq!(fetched, w);
    }

    #[test]
    fn create_conflict_on_duplicate_id() {
        let dir = tempdir().unwrap();
        let mut store = Store::open(dir.path().join("test.db")).unwrap();
        store.create(&widget("w1", "alpha", 1)).unwrap();
        let err = store.create(&widget("w1", "beta", 2)).unwrap_err();
        assert!(matches!(err, StoreError::Conflict { .. }));
    }

    #[test]
    fn update_requires_existing_row() {
        let dir = tempdir().unwrap();
        let mut store = Store::open(dir.path().join("test.db")).unwrap();
        let err = store.update(&widget("missing", "x", 1)).unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[test]
    fn list_filters_by_index() {
        let dir = tempdir().unwrap();
        let mut store = Store::open(dir.path().join("test.db")).unwrap();
        store.create(&widget("w1", "alpha", 1)).unwrap();
        store.create(&widget("w2", "beta", 2)).unwrap();
        store.create(&widget("w3", "alpha", 3)).unwrap();

        let alphas: Vec<Widget> =
            store.list(&[Filter::eq("name", IndexValue::String("alpha".to_string()))]).unwrap();
        assert_eq!(alphas.len(), 2);

        let high_count: Vec<Widget> = store
            .list(&[Filter { field: "count".to_string(), op: crate::filter::FilterOp::Gt, value: IndexValue::Int(1) }])
            .unwrap();
        assert_eq!(high_count.len(), 2);
    }

    #[test]
    fn delete_removes_row_and_index() {
        let dir = tempdir().unwrap();
        let mut store = Store::open(dir.path().join("test.db")).unwrap();
        store.create(&widget("w1", "alpha", 1)).unwrap();
        assert!(store.delete::<Widget>("w1").unwrap());
        assert!(store.get::<Widget>("w1").unwrap().is_none());
        assert!(!store.delete::<Widget>("w1").unwrap());
    }

    #[test]
    fn delete_by_index_cascades() {
        let dir = tempdir().unwrap();
        let mut store = Store::open(dir.path().join("test.db")).unwrap();
        store.create(&widget("w1", "alpha", 1)).unwrap();
        store.create(&widget("w2", "alpha", 2)).unwrap();
        store.create(&widget("w3", "beta", 3)).unwrap();
        let removed = store.delete_by_index::<Widget>("name", IndexValue::String("alpha".to_string())).unwrap();
        assert_eq!(removed, 2);
        assert_eq!(store.list::<Widget>(&[]).unwrap().len(), 1);
    }

    #[test]
    fn rebuild_indexes_recovers_from_scratch() {
        let dir = tempdir().unwrap();
        let mut store = Store::open(dir.path().join("test.db")).unwrap();
        store.create(&widget("w1", "alpha", 1)).unwrap();
        store.conn.execute("DELETE FROM record_index", []).unwrap();
        assert!(store.list::<Widget>(&[Filter::eq("name", IndexValue::String("alpha".to_string()))]).unwrap().is_empty());
        let n = store.rebuild_indexes::<Widget>().unwrap();
        assert_eq!(n, 1);
        assert_eq!(store.list::<Widget>(&[Filter::eq("name", IndexValue::String("alpha".to_string()))]).unwrap().len(), 1);
    }

    #[test]
    fn sync_writes_jsonl_mirror() {
        let dir = tempdir().unwrap();
        let mut store = Store::open(dir.path().join("test.db")).unwrap();
        store.create(&widget("w1", "alpha", 1)).unwrap();
        store.sync().unwrap();
        let jsonl = dir.path().join("jsonl").join("widgets.jsonl");
        assert!(jsonl.exists());
        let content = fs::read_to_string(jsonl).unwrap();
        assert_eq!(content.lines().count(), 1);

        // A second sync with nothing dirty should not duplicate lines.
        store.sync().unwrap();
        let content = fs::read_to_string(dir.path().join("jsonl").join("widgets.jsonl")).unwrap();
        assert_eq!(content.lines().count(), 1);
    }

    #[test]
    fn get_missing_returns_none() {
        let dir = tempdir().unwrap();
        let store = Store::open(dir.path().join("test.db")).unwrap();
        assert!(store.get::<Widget>("nope").unwrap().is_none());
    }
}
