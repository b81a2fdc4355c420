//! Hierarchical variable store
//!
//! Keys are dot paths. A path resolves either to an entry stored under the
//! full key or, failing that, by descending into the structured value stored
//! under its longest existing prefix. Entries may be plain values or producers
//! that are re-run on every read.

use parking_lot::{Mutex, RwLock};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::interpreter::value::descend;

use super::error::StorageResult;

/// Zero-argument value producer for live variables.
pub type Producer = Arc<dyn Fn() -> Value + Send + Sync>;

/// A stored variable.
#[derive(Clone)]
pub enum Entry {
    /// Plain value returned as-is.
    Value(Value),
    /// Producer evaluated on every read.
    Producer(Producer),
}

impl fmt::Debug for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Entry::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Entry::Producer(_) => f.write_str("Producer(..)"),
        }
    }
}

/// Change notification passed to a [`VariableSink`].
#[derive(Debug, Clone, PartialEq)]
pub enum VariableChange {
    /// A path was assigned.
    Set(String),
    /// A path was removed.
    Deleted(String),
    /// Periodic or explicit flush of accumulated changes.
    Flush,
}

/// Durable storage collaborator notified of store changes.
pub trait VariableSink: Send + Sync {
    /// Persist the current plain-value snapshot.
    fn persist(&self, change: &VariableChange, snapshot: &BTreeMap<String, Value>)
    -> StorageResult<()>;
}

/// Concurrent variable store shared by every execution context.
pub struct VariableStore {
    entries: RwLock<HashMap<String, Entry>>,
    sink: Option<Arc<dyn VariableSink>>,
    persist_on_change: bool,
    dirty: AtomicBool,
    // Held from snapshot through write so persists land in order.
    persist_lock: Mutex<()>,
}

impl Default for VariableStore {
    fn default() -> Self {
        Self::new()
    }
}

impl VariableStore {
    /// Create an empty in-memory store.
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            sink: None,
            persist_on_change: false,
            dirty: AtomicBool::new(false),
            persist_lock: Mutex::new(()),
        }
    }

    /// Create a store backed by a sink. With `persist_on_change` every mutation
    /// is flushed immediately; otherwise call [`VariableStore::flush`].
    pub fn with_sink(sink: Arc<dyn VariableSink>, persist_on_change: bool) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            sink: Some(sink),
            persist_on_change,
            dirty: AtomicBool::new(false),
            persist_lock: Mutex::new(()),
        }
    }

    /// Seed plain values without notifying the sink (used when restoring).
    pub fn load(&self, values: BTreeMap<String, Value>) {
        let mut entries = self.entries.write();
        for (key, value) in values {
            entries.insert(key, Entry::Value(value));
        }
    }

    /// Read a path. Producers are evaluated outside the lock.
    pub fn get(&self, path: &str) -> Option<Value> {
        let (entry, rest) = {
            let entries = self.entries.read();
            if let Some(entry) = entries.get(path) {
                (entry.clone(), Vec::new())
            } else {
                let segments: Vec<&str> = path.split('.').collect();
                let mut found = None;
                for split in (1..segments.len()).rev() {
                    let prefix = segments[..split].join(".");
                    if let Some(entry) = entries.get(&prefix) {
                        let rest = segments[split..].iter().map(|s| s.to_string()).collect();
                        found = Some((entry.clone(), rest));
                        break;
                    }
                }
                found?
            }
        };

        let value = match entry {
            Entry::Value(value) => value,
            Entry::Producer(producer) => producer(),
        };
        if rest.is_empty() {
            return Some(value);
        }
        let segments: Vec<&str> = rest.iter().map(String::as_str).collect();
        descend(&value, &segments).cloned()
    }

    /// Whether a path resolves.
    pub fn contains(&self, path: &str) -> bool {
        self.get(path).is_some()
    }

    /// Assign a plain value. When a prefix of the path holds an object, the
    /// value is written inside it.
    pub fn set(&self, path: &str, value: Value) {
        {
            let mut entries = self.entries.write();
            if entries.contains_key(path) {
                entries.insert(path.to_string(), Entry::Value(value));
            } else if let Err(value) = set_nested(&mut entries, path, value) {
                entries.insert(path.to_string(), Entry::Value(value));
            }
        }
        self.changed(VariableChange::Set(path.to_string()));
    }

    /// Register a producer under a path.
    pub fn set_producer<F>(&self, path: &str, producer: F)
    where
        F: Fn() -> Value + Send + Sync + 'static,
    {
        self.entries
            .write()
            .insert(path.to_string(), Entry::Producer(Arc::new(producer)));
    }

    /// Remove a path. Returns whether anything was removed.
    pub fn delete(&self, path: &str) -> bool {
        let removed = {
            let mut entries = self.entries.write();
            if entries.remove(path).is_some() {
                true
            } else {
                delete_nested(&mut entries, path)
            }
        };
        if removed {
            self.changed(VariableChange::Deleted(path.to_string()));
        }
        removed
    }

    /// Top-level keys starting with `prefix`, sorted.
    pub fn keys(&self, prefix: &str) -> Vec<String> {
        let mut keys: Vec<String> = self
            .entries
            .read()
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect();
        keys.sort();
        keys
    }

    /// Number of top-level entries.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether the store holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Plain values only; producers are never persisted.
    pub fn snapshot(&self) -> BTreeMap<String, Value> {
        self.entries
            .read()
            .iter()
            .filter_map(|(key, entry)| match entry {
                Entry::Value(value) => Some((key.clone(), value.clone())),
                Entry::Producer(_) => None,
            })
            .collect()
    }

    /// Whether there are unflushed changes.
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    /// Write the snapshot to the sink if there are unflushed changes.
    pub fn flush(&self) -> StorageResult<bool> {
        let Some(sink) = &self.sink else {
            return Ok(false);
        };
        let _persisting = self.persist_lock.lock();
        if !self.dirty.swap(false, Ordering::AcqRel) {
            return Ok(false);
        }
        let snapshot = self.snapshot();
        if let Err(err) = sink.persist(&VariableChange::Flush, &snapshot) {
            self.dirty.store(true, Ordering::Release);
            return Err(err);
        }
        Ok(true)
    }

    fn changed(&self, change: VariableChange) {
        let Some(sink) = &self.sink else {
            return;
        };
        if !self.persist_on_change {
            self.dirty.store(true, Ordering::Release);
            return;
        }
        let _persisting = self.persist_lock.lock();
        let snapshot = self.snapshot();
        match sink.persist(&change, &snapshot) {
            // The snapshot covers every change that completed before it.
            Ok(()) => self.dirty.store(false, Ordering::Release),
            Err(err) => {
                self.dirty.store(true, Ordering::Release);
                tracing::warn!(?change, error = %err, "failed to persist variables");
            }
        }
    }
}

/// Write into the object stored under the shortest existing prefix, handing
/// the value back when no such object exists.
fn set_nested(
    entries: &mut HashMap<String, Entry>,
    path: &str,
    value: Value,
) -> Result<(), Value> {
    let segments: Vec<&str> = path.split('.').collect();
    for split in 1..segments.len() {
        let prefix = segments[..split].join(".");
        if let Some(Entry::Value(Value::Object(root))) = entries.get_mut(&prefix) {
            insert_path(root, &segments[split..], value);
            return Ok(());
        }
    }
    Err(value)
}

fn insert_path(map: &mut Map<String, Value>, segments: &[&str], value: Value) {
    let (last, parents) = match segments.split_last() {
        Some(parts) => parts,
        None => return,
    };
    let mut current = map;
    for segment in parents {
        let slot = current
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !slot.is_object() {
            *slot = Value::Object(Map::new());
        }
        current = match slot {
            Value::Object(inner) => inner,
            _ => return,
        };
    }
    current.insert(last.to_string(), value);
}

fn delete_nested(entries: &mut HashMap<String, Entry>, path: &str) -> bool {
    let segments: Vec<&str> = path.split('.').collect();
    for split in (1..segments.len()).rev() {
        let prefix = segments[..split].join(".");
        if let Some(Entry::Value(root)) = entries.get_mut(&prefix) {
            let (last, parents) = match segments[split..].split_last() {
                Some(parts) => parts,
                None => return false,
            };
            let mut current = root;
            for segment in parents {
                current = match current {
                    Value::Object(map) => match map.get_mut(*segment) {
                        Some(next) => next,
                        None => return false,
                    },
                    _ => return false,
                };
            }
            return match current {
                Value::Object(map) => map.remove(*last).is_some(),
                _ => false,
            };
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::time::{Duration, Instant};

    #[test]
    fn set_then_get_round_trips() {
        let store = VariableStore::new();
        store.set("greeting", json!("hello"));
        assert_eq!(store.get("greeting"), Some(json!("hello")));
        assert!(store.get("missing").is_none());
    }

    #[test]
    fn dotted_paths_descend_and_write_into_objects() {
        let store = VariableStore::new();
        store.set("user", json!({"name": "ada", "stats": {"level": 3}}));
        assert_eq!(store.get("user.stats.level"), Some(json!(3)));

        store.set("user.stats.level", json!(4));
        assert_eq!(store.get("user.stats.level"), Some(json!(4)));
        assert_eq!(store.keys(""), vec!["user".to_string()]);

        assert!(store.delete("user.name"));
        assert!(store.get("user.name").is_none());
        assert_eq!(store.get("user.stats"), Some(json!({"level": 4})));
    }

    #[test]
    fn flat_dotted_keys_are_supported() {
        let store = VariableStore::new();
        store.set("guild.prefix", json!("!"));
        assert_eq!(store.get("guild.prefix"), Some(json!("!")));
        assert!(store.delete("guild.prefix"));
        assert!(store.is_empty());
    }

    #[test]
    fn producers_are_evaluated_on_every_read() {
        let store = VariableStore::new();
        let start = Instant::now();
        store.set_producer("elapsed", move || json!(start.elapsed().as_millis() as u64));

        let first = store.get("elapsed").and_then(|v| v.as_u64()).unwrap();
        std::thread::sleep(Duration::from_millis(50));
        let second = store.get("elapsed").and_then(|v| v.as_u64()).unwrap();
        assert!(second >= first);
        assert!(second >= 50);
        assert!(store.snapshot().is_empty(), "producers are not persisted");
    }

    #[derive(Default)]
    struct RecordingSink {
        changes: Mutex<Vec<VariableChange>>,
    }

    impl VariableSink for RecordingSink {
        fn persist(
            &self,
            change: &VariableChange,
            _snapshot: &BTreeMap<String, Value>,
        ) -> StorageResult<()> {
            self.changes.lock().push(change.clone());
            Ok(())
        }
    }

    #[test]
    fn sink_is_notified_on_change() {
        let sink = Arc::new(RecordingSink::default());
        let store = VariableStore::with_sink(sink.clone(), true);
        store.set("a", json!(1));
        store.delete("a");
        assert_eq!(
            *sink.changes.lock(),
            vec![
                VariableChange::Set("a".into()),
                VariableChange::Deleted("a".into())
            ]
        );
    }

    #[test]
    fn deferred_sink_flushes_only_when_dirty() {
        let sink = Arc::new(RecordingSink::default());
        let store = VariableStore::with_sink(sink.clone(), false);
        assert!(!store.flush().unwrap());
        store.set("a", json!(1));
        assert!(store.is_dirty());
        assert!(store.flush().unwrap());
        assert!(!store.is_dirty());
        assert_eq!(sink.changes.lock().len(), 1);
    }
}
