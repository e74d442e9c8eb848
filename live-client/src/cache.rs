//! Normalized in-memory entity cache
//!
//! Response payloads are broken into per-entity records keyed by
//! `(typename, id)`. Writes merge field-by-field (deep merge for nested
//! objects), so different operations touching the same entity share one
//! record and never conflict. The cache is owned by whoever creates it and
//! lives until [`reset`](InMemoryCache::reset); there is no eviction.

use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use serde_json::{Map, Value};
use tokio::sync::broadcast;

/// Field added to records pointing at another normalized entity.
pub const REF_FIELD: &str = "__ref";

const TYPENAME_FIELD: &str = "__typename";
const ID_FIELD: &str = "id";

/// Identity of one normalized entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntityKey {
    pub typename: String,
    pub id: String,
}

impl EntityKey {
    pub fn new(typename: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            typename: typename.into(),
            id: id.into(),
        }
    }

    /// Extracts the identity of a JSON object, if it carries one.
    ///
    /// An object without `__typename` or without `id` is ordinary unkeyed
    /// data and stays embedded in its parent. Returns `Err(())` only for a
    /// malformed identity: a non-string `__typename` or a present but
    /// non-scalar `id`.
    fn of(object: &Map<String, Value>) -> Result<Option<Self>, ()> {
        let Some(typename) = object.get(TYPENAME_FIELD) else {
            return Ok(None);
        };
        let Some(typename) = typename.as_str() else {
            return Err(());
        };
        let id = match object.get(ID_FIELD) {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            None => return Ok(None),
            Some(_) => return Err(()),
        };
        Ok(Some(Self::new(typename, id)))
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.typename, self.id)
    }
}

/// Process-wide normalized store of previously received response data.
#[derive(Debug)]
pub struct InMemoryCache {
    records: Arc<DashMap<EntityKey, Map<String, Value>>>,
    changes: broadcast::Sender<EntityKey>,
}

impl Default for InMemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryCache {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(1024);
        Self {
            records: Arc::new(DashMap::new()),
            changes,
        }
    }

    /// Reads whatever subset of the entity is cached.
    pub fn read(&self, key: &EntityKey) -> Option<Value> {
        self.records
            .get(key)
            .map(|record| Value::Object(record.clone()))
    }

    /// Merges `data` into the record under `key`.
    ///
    /// Field-level overwrite with deep merge for nested objects; scalars
    /// and arrays overwrite. Non-object `data` is rejected loudly.
    pub fn write(&self, key: &EntityKey, data: &Value) {
        let Some(fields) = data.as_object() else {
            tracing::warn!(%key, "skipping cache write: entity data is not an object");
            return;
        };
        self.write_fields(key, fields);
    }

    /// Normalizes an arbitrary response payload into the cache.
    ///
    /// Every object carrying `__typename` plus a scalar `id` becomes (or
    /// updates) a record; nested entities are normalized recursively and
    /// replaced in their parent by a `{"__ref": "Type:id"}` marker.
    /// Returns the keys of every entity written.
    pub fn merge(&self, payload: &Value) -> Vec<EntityKey> {
        let mut written = Vec::new();
        self.normalize(payload, &mut written);
        written
    }

    /// Notifies when any write touches `key`.
    pub fn watch(&self, key: EntityKey) -> EntityWatch {
        EntityWatch {
            key,
            records: self.records.clone(),
            changes: self.changes.subscribe(),
        }
    }

    /// Clears every record. Watchers are not notified; they only fire on
    /// writes.
    pub fn reset(&self) {
        self.records.clear();
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn write_fields(&self, key: &EntityKey, fields: &Map<String, Value>) {
        let mut record = self.records.entry(key.clone()).or_default();
        for (name, value) in fields {
            match (record.get_mut(name), value) {
                (Some(Value::Object(existing)), Value::Object(incoming)) => {
                    deep_merge(existing, incoming);
                }
                _ => {
                    record.insert(name.clone(), value.clone());
                }
            }
        }
        drop(record);
        let _ = self.changes.send(key.clone());
    }

    /// Walks the payload, writing every identifiable entity it contains.
    /// Returns the normalized replacement value (entities become refs).
    fn normalize(&self, value: &Value, written: &mut Vec<EntityKey>) -> Value {
        match value {
            Value::Object(object) => match EntityKey::of(object) {
                Ok(Some(key)) => {
                    let mut fields = Map::with_capacity(object.len());
                    for (name, child) in object {
                        fields.insert(name.clone(), self.normalize(child, written));
                    }
                    self.write_fields(&key, &fields);
                    written.push(key.clone());
                    let mut reference = Map::with_capacity(1);
                    reference.insert(REF_FIELD.to_string(), Value::String(key.to_string()));
                    Value::Object(reference)
                }
                Ok(None) => {
                    let mut fields = Map::with_capacity(object.len());
                    for (name, child) in object {
                        fields.insert(name.clone(), self.normalize(child, written));
                    }
                    Value::Object(fields)
                }
                Err(()) => {
                    // Malformed identity: fail loudly, skip this entity,
                    // but still visit its children for nested entities.
                    tracing::warn!(
                        typename = ?object.get(TYPENAME_FIELD),
                        id = ?object.get(ID_FIELD),
                        "skipping cache write: malformed entity identity"
                    );
                    for child in object.values() {
                        self.normalize(child, written);
                    }
                    value.clone()
                }
            },
            Value::Array(items) => Value::Array(
                items
                    .iter()
                    .map(|item| self.normalize(item, written))
                    .collect(),
            ),
            other => other.clone(),
        }
    }
}

/// Deep merge: object fields recurse, everything else overwrites.
fn deep_merge(existing: &mut Map<String, Value>, incoming: &Map<String, Value>) {
    for (name, value) in incoming {
        match (existing.get_mut(name), value) {
            (Some(Value::Object(old)), Value::Object(new)) => deep_merge(old, new),
            _ => {
                existing.insert(name.clone(), value.clone());
            }
        }
    }
}

/// Change notifications for one watched entity.
#[derive(Debug)]
pub struct EntityWatch {
    key: EntityKey,
    records: Arc<DashMap<EntityKey, Map<String, Value>>>,
    changes: broadcast::Receiver<EntityKey>,
}

impl EntityWatch {
    /// Waits for the next write touching the watched key and returns the
    /// fresh record. Returns `None` once the cache is gone.
    pub async fn changed(&mut self) -> Option<Value> {
        loop {
            match self.changes.recv().await {
                Ok(key) if key == self.key => {
                    return self
                        .records
                        .get(&self.key)
                        .map(|record| Value::Object(record.clone()));
                }
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "entity watch lagged behind writes");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    pub fn key(&self) -> &EntityKey {
        &self.key
    }
}
