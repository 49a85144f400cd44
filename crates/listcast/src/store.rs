//! In-memory resource store
//!
//! Holds one collection per configured stream and one change notifier per
//! collection. Every mutation fires the notifier of the stream it touched;
//! sessions then re-list and decide for themselves whether anything changed.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info};

use listcast_core::{ChangeEvents, Collection, ListSource, SourceError, Watcher};

use crate::cli::StreamSpec;

/// Keys managed by the store and stripped from client-supplied fields
const RESERVED_KEYS: &[&str] = &["id", "type", "created"];

/// Errors returned by store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("unknown stream: {0}")]
    UnknownStream(String),

    #[error("{stream}/{id} not found")]
    NotFound { stream: String, id: String },

    #[error("invalid resource: {0}")]
    InvalidResource(String),

    #[error("failed to read seed file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse seed file: {0}")]
    Json(#[from] serde_json::Error),
}

/// One stored resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub id: String,
    #[serde(rename = "type", default)]
    pub resource_type: String,
    #[serde(default)]
    pub created: String,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

#[derive(Debug)]
struct StreamState {
    resource_type: String,
    items: RwLock<BTreeMap<String, Resource>>,
    watcher: Watcher,
}

/// All configured streams and their contents
#[derive(Debug)]
pub struct ResourceStore {
    streams: BTreeMap<String, StreamState>,
}

impl ResourceStore {
    /// Create an empty store serving `specs`
    pub fn new(specs: &[StreamSpec]) -> Self {
        let streams = specs
            .iter()
            .map(|spec| {
                let state = StreamState {
                    resource_type: spec.resource_type.clone(),
                    items: RwLock::new(BTreeMap::new()),
                    watcher: Watcher::new(),
                };
                (spec.name.clone(), state)
            })
            .collect();
        Self { streams }
    }

    fn stream(&self, name: &str) -> Result<&StreamState, StoreError> {
        self.streams
            .get(name)
            .ok_or_else(|| StoreError::UnknownStream(name.to_string()))
    }

    /// Names of all configured streams
    pub fn stream_names(&self) -> impl Iterator<Item = &str> {
        self.streams.keys().map(String::as_str)
    }

    /// Current contents of a stream, ordered by id
    pub fn list(&self, name: &str) -> Result<Collection<Resource>, StoreError> {
        let stream = self.stream(name)?;
        let items = stream.items.read().unwrap_or_else(PoisonError::into_inner);
        Ok(Collection::new(
            stream.resource_type.clone(),
            items.values().cloned().collect(),
        ))
    }

    /// Insert or replace a resource and notify watchers
    ///
    /// The creation timestamp survives replacement.
    pub fn upsert(
        &self,
        name: &str,
        id: &str,
        mut fields: Map<String, Value>,
    ) -> Result<Resource, StoreError> {
        if id.is_empty() {
            return Err(StoreError::InvalidResource("empty id".to_string()));
        }
        let stream = self.stream(name)?;
        for key in RESERVED_KEYS {
            fields.remove(*key);
        }

        let resource = {
            let mut items = stream.items.write().unwrap_or_else(PoisonError::into_inner);
            let created = items
                .get(id)
                .map(|existing| existing.created.clone())
                .unwrap_or_else(|| chrono::Utc::now().to_rfc3339());
            let resource = Resource {
                id: id.to_string(),
                resource_type: stream.resource_type.clone(),
                created,
                fields,
            };
            items.insert(id.to_string(), resource.clone());
            resource
        };

        debug!(stream = name, id, "resource stored");
        stream.watcher.notify();
        Ok(resource)
    }

    /// Remove a resource and notify watchers
    pub fn remove(&self, name: &str, id: &str) -> Result<Resource, StoreError> {
        let stream = self.stream(name)?;
        let removed = stream
            .items
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)
            .ok_or_else(|| StoreError::NotFound {
                stream: name.to_string(),
                id: id.to_string(),
            })?;

        debug!(stream = name, id, "resource removed");
        stream.watcher.notify();
        Ok(removed)
    }

    /// Subscribe to change events of a stream
    pub fn subscribe(&self, name: &str) -> Result<ChangeEvents, StoreError> {
        Ok(self.stream(name)?.watcher.subscribe())
    }

    /// Load initial resources from a JSON file
    ///
    /// The file maps stream names to arrays of objects, each carrying a
    /// string `id`. Returns the number of resources loaded.
    pub fn seed_from_file(&self, path: &Path) -> Result<usize, StoreError> {
        let raw = std::fs::read_to_string(path)?;
        let seed: BTreeMap<String, Vec<Map<String, Value>>> = serde_json::from_str(&raw)?;

        let mut loaded = 0;
        for (name, resources) in seed {
            self.stream(&name)?;
            for fields in resources {
                let id = fields
                    .get("id")
                    .and_then(Value::as_str)
                    .ok_or_else(|| {
                        StoreError::InvalidResource(format!("{name}: resource without string id"))
                    })?
                    .to_string();
                self.upsert(&name, &id, fields)?;
                loaded += 1;
            }
        }

        info!(path = ?path, resources = loaded, "seeded resource store");
        Ok(loaded)
    }

    /// Listing source for one stream, shareable across sessions
    pub fn lister(self: &Arc<Self>, name: &str) -> Result<StoreLister, StoreError> {
        self.stream(name)?;
        Ok(StoreLister {
            store: Arc::clone(self),
            stream: name.to_string(),
        })
    }
}

/// [`ListSource`] over one stream of a [`ResourceStore`]
#[derive(Debug, Clone)]
pub struct StoreLister {
    store: Arc<ResourceStore>,
    stream: String,
}

#[async_trait]
impl ListSource for StoreLister {
    type Snapshot = Collection<Resource>;

    async fn list(&self) -> Result<Collection<Resource>, SourceError> {
        self.store
            .list(&self.stream)
            .map_err(|e| SourceError::List(e.to_string()))
    }

    fn encode(&self, snapshot: &Collection<Resource>) -> Result<String, SourceError> {
        Ok(serde_json::to_string(snapshot)?)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::time::Duration;

    use serde_json::json;

    use super::*;

    fn test_store() -> Arc<ResourceStore> {
        Arc::new(ResourceStore::new(&[
            StreamSpec::new("volumes", "volume"),
            StreamSpec::new("nodes", "node"),
        ]))
    }

    fn fields(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_list_empty_stream() {
        let store = test_store();
        let listing = store.list("volumes").unwrap();
        assert_eq!(listing.resource_type, "volume");
        assert!(listing.is_empty());
        assert!(!listing.is_sentinel());
    }

    #[test]
    fn test_unknown_stream() {
        let store = test_store();
        assert!(matches!(
            store.list("pods"),
            Err(StoreError::UnknownStream(name)) if name == "pods"
        ));
        assert!(store.subscribe("pods").is_err());
        assert!(store.lister("pods").is_err());
    }

    #[test]
    fn test_upsert_and_list_ordered_by_id() {
        let store = test_store();
        store
            .upsert("volumes", "vol-b", fields(json!({"size": 2})))
            .unwrap();
        store
            .upsert("volumes", "vol-a", fields(json!({"size": 1})))
            .unwrap();

        let listing = store.list("volumes").unwrap();
        let ids: Vec<&str> = listing.data.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["vol-a", "vol-b"]);
        assert_eq!(listing.data[0].resource_type, "volume");
        assert_eq!(listing.data[0].fields["size"], 1);
    }

    #[test]
    fn test_upsert_strips_reserved_keys_and_keeps_created() {
        let store = test_store();
        let first = store
            .upsert("nodes", "n1", fields(json!({"id": "other", "type": "x", "ready": true})))
            .unwrap();
        assert_eq!(first.id, "n1");
        assert_eq!(first.resource_type, "node");
        assert!(!first.fields.contains_key("id"));
        assert!(!first.fields.contains_key("type"));

        let second = store
            .upsert("nodes", "n1", fields(json!({"ready": false, "created": "yesterday"})))
            .unwrap();
        assert_eq!(second.created, first.created);
        assert_eq!(second.fields["ready"], false);
    }

    #[test]
    fn test_upsert_rejects_empty_id() {
        let store = test_store();
        assert!(matches!(
            store.upsert("nodes", "", Map::new()),
            Err(StoreError::InvalidResource(_))
        ));
    }

    #[test]
    fn test_resource_wire_shape() {
        let store = test_store();
        let resource = store
            .upsert("volumes", "vol-1", fields(json!({"size": 10})))
            .unwrap();
        let value = serde_json::to_value(&resource).unwrap();
        assert_eq!(value["id"], "vol-1");
        assert_eq!(value["type"], "volume");
        assert_eq!(value["size"], 10);
        assert!(value["created"].is_string());
    }

    #[test]
    fn test_remove() {
        let store = test_store();
        store.upsert("volumes", "vol-1", Map::new()).unwrap();
        let removed = store.remove("volumes", "vol-1").unwrap();
        assert_eq!(removed.id, "vol-1");
        assert!(matches!(
            store.remove("volumes", "vol-1"),
            Err(StoreError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_mutations_notify_only_their_stream() {
        let store = test_store();
        let mut volumes = store.subscribe("volumes").unwrap();
        let mut nodes = store.subscribe("nodes").unwrap();

        store.upsert("volumes", "vol-1", Map::new()).unwrap();

        tokio::time::timeout(Duration::from_secs(1), volumes.next())
            .await
            .expect("volumes notified");
        let quiet = tokio::time::timeout(Duration::from_millis(50), nodes.next()).await;
        assert!(quiet.is_err());
    }

    #[tokio::test]
    async fn test_lister_lists_and_encodes() {
        let store = test_store();
        store
            .upsert("volumes", "vol-1", fields(json!({"size": 3})))
            .unwrap();
        let lister = store.lister("volumes").unwrap();

        let snapshot = lister.list().await.unwrap();
        assert_eq!(snapshot.len(), 1);

        let payload = lister.encode(&snapshot).unwrap();
        let value: Value = serde_json::from_str(&payload).unwrap();
        assert_eq!(value["type"], "collection");
        assert_eq!(value["resourceType"], "volume");
        assert_eq!(value["data"][0]["id"], "vol-1");
    }

    #[test]
    fn test_seed_from_file() {
        let store = test_store();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"volumes": [{{"id": "vol-1", "size": 1}}, {{"id": "vol-2"}}], "nodes": [{{"id": "n1"}}]}}"#
        )
        .unwrap();

        assert_eq!(store.seed_from_file(file.path()).unwrap(), 3);
        assert_eq!(store.list("volumes").unwrap().len(), 2);
        assert_eq!(store.list("nodes").unwrap().len(), 1);
    }

    #[test]
    fn test_seed_rejects_unknown_stream_and_missing_id() {
        let store = test_store();

        let mut unknown = tempfile::NamedTempFile::new().unwrap();
        write!(unknown, r#"{{"pods": []}}"#).unwrap();
        assert!(matches!(
            store.seed_from_file(unknown.path()),
            Err(StoreError::UnknownStream(_))
        ));

        let mut missing = tempfile::NamedTempFile::new().unwrap();
        write!(missing, r#"{{"volumes": [{{"size": 1}}]}}"#).unwrap();
        assert!(matches!(
            store.seed_from_file(missing.path()),
            Err(StoreError::InvalidResource(_))
        ));
    }
}
