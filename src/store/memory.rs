use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tokio::sync::{watch, Mutex};

use super::{paths, Path, RealtimeStore, StoreResult, Subscription, WriteOp};

/// In-memory reference store backing tests and local runs.
///
/// Holds the whole document tree as one JSON value, keeps a watch channel
/// per subscribed path, and simulates the connection lifecycle:
/// [`MemoryStore::disconnect`] fires armed on-disconnect writes and flips
/// `.info/connected`, [`MemoryStore::reconnect`] flips it back.
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

struct Inner {
    root: Value,
    watchers: HashMap<Path, watch::Sender<Option<Value>>>,
    armed: Vec<(Path, Value)>,
    push_seq: u64,
}

impl MemoryStore {
    pub fn new() -> Self {
        let mut root = json!({});
        write_at(&mut root, &paths::connected(), json!(true));
        MemoryStore {
            inner: Mutex::new(Inner {
                root,
                watchers: HashMap::new(),
                armed: Vec::new(),
                push_seq: 0,
            }),
        }
    }

    /// Simulates losing the connection: applies every armed
    /// on-disconnect write, then announces the disconnect.
    pub async fn disconnect(&self) {
        let mut inner = self.inner.lock().await;
        write_at(&mut inner.root, &paths::connected(), json!(false));
        let armed = std::mem::take(&mut inner.armed);
        for (path, value) in armed {
            write_at(&mut inner.root, &path, value);
        }
        inner.broadcast();
    }

    pub async fn reconnect(&self) {
        let mut inner = self.inner.lock().await;
        write_at(&mut inner.root, &paths::connected(), json!(true));
        inner.broadcast();
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Inner {
    /// Re-delivers every watched path whose value changed; prunes
    /// watchers nobody listens to anymore.
    fn broadcast(&mut self) {
        let root = &self.root;
        self.watchers.retain(|path, tx| {
            if tx.receiver_count() == 0 {
                return false;
            }
            let value = value_at(root, path).cloned();
            tx.send_if_modified(|current| {
                if *current == value {
                    false
                } else {
                    *current = value;
                    true
                }
            });
            true
        });
    }
}

#[async_trait]
impl RealtimeStore for MemoryStore {
    async fn get(&self, path: &Path) -> StoreResult<Option<Value>> {
        let inner = self.inner.lock().await;
        Ok(value_at(&inner.root, path).cloned())
    }

    async fn set(&self, path: &Path, value: Value) -> StoreResult<()> {
        self.multi_update(vec![(path.clone(), WriteOp::Set(value))])
            .await
    }

    async fn remove(&self, path: &Path) -> StoreResult<()> {
        self.set(path, Value::Null).await
    }

    async fn multi_update(&self, ops: Vec<(Path, WriteOp)>) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        for (path, op) in ops {
            let value = match op {
                WriteOp::Set(value) => value,
                WriteOp::Increment(delta) => {
                    let current = value_at(&inner.root, &path)
                        .and_then(Value::as_i64)
                        .unwrap_or(0);
                    json!(current + delta)
                }
            };
            write_at(&mut inner.root, &path, value);
        }
        inner.broadcast();
        Ok(())
    }

    async fn push_key(&self, _path: &Path) -> StoreResult<String> {
        let mut inner = self.inner.lock().await;
        inner.push_seq += 1;
        Ok(format!("m{:012}", inner.push_seq))
    }

    async fn query_eq(
        &self,
        path: &Path,
        child: &str,
        value: &Value,
    ) -> StoreResult<Map<String, Value>> {
        let inner = self.inner.lock().await;
        let mut hits = Map::new();
        if let Some(children) = value_at(&inner.root, path).and_then(Value::as_object) {
            for (key, entry) in children {
                if entry.get(child) == Some(value) {
                    hits.insert(key.clone(), entry.clone());
                }
            }
        }
        Ok(hits)
    }

    async fn subscribe(&self, path: &Path) -> StoreResult<Subscription> {
        let mut inner = self.inner.lock().await;
        let current = value_at(&inner.root, path).cloned();
        let rx = match inner.watchers.get(path) {
            Some(tx) => tx.subscribe(),
            None => {
                let (tx, rx) = watch::channel(current);
                inner.watchers.insert(path.clone(), tx);
                rx
            }
        };
        Ok(Subscription::new(rx))
    }

    async fn on_disconnect_set(&self, path: &Path, value: Value) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        // Re-arming a path replaces the previous armed write.
        inner.armed.retain(|(armed, _)| armed != path);
        inner.armed.push((path.clone(), value));
        Ok(())
    }
}

fn value_at<'a>(root: &'a Value, path: &Path) -> Option<&'a Value> {
    let mut current = root;
    for segment in path.segments() {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

/// Writes `value` at `path`, creating intermediate objects; `Null`
/// deletes the node.
fn write_at(root: &mut Value, path: &Path, value: Value) {
    let segments: Vec<&str> = path.segments().collect();
    let Some((last, parents)) = segments.split_last() else {
        *root = value;
        return;
    };
    if value.is_null() {
        let mut current = root;
        for segment in parents {
            match current.as_object_mut().and_then(|map| map.get_mut(*segment)) {
                Some(next) => current = next,
                None => return,
            }
        }
        if let Some(map) = current.as_object_mut() {
            map.remove(*last);
        }
        return;
    }
    let mut current = root;
    for segment in parents {
        let map = ensure_object(current);
        current = map.entry(segment.to_string()).or_insert_with(|| json!({}));
    }
    ensure_object(current).insert(last.to_string(), value);
}

fn ensure_object(value: &mut Value) -> &mut Map<String, Value> {
    if !value.is_object() {
        *value = Value::Object(Map::new());
    }
    match value {
        Value::Object(map) => map,
        _ => unreachable!("just initialized as an object"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_get_remove() {
        let store = MemoryStore::new();
        let path = Path::new("users/u1/status");
        store.set(&path, json!("online")).await.unwrap();
        assert_eq!(store.get(&path).await.unwrap(), Some(json!("online")));
        store.remove(&path).await.unwrap();
        assert_eq!(store.get(&path).await.unwrap(), None);
    }

    #[tokio::test]
    async fn update_merges_fields() {
        let store = MemoryStore::new();
        let path = Path::new("users/u1");
        store
            .set(&path, json!({"uid": "u1", "status": "online"}))
            .await
            .unwrap();
        let mut fields = Map::new();
        fields.insert("status".to_string(), json!("away"));
        store.update(&path, fields).await.unwrap();
        assert_eq!(
            store.get(&path).await.unwrap(),
            Some(json!({"uid": "u1", "status": "away"}))
        );
    }

    #[tokio::test]
    async fn increment_starts_from_zero() {
        let store = MemoryStore::new();
        let path = Path::new("users/u1/friends/u2/unreadCount");
        store.increment(&path, 1).await.unwrap();
        store.increment(&path, 1).await.unwrap();
        assert_eq!(store.get(&path).await.unwrap(), Some(json!(2)));
    }

    #[tokio::test]
    async fn push_keys_are_ordered() {
        let store = MemoryStore::new();
        let path = Path::new("messages/global-1");
        let a = store.push_key(&path).await.unwrap();
        let b = store.push_key(&path).await.unwrap();
        assert!(a < b);
    }

    #[tokio::test]
    async fn subscribe_delivers_current_then_changes() {
        let store = MemoryStore::new();
        let path = Path::new("users/u1/status");
        store.set(&path, json!("online")).await.unwrap();

        let mut sub = store.subscribe(&path).await.unwrap();
        assert_eq!(sub.next().await.unwrap(), Some(json!("online")));

        store.set(&path, json!("away")).await.unwrap();
        assert_eq!(sub.next().await.unwrap(), Some(json!("away")));
    }

    #[tokio::test]
    async fn query_eq_matches_string_and_number() {
        let store = MemoryStore::new();
        store
            .set(
                &Path::new("users"),
                json!({
                    "u1": {"uid": "u1", "username": "Alice"},
                    "u2": {"uid": "u2", "username": 444},
                }),
            )
            .await
            .unwrap();

        let hits = store
            .query_eq(&Path::new("users"), "username", &json!("Alice"))
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits.contains_key("u1"));

        let hits = store
            .query_eq(&Path::new("users"), "username", &json!(444))
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits.contains_key("u2"));
    }

    #[tokio::test]
    async fn disconnect_fires_armed_writes_once() {
        let store = MemoryStore::new();
        let status = Path::new("users/u1/status");
        store.set(&status, json!("online")).await.unwrap();
        store
            .on_disconnect_set(&status, json!("offline"))
            .await
            .unwrap();

        store.disconnect().await;
        assert_eq!(store.get(&status).await.unwrap(), Some(json!("offline")));

        // Writes are disarmed after firing.
        store.set(&status, json!("online")).await.unwrap();
        store.disconnect().await;
        assert_eq!(store.get(&status).await.unwrap(), Some(json!("online")));
    }
}
