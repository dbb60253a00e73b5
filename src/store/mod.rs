use std::fmt;

use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::sync::watch;

pub mod memory;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store subscription closed")]
    Closed,
    #[error("store backend error: {0}")]
    Backend(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Slash-joined logical path into the synchronized document tree.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Path(String);

impl Path {
    pub fn new(path: impl Into<String>) -> Self {
        Path(path.into())
    }

    pub fn child(&self, segment: &str) -> Path {
        Path(format!("{}/{}", self.0, segment))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('/').filter(|s| !s.is_empty())
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Path({})", self.0)
    }
}

/// One leg of a multi-path update.
#[derive(Debug, Clone)]
pub enum WriteOp {
    Set(Value),
    /// Server-side atomic counter bump.
    Increment(i64),
}

/// Push subscription on a path. Delivers the full current value
/// immediately and again on every change; dropping it unsubscribes.
pub struct Subscription {
    rx: watch::Receiver<Option<Value>>,
}

impl Subscription {
    pub(crate) fn new(mut rx: watch::Receiver<Option<Value>>) -> Self {
        // First poll must yield the value already present at the path.
        rx.mark_changed();
        Subscription { rx }
    }

    /// Waits for the next delivery.
    pub async fn changed(&mut self) -> StoreResult<()> {
        self.rx.changed().await.map_err(|_| StoreError::Closed)
    }

    /// Most recently delivered value at the path.
    pub fn current(&self) -> Option<Value> {
        self.rx.borrow().clone()
    }

    /// Waits for the next delivery and returns it.
    pub async fn next(&mut self) -> StoreResult<Option<Value>> {
        self.changed().await?;
        Ok(self.current())
    }
}

/// Narrow interface to the external realtime synchronized store.
///
/// Connectivity is observed by subscribing to the reserved
/// `.info/connected` path (see [`paths::connected`]).
#[async_trait]
pub trait RealtimeStore: Send + Sync {
    async fn get(&self, path: &Path) -> StoreResult<Option<Value>>;

    async fn set(&self, path: &Path, value: Value) -> StoreResult<()>;

    async fn remove(&self, path: &Path) -> StoreResult<()>;

    /// Applies all legs of the update as one logical write.
    async fn multi_update(&self, ops: Vec<(Path, WriteOp)>) -> StoreResult<()>;

    /// New server-ordered child key under `path`; later calls sort after
    /// earlier ones.
    async fn push_key(&self, path: &Path) -> StoreResult<String>;

    /// Children of `path` whose indexed field `child` equals `value`.
    async fn query_eq(
        &self,
        path: &Path,
        child: &str,
        value: &Value,
    ) -> StoreResult<Map<String, Value>>;

    async fn subscribe(&self, path: &Path) -> StoreResult<Subscription>;

    /// Arms a write that the store fires by itself when this client's
    /// connection is lost.
    async fn on_disconnect_set(&self, path: &Path, value: Value) -> StoreResult<()>;

    /// Field-level merge into the document at `path`.
    async fn update(&self, path: &Path, fields: Map<String, Value>) -> StoreResult<()> {
        let ops = fields
            .into_iter()
            .map(|(key, value)| (path.child(&key), WriteOp::Set(value)))
            .collect();
        self.multi_update(ops).await
    }

    async fn increment(&self, path: &Path, delta: i64) -> StoreResult<()> {
        self.multi_update(vec![(path.clone(), WriteOp::Increment(delta))])
            .await
    }
}

/// Typed constructors for every path this core touches.
pub mod paths {
    use super::Path;
    use crate::models::Room;

    pub fn connected() -> Path {
        Path::new(".info/connected")
    }

    pub fn users() -> Path {
        Path::new("users")
    }

    pub fn user(uid: &str) -> Path {
        Path::new(format!("users/{uid}"))
    }

    pub fn user_status(uid: &str) -> Path {
        user(uid).child("status")
    }

    pub fn user_banned(uid: &str) -> Path {
        user(uid).child("isBanned")
    }

    pub fn latest_nudge(uid: &str) -> Path {
        user(uid).child("latestNudge")
    }

    pub fn friends(uid: &str) -> Path {
        user(uid).child("friends")
    }

    pub fn friend(uid: &str, friend_uid: &str) -> Path {
        friends(uid).child(friend_uid)
    }

    pub fn friend_unread(uid: &str, friend_uid: &str) -> Path {
        friend(uid, friend_uid).child("unreadCount")
    }

    pub fn friend_requests(target_uid: &str) -> Path {
        Path::new(format!("friendRequests/{target_uid}"))
    }

    pub fn friend_request(target_uid: &str, from_uid: &str) -> Path {
        friend_requests(target_uid).child(from_uid)
    }

    pub fn declined(target_uid: &str, from_uid: &str) -> Path {
        Path::new(format!("declinedHistory/{target_uid}/{from_uid}"))
    }

    pub fn room_messages(room: &Room) -> Path {
        match room {
            Room::Global(name) => Path::new(format!("messages/{name}")),
            Room::Private { .. } => Path::new(format!("privateMessages/{}", room.id())),
        }
    }

    pub fn room_message(room: &Room, key: &str) -> Path {
        room_messages(room).child(key)
    }
}
