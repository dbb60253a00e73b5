use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::{watch, Mutex, Notify, RwLock};
use tokio::task::JoinHandle;

use crate::{
    error::AppResult,
    models::{FriendEntry, Session, UserStatus},
    store::{paths, RealtimeStore},
};

/// Tracks own status and the live statuses of friends.
///
/// Own status lives in a watch channel; friend statuses are one store
/// subscription per friend, kept in lockstep with the friend list so no
/// watcher outlives an unfriending.
pub struct PresenceService {
    store: Arc<dyn RealtimeStore>,
    session: Session,
    contacts: Arc<RwLock<Vec<FriendEntry>>>,
    status_tx: watch::Sender<UserStatus>,
    statuses: RwLock<HashMap<String, UserStatus>>,
    watchers: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl PresenceService {
    pub fn new(
        store: Arc<dyn RealtimeStore>,
        session: Session,
        contacts: Arc<RwLock<Vec<FriendEntry>>>,
    ) -> Self {
        let (status_tx, _) = watch::channel(UserStatus::Offline);
        Self {
            store,
            session,
            contacts,
            status_tx,
            statuses: RwLock::new(HashMap::new()),
            watchers: Mutex::new(HashMap::new()),
        }
    }

    pub fn status(&self) -> UserStatus {
        *self.status_tx.borrow()
    }

    pub fn watch_own_status(&self) -> watch::Receiver<UserStatus> {
        self.status_tx.subscribe()
    }

    /// Connection handshake. The offline marker must be armed before
    /// announcing online: a crash between the two still leaves the
    /// disconnect write scheduled.
    pub async fn establish(&self) -> AppResult<()> {
        let status_path = paths::user_status(&self.session.uid);
        self.store
            .on_disconnect_set(&status_path, json!("offline"))
            .await?;
        self.store.set(&status_path, json!("online")).await?;
        self.status_tx.send_replace(UserStatus::Online);
        tracing::debug!(uid = %self.session.uid, "presence established");
        Ok(())
    }

    /// Manual or idle-driven status change. Updates the own record, then
    /// fans out to every friend's cached copy; a partial fan-out leaves
    /// stale copies behind and is tolerated.
    pub async fn set_status(&self, status: UserStatus) -> AppResult<()> {
        let mut fields = serde_json::Map::new();
        fields.insert("status".to_string(), serde_json::to_value(status)?);
        self.store
            .update(&paths::user(&self.session.uid), fields)
            .await?;

        let contacts = self.contacts.read().await.clone();
        for friend in &contacts {
            let mut fields = serde_json::Map::new();
            fields.insert("status".to_string(), serde_json::to_value(status)?);
            if let Err(err) = self
                .store
                .update(&paths::friend(&friend.uid, &self.session.uid), fields)
                .await
            {
                tracing::warn!(friend = %friend.uid, error = %err, "status fan-out skipped a friend");
            }
        }

        self.status_tx.send_replace(status);
        Ok(())
    }

    /// Plain offline write used on sign-out; no fan-out.
    pub async fn go_offline(&self) -> AppResult<()> {
        self.store
            .set(&paths::user_status(&self.session.uid), json!("offline"))
            .await?;
        self.status_tx.send_replace(UserStatus::Offline);
        Ok(())
    }

    /// Auto-away loop fed by the shell's activity channel. Only `online`
    /// decays to `away`; `busy` and `offline` were chosen by the user
    /// and are never overridden. The first activity after an away period
    /// restores `online`.
    pub async fn run_auto_away(self: Arc<Self>, activity: Arc<Notify>, idle_timeout: Duration) {
        loop {
            let idle = tokio::time::sleep(idle_timeout);
            tokio::pin!(idle);
            loop {
                tokio::select! {
                    _ = activity.notified() => break,
                    _ = &mut idle => {
                        if self.status() == UserStatus::Online {
                            if let Err(err) = self.set_status(UserStatus::Away).await {
                                tracing::warn!(error = %err, "auto-away write failed");
                            }
                        }
                        // Stay idle until something happens.
                        activity.notified().await;
                        break;
                    }
                }
            }
            if self.status() == UserStatus::Away {
                if let Err(err) = self.set_status(UserStatus::Online).await {
                    tracing::warn!(error = %err, "auto-away reset failed");
                }
            }
        }
    }

    /// Aligns the per-friend status watchers with the current friend
    /// list; stale watchers are aborted so nothing leaks after an
    /// unfriending.
    pub async fn sync_watchers(self: &Arc<Self>, friend_uids: HashSet<String>) {
        let mut watchers = self.watchers.lock().await;

        let stale: Vec<String> = watchers
            .keys()
            .filter(|uid| !friend_uids.contains(*uid))
            .cloned()
            .collect();
        for uid in stale {
            if let Some(handle) = watchers.remove(&uid) {
                handle.abort();
            }
            self.statuses.write().await.remove(&uid);
        }

        for uid in friend_uids {
            if watchers.contains_key(&uid) {
                continue;
            }
            let this = Arc::clone(self);
            let friend_uid = uid.clone();
            let handle = tokio::spawn(async move {
                let mut sub = match this.store.subscribe(&paths::user_status(&friend_uid)).await {
                    Ok(sub) => sub,
                    Err(err) => {
                        tracing::warn!(friend = %friend_uid, error = %err, "status subscribe failed");
                        return;
                    }
                };
                while sub.changed().await.is_ok() {
                    let status = sub
                        .current()
                        .and_then(|v| serde_json::from_value(v).ok())
                        .unwrap_or(UserStatus::Offline);
                    this.statuses.write().await.insert(friend_uid.clone(), status);
                }
            });
            watchers.insert(uid, handle);
        }
    }

    pub async fn friend_statuses(&self) -> HashMap<String, UserStatus> {
        self.statuses.read().await.clone()
    }

    pub async fn clear_watchers(&self) {
        let mut watchers = self.watchers.lock().await;
        for (_, handle) in watchers.drain() {
            handle.abort();
        }
        self.statuses.write().await.clear();
    }
}
