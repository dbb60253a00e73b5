use std::sync::Arc;

use chrono::Utc;
use serde_json::{json, Value};

use crate::{
    config::SocialConfig,
    error::{AppError, AppResult},
    models::{FriendEntry, FriendRequest, RequestStatus, Session, User, UserStatus},
    store::{paths, RealtimeStore},
};

/// Outcome of accepting a friend request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcceptOutcome {
    /// Both edges were written.
    Linked,
    /// The two became friends by another path in the meantime; nothing
    /// to do.
    AlreadyFriends,
}

pub struct SocialService {
    store: Arc<dyn RealtimeStore>,
    config: SocialConfig,
}

impl SocialService {
    pub fn new(store: Arc<dyn RealtimeStore>, config: SocialConfig) -> Self {
        Self { store, config }
    }

    /// Username search. Usernames may be stored with mixed case or as
    /// numeric-looking values, so the raw input is tried as exact
    /// string, then number, then lowercase; the first hit wins and the
    /// rest are never merged in.
    pub async fn search_user(&self, raw: &str) -> AppResult<User> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(AppError::UserNotFound);
        }

        let mut candidates: Vec<Value> = vec![json!(raw)];
        if let Ok(number) = raw.parse::<i64>() {
            candidates.push(json!(number));
        }
        let lower = raw.to_lowercase();
        if lower != raw {
            candidates.push(json!(lower));
        }

        for candidate in candidates {
            let hits = self
                .store
                .query_eq(&paths::users(), "username", &candidate)
                .await?;
            if let Some((_, record)) = hits.into_iter().next() {
                return Ok(serde_json::from_value(record)?);
            }
        }
        Err(AppError::UserNotFound)
    }

    /// Validates in order (self, already-friend, pending, cooldown) and
    /// writes the request only when every check passes.
    pub async fn send_request(
        &self,
        session: &Session,
        target: &User,
        contacts: &[FriendEntry],
    ) -> AppResult<()> {
        if target.uid == session.uid {
            return Err(AppError::CannotAddSelf);
        }
        if contacts.iter().any(|c| c.uid == target.uid) {
            return Err(AppError::AlreadyFriends);
        }

        let request_path = paths::friend_request(&target.uid, &session.uid);
        if self.store.get(&request_path).await?.is_some() {
            return Err(AppError::RequestAlreadyPending);
        }

        if let Some(declined_at) = self
            .store
            .get(&paths::declined(&target.uid, &session.uid))
            .await?
            .and_then(|v| v.as_i64())
        {
            let elapsed = Utc::now().timestamp_millis() - declined_at;
            if elapsed < self.config.decline_cooldown_ms {
                let remaining = self.config.decline_cooldown_ms - elapsed;
                return Err(AppError::DeclineCooldown {
                    retry_in_mins: (remaining + 59_999) / 60_000,
                });
            }
        }

        let request = FriendRequest {
            from_uid: session.uid.clone(),
            from_name: session.username.clone(),
            from_email: session.email.clone(),
            status: RequestStatus::Pending,
        };
        self.store
            .set(&request_path, serde_json::to_value(&request)?)
            .await?;
        tracing::info!(from = %session.uid, to = %target.uid, "friend request sent");
        Ok(())
    }

    /// Removes the request, then writes the mutual edge on both sides.
    ///
    /// The dual write is a two-step saga with last-write-wins per field;
    /// if the second write fails the first is compensated by deletion so
    /// a one-sided friendship is never left behind.
    pub async fn accept_request(
        &self,
        session: &Session,
        request: &FriendRequest,
        my_status: UserStatus,
    ) -> AppResult<AcceptOutcome> {
        self.store
            .remove(&paths::friend_request(&session.uid, &request.from_uid))
            .await?;

        if self
            .store
            .get(&paths::friend(&session.uid, &request.from_uid))
            .await?
            .is_some()
        {
            return Ok(AcceptOutcome::AlreadyFriends);
        }

        let mine = FriendEntry {
            uid: request.from_uid.clone(),
            name: request.from_name.clone(),
            status: UserStatus::Online,
            unread_count: 0,
            avatar: Some("star".to_string()),
        };
        let theirs = FriendEntry {
            uid: session.uid.clone(),
            name: session.username.clone(),
            status: my_status,
            unread_count: 0,
            avatar: Some("star".to_string()),
        };

        let my_edge = paths::friend(&session.uid, &request.from_uid);
        self.store
            .set(&my_edge, serde_json::to_value(&mine)?)
            .await?;
        if let Err(err) = self
            .store
            .set(
                &paths::friend(&request.from_uid, &session.uid),
                serde_json::to_value(&theirs)?,
            )
            .await
        {
            if let Err(cleanup) = self.store.remove(&my_edge).await {
                tracing::error!(
                    friend = %request.from_uid,
                    error = %cleanup,
                    "compensation failed, one-sided friendship left behind"
                );
            }
            return Err(err.into());
        }

        tracing::info!(a = %session.uid, b = %request.from_uid, "friendship linked");
        Ok(AcceptOutcome::Linked)
    }

    /// Removes the request and stamps the decline record that starts the
    /// cooldown window.
    pub async fn decline_request(
        &self,
        session: &Session,
        request: &FriendRequest,
    ) -> AppResult<()> {
        self.store
            .remove(&paths::friend_request(&session.uid, &request.from_uid))
            .await?;
        self.store
            .set(
                &paths::declined(&session.uid, &request.from_uid),
                json!(Utc::now().timestamp_millis()),
            )
            .await?;
        Ok(())
    }

    /// Removes the edge from both sides.
    pub async fn unfriend(&self, session: &Session, friend_uid: &str) -> AppResult<()> {
        self.store
            .remove(&paths::friend(&session.uid, friend_uid))
            .await?;
        self.store
            .remove(&paths::friend(friend_uid, &session.uid))
            .await?;
        tracing::info!(a = %session.uid, b = %friend_uid, "unfriended");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Role;
    use crate::store::memory::MemoryStore;

    fn session(uid: &str, name: &str) -> Session {
        Session {
            uid: uid.to_string(),
            email: format!("{name}@retro.net"),
            username: name.to_string(),
            role: Role::User,
        }
    }

    fn service(store: &Arc<MemoryStore>) -> SocialService {
        SocialService::new(
            store.clone() as Arc<dyn RealtimeStore>,
            SocialConfig {
                decline_cooldown_ms: 3_600_000,
            },
        )
    }

    async fn seed_user(store: &Arc<MemoryStore>, uid: &str, username: Value) {
        store
            .set(
                &paths::user(uid),
                json!({"uid": uid, "email": format!("{uid}@retro.net"), "username": username}),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn search_tries_exact_then_number_then_lowercase() {
        let store = Arc::new(MemoryStore::new());
        let social = service(&store);
        seed_user(&store, "u1", json!("Alice")).await;
        seed_user(&store, "u2", json!(444)).await;
        seed_user(&store, "u3", json!("bob")).await;

        assert_eq!(social.search_user("Alice").await.unwrap().uid, "u1");
        assert_eq!(social.search_user("444").await.unwrap().uid, "u2");
        // No exact or numeric hit; lowercase fallback finds bob.
        assert_eq!(social.search_user("BOB").await.unwrap().uid, "u3");
        assert!(matches!(
            social.search_user("nobody").await,
            Err(AppError::UserNotFound)
        ));
    }

    #[tokio::test]
    async fn send_request_validates_in_order() {
        let store = Arc::new(MemoryStore::new());
        let social = service(&store);
        let me = session("u1", "alice");
        let target = User {
            uid: "u2".to_string(),
            email: "bob@retro.net".to_string(),
            username: "bob".to_string(),
            role: Role::User,
            status: UserStatus::Online,
            is_banned: false,
            avatar: None,
        };

        let myself = User {
            uid: "u1".to_string(),
            ..target.clone()
        };
        assert!(matches!(
            social.send_request(&me, &myself, &[]).await,
            Err(AppError::CannotAddSelf)
        ));

        let existing = [FriendEntry {
            uid: "u2".to_string(),
            name: "bob".to_string(),
            status: UserStatus::Online,
            unread_count: 0,
            avatar: None,
        }];
        assert!(matches!(
            social.send_request(&me, &target, &existing).await,
            Err(AppError::AlreadyFriends)
        ));

        social.send_request(&me, &target, &[]).await.unwrap();
        assert!(matches!(
            social.send_request(&me, &target, &[]).await,
            Err(AppError::RequestAlreadyPending)
        ));
    }

    #[tokio::test]
    async fn decline_cooldown_blocks_until_window_elapses() {
        let store = Arc::new(MemoryStore::new());
        let social = service(&store);
        let me = session("u1", "alice");
        let target = User {
            uid: "u2".to_string(),
            email: "bob@retro.net".to_string(),
            username: "bob".to_string(),
            role: Role::User,
            status: UserStatus::Online,
            is_banned: false,
            avatar: None,
        };

        // A fresh decline from u2 against u1.
        store
            .set(
                &paths::declined("u2", "u1"),
                json!(Utc::now().timestamp_millis()),
            )
            .await
            .unwrap();
        assert!(matches!(
            social.send_request(&me, &target, &[]).await,
            Err(AppError::DeclineCooldown { .. })
        ));

        // Backdate the record past the window and retry.
        store
            .set(
                &paths::declined("u2", "u1"),
                json!(Utc::now().timestamp_millis() - 3_600_001),
            )
            .await
            .unwrap();
        social.send_request(&me, &target, &[]).await.unwrap();
    }

    #[tokio::test]
    async fn accept_writes_both_edges() {
        let store = Arc::new(MemoryStore::new());
        let social = service(&store);
        let me = session("u2", "bob");
        let request = FriendRequest {
            from_uid: "u1".to_string(),
            from_name: "alice".to_string(),
            from_email: "alice@retro.net".to_string(),
            status: RequestStatus::Pending,
        };
        store
            .set(
                &paths::friend_request("u2", "u1"),
                serde_json::to_value(&request).unwrap(),
            )
            .await
            .unwrap();

        let outcome = social
            .accept_request(&me, &request, UserStatus::Busy)
            .await
            .unwrap();
        assert_eq!(outcome, AcceptOutcome::Linked);

        // Request consumed, both edges present.
        assert!(store
            .get(&paths::friend_request("u2", "u1"))
            .await
            .unwrap()
            .is_none());
        let mine: FriendEntry = serde_json::from_value(
            store.get(&paths::friend("u2", "u1")).await.unwrap().unwrap(),
        )
        .unwrap();
        let theirs: FriendEntry = serde_json::from_value(
            store.get(&paths::friend("u1", "u2")).await.unwrap().unwrap(),
        )
        .unwrap();
        assert_eq!(mine.name, "alice");
        assert_eq!(theirs.name, "bob");
        assert_eq!(theirs.status, UserStatus::Busy);

        // Re-accepting the same request is the benign race outcome.
        let outcome = social
            .accept_request(&me, &request, UserStatus::Busy)
            .await
            .unwrap();
        assert_eq!(outcome, AcceptOutcome::AlreadyFriends);
    }

    #[tokio::test]
    async fn decline_stamps_cooldown_record() {
        let store = Arc::new(MemoryStore::new());
        let social = service(&store);
        let me = session("u2", "bob");
        let request = FriendRequest {
            from_uid: "u1".to_string(),
            from_name: "alice".to_string(),
            from_email: "alice@retro.net".to_string(),
            status: RequestStatus::Pending,
        };

        social.decline_request(&me, &request).await.unwrap();
        let stamp = store
            .get(&paths::declined("u2", "u1"))
            .await
            .unwrap()
            .and_then(|v| v.as_i64())
            .unwrap();
        assert!(stamp > 0);
    }

    #[tokio::test]
    async fn unfriend_removes_both_edges() {
        let store = Arc::new(MemoryStore::new());
        let social = service(&store);
        let me = session("u1", "alice");
        store
            .set(&paths::friend("u1", "u2"), json!({"uid": "u2", "name": "bob"}))
            .await
            .unwrap();
        store
            .set(&paths::friend("u2", "u1"), json!({"uid": "u1", "name": "alice"}))
            .await
            .unwrap();

        social.unfriend(&me, "u2").await.unwrap();
        assert!(store.get(&paths::friend("u1", "u2")).await.unwrap().is_none());
        assert!(store.get(&paths::friend("u2", "u1")).await.unwrap().is_none());
    }
}
