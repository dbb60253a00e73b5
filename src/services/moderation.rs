use std::sync::Arc;

use serde_json::{json, Value};

use crate::{
    config::ModerationConfig,
    error::{AppError, AppResult},
    models::{Message, Room, Session, User},
    store::{paths, RealtimeStore},
};

/// First phase of a soft-delete; nothing is written until it is
/// confirmed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingDeletion {
    pub room: Room,
    pub key: String,
}

/// Admin-only authority: the ban kill-switch flag, message soft-delete
/// and the user listing. Role checks here guard the client context; the
/// store is assumed to enforce equivalent rules server-side, and the two
/// are not the same trust boundary.
pub struct ModerationService {
    store: Arc<dyn RealtimeStore>,
    config: ModerationConfig,
}

impl ModerationService {
    pub fn new(store: Arc<dyn RealtimeStore>, config: ModerationConfig) -> Self {
        Self { store, config }
    }

    /// Toggles the target's ban flag. Every session of a banned user
    /// observes the flag through its own subscription and terminates.
    pub async fn set_banned(
        &self,
        session: &Session,
        target_uid: &str,
        banned: bool,
    ) -> AppResult<()> {
        if !session.is_admin() {
            return Err(AppError::Unauthorized);
        }
        if target_uid == session.uid {
            return Err(AppError::Validation(
                "admins cannot ban themselves".to_string(),
            ));
        }

        let mut fields = serde_json::Map::new();
        fields.insert("isBanned".to_string(), Value::Bool(banned));
        self.store.update(&paths::user(target_uid), fields).await?;
        tracing::info!(admin = %session.uid, target = %target_uid, banned, "ban flag updated");
        Ok(())
    }

    /// One-shot read of the whole user collection. Deliberately not a
    /// subscription; callers refresh explicitly after a ban or unban.
    pub async fn list_users(&self, session: &Session) -> AppResult<Vec<User>> {
        if !session.is_admin() {
            return Err(AppError::Unauthorized);
        }

        let snapshot = self.store.get(&paths::users()).await?;
        let mut users: Vec<User> = snapshot
            .as_ref()
            .and_then(Value::as_object)
            .map(|records| {
                records
                    .iter()
                    .filter_map(|(uid, record)| {
                        match serde_json::from_value::<User>(record.clone()) {
                            Ok(user) => Some(user),
                            Err(err) => {
                                tracing::warn!(uid = %uid, error = %err, "skipping malformed user record");
                                None
                            }
                        }
                    })
                    .collect()
            })
            .unwrap_or_default();
        users.sort_by(|a, b| a.username.cmp(&b.username));
        Ok(users)
    }

    /// Phase one of the two-phase delete: returns the token the caller
    /// must confirm. Guards against destructive single-click actions.
    pub fn request_delete(
        &self,
        session: &Session,
        room: &Room,
        key: &str,
    ) -> AppResult<PendingDeletion> {
        if !session.is_admin() {
            return Err(AppError::Unauthorized);
        }
        Ok(PendingDeletion {
            room: room.clone(),
            key: key.to_string(),
        })
    }

    /// Phase two: replaces the text with the fixed placeholder and sets
    /// the deletion marker. Sender and timestamp survive; the original
    /// text is not recoverable. Confirming an already-deleted message is
    /// a no-op.
    pub async fn confirm_delete(
        &self,
        session: &Session,
        pending: &PendingDeletion,
    ) -> AppResult<()> {
        if !session.is_admin() {
            return Err(AppError::Unauthorized);
        }

        let path = paths::room_message(&pending.room, &pending.key);
        let Some(record) = self.store.get(&path).await? else {
            return Err(AppError::MessageNotFound);
        };
        let message: Message = serde_json::from_value(record)?;
        if message.is_deleted {
            return Ok(());
        }

        let mut fields = serde_json::Map::new();
        fields.insert("text".to_string(), json!(self.config.deleted_placeholder));
        fields.insert("isDeleted".to_string(), Value::Bool(true));
        self.store.update(&path, fields).await?;
        tracing::info!(admin = %session.uid, key = %pending.key, "message soft-deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::models::Role;
    use crate::store::memory::MemoryStore;

    fn admin() -> Session {
        Session {
            uid: "a1".to_string(),
            email: "admin@retro.net".to_string(),
            username: "admin".to_string(),
            role: Role::Admin,
        }
    }

    fn regular() -> Session {
        Session {
            uid: "u1".to_string(),
            email: "user@retro.net".to_string(),
            username: "user".to_string(),
            role: Role::User,
        }
    }

    fn service(store: &Arc<MemoryStore>) -> ModerationService {
        ModerationService::new(
            store.clone() as Arc<dyn RealtimeStore>,
            Config::default().moderation,
        )
    }

    #[tokio::test]
    async fn non_admin_actions_are_refused() {
        let store = Arc::new(MemoryStore::new());
        let moderation = service(&store);
        let user = regular();

        assert!(matches!(
            moderation.set_banned(&user, "u2", true).await,
            Err(AppError::Unauthorized)
        ));
        assert!(matches!(
            moderation.list_users(&user).await,
            Err(AppError::Unauthorized)
        ));
        assert!(matches!(
            moderation.request_delete(&user, &Room::global("global-1"), "m1"),
            Err(AppError::Unauthorized)
        ));
    }

    #[tokio::test]
    async fn admins_cannot_ban_themselves() {
        let store = Arc::new(MemoryStore::new());
        let moderation = service(&store);
        assert!(matches!(
            moderation.set_banned(&admin(), "a1", true).await,
            Err(AppError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn ban_flag_toggles() {
        let store = Arc::new(MemoryStore::new());
        let moderation = service(&store);
        store
            .set(&paths::user("u2"), json!({"uid": "u2", "username": "bob"}))
            .await
            .unwrap();

        moderation.set_banned(&admin(), "u2", true).await.unwrap();
        assert_eq!(
            store.get(&paths::user_banned("u2")).await.unwrap(),
            Some(json!(true))
        );
        moderation.set_banned(&admin(), "u2", false).await.unwrap();
        assert_eq!(
            store.get(&paths::user_banned("u2")).await.unwrap(),
            Some(json!(false))
        );
    }

    #[tokio::test]
    async fn soft_delete_keeps_metadata_and_is_idempotent() {
        let store = Arc::new(MemoryStore::new());
        let moderation = service(&store);
        let room = Room::global("global-1");
        store
            .set(
                &paths::room_message(&room, "m1"),
                json!({
                    "sender": "bob@retro.net",
                    "senderName": "bob",
                    "senderUid": "u2",
                    "text": "something rude",
                    "timestamp": 12345,
                }),
            )
            .await
            .unwrap();

        let pending = moderation.request_delete(&admin(), &room, "m1").unwrap();
        moderation.confirm_delete(&admin(), &pending).await.unwrap();

        let message: Message = serde_json::from_value(
            store
                .get(&paths::room_message(&room, "m1"))
                .await
                .unwrap()
                .unwrap(),
        )
        .unwrap();
        assert!(message.is_deleted);
        assert_eq!(message.text, "This message was removed by admin");
        assert_eq!(message.timestamp, 12345);
        assert_eq!(message.sender, "bob@retro.net");

        // Deleting again changes nothing and still succeeds.
        moderation.confirm_delete(&admin(), &pending).await.unwrap();
        let again: Message = serde_json::from_value(
            store
                .get(&paths::room_message(&room, "m1"))
                .await
                .unwrap()
                .unwrap(),
        )
        .unwrap();
        assert_eq!(again, message);
    }

    #[tokio::test]
    async fn list_users_reads_once() {
        let store = Arc::new(MemoryStore::new());
        let moderation = service(&store);
        store
            .set(&paths::user("u2"), json!({"uid": "u2", "username": "bob"}))
            .await
            .unwrap();
        store
            .set(&paths::user("u3"), json!({"uid": "u3", "username": "alice"}))
            .await
            .unwrap();

        let users = moderation.list_users(&admin()).await.unwrap();
        let names: Vec<&str> = users.iter().map(|u| u.username.as_str()).collect();
        assert_eq!(names, vec!["alice", "bob"]);
    }
}
