use std::collections::HashMap;
use std::sync::Arc;

use serde_json::json;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    models::{Role, Session, User},
    store::{paths, RealtimeStore},
};

/// Output of the external authenticated-identity collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthIdentity {
    pub uid: String,
    pub email: String,
}

/// Persists the profile record next to the external identity and builds
/// the session object the rest of the core runs on.
pub struct AuthService {
    store: Arc<dyn RealtimeStore>,
}

impl AuthService {
    pub fn new(store: Arc<dyn RealtimeStore>) -> Self {
        Self { store }
    }

    /// Create the profile record for a fresh identity. The username is
    /// what search indexes.
    pub async fn register(&self, identity: &AuthIdentity, username: &str) -> AppResult<Session> {
        let username = username.trim();
        if username.is_empty() {
            return Err(AppError::Validation("username is required".to_string()));
        }

        let record = json!({
            "uid": identity.uid,
            "email": identity.email,
            "username": username,
            "status": "online",
            "avatar": "default",
        });
        self.store.set(&paths::user(&identity.uid), record).await?;
        tracing::info!(uid = %identity.uid, "registered profile");

        Ok(Session {
            uid: identity.uid.clone(),
            email: identity.email.clone(),
            username: username.to_string(),
            role: Role::User,
        })
    }

    /// Build a session for an authenticated identity. Banned accounts
    /// are refused before any session exists.
    pub async fn login(&self, identity: &AuthIdentity) -> AppResult<Session> {
        let record = self.store.get(&paths::user(&identity.uid)).await?;
        let user: Option<User> = record.map(serde_json::from_value).transpose()?;

        if user.as_ref().map(|u| u.is_banned).unwrap_or(false) {
            return Err(AppError::Banned);
        }

        let username = user
            .as_ref()
            .map(|u| u.username.clone())
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| email_prefix(&identity.email));
        let role = user.map(|u| u.role).unwrap_or_default();

        Ok(Session {
            uid: identity.uid.clone(),
            email: identity.email.clone(),
            username,
            role,
        })
    }

    /// Self-healing backfill: older accounts may lack a profile record
    /// or a username, which makes them unsearchable. Rewrite from the
    /// session when that happens.
    pub async fn ensure_profile(&self, session: &Session) -> AppResult<()> {
        let record = self.store.get(&paths::user(&session.uid)).await?;
        let has_username = record
            .as_ref()
            .and_then(|v| v.get("username"))
            .map(|v| v.as_str() != Some("") && !v.is_null())
            .unwrap_or(false);
        if has_username {
            return Ok(());
        }

        tracing::info!(uid = %session.uid, "backfilling missing profile fields");
        let mut fields = serde_json::Map::new();
        fields.insert("uid".to_string(), json!(session.uid));
        fields.insert("email".to_string(), json!(session.email));
        fields.insert("username".to_string(), json!(session.username));
        fields.insert("status".to_string(), json!("online"));
        self.store.update(&paths::user(&session.uid), fields).await?;
        Ok(())
    }
}

fn email_prefix(email: &str) -> String {
    email.split('@').next().unwrap_or(email).to_string()
}

/// In-process stand-in for the external identity service: yields a
/// stable uid per email. Used by tests and local runs.
pub struct LocalIdentity {
    known: Mutex<HashMap<String, String>>,
}

impl LocalIdentity {
    pub fn new() -> Self {
        Self {
            known: Mutex::new(HashMap::new()),
        }
    }

    pub async fn authenticate(&self, email: &str) -> AuthIdentity {
        let mut known = self.known.lock().await;
        let uid = known
            .entry(email.to_string())
            .or_insert_with(|| Uuid::new_v4().to_string())
            .clone();
        AuthIdentity {
            uid,
            email: email.to_string(),
        }
    }
}

impl Default for LocalIdentity {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;

    #[tokio::test]
    async fn login_refuses_banned_accounts() {
        let store = Arc::new(MemoryStore::new());
        let identity = LocalIdentity::new();
        let auth = AuthService::new(store.clone());

        let me = identity.authenticate("gone@retro.net").await;
        auth.register(&me, "gone").await.unwrap();
        store
            .set(&paths::user_banned(&me.uid), json!(true))
            .await
            .unwrap();

        assert!(matches!(auth.login(&me).await, Err(AppError::Banned)));
    }

    #[tokio::test]
    async fn login_falls_back_to_email_prefix() {
        let store = Arc::new(MemoryStore::new());
        let identity = LocalIdentity::new();
        let auth = AuthService::new(store);

        // No profile record at all.
        let me = identity.authenticate("ghost@retro.net").await;
        let session = auth.login(&me).await.unwrap();
        assert_eq!(session.username, "ghost");
        assert_eq!(session.role, Role::User);
    }

    #[tokio::test]
    async fn ensure_profile_backfills_username() {
        let store = Arc::new(MemoryStore::new());
        let identity = LocalIdentity::new();
        let auth = AuthService::new(store.clone());

        let me = identity.authenticate("old@retro.net").await;
        store
            .set(&paths::user(&me.uid), json!({"uid": me.uid, "email": me.email}))
            .await
            .unwrap();

        let session = auth.login(&me).await.unwrap();
        auth.ensure_profile(&session).await.unwrap();

        let record = store.get(&paths::user(&me.uid)).await.unwrap().unwrap();
        assert_eq!(record.get("username"), Some(&json!("old")));
    }
}
