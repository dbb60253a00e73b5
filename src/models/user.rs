use serde::{Deserialize, Deserializer, Serialize};

/// Profile record stored under `users/{uid}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub uid: String,
    #[serde(default)]
    pub email: String,
    #[serde(default, deserialize_with = "de_string_or_number")]
    pub username: String,
    #[serde(default)]
    pub role: Role,
    #[serde(default)]
    pub status: UserStatus,
    #[serde(default)]
    pub is_banned: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    User,
    Admin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum UserStatus {
    Online,
    Away,
    Busy,
    #[default]
    Offline,
}

impl UserStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserStatus::Online => "online",
            UserStatus::Away => "away",
            UserStatus::Busy => "busy",
            UserStatus::Offline => "offline",
        }
    }
}

/// Authenticated session handed to the messaging core at construction.
/// Built once from the identity collaborator plus the stored profile;
/// never re-derived from cached tokens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub uid: String,
    pub email: String,
    pub username: String,
    pub role: Role,
}

impl Session {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

/// Legacy records hold usernames as strings or bare numbers; accept both.
pub(crate) fn de_string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    match value {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        serde_json::Value::Null => Ok(String::new()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number, got {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn numeric_username_deserializes() {
        let user: User = serde_json::from_value(json!({
            "uid": "u1",
            "email": "a@b.c",
            "username": 444,
        }))
        .unwrap();
        assert_eq!(user.username, "444");
        assert_eq!(user.role, Role::User);
        assert!(!user.is_banned);
    }

    #[test]
    fn status_round_trips_lowercase() {
        assert_eq!(serde_json::to_value(UserStatus::Busy).unwrap(), json!("busy"));
        let status: UserStatus = serde_json::from_value(json!("away")).unwrap();
        assert_eq!(status, UserStatus::Away);
    }
}
