use serde::{Deserialize, Serialize};

use super::user::{de_string_or_number, UserStatus};

/// Cached friend edge, stored redundantly under each endpoint's
/// `friends/{friendUid}`. The counterpart owns the mirror copy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FriendEntry {
    pub uid: String,
    #[serde(default, deserialize_with = "de_string_or_number")]
    pub name: String,
    #[serde(default)]
    pub status: UserStatus,
    #[serde(default)]
    pub unread_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
}

/// Pending friend request keyed by `(targetUid, fromUid)`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FriendRequest {
    pub from_uid: String,
    #[serde(default, deserialize_with = "de_string_or_number")]
    pub from_name: String,
    #[serde(default)]
    pub from_email: String,
    #[serde(default)]
    pub status: RequestStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    #[default]
    Pending,
}
