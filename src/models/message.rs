use serde::{Deserialize, Serialize};

use super::user::de_string_or_number;

/// Room entry. Append-only; the only mutation allowed is the admin
/// soft-delete, which replaces `text` and sets `isDeleted`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Sender email, kept for display parity with legacy records.
    pub sender: String,
    #[serde(default, deserialize_with = "de_string_or_number")]
    pub sender_name: String,
    pub sender_uid: String,
    #[serde(default)]
    pub text: String,
    /// Epoch milliseconds; display order is derived from this, not from
    /// arrival order.
    pub timestamp: i64,
    #[serde(rename = "type", default)]
    pub kind: MessageKind,
    #[serde(default)]
    pub is_deleted: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    #[default]
    Chat,
    Nudge,
}
