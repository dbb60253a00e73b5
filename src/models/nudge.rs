use serde::{Deserialize, Serialize};

use super::user::de_string_or_number;

/// One-slot attention signal stored at the receiver's
/// `users/{uid}/latestNudge`. A new nudge overwrites the previous one;
/// a processed signal must never re-trigger a side effect.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NudgeSignal {
    pub sender_uid: String,
    #[serde(default, deserialize_with = "de_string_or_number")]
    pub sender_name: String,
    pub timestamp: i64,
    #[serde(default)]
    pub is_processed: bool,
}
