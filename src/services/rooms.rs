use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;

use crate::{
    config::RoomsConfig,
    error::AppResult,
    models::{Message, MessageKind, Room, Session},
    store::{paths, RealtimeStore, WriteOp},
};

/// Message with its store key, as displayed in a room.
#[derive(Debug, Clone, PartialEq)]
pub struct RoomEntry {
    pub key: String,
    pub message: Message,
}

/// Routes messages into global and private rooms and keeps the unread
/// bookkeeping on the receiving side.
pub struct RoomService {
    store: Arc<dyn RealtimeStore>,
    config: RoomsConfig,
}

impl RoomService {
    pub fn new(store: Arc<dyn RealtimeStore>, config: RoomsConfig) -> Self {
        Self { store, config }
    }

    pub fn default_room(&self) -> Room {
        Room::global(
            self.config
                .global_rooms
                .first()
                .map(String::as_str)
                .unwrap_or("global-1"),
        )
    }

    pub fn is_known_global(&self, name: &str) -> bool {
        self.config.global_rooms.iter().any(|room| room == name)
    }

    /// Sends a chat message. Empty input is dropped quietly; denylisted
    /// terms are masked before anything is persisted.
    pub async fn send_chat(&self, session: &Session, room: &Room, text: &str) -> AppResult<()> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(());
        }

        let message = Message {
            sender: session.email.clone(),
            sender_name: session.username.clone(),
            sender_uid: session.uid.clone(),
            text: mask_terms(text, &self.config.denylist, &self.config.mask),
            timestamp: Utc::now().timestamp_millis(),
            kind: MessageKind::Chat,
            is_deleted: false,
        };
        self.push_message(room, &message, true).await?;
        Ok(())
    }

    /// Appends a message under a fresh ordered key. For private rooms,
    /// `bump_unread` also increments the receiver's cached unread
    /// counter for this sender in the same write — never the sender's
    /// own counter.
    pub async fn push_message(
        &self,
        room: &Room,
        message: &Message,
        bump_unread: bool,
    ) -> AppResult<String> {
        let key = self.store.push_key(&paths::room_messages(room)).await?;
        let mut ops = vec![(
            paths::room_message(room, &key),
            WriteOp::Set(serde_json::to_value(message)?),
        )];
        if bump_unread {
            if let Some(receiver) = room.counterpart(&message.sender_uid) {
                ops.push((
                    paths::friend_unread(receiver, &message.sender_uid),
                    WriteOp::Increment(1),
                ));
            }
        }
        self.store.multi_update(ops).await?;
        Ok(key)
    }

    /// Read-by-presence: opening (or sitting in) a chat zeroes the
    /// counter for that contact only.
    pub async fn clear_unread(&self, session: &Session, contact_uid: &str) -> AppResult<()> {
        let mut fields = serde_json::Map::new();
        fields.insert("unreadCount".to_string(), serde_json::Value::from(0));
        self.store
            .update(&paths::friend(&session.uid, contact_uid), fields)
            .await?;
        Ok(())
    }
}

/// Turns a room snapshot into display order. The subscription layer may
/// deliver partially ordered data, so ordering is re-derived from
/// timestamps on every snapshot; malformed entries are skipped.
pub fn entries_from_snapshot(snapshot: Option<Value>) -> Vec<RoomEntry> {
    let mut entries: Vec<RoomEntry> = snapshot
        .as_ref()
        .and_then(Value::as_object)
        .map(|children| {
            children
                .iter()
                .filter_map(|(key, value)| {
                    match serde_json::from_value::<Message>(value.clone()) {
                        Ok(message) => Some(RoomEntry {
                            key: key.clone(),
                            message,
                        }),
                        Err(err) => {
                            tracing::warn!(key = %key, error = %err, "skipping malformed message");
                            None
                        }
                    }
                })
                .collect()
        })
        .unwrap_or_default();
    entries.sort_by(|a, b| {
        a.message
            .timestamp
            .cmp(&b.message.timestamp)
            .then_with(|| a.key.cmp(&b.key))
    });
    entries
}

/// Best-effort content filter: masks every case-insensitive occurrence
/// of each denylisted term.
pub fn mask_terms(text: &str, terms: &[String], mask: &str) -> String {
    let mut out = text.to_string();
    for term in terms {
        if term.is_empty() {
            continue;
        }
        let mut masked = String::with_capacity(out.len());
        let mut rest = out.as_str();
        while let Some(pos) = find_ignore_ascii_case(rest, term) {
            masked.push_str(&rest[..pos]);
            masked.push_str(mask);
            rest = &rest[pos + term.len()..];
        }
        masked.push_str(rest);
        out = masked;
    }
    out
}

fn find_ignore_ascii_case(haystack: &str, needle: &str) -> Option<usize> {
    if needle.is_empty() || needle.len() > haystack.len() {
        return None;
    }
    (0..=haystack.len() - needle.len()).find(|&i| {
        haystack.is_char_boundary(i)
            && haystack.is_char_boundary(i + needle.len())
            && haystack.as_bytes()[i..i + needle.len()].eq_ignore_ascii_case(needle.as_bytes())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn masks_denylisted_terms_case_insensitively() {
        let terms = vec!["bad".to_string(), "evil".to_string(), "cursed".to_string()];
        assert_eq!(
            mask_terms("this is BAD and Evil", &terms, "***"),
            "this is *** and ***"
        );
        assert_eq!(mask_terms("badge", &terms, "***"), "***ge");
        assert_eq!(mask_terms("all good here", &terms, "***"), "all good here");
    }

    #[test]
    fn snapshot_is_resorted_by_timestamp() {
        let snapshot = json!({
            "m2": {"sender": "b@x", "senderName": "b", "senderUid": "u2", "text": "second", "timestamp": 200},
            "m1": {"sender": "a@x", "senderName": "a", "senderUid": "u1", "text": "first", "timestamp": 100},
            "m3": {"sender": "a@x", "senderName": "a", "senderUid": "u1", "text": "third", "timestamp": 150},
        });
        let entries = entries_from_snapshot(Some(snapshot));
        let texts: Vec<&str> = entries.iter().map(|e| e.message.text.as_str()).collect();
        assert_eq!(texts, vec!["first", "third", "second"]);
    }

    #[test]
    fn malformed_entries_are_skipped() {
        let snapshot = json!({
            "m1": {"sender": "a@x", "senderName": "a", "senderUid": "u1", "text": "ok", "timestamp": 100},
            "m2": "garbage",
        });
        let entries = entries_from_snapshot(Some(snapshot));
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].message.text, "ok");
    }
}
