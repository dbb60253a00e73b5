use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::{
    config::SignalingConfig,
    error::{AppError, AppResult},
    events::{ShellBus, ShellEvent, SoundEffect},
    models::{Message, MessageKind, NudgeSignal, Room, Session},
    store::{paths, RealtimeStore},
};

use super::rooms::RoomService;

/// Nudge delivery and the unread-driven notification.
pub struct SignalingService {
    store: Arc<dyn RealtimeStore>,
    bus: ShellBus,
    config: SignalingConfig,
    last_nudge: Mutex<Option<Instant>>,
}

impl SignalingService {
    pub fn new(store: Arc<dyn RealtimeStore>, bus: ShellBus, config: SignalingConfig) -> Self {
        Self {
            store,
            bus,
            config,
            last_nudge: Mutex::new(None),
        }
    }

    /// Sends a nudge to the counterpart of the active private room.
    ///
    /// The cooldown is client-local, a soft limit the server does not
    /// enforce. The sender feels the shake immediately; the receiver's
    /// one-slot signal is overwritten unprocessed; the room stream gets
    /// a nudge entry for history.
    pub async fn send_nudge(
        &self,
        session: &Session,
        room: &Room,
        rooms: &RoomService,
    ) -> AppResult<()> {
        let receiver = room
            .counterpart(&session.uid)
            .ok_or(AppError::NoActiveContact)?
            .to_string();

        {
            let mut last = self.last_nudge.lock().await;
            if let Some(at) = *last {
                if at.elapsed() < self.config.nudge_cooldown {
                    return Err(AppError::NudgeCooldown);
                }
            }
            *last = Some(Instant::now());
        }

        self.bus.emit(ShellEvent::Sound(SoundEffect::Nudge));

        let now = Utc::now().timestamp_millis();
        let signal = NudgeSignal {
            sender_uid: session.uid.clone(),
            sender_name: session.username.clone(),
            timestamp: now,
            is_processed: false,
        };
        self.store
            .set(&paths::latest_nudge(&receiver), serde_json::to_value(&signal)?)
            .await?;

        let entry = Message {
            sender: session.email.clone(),
            sender_name: session.username.clone(),
            sender_uid: session.uid.clone(),
            text: String::new(),
            timestamp: now,
            kind: MessageKind::Nudge,
            is_deleted: false,
        };
        rooms.push_message(room, &entry, false).await?;
        tracing::debug!(to = %receiver, "nudge sent");
        Ok(())
    }

    /// Handles one delivery of the own nudge slot. Processed signals are
    /// ignored; for a fresh one the ack is persisted before anything
    /// observable happens, so a re-delivery of the same slot is a no-op.
    pub async fn take_nudge(
        &self,
        session: &Session,
        snapshot: Option<Value>,
    ) -> AppResult<Option<NudgeSignal>> {
        let Some(value) = snapshot else {
            return Ok(None);
        };
        let signal: NudgeSignal = serde_json::from_value(value)?;
        if signal.is_processed {
            return Ok(None);
        }

        let mut fields = serde_json::Map::new();
        fields.insert("isProcessed".to_string(), Value::Bool(true));
        self.store
            .update(&paths::latest_nudge(&session.uid), fields)
            .await?;
        Ok(Some(signal))
    }
}

/// Fires only on a strict increase of the unread total across
/// consecutive observed snapshots; a reconnect that resends the same
/// state never re-fires.
#[derive(Debug, Default)]
pub struct UnreadMonitor {
    previous: u32,
}

impl UnreadMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, total: u32) -> bool {
        let fired = total > self.previous;
        self.previous = total;
        fired
    }
}
