//! Social messaging core for a simulated desktop shell: presence
//! tracking, a friend-request social graph, room-based and private chat
//! delivery, idempotent nudge signaling, unread bookkeeping and an
//! administrative moderation layer.
//!
//! The core talks to an external realtime synchronized store through the
//! narrow [`store::RealtimeStore`] trait and notifies the surrounding
//! shell through the typed [`events::ShellBus`] channel. One
//! [`Messenger`] instance is one signed-in session.

pub mod client;
pub mod config;
pub mod error;
pub mod events;
pub mod logging;
pub mod models;
pub mod services;
pub mod store;

pub use client::Messenger;
pub use config::Config;
pub use error::{AppError, AppResult};
pub use events::{ShellBus, ShellEvent, SoundEffect, ToastKind};
pub use models::{
    FriendEntry, FriendRequest, Message, MessageKind, NudgeSignal, Role, Room, Session, User,
    UserStatus,
};
pub use store::{memory::MemoryStore, RealtimeStore};
