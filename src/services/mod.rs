pub mod auth;
pub mod moderation;
pub mod presence;
pub mod rooms;
pub mod signaling;
pub mod social;
