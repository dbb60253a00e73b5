use thiserror::Error;

use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum AppError {
    // Auth errors
    #[error("Unauthorized")]
    Unauthorized,
    #[error("You are banned")]
    Banned,

    // User errors
    #[error("User not found")]
    UserNotFound,

    // Friend errors
    #[error("You cannot add yourself")]
    CannotAddSelf,
    #[error("Already in your friends list")]
    AlreadyFriends,
    #[error("Request already pending")]
    RequestAlreadyPending,
    #[error("You can try again in {retry_in_mins} minutes")]
    DeclineCooldown { retry_in_mins: i64 },
    #[error("Friend not found")]
    FriendNotFound,

    // Room errors
    #[error("Nudges are only available in private chat")]
    NoActiveContact,
    #[error("Wait a moment before nudging again")]
    NudgeCooldown,
    #[error("Message not found")]
    MessageNotFound,

    // Validation errors
    #[error("Validation error: {0}")]
    Validation(String),

    // Store errors
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // Internal errors
    #[error("Internal error")]
    Internal(#[from] anyhow::Error),
}

pub type AppResult<T> = Result<T, AppError>;
