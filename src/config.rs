use std::env;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub presence: PresenceConfig,
    pub social: SocialConfig,
    pub rooms: RoomsConfig,
    pub signaling: SignalingConfig,
    pub moderation: ModerationConfig,
}

#[derive(Debug, Clone)]
pub struct PresenceConfig {
    /// Idle time before `online` flips to `away`.
    pub idle_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct SocialConfig {
    /// Window after a decline during which re-requests are refused.
    pub decline_cooldown_ms: i64,
}

#[derive(Debug, Clone)]
pub struct RoomsConfig {
    pub global_rooms: Vec<String>,
    /// Terms masked before persistence; best-effort, not security-grade.
    pub denylist: Vec<String>,
    pub mask: String,
}

#[derive(Debug, Clone)]
pub struct SignalingConfig {
    /// Client-local soft limit between outgoing nudges.
    pub nudge_cooldown: Duration,
}

#[derive(Debug, Clone)]
pub struct ModerationConfig {
    /// Delay between the kill-switch notice and the forced sign-out.
    pub kick_delay: Duration,
    pub deleted_placeholder: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            presence: PresenceConfig {
                idle_timeout: Duration::from_secs(300),
            },
            social: SocialConfig {
                decline_cooldown_ms: 3_600_000,
            },
            rooms: RoomsConfig {
                global_rooms: vec!["global-1".to_string(), "global-2".to_string()],
                denylist: vec!["bad".to_string(), "evil".to_string(), "cursed".to_string()],
                mask: "***".to_string(),
            },
            signaling: SignalingConfig {
                nudge_cooldown: Duration::from_secs(5),
            },
            moderation: ModerationConfig {
                kick_delay: Duration::from_secs(3),
                deleted_placeholder: "This message was removed by admin".to_string(),
            },
        }
    }
}

impl Config {
    pub fn load() -> Self {
        dotenvy::dotenv().ok();

        let defaults = Config::default();
        Config {
            presence: PresenceConfig {
                idle_timeout: Duration::from_secs(
                    env::var("MESSENGER_IDLE_TIMEOUT_SECS")
                        .ok()
                        .and_then(|v| v.parse().ok())
                        .unwrap_or(300),
                ),
            },
            social: SocialConfig {
                decline_cooldown_ms: env::var("MESSENGER_DECLINE_COOLDOWN_MS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(3_600_000),
            },
            rooms: RoomsConfig {
                global_rooms: env::var("MESSENGER_GLOBAL_ROOMS")
                    .map(|v| v.split(',').map(|s| s.trim().to_string()).collect())
                    .unwrap_or(defaults.rooms.global_rooms),
                denylist: env::var("MESSENGER_DENYLIST")
                    .map(|v| v.split(',').map(|s| s.trim().to_string()).collect())
                    .unwrap_or(defaults.rooms.denylist),
                mask: env::var("MESSENGER_MASK").unwrap_or(defaults.rooms.mask),
            },
            signaling: SignalingConfig {
                nudge_cooldown: Duration::from_secs(
                    env::var("MESSENGER_NUDGE_COOLDOWN_SECS")
                        .ok()
                        .and_then(|v| v.parse().ok())
                        .unwrap_or(5),
                ),
            },
            moderation: ModerationConfig {
                kick_delay: Duration::from_secs(
                    env::var("MESSENGER_KICK_DELAY_SECS")
                        .ok()
                        .and_then(|v| v.parse().ok())
                        .unwrap_or(3),
                ),
                deleted_placeholder: env::var("MESSENGER_DELETED_PLACEHOLDER")
                    .unwrap_or(defaults.moderation.deleted_placeholder),
            },
        }
    }
}
