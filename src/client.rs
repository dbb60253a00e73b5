use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{watch, Mutex, Notify, RwLock};
use tokio::task::JoinHandle;

use crate::{
    config::Config,
    error::{AppError, AppResult},
    events::{ShellBus, ShellEvent, SoundEffect, ToastKind, MESSENGER_APP},
    models::{FriendEntry, FriendRequest, NudgeSignal, Room, Session, User, UserStatus},
    services::{
        auth::AuthService,
        moderation::{ModerationService, PendingDeletion},
        presence::PresenceService,
        rooms::{entries_from_snapshot, RoomEntry, RoomService},
        signaling::{SignalingService, UnreadMonitor},
        social::{AcceptOutcome, SocialService},
    },
    store::{paths, RealtimeStore},
};

/// One signed-in messenger session: wires the presence, social, room,
/// signaling and moderation services to the store subscriptions and
/// keeps the cached views the shell renders from.
///
/// All subscriptions live in spawned tasks owned by this object;
/// [`Messenger::sign_out`] (or the ban kill-switch) aborts every one of
/// them, so nothing outlives the session.
pub struct Messenger {
    store: Arc<dyn RealtimeStore>,
    bus: ShellBus,
    config: Config,
    session: Session,

    presence: Arc<PresenceService>,
    social: SocialService,
    rooms: RoomService,
    signaling: SignalingService,
    moderation: ModerationService,

    contacts: Arc<RwLock<Vec<FriendEntry>>>,
    requests: RwLock<Vec<FriendRequest>>,
    nudged: RwLock<HashSet<String>>,
    active_room: RwLock<Room>,
    unread: Mutex<UnreadMonitor>,
    activity: Arc<Notify>,

    messages_tx: watch::Sender<Vec<RoomEntry>>,
    terminated_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    room_task: Mutex<Option<JoinHandle<()>>>,
}

impl Messenger {
    /// Builds the session wiring and opens the default global room.
    pub async fn start(
        store: Arc<dyn RealtimeStore>,
        bus: ShellBus,
        session: Session,
        config: Config,
    ) -> AppResult<Arc<Self>> {
        // Self-healing: older accounts may miss profile fields.
        AuthService::new(store.clone())
            .ensure_profile(&session)
            .await?;

        let contacts = Arc::new(RwLock::new(Vec::new()));
        let presence = Arc::new(PresenceService::new(
            store.clone(),
            session.clone(),
            contacts.clone(),
        ));
        let rooms = RoomService::new(store.clone(), config.rooms.clone());
        let default_room = rooms.default_room();
        let (messages_tx, _) = watch::channel(Vec::new());
        let (terminated_tx, _) = watch::channel(false);

        let this = Arc::new(Self {
            social: SocialService::new(store.clone(), config.social.clone()),
            signaling: SignalingService::new(store.clone(), bus.clone(), config.signaling.clone()),
            moderation: ModerationService::new(store.clone(), config.moderation.clone()),
            rooms,
            presence,
            contacts,
            requests: RwLock::new(Vec::new()),
            nudged: RwLock::new(HashSet::new()),
            active_room: RwLock::new(default_room.clone()),
            unread: Mutex::new(UnreadMonitor::new()),
            activity: Arc::new(Notify::new()),
            messages_tx,
            terminated_tx,
            tasks: Mutex::new(Vec::new()),
            room_task: Mutex::new(None),
            store,
            bus,
            config,
            session,
        });

        this.spawn_listeners().await?;
        this.attach_room(default_room).await?;
        tracing::info!(uid = %this.session.uid, "messenger session started");
        Ok(this)
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    // ----- cached views -----

    pub async fn contacts(&self) -> Vec<FriendEntry> {
        self.contacts.read().await.clone()
    }

    pub async fn friend_requests(&self) -> Vec<FriendRequest> {
        self.requests.read().await.clone()
    }

    pub async fn friend_statuses(&self) -> HashMap<String, UserStatus> {
        self.presence.friend_statuses().await
    }

    /// Contacts with an unseen nudge badge.
    pub async fn nudged_contacts(&self) -> HashSet<String> {
        self.nudged.read().await.clone()
    }

    pub async fn active_room(&self) -> Room {
        self.active_room.read().await.clone()
    }

    /// Counterpart of the active private room, if any.
    pub async fn active_contact(&self) -> Option<String> {
        self.active_room
            .read()
            .await
            .counterpart(&self.session.uid)
            .map(str::to_string)
    }

    /// Live feed of the active room, already in display order.
    pub fn messages(&self) -> watch::Receiver<Vec<RoomEntry>> {
        self.messages_tx.subscribe()
    }

    pub fn status(&self) -> UserStatus {
        self.presence.status()
    }

    /// Resolves true once the session has been terminated (sign-out or
    /// kill-switch).
    pub fn terminated(&self) -> watch::Receiver<bool> {
        self.terminated_tx.subscribe()
    }

    // ----- presence -----

    /// Shell input activity; feeds the auto-away timer.
    pub fn record_activity(&self) {
        self.activity.notify_one();
    }

    pub async fn set_status(&self, status: UserStatus) -> AppResult<()> {
        self.presence.set_status(status).await
    }

    // ----- social graph -----

    pub async fn search_user(&self, query: &str) -> AppResult<User> {
        self.social.search_user(query).await
    }

    pub async fn send_friend_request(&self, target: &User) -> AppResult<()> {
        let contacts = self.contacts.read().await.clone();
        self.social
            .send_request(&self.session, target, &contacts)
            .await?;
        self.bus.toast(
            ToastKind::Success,
            format!("Request sent to {}!", target.username),
        );
        Ok(())
    }

    pub async fn accept_request(&self, request: &FriendRequest) -> AppResult<AcceptOutcome> {
        let outcome = self
            .social
            .accept_request(&self.session, request, self.presence.status())
            .await?;
        match outcome {
            AcceptOutcome::Linked => self.bus.toast(
                ToastKind::Success,
                format!("Accepted {}!", request.from_name),
            ),
            AcceptOutcome::AlreadyFriends => self.bus.toast(
                ToastKind::Info,
                format!("{} is already your friend.", request.from_name),
            ),
        }
        Ok(outcome)
    }

    pub async fn decline_request(&self, request: &FriendRequest) -> AppResult<()> {
        self.social.decline_request(&self.session, request).await?;
        self.bus.toast(ToastKind::Info, "Request declined.");
        Ok(())
    }

    /// Removes the friendship on both sides; if the removed friend was
    /// the active chat target, falls back to the default global room.
    pub async fn unfriend(&self, friend_uid: &str) -> AppResult<()> {
        self.social.unfriend(&self.session, friend_uid).await?;
        let was_active = self.active_contact().await.as_deref() == Some(friend_uid);
        if was_active {
            self.attach_room(self.rooms.default_room()).await?;
        }
        Ok(())
    }

    // ----- rooms -----

    pub async fn open_global(&self, name: &str) -> AppResult<()> {
        if !self.rooms.is_known_global(name) {
            return Err(AppError::Validation(format!("unknown room {name}")));
        }
        self.attach_room(Room::global(name)).await
    }

    /// Opens the private chat with a friend. Opening is the read
    /// receipt: that contact's unread counter is zeroed, nobody else's.
    pub async fn open_contact(&self, friend_uid: &str) -> AppResult<()> {
        let known = self
            .contacts
            .read()
            .await
            .iter()
            .any(|c| c.uid == friend_uid);
        if !known {
            return Err(AppError::FriendNotFound);
        }

        self.nudged.write().await.remove(friend_uid);
        self.rooms.clear_unread(&self.session, friend_uid).await?;
        self.attach_room(Room::private(&self.session.uid, friend_uid))
            .await
    }

    pub async fn send_message(&self, text: &str) -> AppResult<()> {
        let room = self.active_room().await;
        self.rooms.send_chat(&self.session, &room, text).await?;
        self.bus.emit(ShellEvent::Sound(SoundEffect::Ding));
        Ok(())
    }

    pub async fn send_nudge(&self) -> AppResult<()> {
        let room = self.active_room().await;
        self.signaling
            .send_nudge(&self.session, &room, &self.rooms)
            .await
    }

    // ----- moderation -----

    pub async fn set_banned(&self, target_uid: &str, banned: bool) -> AppResult<()> {
        self.moderation
            .set_banned(&self.session, target_uid, banned)
            .await?;
        self.bus.toast(
            ToastKind::Success,
            format!("User {}", if banned { "BANNED" } else { "UNBANNED" }),
        );
        Ok(())
    }

    pub async fn list_users(&self) -> AppResult<Vec<User>> {
        self.moderation.list_users(&self.session).await
    }

    pub async fn request_delete(&self, key: &str) -> AppResult<PendingDeletion> {
        let room = self.active_room().await;
        self.moderation.request_delete(&self.session, &room, key)
    }

    pub async fn confirm_delete(&self, pending: &PendingDeletion) -> AppResult<()> {
        self.moderation.confirm_delete(&self.session, pending).await
    }

    // ----- lifecycle -----

    /// Writes `offline`, marks the session terminated and aborts every
    /// subscription task.
    pub async fn sign_out(&self) -> AppResult<()> {
        if let Err(err) = self.presence.go_offline().await {
            tracing::warn!(error = %err, "offline write failed during sign-out");
        }
        self.terminated_tx.send_replace(true);
        self.shutdown().await;
        tracing::info!(uid = %self.session.uid, "signed out");
        Ok(())
    }

    async fn shutdown(&self) {
        if let Some(handle) = self.room_task.lock().await.take() {
            handle.abort();
        }
        self.presence.clear_watchers().await;
        let mut tasks = self.tasks.lock().await;
        for handle in tasks.drain(..) {
            handle.abort();
        }
    }

    // ----- listener wiring -----

    async fn spawn_listeners(self: &Arc<Self>) -> AppResult<()> {
        let mut tasks = Vec::new();

        // Connection watcher: re-runs the presence handshake on every
        // reconnect so the offline marker is always re-armed.
        let presence = self.presence.clone();
        let mut connected = self.store.subscribe(&paths::connected()).await?;
        tasks.push(tokio::spawn(async move {
            while connected.changed().await.is_ok() {
                let online = connected
                    .current()
                    .and_then(|v| v.as_bool())
                    .unwrap_or(false);
                if online {
                    if let Err(err) = presence.establish().await {
                        tracing::warn!(error = %err, "presence handshake failed");
                    }
                }
            }
        }));

        // Auto-away timer.
        tasks.push(tokio::spawn(self.presence.clone().run_auto_away(
            self.activity.clone(),
            self.config.presence.idle_timeout,
        )));

        // Friend list.
        let this = Arc::clone(self);
        let mut friends = self.store.subscribe(&paths::friends(&self.session.uid)).await?;
        tasks.push(tokio::spawn(async move {
            while friends.changed().await.is_ok() {
                if let Err(err) = this.on_friends_snapshot(friends.current()).await {
                    tracing::warn!(error = %err, "friend list update failed");
                }
            }
        }));

        // Friend request inbox.
        let this = Arc::clone(self);
        let mut inbox = self
            .store
            .subscribe(&paths::friend_requests(&self.session.uid))
            .await?;
        tasks.push(tokio::spawn(async move {
            while inbox.changed().await.is_ok() {
                let requests = requests_from_snapshot(inbox.current());
                *this.requests.write().await = requests;
            }
        }));

        // Own nudge slot.
        let this = Arc::clone(self);
        let mut nudges = self
            .store
            .subscribe(&paths::latest_nudge(&self.session.uid))
            .await?;
        tasks.push(tokio::spawn(async move {
            while nudges.changed().await.is_ok() {
                match this
                    .signaling
                    .take_nudge(&this.session, nudges.current())
                    .await
                {
                    Ok(Some(signal)) => this.on_nudge(signal).await,
                    Ok(None) => {}
                    Err(err) => tracing::warn!(error = %err, "nudge handling failed"),
                }
            }
        }));

        // Ban kill-switch: push-based, fatal by design, fires once.
        let this = Arc::clone(self);
        let mut banned = self
            .store
            .subscribe(&paths::user_banned(&self.session.uid))
            .await?;
        tasks.push(tokio::spawn(async move {
            while banned.changed().await.is_ok() {
                let flagged = banned.current().and_then(|v| v.as_bool()).unwrap_or(false);
                if flagged {
                    this.on_banned().await;
                    break;
                }
            }
        }));

        self.tasks.lock().await.extend(tasks);
        Ok(())
    }

    /// Swaps the active room: the previous message subscription is
    /// dropped before the new one attaches.
    async fn attach_room(&self, room: Room) -> AppResult<()> {
        *self.active_room.write().await = room.clone();
        self.messages_tx.send_replace(Vec::new());

        let mut slot = self.room_task.lock().await;
        if let Some(handle) = slot.take() {
            handle.abort();
        }

        let mut sub = self.store.subscribe(&paths::room_messages(&room)).await?;
        let tx = self.messages_tx.clone();
        *slot = Some(tokio::spawn(async move {
            while sub.changed().await.is_ok() {
                tx.send_replace(entries_from_snapshot(sub.current()));
            }
        }));
        Ok(())
    }

    async fn on_friends_snapshot(&self, snapshot: Option<Value>) -> AppResult<()> {
        let list = friends_from_snapshot(snapshot);
        *self.contacts.write().await = list.clone();

        // Presence watchers follow the friend list.
        self.presence
            .sync_watchers(list.iter().map(|c| c.uid.clone()).collect())
            .await;

        // Background message ding, on strict unread increase only.
        let total: u32 = list.iter().map(|c| c.unread_count).sum();
        if self.unread.lock().await.observe(total) {
            self.bus.emit(ShellEvent::Sound(SoundEffect::Ding));
            self.bus.emit(ShellEvent::FlashTaskbar {
                app: MESSENGER_APP,
                force: false,
            });
        }

        // Read-by-presence: the open chat swallows its own unread.
        let room = self.active_room.read().await.clone();
        if let Some(active) = room.counterpart(&self.session.uid) {
            if list.iter().any(|c| c.uid == active && c.unread_count > 0) {
                self.rooms.clear_unread(&self.session, active).await?;
            }
        }
        Ok(())
    }

    async fn on_nudge(&self, signal: NudgeSignal) {
        // The ack is already persisted; everything below may re-run
        // without consequence.
        self.bus.emit(ShellEvent::Sound(SoundEffect::Nudge));

        let from_active = self.active_contact().await.as_deref() == Some(signal.sender_uid.as_str());
        if !from_active {
            self.nudged.write().await.insert(signal.sender_uid.clone());
            self.bus.emit(ShellEvent::FlashTaskbar {
                app: MESSENGER_APP,
                force: true,
            });
        }
        tracing::debug!(from = %signal.sender_uid, "nudge received");
    }

    async fn on_banned(&self) {
        tracing::warn!(uid = %self.session.uid, "ban flag observed, terminating session");
        self.bus.emit(ShellEvent::Sound(SoundEffect::Banned));
        self.bus.emit(ShellEvent::Toast {
            title: "SYSTEM ERROR: ACCESS_DENIED".to_string(),
            message: "You have been banned by administrator.".to_string(),
            kind: ToastKind::Error,
        });

        tokio::time::sleep(self.config.moderation.kick_delay).await;
        if let Err(err) = self.sign_out().await {
            tracing::warn!(error = %err, "forced sign-out failed");
        }
    }
}

fn friends_from_snapshot(snapshot: Option<Value>) -> Vec<FriendEntry> {
    snapshot
        .as_ref()
        .and_then(Value::as_object)
        .map(|children| {
            children
                .iter()
                .filter_map(|(uid, value)| {
                    match serde_json::from_value::<FriendEntry>(value.clone()) {
                        Ok(entry) => Some(entry),
                        Err(err) => {
                            tracing::warn!(uid = %uid, error = %err, "skipping malformed friend entry");
                            None
                        }
                    }
                })
                .collect()
        })
        .unwrap_or_default()
}

fn requests_from_snapshot(snapshot: Option<Value>) -> Vec<FriendRequest> {
    snapshot
        .as_ref()
        .and_then(Value::as_object)
        .map(|children| {
            children
                .iter()
                .filter_map(|(key, value)| {
                    match serde_json::from_value::<FriendRequest>(value.clone()) {
                        Ok(request) => Some(request),
                        Err(err) => {
                            tracing::warn!(key = %key, error = %err, "skipping malformed friend request");
                            None
                        }
                    }
                })
                .collect()
        })
        .unwrap_or_default()
}
