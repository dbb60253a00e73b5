use tokio::sync::broadcast;

/// App id the shell uses for the messenger taskbar button.
pub const MESSENGER_APP: &str = "messenger";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SoundEffect {
    Ding,
    Nudge,
    Banned,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToastKind {
    Info,
    Success,
    Warning,
    Error,
}

/// One-way notifications from the messaging core to the surrounding
/// shell. Fire-and-forget; nobody acknowledges them.
#[derive(Debug, Clone)]
pub enum ShellEvent {
    FlashTaskbar { app: &'static str, force: bool },
    Toast {
        title: String,
        message: String,
        kind: ToastKind,
    },
    Sound(SoundEffect),
}

/// Typed in-process event channel scoped to the shell's lifetime.
#[derive(Clone)]
pub struct ShellBus {
    tx: broadcast::Sender<ShellEvent>,
}

impl ShellBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        ShellBus { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ShellEvent> {
        self.tx.subscribe()
    }

    /// Emits an event; dropped silently when nobody is listening.
    pub fn emit(&self, event: ShellEvent) {
        let _ = self.tx.send(event);
    }

    pub fn toast(&self, kind: ToastKind, message: impl Into<String>) {
        self.emit(ShellEvent::Toast {
            title: "Messenger".to_string(),
            message: message.into(),
            kind,
        });
    }
}

impl Default for ShellBus {
    fn default() -> Self {
        ShellBus::new(64)
    }
}
