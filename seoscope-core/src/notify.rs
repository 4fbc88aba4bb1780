// User-visible notifications (the toast channel)

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyLevel {
    Info,
    Success,
    Warn,
    Error,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub level: NotifyLevel,
    pub message: String,
    pub at: DateTime<Utc>,
}

/// Sends transient notifications to whichever view shows them. Every
/// notification is also logged.
#[derive(Debug, Clone, Default)]
pub struct Notifier {
    tx: Option<mpsc::UnboundedSender<Notification>>,
}

impl Notifier {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// A notifier that only logs.
    pub fn silent() -> Self {
        Self { tx: None }
    }

    pub fn info(&self, message: impl Into<String>) {
        self.send(NotifyLevel::Info, message.into());
    }

    pub fn success(&self, message: impl Into<String>) {
        self.send(NotifyLevel::Success, message.into());
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.send(NotifyLevel::Warn, message.into());
    }

    pub fn error(&self, message: impl Into<String>) {
        self.send(NotifyLevel::Error, message.into());
    }

    fn send(&self, level: NotifyLevel, message: String) {
        match level {
            NotifyLevel::Info | NotifyLevel::Success => info!("{}", message),
            NotifyLevel::Warn => warn!("{}", message),
            NotifyLevel::Error => error!("{}", message),
        }
        if let Some(ref tx) = self.tx {
            // The receiving view may already be gone.
            let _ = tx.send(Notification {
                level,
                message,
                at: Utc::now(),
            });
        }
    }
}
