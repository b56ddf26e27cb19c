//! Progress and diagnostic notifications
//!
//! Every phase of an operation reports a human-readable [`PackageEvent`].
//! Events are always written to `tracing`; hosts that want them as data
//! register a [`PackageObserver`]. Observers never influence control flow.

use std::fmt;
use std::sync::Arc;

use tokio::sync::mpsc;

/// Stage of an operation an event belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Manifest,
    CheckInstall,
    Fetch,
    Download,
    Extract,
    Dependency,
    Update,
    Uninstall,
    Cleanup,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Manifest => "manifest",
            Phase::CheckInstall => "check-install",
            Phase::Fetch => "fetch",
            Phase::Download => "download",
            Phase::Extract => "extract",
            Phase::Dependency => "dependency",
            Phase::Update => "update",
            Phase::Uninstall => "uninstall",
            Phase::Cleanup => "cleanup",
        };
        f.write_str(name)
    }
}

/// Severity of an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum EventLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// A single notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageEvent {
    pub phase: Phase,
    pub level: EventLevel,
    pub package_id: Option<String>,
    pub message: String,
}

impl fmt::Display for PackageEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.package_id {
            Some(id) => write!(f, "[{}] {}: {}", self.phase, id, self.message),
            None => write!(f, "[{}] {}", self.phase, self.message),
        }
    }
}

/// Receiver of package manager notifications
pub trait PackageObserver: Send + Sync {
    fn on_event(&self, event: &PackageEvent);
}

impl<F> PackageObserver for F
where
    F: Fn(&PackageEvent) + Send + Sync,
{
    fn on_event(&self, event: &PackageEvent) {
        self(event)
    }
}

/// Observer that forwards events into an unbounded channel
pub struct ChannelObserver {
    sender: mpsc::UnboundedSender<PackageEvent>,
}

impl ChannelObserver {
    /// Create an observer together with the receiving end of its channel
    pub fn new() -> (Self, mpsc::UnboundedReceiver<PackageEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl PackageObserver for ChannelObserver {
    fn on_event(&self, event: &PackageEvent) {
        // A dropped receiver just means nobody is listening anymore
        let _ = self.sender.send(event.clone());
    }
}

/// Fans events out to `tracing` and every registered observer
#[derive(Clone, Default)]
pub struct Notifier {
    observers: Vec<Arc<dyn PackageObserver>>,
    debug: bool,
}

impl fmt::Debug for Notifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Notifier")
            .field("observers", &self.observers.len())
            .field("debug", &self.debug)
            .finish()
    }
}

impl Notifier {
    /// Create a notifier; debug events reach observers only when `debug` is set
    pub fn new(debug: bool) -> Self {
        Self {
            observers: Vec::new(),
            debug,
        }
    }

    pub fn subscribe(&mut self, observer: Arc<dyn PackageObserver>) {
        self.observers.push(observer);
    }

    pub fn emit(&self, phase: Phase, level: EventLevel, package_id: Option<&str>, message: String) {
        let id = package_id.unwrap_or("-");
        match level {
            EventLevel::Debug => tracing::debug!(%phase, package = id, "{}", message),
            EventLevel::Info => tracing::info!(%phase, package = id, "{}", message),
            EventLevel::Warn => tracing::warn!(%phase, package = id, "{}", message),
            EventLevel::Error => tracing::error!(%phase, package = id, "{}", message),
        }

        if level == EventLevel::Debug && !self.debug {
            return;
        }

        if self.observers.is_empty() {
            return;
        }

        let event = PackageEvent {
            phase,
            level,
            package_id: package_id.map(str::to_string),
            message,
        };
        for observer in &self.observers {
            observer.on_event(&event);
        }
    }

    pub fn debug(&self, phase: Phase, package_id: &str, message: impl Into<String>) {
        self.emit(phase, EventLevel::Debug, Some(package_id), message.into());
    }

    pub fn info(&self, phase: Phase, package_id: &str, message: impl Into<String>) {
        self.emit(phase, EventLevel::Info, Some(package_id), message.into());
    }

    pub fn warn(&self, phase: Phase, package_id: &str, message: impl Into<String>) {
        self.emit(phase, EventLevel::Warn, Some(package_id), message.into());
    }

    pub fn error(&self, phase: Phase, package_id: &str, message: impl Into<String>) {
        self.emit(phase, EventLevel::Error, Some(package_id), message.into());
    }
}
