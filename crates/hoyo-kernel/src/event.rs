//! Event model for the synchronous event bus.
//!
//! Event kinds are dotted paths. A kind's ancestors are its dot-separated
//! prefixes, so a listener registered for `bot.message` also receives
//! `bot.message.created`.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kinds published by the host itself.
pub mod kinds {
    /// Published once after every loaded plugin has been enabled.
    pub const HOST_STARTED: &str = "host.started";
    /// Published when the tick loop exits, before plugins are disabled.
    pub const HOST_STOPPING: &str = "host.stopping";
    /// One item drained from the network listener's inbound queue.
    pub const NETWORK_INBOUND: &str = "network.inbound";
}

/// Hierarchical event kind, e.g. `network.inbound`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventKind(String);

impl EventKind {
    pub fn new(kind: impl Into<String>) -> Self {
        let kind: String = kind.into();
        Self(kind.trim_matches('.').to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The direct ancestor kind, `None` for a root kind.
    pub fn parent(&self) -> Option<EventKind> {
        self.0
            .rsplit_once('.')
            .map(|(parent, _)| EventKind(parent.to_string()))
    }

    /// This kind followed by all of its ancestors, most specific first.
    pub fn lineage(&self) -> Vec<EventKind> {
        let mut lineage = vec![self.clone()];
        let mut current = self.parent();
        while let Some(kind) = current {
            current = kind.parent();
            lineage.push(kind);
        }
        lineage
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EventKind {
    fn from(kind: &str) -> Self {
        Self::new(kind)
    }
}

impl From<String> for EventKind {
    fn from(kind: String) -> Self {
        Self::new(kind)
    }
}

/// A single dispatch. Created per call, never persisted.
///
/// Listeners receive `&mut Event` and may flip the cancelled flag; the flag is
/// visible to every later listener and to the caller after dispatch returns.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    kind: EventKind,
    payload: serde_json::Value,
    cancelled: bool,
}

impl Event {
    pub fn new(kind: impl Into<EventKind>, payload: serde_json::Value) -> Self {
        Self {
            kind: kind.into(),
            payload,
            cancelled: false,
        }
    }

    /// An event without payload.
    pub fn signal(kind: impl Into<EventKind>) -> Self {
        Self::new(kind, serde_json::Value::Null)
    }

    pub fn kind(&self) -> &EventKind {
        &self.kind
    }

    pub fn payload(&self) -> &serde_json::Value {
        &self.payload
    }

    pub fn payload_mut(&mut self) -> &mut serde_json::Value {
        &mut self.payload
    }

    /// Deserialize the payload into a typed value.
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.payload.clone())
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    pub fn set_cancelled(&mut self, cancelled: bool) {
        self.cancelled = cancelled;
    }

    pub fn cancel(&mut self) {
        self.cancelled = true;
    }
}
