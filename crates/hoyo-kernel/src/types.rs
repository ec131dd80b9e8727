//! Identifiers shared by the scheduler, the event bus and the plugin host.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One discrete advance of the logical clock.
pub type Tick = u64;

/// Owner key used to attribute scheduled tasks and listeners to a plugin.
///
/// Ownership is by name: every registration made through a plugin's context
/// carries the plugin's id, so the host can revoke all of them at once.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PluginId(String);

impl PluginId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PluginId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PluginId {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for PluginId {
    fn from(name: String) -> Self {
        Self(name)
    }
}

impl AsRef<str> for PluginId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Handle returned by the scheduler for a registered task.
///
/// Ids are allocated monotonically, so comparing two ids compares their
/// registration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(pub u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task#{}", self.0)
    }
}

/// Handle returned by the event bus for a registered listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ListenerId(pub u64);

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener#{}", self.0)
    }
}
