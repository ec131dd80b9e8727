//! Synchronous event bus
//!
//! Listeners register for an [`EventKind`] with an integer priority. A
//! dispatch runs every listener registered for the event's kind or any of its
//! ancestors, highest priority first, ties by registration order, and returns
//! once all of them have run.
//!
//! Like the scheduler, the bus is a cheap-clone handle and releases its lock
//! while a listener runs. A listener may subscribe, unsubscribe or dispatch
//! nested events; a listener removed mid-dispatch is skipped for the rest of
//! that dispatch.

use crate::guard::guarded;
use hoyo_kernel::{CallbackError, Event, EventKind, ListenerId, PluginId, PluginResult};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

type Handler = Arc<Mutex<Box<dyn FnMut(&mut Event) -> PluginResult<()> + Send>>>;

struct Listener {
    id: ListenerId,
    owner: PluginId,
    priority: i32,
    handler: Handler,
}

#[derive(Default)]
struct BusState {
    next_id: u64,
    by_kind: HashMap<EventKind, Vec<Listener>>,
    kind_of: HashMap<ListenerId, EventKind>,
}

/// Outcome of one dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DispatchReport {
    pub invoked: usize,
    pub failed: usize,
}

/// 事件总线
/// Event bus handle
#[derive(Clone, Default)]
pub struct EventBus {
    state: Arc<Mutex<BusState>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(
        &self,
        kind: impl Into<EventKind>,
        priority: i32,
        owner: PluginId,
        handler: F,
    ) -> ListenerId
    where
        F: FnMut(&mut Event) -> PluginResult<()> + Send + 'static,
    {
        let kind = kind.into();
        let mut state = self.state.lock();
        state.next_id += 1;
        let id = ListenerId(state.next_id);
        debug!("{} subscribed {} to '{}' (priority {})", owner, id, kind, priority);
        state.kind_of.insert(id, kind.clone());
        state.by_kind.entry(kind).or_default().push(Listener {
            id,
            owner,
            priority,
            handler: Arc::new(Mutex::new(Box::new(handler))),
        });
        id
    }

    /// Remove one listener. Returns whether it was registered.
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut state = self.state.lock();
        let Some(kind) = state.kind_of.remove(&id) else {
            return false;
        };
        if let Some(listeners) = state.by_kind.get_mut(&kind) {
            listeners.retain(|l| l.id != id);
            if listeners.is_empty() {
                state.by_kind.remove(&kind);
            }
        }
        true
    }

    /// Remove every listener owned by `owner`. Returns how many were removed.
    pub fn unsubscribe_all(&self, owner: &PluginId) -> usize {
        let mut state = self.state.lock();
        let mut removed = Vec::new();
        state.by_kind.retain(|_, listeners| {
            listeners.retain(|l| {
                if &l.owner == owner {
                    removed.push(l.id);
                    false
                } else {
                    true
                }
            });
            !listeners.is_empty()
        });
        for id in &removed {
            state.kind_of.remove(id);
        }
        if !removed.is_empty() {
            debug!("Removed {} listener(s) owned by {}", removed.len(), owner);
        }
        removed.len()
    }

    /// Deliver `event` to every matching listener.
    pub fn dispatch(&self, event: &mut Event) -> DispatchReport {
        let snapshot: Vec<(ListenerId, PluginId, Handler)> = {
            let state = self.state.lock();
            let mut matching: Vec<&Listener> = event
                .kind()
                .lineage()
                .iter()
                .filter_map(|kind| state.by_kind.get(kind))
                .flatten()
                .collect();
            matching.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.id.cmp(&b.id)));
            matching
                .into_iter()
                .map(|l| (l.id, l.owner.clone(), l.handler.clone()))
                .collect()
        };

        let mut report = DispatchReport::default();
        for (id, owner, handler) in snapshot {
            if !self.state.lock().kind_of.contains_key(&id) {
                continue;
            }

            report.invoked += 1;
            let result = match handler.try_lock() {
                Some(mut handler) => guarded(&owner, || (*handler)(event)),
                None => Err(CallbackError::Reentrant {
                    owner: owner.clone(),
                }),
            };
            if let Err(err) = result {
                report.failed += 1;
                warn!("Listener {} failed on '{}': {}", id, event.kind(), err);
            }
        }
        report
    }

    pub fn listener_count(&self) -> usize {
        self.state.lock().kind_of.len()
    }

    pub fn listeners_for(&self, owner: &PluginId) -> usize {
        self.state
            .lock()
            .by_kind
            .values()
            .flatten()
            .filter(|l| &l.owner == owner)
            .count()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("listeners", &self.listener_count())
            .finish()
    }
}
