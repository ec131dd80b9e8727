//! Tick scheduler
//!
//! Deferred and periodic callbacks keyed by owning plugin, advanced once per
//! logical tick by [`Scheduler::heartbeat`].
//!
//! Due tasks run in ascending `(due tick, task id)` order. Task ids grow
//! monotonically, so the id doubles as registration order for same-tick ties.
//!
//! The scheduler is a cheap-clone handle. Its lock is released while a task
//! runs, so a task may schedule or cancel other tasks. Those changes apply from
//! the next heartbeat on: the set of tasks selected for the current heartbeat
//! is fixed when the heartbeat starts.

use crate::guard::guarded;
use hoyo_kernel::{PluginId, PluginResult, PreconditionViolation, TaskId, Tick};
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, warn};

type OnceCallback = Box<dyn FnOnce() -> PluginResult<()> + Send>;
type RepeatingCallback = Box<dyn FnMut() -> PluginResult<()> + Send>;

enum TaskBody {
    Once(OnceCallback),
    Repeating {
        period: Tick,
        callback: RepeatingCallback,
    },
}

struct ScheduledTask {
    id: TaskId,
    owner: PluginId,
    due: Tick,
    body: TaskBody,
}

#[derive(Default)]
struct SchedulerState {
    current_tick: Tick,
    next_id: u64,
    queue: BTreeSet<(Tick, TaskId)>,
    tasks: HashMap<TaskId, ScheduledTask>,
    /// Tasks taken out of the queue by the running heartbeat.
    in_flight: HashMap<TaskId, PluginId>,
    /// In-flight tasks cancelled while the heartbeat runs; not re-armed.
    cancelled_in_flight: HashSet<TaskId>,
}

impl SchedulerState {
    fn insert(&mut self, owner: PluginId, due: Tick, body: TaskBody) -> TaskId {
        self.next_id += 1;
        let id = TaskId(self.next_id);
        self.queue.insert((due, id));
        self.tasks.insert(
            id,
            ScheduledTask {
                id,
                owner,
                due,
                body,
            },
        );
        id
    }

    fn remove(&mut self, id: TaskId) -> bool {
        match self.tasks.remove(&id) {
            Some(task) => {
                self.queue.remove(&(task.due, id));
                true
            }
            None => false,
        }
    }
}

/// Outcome of one heartbeat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HeartbeatReport {
    pub tick: Tick,
    pub executed: usize,
    pub failed: usize,
}

/// 逻辑时钟调度器
/// Tick scheduler handle
#[derive(Clone, Default)]
pub struct Scheduler {
    state: Arc<Mutex<SchedulerState>>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `callback` once at `current_tick + delay`.
    ///
    /// A delay of 0 fires on the next heartbeat.
    pub fn schedule_once<F>(&self, delay: Tick, owner: PluginId, callback: F) -> TaskId
    where
        F: FnOnce() -> PluginResult<()> + Send + 'static,
    {
        let mut state = self.state.lock();
        let due = state.current_tick.saturating_add(delay);
        let id = state.insert(owner.clone(), due, TaskBody::Once(Box::new(callback)));
        debug!("Scheduled {} for {} at tick {}", id, owner, due);
        id
    }

    /// Run `callback` every `period` ticks, first at `current_tick + period`.
    pub fn schedule_repeating<F>(
        &self,
        period: Tick,
        owner: PluginId,
        callback: F,
    ) -> Result<TaskId, PreconditionViolation>
    where
        F: FnMut() -> PluginResult<()> + Send + 'static,
    {
        if period == 0 {
            return Err(PreconditionViolation::ZeroPeriod);
        }
        let mut state = self.state.lock();
        let due = state.current_tick.saturating_add(period);
        let id = state.insert(
            owner.clone(),
            due,
            TaskBody::Repeating {
                period,
                callback: Box::new(callback),
            },
        );
        debug!(
            "Scheduled repeating {} for {} every {} ticks from tick {}",
            id, owner, period, due
        );
        Ok(id)
    }

    /// Cancel a task. Unknown or already finished ids are ignored.
    pub fn cancel(&self, id: TaskId) {
        let mut state = self.state.lock();
        if !state.remove(id) && state.in_flight.contains_key(&id) {
            state.cancelled_in_flight.insert(id);
        }
    }

    /// Cancel every task owned by `owner`. Returns how many were removed.
    pub fn cancel_all(&self, owner: &PluginId) -> usize {
        let mut state = self.state.lock();
        let owned: Vec<TaskId> = state
            .tasks
            .values()
            .filter(|task| &task.owner == owner)
            .map(|task| task.id)
            .collect();
        for id in &owned {
            state.remove(*id);
        }

        let in_flight: Vec<TaskId> = state
            .in_flight
            .iter()
            .filter(|(_, task_owner)| *task_owner == owner)
            .map(|(id, _)| *id)
            .collect();
        state.cancelled_in_flight.extend(in_flight);

        if !owned.is_empty() {
            debug!("Cancelled {} task(s) owned by {}", owned.len(), owner);
        }
        owned.len()
    }

    /// Advance the clock to `tick` and run every task due at or before it.
    pub fn heartbeat(&self, tick: Tick) -> HeartbeatReport {
        let due = {
            let mut state = self.state.lock();
            if tick < state.current_tick {
                warn!(
                    "Heartbeat for tick {} ignored: clock is already at {}",
                    tick, state.current_tick
                );
            }
            state.current_tick = state.current_tick.max(tick);
            let now = state.current_tick;

            let ready: Vec<(Tick, TaskId)> = state
                .queue
                .iter()
                .take_while(|(due, _)| *due <= now)
                .copied()
                .collect();

            let mut due = Vec::with_capacity(ready.len());
            for key in ready {
                state.queue.remove(&key);
                if let Some(task) = state.tasks.remove(&key.1) {
                    state.in_flight.insert(task.id, task.owner.clone());
                    due.push(task);
                }
            }
            due
        };

        let mut report = HeartbeatReport {
            tick,
            ..Default::default()
        };

        for task in due {
            let ScheduledTask { id, owner, body, .. } = task;
            report.executed += 1;

            let rearm = match body {
                TaskBody::Once(callback) => {
                    if let Err(err) = guarded(&owner, callback) {
                        report.failed += 1;
                        warn!("Scheduled {} failed at tick {}: {}", id, tick, err);
                    }
                    None
                }
                TaskBody::Repeating {
                    period,
                    mut callback,
                } => {
                    if let Err(err) = guarded(&owner, &mut callback) {
                        report.failed += 1;
                        warn!("Scheduled {} failed at tick {}: {}", id, tick, err);
                    }
                    Some((period, callback))
                }
            };

            let mut state = self.state.lock();
            state.in_flight.remove(&id);
            let cancelled = state.cancelled_in_flight.remove(&id);
            if cancelled {
                debug!("{} cancelled during tick {}; not re-armed", id, tick);
                continue;
            }
            if let Some((period, callback)) = rearm {
                let due = state.current_tick.saturating_add(period);
                state.queue.insert((due, id));
                state.tasks.insert(
                    id,
                    ScheduledTask {
                        id,
                        owner,
                        due,
                        body: TaskBody::Repeating { period, callback },
                    },
                );
            }
        }

        report
    }

    pub fn current_tick(&self) -> Tick {
        self.state.lock().current_tick
    }

    /// Number of tasks waiting for a future heartbeat.
    pub fn pending(&self) -> usize {
        self.state.lock().tasks.len()
    }

    pub fn pending_for(&self, owner: &PluginId) -> usize {
        self.state
            .lock()
            .tasks
            .values()
            .filter(|task| &task.owner == owner)
            .count()
    }

    pub fn is_scheduled(&self, id: TaskId) -> bool {
        self.state.lock().tasks.contains_key(&id)
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Scheduler")
            .field("current_tick", &state.current_tick)
            .field("pending", &state.tasks.len())
            .finish()
    }
}
