//! Recording plugin for lifecycle and runtime tests.
//!
//! Every hook, task run and event delivery is appended to a shared
//! [`Journal`] as `"<plugin>:<what>"`, so tests can assert on exact order.

use hoyo_runtime::kernel::{PluginDescriptor, PluginError, PluginResult, Tick};
use hoyo_runtime::{Plugin, PluginContext, PluginPackage, PluginRegistry};
use parking_lot::Mutex;
use std::sync::Arc;

#[derive(Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
    pub fn record(&self, entry: impl Into<String>) {
        self.0.lock().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().clone()
    }

    /// Entries ending in `suffix`, in order.
    pub fn with_suffix(&self, suffix: &str) -> Vec<String> {
        self.0
            .lock()
            .iter()
            .filter(|e| e.ends_with(suffix))
            .cloned()
            .collect()
    }

    pub fn count(&self, entry: &str) -> usize {
        self.0.lock().iter().filter(|e| e.as_str() == entry).count()
    }

    pub fn count_prefix(&self, prefix: &str) -> usize {
        self.0.lock().iter().filter(|e| e.starts_with(prefix)).count()
    }

    pub fn clear(&self) {
        self.0.lock().clear();
    }
}

/// What a recorder does in its hooks.
#[derive(Clone, Default)]
pub struct Behavior {
    pub fail_startup: bool,
    pub fail_enable: bool,
    pub panic_enable: bool,
    pub fail_disable: bool,
    /// Register a repeating task with this period on enable.
    pub task_period: Option<Tick>,
    /// Register a one-shot task with this delay on enable.
    pub once_delay: Option<Tick>,
    /// Subscribe to these kinds on enable, priority 0.
    pub listen_to: Vec<&'static str>,
    /// Register a repeating task from the startup hook.
    pub startup_task: bool,
}

impl Behavior {
    pub fn quiet() -> Self {
        Self::default()
    }

    pub fn listening(kinds: &[&'static str]) -> Self {
        Self {
            listen_to: kinds.to_vec(),
            ..Self::default()
        }
    }
}

pub struct Recorder {
    name: String,
    journal: Journal,
    behavior: Behavior,
}

impl Recorder {
    fn record(&self, what: &str) {
        self.journal.record(format!("{}:{}", self.name, what));
    }
}

impl Plugin for Recorder {
    fn on_startup(&mut self, ctx: &PluginContext) -> PluginResult<()> {
        self.record("startup");
        if self.behavior.startup_task {
            let journal = self.journal.clone();
            let name = self.name.clone();
            ctx.schedule_repeating(1, move || {
                journal.record(format!("{}:startup-task", name));
                Ok(())
            })
            .map_err(|e| PluginError::InitFailed(e.to_string()))?;
        }
        if self.behavior.fail_startup {
            return Err(PluginError::InitFailed("startup refused".into()));
        }
        Ok(())
    }

    fn on_enable(&mut self, ctx: &PluginContext) -> PluginResult<()> {
        self.record("enable");

        if let Some(period) = self.behavior.task_period {
            let journal = self.journal.clone();
            let name = self.name.clone();
            let clock = ctx.clone();
            ctx.schedule_repeating(period, move || {
                journal.record(format!("{}:task@{}", name, clock.current_tick()));
                Ok(())
            })
            .map_err(|e| PluginError::ExecutionFailed(e.to_string()))?;
        }

        if let Some(delay) = self.behavior.once_delay {
            let journal = self.journal.clone();
            let name = self.name.clone();
            let clock = ctx.clone();
            ctx.schedule_once(delay, move || {
                journal.record(format!("{}:once@{}", name, clock.current_tick()));
                Ok(())
            });
        }

        for kind in &self.behavior.listen_to {
            let journal = self.journal.clone();
            let name = self.name.clone();
            ctx.subscribe(*kind, 0, move |event| {
                journal.record(format!("{}:event:{}", name, event.kind()));
                Ok(())
            });
        }

        if self.behavior.panic_enable {
            panic!("{} blew up while enabling", self.name);
        }
        if self.behavior.fail_enable {
            return Err(PluginError::ExecutionFailed("enable refused".into()));
        }
        Ok(())
    }

    fn on_disable(&mut self, _ctx: &PluginContext) -> PluginResult<()> {
        self.record("disable");
        if self.behavior.fail_disable {
            return Err(PluginError::ExecutionFailed("disable refused".into()));
        }
        Ok(())
    }
}

/// Registry with one recorder per `(entry point, behavior)`. Each one journals
/// under its entry point name.
pub fn registry(journal: &Journal, plugins: &[(&str, Behavior)]) -> PluginRegistry {
    let mut registry = PluginRegistry::new();
    for (name, behavior) in plugins {
        let journal = journal.clone();
        let behavior = behavior.clone();
        let plugin_name = name.to_string();
        registry.register(name, move || {
            Box::new(Recorder {
                name: plugin_name.clone(),
                journal: journal.clone(),
                behavior: behavior.clone(),
            })
        });
    }
    registry
}

/// Builtin package whose entry point equals its name.
pub fn builtin(name: &str, dependencies: &[&str]) -> PluginPackage {
    let descriptor = dependencies
        .iter()
        .fold(PluginDescriptor::new(name, "1.0.0", name), |d, dep| d.with_dependency(dep));
    PluginPackage::builtin(descriptor)
}
