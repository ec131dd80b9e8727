//! 插件运行时
//! Plugin runtime: the [`Plugin`] capability trait, the [`PluginContext`]
//! handed to every hook, the build-time [`PluginRegistry`], and the
//! [`PluginHost`] lifecycle manager.

use crate::bus::{DispatchReport, EventBus};
use crate::config::SharedConfig;
use crate::scheduler::Scheduler;
use hoyo_kernel::{
    Event, EventKind, ListenerId, PluginDescriptor, PluginError, PluginId, PluginResult,
    PreconditionViolation, TaskId, Tick,
};
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub mod dependency;
pub mod host;
pub mod package;

pub use dependency::{DependencyGraph, LoadPlan, resolve_load_order};
pub use host::{PluginHost, PluginInstance};
pub use package::{Discovery, PackageSource, PluginPackage, discover};

// ============================================================================
// 插件接口
// ============================================================================

/// 插件能力接口
/// Capability trait implemented by every plugin.
///
/// Only `on_enable` is required. Hooks run on the control thread; errors and
/// panics are contained by the host.
pub trait Plugin: Send {
    /// Called once right after the plugin is loaded, before the first enable.
    fn on_startup(&mut self, _ctx: &PluginContext) -> PluginResult<()> {
        Ok(())
    }

    fn on_enable(&mut self, ctx: &PluginContext) -> PluginResult<()>;

    /// Tasks and listeners are revoked after this returns, even on error.
    fn on_disable(&mut self, _ctx: &PluginContext) -> PluginResult<()> {
        Ok(())
    }
}

// ============================================================================
// 插件上下文
// ============================================================================

/// 插件上下文
/// Everything a plugin may touch, scoped to that plugin.
///
/// Tasks and listeners registered through the context are owned by the plugin
/// and revoked as a unit when it is disabled.
#[derive(Clone)]
pub struct PluginContext {
    owner: PluginId,
    descriptor: Arc<PluginDescriptor>,
    data_dir: PathBuf,
    package: Arc<PluginPackage>,
    config: SharedConfig,
    scheduler: Scheduler,
    events: EventBus,
}

impl PluginContext {
    pub(crate) fn new(
        package: Arc<PluginPackage>,
        data_dir: PathBuf,
        config: SharedConfig,
        scheduler: Scheduler,
        events: EventBus,
    ) -> Self {
        let descriptor = Arc::new(package.descriptor().clone());
        Self {
            owner: PluginId::new(descriptor.name.clone()),
            descriptor,
            data_dir,
            package,
            config,
            scheduler,
            events,
        }
    }

    pub fn owner(&self) -> &PluginId {
        &self.owner
    }

    pub fn descriptor(&self) -> &PluginDescriptor {
        &self.descriptor
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// The plugin's `config.yml` store.
    pub fn config(&self) -> &SharedConfig {
        &self.config
    }

    pub fn current_tick(&self) -> Tick {
        self.scheduler.current_tick()
    }

    pub fn schedule_once<F>(&self, delay: Tick, callback: F) -> TaskId
    where
        F: FnOnce() -> PluginResult<()> + Send + 'static,
    {
        self.scheduler.schedule_once(delay, self.owner.clone(), callback)
    }

    pub fn schedule_repeating<F>(&self, period: Tick, callback: F) -> Result<TaskId, PreconditionViolation>
    where
        F: FnMut() -> PluginResult<()> + Send + 'static,
    {
        self.scheduler.schedule_repeating(period, self.owner.clone(), callback)
    }

    pub fn cancel(&self, task: TaskId) {
        self.scheduler.cancel(task);
    }

    pub fn subscribe<F>(&self, kind: impl Into<EventKind>, priority: i32, handler: F) -> ListenerId
    where
        F: FnMut(&mut Event) -> PluginResult<()> + Send + 'static,
    {
        self.events.subscribe(kind, priority, self.owner.clone(), handler)
    }

    pub fn unsubscribe(&self, listener: ListenerId) -> bool {
        self.events.unsubscribe(listener)
    }

    pub fn dispatch(&self, event: &mut Event) -> DispatchReport {
        self.events.dispatch(event)
    }

    /// Read a file bundled in the plugin package.
    pub fn resource(&self, name: &str) -> PluginResult<Option<Vec<u8>>> {
        Ok(self.package.read_resource(name)?)
    }

    /// Copy a bundled file into the data directory.
    ///
    /// Returns `false` when the target exists and `replace` is not set.
    pub fn save_resource(&self, name: &str, replace: bool) -> PluginResult<bool> {
        self.save_resource_as(name, name, replace)
    }

    /// Copy bundled file `name` to `target` inside the data directory.
    pub fn save_resource_as(&self, name: &str, target: &str, replace: bool) -> PluginResult<bool> {
        if !package::is_safe_resource_name(target) {
            return Err(PluginError::Other(format!("invalid resource target '{}'", target)));
        }
        let bytes = self.package.read_resource(name)?.ok_or_else(|| {
            PluginError::from(io::Error::new(
                io::ErrorKind::NotFound,
                format!("resource '{}' is not bundled with {}", name, self.owner),
            ))
        })?;

        let path = self.data_dir.join(target);
        if path.exists() && !replace {
            return Ok(false);
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, bytes)?;
        Ok(true)
    }
}

impl fmt::Debug for PluginContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginContext")
            .field("owner", &self.owner)
            .field("data_dir", &self.data_dir)
            .finish()
    }
}

// ============================================================================
// 插件注册表
// ============================================================================

pub type PluginFactory = Box<dyn Fn() -> Box<dyn Plugin> + Send + Sync>;

/// 插件注册表
/// Entry point identifiers mapped to plugin factories, filled at build time.
#[derive(Default)]
pub struct PluginRegistry {
    factories: HashMap<String, PluginFactory>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory. A second registration for the same entry point
    /// replaces the first.
    pub fn register<F>(&mut self, entry_point: &str, factory: F) -> &mut Self
    where
        F: Fn() -> Box<dyn Plugin> + Send + Sync + 'static,
    {
        self.factories.insert(entry_point.to_string(), Box::new(factory));
        self
    }

    pub fn with<F>(mut self, entry_point: &str, factory: F) -> Self
    where
        F: Fn() -> Box<dyn Plugin> + Send + Sync + 'static,
    {
        self.register(entry_point, factory);
        self
    }

    pub fn create(&self, entry_point: &str) -> Option<Box<dyn Plugin>> {
        self.factories.get(entry_point).map(|factory| factory())
    }

    pub fn contains(&self, entry_point: &str) -> bool {
        self.factories.contains_key(entry_point)
    }

    pub fn count(&self) -> usize {
        self.factories.len()
    }

    pub fn entry_points(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("entry_points", &self.entry_points())
            .finish()
    }
}
