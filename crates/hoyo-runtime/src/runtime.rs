//! Host runtime - 启动序列与节拍循环
//!
//! [`RuntimeBuilder::start`] runs the startup sequence in a fixed order:
//!
//! 1. acquire the configuration and persist missing defaults
//! 2. start the network listener
//! 3. construct the scheduler and the event bus
//! 4. discover and load plugins in dependency order
//! 5. enable every loaded plugin
//! 6. publish `host.started`
//!
//! [`HoyoRuntime::run`] then ticks until the [`ShutdownHandle`] is triggered.
//!
//! # 示例
//!
//! ```rust,ignore
//! use hoyo_runtime::{QueueListener, RuntimeBuilder, PluginRegistry};
//!
//! let registry = PluginRegistry::new().with("greeter", || Box::new(Greeter::default()));
//! let mut runtime = RuntimeBuilder::new(QueueListener::new())
//!     .with_config_path("bot.yml")
//!     .with_plugin_root("plugins")
//!     .with_registry(registry)
//!     .start()?;
//!
//! let code = runtime.run();
//! std::process::exit(code);
//! ```

use crate::bus::EventBus;
use crate::config::YamlConfig;
use crate::plugin::{PluginHost, PluginPackage, PluginRegistry};
use crate::scheduler::{HeartbeatReport, Scheduler};
use error_stack::{Report, ResultExt};
use hoyo_kernel::config::{ConfigStore, HostSettings, host_defaults};
use hoyo_kernel::event::kinds;
use hoyo_kernel::network::NetworkListener;
use hoyo_kernel::{Event, HostError, HostResult, Tick};
use serde_json::json;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Clean shutdown.
pub const EXIT_OK: i32 = 0;
/// Startup failed before the tick loop was entered.
pub const EXIT_STARTUP_FAILURE: i32 = 1;

pub const DEFAULT_CONFIG_FILE: &str = "bot.yml";
pub const DEFAULT_PLUGIN_DIR: &str = "plugins";

/// Tick loop tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeOptions {
    /// Wall-clock length of one tick.
    pub tick_interval: Duration,
    /// Upper bound of inbound items published per tick.
    pub max_inbound_per_tick: usize,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(1),
            max_inbound_per_tick: 256,
        }
    }
}

/// Cooperative shutdown flag, polled once per loop iteration.
#[derive(Debug, Clone, Default)]
pub struct ShutdownHandle(Arc<AtomicBool>);

impl ShutdownHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        if !self.0.swap(true, Ordering::AcqRel) {
            info!("Shutdown requested");
        }
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Builder for [`HoyoRuntime`].
pub struct RuntimeBuilder<L: NetworkListener> {
    listener: L,
    config_path: PathBuf,
    config: Option<Box<dyn ConfigStore>>,
    plugin_root: PathBuf,
    registry: PluginRegistry,
    builtins: Vec<PluginPackage>,
    options: RuntimeOptions,
    shutdown: ShutdownHandle,
}

impl<L: NetworkListener> RuntimeBuilder<L> {
    pub fn new(listener: L) -> Self {
        Self {
            listener,
            config_path: PathBuf::from(DEFAULT_CONFIG_FILE),
            config: None,
            plugin_root: PathBuf::from(DEFAULT_PLUGIN_DIR),
            registry: PluginRegistry::new(),
            builtins: Vec::new(),
            options: RuntimeOptions::default(),
            shutdown: ShutdownHandle::new(),
        }
    }

    /// YAML file used when no store is given.
    pub fn with_config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_path = path.into();
        self
    }

    pub fn with_config_store(mut self, store: Box<dyn ConfigStore>) -> Self {
        self.config = Some(store);
        self
    }

    pub fn with_plugin_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.plugin_root = root.into();
        self
    }

    pub fn with_registry(mut self, registry: PluginRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Load a package compiled into the host alongside the discovered ones.
    pub fn with_plugin(mut self, package: PluginPackage) -> Self {
        self.builtins.push(package);
        self
    }

    pub fn with_options(mut self, options: RuntimeOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_shutdown(mut self, shutdown: ShutdownHandle) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Run the startup sequence.
    ///
    /// # Errors
    ///
    /// Fails only when the host cannot function: the configuration cannot be
    /// read or written, the listener does not start, or the plugin root is
    /// unusable. Plugin failures are isolated and logged.
    pub fn start(self) -> HostResult<HoyoRuntime<L>> {
        let Self {
            mut listener,
            config_path,
            config,
            plugin_root,
            registry,
            builtins,
            options,
            shutdown,
        } = self;
        let started_at = Instant::now();
        info!("Starting HoyoBot host");

        let mut config: Box<dyn ConfigStore> = match config {
            Some(store) => store,
            None => Box::new(
                YamlConfig::open(&config_path)
                    .map_err(HostError::from)
                    .map_err(Report::new)
                    .attach_with(|| format!("reading configuration {:?}", config_path))?,
            ),
        };
        let added = config.apply_defaults(&host_defaults());
        config
            .save(false)
            .map_err(HostError::from)
            .map_err(Report::new)
            .attach("persisting configuration defaults")?;
        if added > 0 {
            info!("Wrote {} default config key(s)", added);
        }
        let settings = HostSettings::from_store(&*config)
            .map_err(HostError::from)
            .map_err(Report::new)
            .attach("validating configuration")?;
        debug!(
            "Host settings: bind {}:{}, callback {}",
            settings.bind_address, settings.port, settings.callback_path
        );

        listener
            .start()
            .map_err(HostError::from)
            .map_err(Report::new)
            .attach_with(|| format!("starting listener on {}:{}", settings.bind_address, settings.port))?;

        let scheduler = Scheduler::new();
        let events = EventBus::new();

        let mut host = PluginHost::new(&plugin_root, registry, scheduler.clone(), events.clone());
        let discovered = fs::create_dir_all(&plugin_root).and_then(|()| host.discover(&plugin_root));
        let discovered = match discovered {
            Ok(packages) => packages,
            Err(err) => {
                listener.stop();
                return Err(Report::new(HostError::from(err)))
                    .attach_with(|| format!("scanning plugin directory {:?}", plugin_root));
            }
        };

        let mut packages = builtins;
        packages.extend(discovered);
        let loaded = host.load_all(packages);
        let enabled = host.enable_all();
        info!(
            "{} plugin(s) loaded, {} enabled, {} failed",
            loaded,
            enabled,
            host.failures().len()
        );

        let runtime = HoyoRuntime {
            listener,
            config,
            settings,
            scheduler,
            events,
            host,
            options,
            shutdown,
            tick: 0,
            started_at,
            stopped: false,
        };

        let mut started = Event::new(
            kinds::HOST_STARTED,
            json!({
                "plugins": runtime.host.load_order(),
                "port": runtime.settings.port,
            }),
        );
        runtime.events.dispatch(&mut started);
        info!("HoyoBot host started in {:?}", started_at.elapsed());
        Ok(runtime)
    }
}

/// A started host. Drives the tick loop on the calling thread.
pub struct HoyoRuntime<L: NetworkListener> {
    listener: L,
    config: Box<dyn ConfigStore>,
    settings: HostSettings,
    scheduler: Scheduler,
    events: EventBus,
    host: PluginHost,
    options: RuntimeOptions,
    shutdown: ShutdownHandle,
    tick: Tick,
    started_at: Instant,
    stopped: bool,
}

impl<L: NetworkListener> HoyoRuntime<L> {
    /// Tick until shutdown is requested, then stop. Returns the exit status.
    pub fn run(&mut self) -> i32 {
        info!(
            "Entering tick loop ({:?} per tick)",
            self.options.tick_interval
        );
        while !self.shutdown.is_requested() {
            let began = Instant::now();
            self.tick_once();
            if let Some(rest) = self.options.tick_interval.checked_sub(began.elapsed()) {
                std::thread::sleep(rest);
            }
        }
        self.stop();
        EXIT_OK
    }

    /// Run at most `ticks` iterations without idling. Stops early when
    /// shutdown is requested; returns how many ticks ran.
    pub fn run_for(&mut self, ticks: u64) -> u64 {
        let mut ran = 0;
        while ran < ticks && !self.shutdown.is_requested() {
            self.tick_once();
            ran += 1;
        }
        ran
    }

    /// One loop iteration: drain inbound items, then heartbeat.
    pub fn tick_once(&mut self) -> HeartbeatReport {
        let mut drained = 0;
        while drained < self.options.max_inbound_per_tick {
            let Some(item) = self.listener.try_next() else {
                break;
            };
            drained += 1;
            match serde_json::to_value(&item) {
                Ok(payload) => {
                    self.events
                        .dispatch(&mut Event::new(kinds::NETWORK_INBOUND, payload));
                }
                Err(err) => warn!("Dropping inbound item {}: {}", item.id, err),
            }
        }

        self.tick += 1;
        self.scheduler.heartbeat(self.tick)
    }

    /// Publish `host.stopping`, disable plugins in reverse load order and stop
    /// the listener. Idempotent.
    pub fn stop(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;
        info!("Stopping HoyoBot host");

        let mut stopping = Event::new(kinds::HOST_STOPPING, json!({ "tick": self.tick }));
        self.events.dispatch(&mut stopping);

        let disabled = self.host.disable_all();
        self.listener.stop();
        info!(
            "HoyoBot host stopped after {} tick(s), uptime {:?}, {} plugin(s) disabled",
            self.tick,
            self.started_at.elapsed(),
            disabled
        );
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    pub fn current_tick(&self) -> Tick {
        self.tick
    }

    pub fn settings(&self) -> &HostSettings {
        &self.settings
    }

    pub fn config(&self) -> &dyn ConfigStore {
        &*self.config
    }

    pub fn config_mut(&mut self) -> &mut dyn ConfigStore {
        &mut *self.config
    }

    pub fn host(&self) -> &PluginHost {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut PluginHost {
        &mut self.host
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn listener(&self) -> &L {
        &self.listener
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }
}

impl<L: NetworkListener> Drop for HoyoRuntime<L> {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_options() {
        let options = RuntimeOptions::default();
        assert_eq!(options.tick_interval, Duration::from_millis(1));
        assert_eq!(options.max_inbound_per_tick, 256);
    }

    #[test]
    fn shutdown_handle_is_shared_between_clones() {
        let handle = ShutdownHandle::new();
        let other = handle.clone();
        assert!(!other.is_requested());
        handle.request();
        handle.request();
        assert!(other.is_requested());
    }
}
