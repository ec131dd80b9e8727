//! 插件宿主
//! Plugin host: discovery, dependency-ordered loading and the per-instance
//! state machine.
//!
//! ```text
//! UNLOADED -> LOADED -> ENABLED <-> DISABLED
//!               |
//!               +-> FAILED (terminal)
//! ```
//!
//! Disabling or unloading a plugin always revokes every task and listener it
//! owns, whether or not its hook succeeded.

use super::dependency::resolve_load_order;
use super::package::{self, PluginPackage};
use super::{Plugin, PluginContext, PluginRegistry};
use crate::bus::EventBus;
use crate::config::{SharedConfig, YamlConfig};
use crate::guard::guarded;
use crate::scheduler::Scheduler;
use hoyo_kernel::config::ConfigStore;
use hoyo_kernel::plugin::PLUGIN_CONFIG_FILE;
use hoyo_kernel::{
    HostError, LifecycleError, LoadError, PluginDescriptor, PluginId, PluginState,
    PreconditionViolation,
};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// One plugin known to the host.
pub struct PluginInstance {
    descriptor: Arc<PluginDescriptor>,
    state: PluginState,
    data_dir: PathBuf,
    context: Option<PluginContext>,
    plugin: Option<Box<dyn Plugin>>,
    failure: Option<String>,
}

impl PluginInstance {
    fn failed(descriptor: PluginDescriptor, data_dir: PathBuf, reason: String) -> Self {
        Self {
            descriptor: Arc::new(descriptor),
            state: PluginState::Failed,
            data_dir,
            context: None,
            plugin: None,
            failure: Some(reason),
        }
    }

    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    pub fn descriptor(&self) -> &PluginDescriptor {
        &self.descriptor
    }

    pub fn state(&self) -> PluginState {
        self.state
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// The plugin's config handle while it is resident.
    pub fn config(&self) -> Option<&SharedConfig> {
        self.context.as_ref().map(PluginContext::config)
    }

    pub fn context(&self) -> Option<&PluginContext> {
        self.context.as_ref()
    }

    /// Why the plugin failed, for FAILED instances.
    pub fn failure(&self) -> Option<&str> {
        self.failure.as_deref()
    }

    fn transition(&mut self, next: PluginState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "illegal transition {} -> {}",
            self.state,
            next
        );
        debug!("Plugin {}: {} -> {}", self.descriptor.name, self.state, next);
        self.state = next;
    }
}

impl std::fmt::Debug for PluginInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginInstance")
            .field("name", &self.descriptor.name)
            .field("state", &self.state)
            .field("data_dir", &self.data_dir)
            .field("failure", &self.failure)
            .finish()
    }
}

/// 插件宿主
/// Loads plugins and drives their lifecycle.
pub struct PluginHost {
    root: PathBuf,
    registry: PluginRegistry,
    scheduler: Scheduler,
    events: EventBus,
    instances: Vec<PluginInstance>,
    load_order: Vec<String>,
    failures: Vec<LoadError>,
}

impl PluginHost {
    /// `root` holds one data directory per plugin, named after the lowercased
    /// plugin name. It is usually also the directory packages are discovered
    /// in; see [`package::discover`] for how the two overlap.
    pub fn new(
        root: impl Into<PathBuf>,
        registry: PluginRegistry,
        scheduler: Scheduler,
        events: EventBus,
    ) -> Self {
        Self {
            root: root.into(),
            registry,
            scheduler,
            events,
            instances: Vec::new(),
            load_order: Vec::new(),
            failures: Vec::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Scan `dir` for packages. Malformed packages are recorded in
    /// [`PluginHost::failures`] and left out of the result.
    pub fn discover(&mut self, dir: &Path) -> io::Result<Vec<PluginPackage>> {
        let discovery = package::discover(dir)?;
        info!(
            "Discovered {} plugin package(s) in {:?} ({} malformed)",
            discovery.packages.len(),
            dir,
            discovery.failures.len()
        );
        self.failures.extend(discovery.failures);
        Ok(discovery.packages)
    }

    /// Load a batch of packages in dependency order.
    ///
    /// Every failure is isolated to the plugins it concerns. Returns how many
    /// plugins reached LOADED.
    pub fn load_all(&mut self, packages: Vec<PluginPackage>) -> usize {
        let descriptors: Vec<PluginDescriptor> =
            packages.iter().map(|p| p.descriptor().clone()).collect();

        // Dependencies resident from an earlier batch are already satisfied.
        let unresolved: Vec<PluginDescriptor> = descriptors
            .iter()
            .map(|descriptor| {
                let mut descriptor = descriptor.clone();
                descriptor
                    .dependencies
                    .retain(|dep| !self.state_of(dep).is_some_and(PluginState::is_resident));
                descriptor
            })
            .collect();
        let plan = resolve_load_order(&unresolved);

        for failure in plan.failures {
            self.record_plan_failure(&descriptors, &failure);
            warn!("Plugin load rejected: {}", failure);
            self.failures.push(failure);
        }

        let mut packages: Vec<Option<PluginPackage>> = packages.into_iter().map(Some).collect();
        let mut loaded = 0;
        for name in &plan.order {
            let Some(package) = packages
                .iter_mut()
                .find(|slot| slot.as_ref().is_some_and(|p| &p.descriptor().name == name))
                .and_then(Option::take)
            else {
                continue;
            };

            match self.load(package) {
                Ok(()) => loaded += 1,
                Err(HostError::Load(err)) => self.failures.push(err),
                Err(err) => warn!("Plugin {} not loaded: {}", name, err),
            }
        }
        loaded
    }

    fn record_plan_failure(&mut self, descriptors: &[PluginDescriptor], failure: &LoadError) {
        let names: Vec<String> = match failure {
            // The first package with this name loads; the record belongs to it.
            LoadError::DuplicatePlugin(_) => return,
            LoadError::CircularDependency { members } => members.clone(),
            other => other.plugin().map(str::to_string).into_iter().collect(),
        };
        for name in names {
            if self.instance(&name).is_some() {
                continue;
            }
            if let Some(descriptor) = descriptors.iter().find(|d| d.name == name) {
                let data_dir = self.root.join(descriptor.data_dir_name());
                self.instances.push(PluginInstance::failed(
                    descriptor.clone(),
                    data_dir,
                    failure.to_string(),
                ));
            }
        }
    }

    /// Load one package: data directory, bundled resources, config, runtime
    /// object, startup hook. UNLOADED -> LOADED.
    ///
    /// # Errors
    ///
    /// [`PreconditionViolation::AlreadyLoaded`] if the name is resident,
    /// [`PreconditionViolation::PluginFailed`] if it already failed, and a
    /// [`LoadError`] for anything that keeps this package from loading; in
    /// that case the instance is recorded as FAILED.
    pub fn load(&mut self, package: PluginPackage) -> Result<(), HostError> {
        let descriptor = package.descriptor().clone();
        let name = descriptor.name.clone();

        if let Some(existing) = self.instance(&name) {
            match existing.state() {
                PluginState::Unloaded => {}
                PluginState::Failed => return Err(PreconditionViolation::PluginFailed(name).into()),
                _ => return Err(PreconditionViolation::AlreadyLoaded(name).into()),
            }
        }

        info!("Loading plugin {} v{}", name, descriptor.version);
        let data_dir = self.root.join(descriptor.data_dir_name());

        let (plugin, context) = match self.prepare(package, &data_dir) {
            Ok(prepared) => prepared,
            Err(err) => {
                error!("Failed to load plugin {}: {}", name, err);
                self.replace_instance(PluginInstance::failed(descriptor, data_dir, err.to_string()));
                return Err(err.into());
            }
        };

        let mut instance = PluginInstance {
            descriptor: Arc::new(descriptor),
            state: PluginState::Unloaded,
            data_dir,
            context: Some(context.clone()),
            plugin: Some(plugin),
            failure: None,
        };
        instance.transition(PluginState::Loaded);

        let startup = match instance.plugin.as_mut() {
            Some(plugin) => guarded(context.owner(), || plugin.on_startup(&context)),
            None => Ok(()),
        };
        if let Err(err) = startup {
            let err = LoadError::StartupFailed {
                plugin: name.clone(),
                reason: err.to_string(),
            };
            error!("{}", err);
            self.revoke(context.owner());
            instance.plugin = None;
            instance.context = None;
            instance.failure = Some(err.to_string());
            instance.transition(PluginState::Failed);
            self.replace_instance(instance);
            return Err(err.into());
        }

        self.replace_instance(instance);
        self.load_order.retain(|n| n != &name);
        self.load_order.push(name.clone());
        info!("Loaded plugin {}", name);
        Ok(())
    }

    fn prepare(
        &self,
        package: PluginPackage,
        data_dir: &Path,
    ) -> Result<(Box<dyn Plugin>, PluginContext), LoadError> {
        let descriptor = package.descriptor();
        descriptor.validate()?;

        for dependency in &descriptor.dependencies {
            match self.state_of(dependency) {
                Some(state) if state.is_resident() => {}
                Some(PluginState::Failed) => {
                    return Err(LoadError::DependencyFailed {
                        plugin: descriptor.name.clone(),
                        dependency: dependency.clone(),
                    });
                }
                _ => {
                    return Err(LoadError::MissingDependency {
                        plugin: descriptor.name.clone(),
                        dependency: dependency.clone(),
                    });
                }
            }
        }

        let plugin = self.registry.create(&descriptor.entry_point).ok_or_else(|| {
            LoadError::UnknownEntryPoint {
                plugin: descriptor.name.clone(),
                entry_point: descriptor.entry_point.clone(),
            }
        })?;

        fs::create_dir_all(data_dir)?;
        let copied = copy_bundled_resources(&package, data_dir)?;
        if copied > 0 {
            debug!("Copied {} bundled resource(s) to {:?}", copied, data_dir);
        }

        let config_path = data_dir.join(PLUGIN_CONFIG_FILE);
        let mut config = YamlConfig::open(&config_path)?;
        if !config_path.exists() {
            config.save(false)?;
        }
        let config = config.into_shared();
        let context = PluginContext::new(
            Arc::new(package),
            data_dir.to_path_buf(),
            config,
            self.scheduler.clone(),
            self.events.clone(),
        );
        Ok((plugin, context))
    }

    /// Enable or disable a loaded plugin. Returns whether the state changed.
    ///
    /// Same-state calls are no-ops and do not invoke hooks.
    pub fn set_enabled(&mut self, name: &str, enabled: bool) -> Result<bool, HostError> {
        if enabled {
            self.enable(name)
        } else {
            self.disable(name)
        }
    }

    fn enable(&mut self, name: &str) -> Result<bool, HostError> {
        let index = self.index_of(name)?;
        match self.instances[index].state {
            PluginState::Enabled => return Ok(false),
            PluginState::Failed => return Err(PreconditionViolation::PluginFailed(name.to_string()).into()),
            PluginState::Unloaded => return Err(PreconditionViolation::NotLoaded(name.to_string()).into()),
            PluginState::Loaded | PluginState::Disabled => {}
        }

        let instance = &mut self.instances[index];
        let (Some(plugin), Some(context)) = (instance.plugin.as_mut(), instance.context.as_ref()) else {
            return Err(HostError::Internal(format!("plugin {} has no runtime object", name)));
        };

        info!("Enabling plugin {} v{}", name, instance.descriptor.version);
        match guarded(context.owner(), || plugin.on_enable(context)) {
            Ok(()) => {
                instance.transition(PluginState::Enabled);
                Ok(true)
            }
            Err(err) => {
                let owner = context.owner().clone();
                self.revoke(&owner);
                self.instances[index].transition(PluginState::Disabled);
                let err = LifecycleError::EnableFailed {
                    plugin: name.to_string(),
                    reason: err.to_string(),
                };
                error!("{}", err);
                Err(err.into())
            }
        }
    }

    fn disable(&mut self, name: &str) -> Result<bool, HostError> {
        let index = self.index_of(name)?;
        if self.instances[index].state != PluginState::Enabled {
            return Ok(false);
        }

        let instance = &mut self.instances[index];
        let owner = PluginId::new(name);
        info!("Disabling plugin {} v{}", name, instance.descriptor.version);
        if let (Some(plugin), Some(context)) = (instance.plugin.as_mut(), instance.context.as_ref()) {
            if let Err(err) = guarded(&owner, || plugin.on_disable(context)) {
                let err = LifecycleError::DisableFailed {
                    plugin: name.to_string(),
                    reason: err.to_string(),
                };
                warn!("{}; cleaning up anyway", err);
            }
        }

        self.revoke(&owner);
        self.instances[index].transition(PluginState::Disabled);
        Ok(true)
    }

    /// Enable every loaded plugin in load order. Returns how many changed state.
    pub fn enable_all(&mut self) -> usize {
        let order = self.load_order.clone();
        let mut enabled = 0;
        for name in order {
            match self.enable(&name) {
                Ok(true) => enabled += 1,
                Ok(false) => {}
                Err(err) => warn!("Plugin {} not enabled: {}", name, err),
            }
        }
        enabled
    }

    /// Disable every enabled plugin in reverse load order.
    pub fn disable_all(&mut self) -> usize {
        let order = self.load_order.clone();
        let mut disabled = 0;
        for name in order.iter().rev() {
            match self.disable(name) {
                Ok(true) => disabled += 1,
                Ok(false) => {}
                Err(err) => warn!("Plugin {} not disabled: {}", name, err),
            }
        }
        disabled
    }

    /// Disable if needed, drop the runtime object, and return to UNLOADED.
    /// The data directory is kept.
    pub fn unload(&mut self, name: &str) -> Result<(), HostError> {
        let index = self.index_of(name)?;
        match self.instances[index].state {
            PluginState::Unloaded => return Err(PreconditionViolation::NotLoaded(name.to_string()).into()),
            PluginState::Failed => return Err(PreconditionViolation::PluginFailed(name.to_string()).into()),
            PluginState::Enabled => {
                self.disable(name)?;
            }
            PluginState::Loaded | PluginState::Disabled => {}
        }

        let still_needed: Vec<&str> = self
            .instances
            .iter()
            .filter(|i| i.state.is_resident() && i.descriptor.dependencies.contains(name))
            .map(PluginInstance::name)
            .collect();
        if !still_needed.is_empty() {
            warn!("Unloading {} while {} still depend on it", name, still_needed.join(", "));
        }

        self.revoke(&PluginId::new(name));
        let instance = &mut self.instances[index];
        instance.plugin = None;
        instance.context = None;
        instance.transition(PluginState::Unloaded);
        self.load_order.retain(|n| n != name);
        info!("Unloaded plugin {}", name);
        Ok(())
    }

    pub fn state_of(&self, name: &str) -> Option<PluginState> {
        self.instance(name).map(PluginInstance::state)
    }

    pub fn instance(&self, name: &str) -> Option<&PluginInstance> {
        self.instances.iter().find(|i| i.name() == name)
    }

    pub fn instances(&self) -> &[PluginInstance] {
        &self.instances
    }

    /// Names of resident plugins in the order they were loaded.
    pub fn load_order(&self) -> &[String] {
        &self.load_order
    }

    /// Every load failure recorded by [`PluginHost::discover`] and
    /// [`PluginHost::load_all`].
    pub fn failures(&self) -> &[LoadError] {
        &self.failures
    }

    pub fn enabled_count(&self) -> usize {
        self.instances.iter().filter(|i| i.state.is_enabled()).count()
    }

    fn index_of(&self, name: &str) -> Result<usize, PreconditionViolation> {
        self.instances
            .iter()
            .position(|i| i.name() == name)
            .ok_or_else(|| PreconditionViolation::NotLoaded(name.to_string()))
    }

    fn replace_instance(&mut self, instance: PluginInstance) {
        match self.instances.iter().position(|i| i.name() == instance.name()) {
            Some(index) => self.instances[index] = instance,
            None => self.instances.push(instance),
        }
    }

    fn revoke(&self, owner: &PluginId) {
        let tasks = self.scheduler.cancel_all(owner);
        let listeners = self.events.unsubscribe_all(owner);
        if tasks + listeners > 0 {
            debug!(
                "Revoked {} task(s) and {} listener(s) of {}",
                tasks, listeners, owner
            );
        }
    }
}

impl std::fmt::Debug for PluginHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginHost")
            .field("root", &self.root)
            .field("instances", &self.instances)
            .field("load_order", &self.load_order)
            .finish()
    }
}

/// Copy every bundled resource that does not exist yet in `data_dir`.
fn copy_bundled_resources(package: &PluginPackage, data_dir: &Path) -> Result<usize, LoadError> {
    let mut copied = 0;
    for name in package.resource_names()? {
        let target = data_dir.join(&name);
        if target.exists() {
            continue;
        }
        let Some(bytes) = package.read_resource(&name)? else {
            continue;
        };
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&target, bytes)?;
        copied += 1;
    }
    Ok(copied)
}
