//! HoyoBot Runtime
//!
//! The engines behind the host: a tick [`Scheduler`], a synchronous
//! [`EventBus`], the [`PluginHost`] lifecycle manager, and the
//! [`HoyoRuntime`] tick loop that composes them.

mod guard;

pub mod bus;
pub mod config;
pub mod network;
pub mod plugin;
pub mod runtime;
pub mod scheduler;

pub use bus::{DispatchReport, EventBus};
pub use config::{SharedConfig, YamlConfig};
pub use network::{InboundSender, QueueListener};
pub use plugin::{
    Plugin, PluginContext, PluginHost, PluginInstance, PluginPackage, PluginRegistry,
};
pub use runtime::{
    EXIT_OK, EXIT_STARTUP_FAILURE, HoyoRuntime, RuntimeBuilder, RuntimeOptions, ShutdownHandle,
};
pub use scheduler::{HeartbeatReport, Scheduler};

/// Kernel contracts, re-exported for plugin authors.
pub use hoyo_kernel as kernel;
