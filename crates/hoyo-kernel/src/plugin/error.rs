//! Typed errors for the plugin sub-system.

use std::path::PathBuf;
use thiserror::Error;

/// Errors a plugin's own hook or callback code returns to the host.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PluginError {
    /// Plugin failed during initialisation.
    #[error("Plugin initialization failed: {0}")]
    InitFailed(String),

    /// A hook or callback failed while running.
    #[error("Plugin execution failed: {0}")]
    ExecutionFailed(String),

    /// Plugin configuration is invalid or missing.
    #[error("Plugin configuration error: {0}")]
    ConfigError(String),

    /// An I/O error surfaced during a plugin operation.
    #[error("Plugin I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    /// A (de)serialization error surfaced during a plugin operation.
    #[error("Plugin serialization error: {source}")]
    Serialization {
        #[from]
        source: serde_json::Error,
    },

    /// Catch-all for errors that don't fit the above categories.
    #[error("{0}")]
    Other(String),
}

/// Result type of plugin hooks and callbacks.
pub type PluginResult<T> = Result<T, PluginError>;

/// Errors that keep a plugin package from loading.
///
/// A load error isolates the affected plugin(s); it never aborts the batch.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum LoadError {
    /// The package could not be read or has no usable descriptor.
    #[error("Malformed plugin package {path:?}: {reason}")]
    MalformedPackage { path: PathBuf, reason: String },

    /// The descriptor parsed but violates a descriptor rule.
    #[error("Invalid descriptor for plugin '{plugin}': {reason}")]
    InvalidDescriptor { plugin: String, reason: String },

    /// Another package already declared this name.
    #[error("Duplicate plugin name: {0}")]
    DuplicatePlugin(String),

    /// A declared dependency is not among the discovered plugins.
    #[error("Missing dependency: {plugin} requires {dependency}")]
    MissingDependency { plugin: String, dependency: String },

    /// The plugin is part of a dependency cycle.
    #[error("Circular dependency among plugins: {}", .members.join(", "))]
    CircularDependency { members: Vec<String> },

    /// A dependency exists but did not load.
    #[error("Dependency failed: {plugin} requires {dependency}, which failed to load")]
    DependencyFailed { plugin: String, dependency: String },

    /// No factory is registered for the descriptor's entry point.
    #[error("Unknown entry point '{entry_point}' for plugin '{plugin}'")]
    UnknownEntryPoint { plugin: String, entry_point: String },

    /// The plugin's startup hook failed.
    #[error("Startup hook of plugin '{plugin}' failed: {reason}")]
    StartupFailed { plugin: String, reason: String },

    /// An I/O error while preparing the plugin's data directory or resources.
    #[error("Plugin I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    /// The plugin's configuration file could not be opened.
    #[error("Plugin config error: {0}")]
    Config(#[from] crate::config::ConfigError),
}

impl LoadError {
    /// Name of the plugin this error is about, when known.
    pub fn plugin(&self) -> Option<&str> {
        match self {
            Self::InvalidDescriptor { plugin, .. }
            | Self::MissingDependency { plugin, .. }
            | Self::DependencyFailed { plugin, .. }
            | Self::UnknownEntryPoint { plugin, .. }
            | Self::StartupFailed { plugin, .. } => Some(plugin),
            Self::DuplicatePlugin(plugin) => Some(plugin),
            _ => None,
        }
    }
}

/// An enable or disable hook failed.
///
/// The host still runs cleanup; the plugin ends DISABLED.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum LifecycleError {
    #[error("Enable hook of plugin '{plugin}' failed: {reason}")]
    EnableFailed { plugin: String, reason: String },

    #[error("Disable hook of plugin '{plugin}' failed: {reason}")]
    DisableFailed { plugin: String, reason: String },
}
