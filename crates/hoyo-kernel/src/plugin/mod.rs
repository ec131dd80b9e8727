use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

pub mod error;
pub use error::{LifecycleError, LoadError, PluginError, PluginResult};

/// 插件描述文件名（按优先级排列）
/// Descriptor file names a package may carry, in lookup order
pub const DESCRIPTOR_FILES: [&str; 4] = ["plugin.yml", "plugin.yaml", "plugin.toml", "plugin.json"];

/// 打包资源所在目录
/// Directory inside a package holding bundled resource files
pub const RESOURCES_DIR: &str = "resources";

/// 插件配置文件名
/// Name of the per-plugin config file inside its data directory
pub const PLUGIN_CONFIG_FILE: &str = "config.yml";

// ============================================================================
// 插件状态
// ============================================================================

/// 插件实例状态
/// Plugin instance state
///
/// ```text
/// Unloaded -> Loaded -> Enabled <-> Disabled
///               |  |                  ^
///               |  +------------------+  (first enable hook failed)
///               +-> Failed (terminal)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PluginState {
    /// 未加载
    /// Not loaded (initial, and again after unload)
    Unloaded,
    /// 已加载（就绪）
    /// Loaded, runtime object constructed, never enabled yet
    Loaded,
    /// 运行中
    /// Enabled
    Enabled,
    /// 已停用
    /// Disabled
    Disabled,
    /// 失败（终止状态）
    /// Failed to load; terminal
    Failed,
}

impl PluginState {
    /// Whether the state machine allows moving from `self` to `next`.
    ///
    /// Same-state moves are not transitions; callers treat them as no-ops.
    pub fn can_transition_to(self, next: PluginState) -> bool {
        use PluginState::*;
        matches!(
            (self, next),
            (Unloaded, Loaded)
                | (Loaded, Enabled)
                | (Loaded, Failed)
                // first enable hook failed
                | (Loaded, Disabled)
                | (Enabled, Disabled)
                | (Disabled, Enabled)
                | (Loaded, Unloaded)
                | (Disabled, Unloaded)
        )
    }

    pub fn is_terminal(self) -> bool {
        self == PluginState::Failed
    }

    pub fn is_enabled(self) -> bool {
        self == PluginState::Enabled
    }

    /// Loaded, enabled or disabled: the runtime object exists.
    pub fn is_resident(self) -> bool {
        matches!(
            self,
            PluginState::Loaded | PluginState::Enabled | PluginState::Disabled
        )
    }
}

impl fmt::Display for PluginState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PluginState::Unloaded => "UNLOADED",
            PluginState::Loaded => "LOADED",
            PluginState::Enabled => "ENABLED",
            PluginState::Disabled => "DISABLED",
            PluginState::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

// ============================================================================
// 插件版本
// ============================================================================

/// 插件版本信息
/// Plugin version information
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PluginVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
    /// Pre-release tag (e.g., "alpha", "beta")
    pub prerelease: Option<String>,
    /// Build metadata
    pub build: Option<String>,
}

impl PluginVersion {
    pub fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
            prerelease: None,
            build: None,
        }
    }

    /// Parse from string (e.g., "1.2.3-alpha+build123")
    pub fn parse(version: &str) -> Result<Self, String> {
        let version = version.trim();

        let (version_pre, build) = match version.split_once('+') {
            Some((head, build)) => (head, Some(build.to_string())),
            None => (version, None),
        };

        let (version_core, prerelease) = match version_pre.split_once('-') {
            Some((core, pre)) => (core, Some(pre.to_string())),
            None => (version_pre, None),
        };

        if prerelease.as_deref() == Some("") || build.as_deref() == Some("") {
            return Err(format!("Invalid version format: {}", version));
        }

        let parts: Vec<&str> = version_core.split('.').collect();
        if parts.len() != 3 {
            return Err(format!("Invalid version format: {}", version));
        }

        let component = |label: &str, part: &str| {
            part.parse::<u32>()
                .map_err(|_| format!("Invalid {} version: {}", label, part))
        };

        Ok(Self {
            major: component("major", parts[0])?,
            minor: component("minor", parts[1])?,
            patch: component("patch", parts[2])?,
            prerelease,
            build,
        })
    }
}

impl fmt::Display for PluginVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        if let Some(ref pre) = self.prerelease {
            write!(f, "-{}", pre)?;
        }
        if let Some(ref build) = self.build {
            write!(f, "+{}", build)?;
        }
        Ok(())
    }
}

// ============================================================================
// 插件描述
// ============================================================================

/// 插件描述（从插件包解析，解析后不可变）
/// Plugin descriptor, immutable once parsed from a package
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginDescriptor {
    /// 插件名称（唯一）
    /// Unique plugin name
    pub name: String,
    /// 语义化版本
    /// Semantic version
    pub version: String,
    /// 入口标识，由插件注册表解析
    /// Entry point identifier, resolved through the plugin registry
    #[serde(alias = "main", alias = "entry-point")]
    pub entry_point: String,
    /// 依赖的插件名称
    /// Names of plugins this one depends on
    #[serde(default, alias = "depend", alias = "depends")]
    pub dependencies: BTreeSet<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub authors: Vec<String>,
}

impl PluginDescriptor {
    pub fn new(name: &str, version: &str, entry_point: &str) -> Self {
        Self {
            name: name.to_string(),
            version: version.to_string(),
            entry_point: entry_point.to_string(),
            dependencies: BTreeSet::new(),
            description: None,
            authors: Vec::new(),
        }
    }

    pub fn with_dependency(mut self, name: &str) -> Self {
        self.dependencies.insert(name.to_string());
        self
    }

    pub fn with_description(mut self, desc: &str) -> Self {
        self.description = Some(desc.to_string());
        self
    }

    pub fn with_author(mut self, author: &str) -> Self {
        self.authors.push(author.to_string());
        self
    }

    /// Name of the plugin's data directory under the plugin root.
    pub fn data_dir_name(&self) -> String {
        self.name.to_lowercase()
    }

    pub fn parsed_version(&self) -> Result<PluginVersion, LoadError> {
        PluginVersion::parse(&self.version).map_err(|reason| self.invalid(reason))
    }

    /// Check the descriptor rules: a plain name, a semantic version, an entry
    /// point, and no self-dependency.
    pub fn validate(&self) -> Result<(), LoadError> {
        if self.name.is_empty() {
            return Err(self.invalid("name must not be empty"));
        }
        if !self
            .name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
        {
            return Err(self.invalid("name may only contain [A-Za-z0-9_.-]"));
        }
        self.parsed_version()?;
        if self.entry_point.trim().is_empty() {
            return Err(self.invalid("entry point must not be empty"));
        }
        if self.dependencies.contains(&self.name) {
            return Err(self.invalid("plugin cannot depend on itself"));
        }
        Ok(())
    }

    fn invalid(&self, reason: impl Into<String>) -> LoadError {
        LoadError::InvalidDescriptor {
            plugin: self.name.clone(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests;
