//! YAML-backed [`ConfigStore`]
//!
//! Used for the host's `bot.yml` and for every plugin's `config.yml`. Keys
//! keep their file order; a missing file is treated as an empty document and
//! is only created on [`ConfigStore::save`].

use hoyo_kernel::config::{ConfigError, ConfigResult, ConfigStore, ConfigValue, substitute_env_vars};
use parking_lot::Mutex;
use serde_yaml::{Mapping, Value};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Config handle shared between the host and a plugin's context.
pub type SharedConfig = Arc<Mutex<YamlConfig>>;

#[derive(Debug, Clone)]
pub struct YamlConfig {
    path: PathBuf,
    values: Mapping,
    /// Leading `#` comment lines of the file as it was read.
    header: Vec<String>,
}

impl YamlConfig {
    /// Open `path`, reading it if it exists.
    pub fn open(path: impl Into<PathBuf>) -> ConfigResult<Self> {
        let path = path.into();
        if !path.exists() {
            debug!("Config file {:?} does not exist yet", path);
            return Ok(Self {
                path,
                values: Mapping::new(),
                header: Vec::new(),
            });
        }

        let content = fs::read_to_string(&path)?;
        let mut config = Self::from_str(&content)?;
        config.path = path;
        Ok(config)
    }

    /// Parse a YAML document. The result is not bound to a file until
    /// [`YamlConfig::set_path`] is called.
    pub fn from_str(content: &str) -> ConfigResult<Self> {
        let header = content
            .lines()
            .take_while(|line| line.trim_start().starts_with('#'))
            .map(str::to_string)
            .collect();

        let values = match serde_yaml::from_str::<Value>(content)
            .map_err(|e| ConfigError::Parse(e.to_string()))?
        {
            Value::Null => Mapping::new(),
            Value::Mapping(map) => map,
            other => {
                return Err(ConfigError::Parse(format!(
                    "expected a mapping at the top level, found {}",
                    kind_name(&other)
                )));
            }
        };

        Ok(Self {
            path: PathBuf::new(),
            values,
            header,
        })
    }

    /// Open `path` and fill in every missing default.
    pub fn with_defaults(
        path: impl Into<PathBuf>,
        defaults: &[(&str, ConfigValue)],
    ) -> ConfigResult<Self> {
        let mut config = Self::open(path)?;
        let added = config.apply_defaults(defaults);
        if added > 0 {
            debug!("Added {} default key(s) to {:?}", added, config.path);
        }
        Ok(config)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn set_path(&mut self, path: impl Into<PathBuf>) {
        self.path = path.into();
    }

    pub fn header(&self) -> &[String] {
        &self.header
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().filter_map(Value::as_str)
    }

    pub fn into_shared(self) -> SharedConfig {
        Arc::new(Mutex::new(self))
    }

    /// Serialized form of the store as [`ConfigStore::save`] would write it.
    pub fn render(&self, overwrite_comments: bool) -> ConfigResult<String> {
        let body = if self.values.is_empty() {
            String::new()
        } else {
            serde_yaml::to_string(&self.values)
                .map_err(|e| ConfigError::Serialization(e.to_string()))?
        };

        if overwrite_comments || self.header.is_empty() {
            return Ok(body);
        }

        let mut out = self.header.join("\n");
        out.push('\n');
        out.push_str(&body);
        Ok(out)
    }

    fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }
}

fn kind_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Sequence(_) => "a sequence",
        Value::Mapping(_) => "a mapping",
        Value::Tagged(_) => "a tagged value",
    }
}

fn to_yaml(value: ConfigValue) -> Value {
    match value {
        ConfigValue::Bool(b) => Value::Bool(b),
        ConfigValue::Int(i) => Value::Number(i.into()),
        ConfigValue::String(s) => Value::String(s),
    }
}

impl ConfigStore for YamlConfig {
    fn get_string(&self, key: &str, default: &str) -> String {
        match self.get(key) {
            Some(Value::String(s)) => substitute_env_vars(s),
            Some(Value::Number(n)) => n.to_string(),
            Some(Value::Bool(b)) => b.to_string(),
            _ => default.to_string(),
        }
    }

    fn get_int(&self, key: &str, default: i64) -> i64 {
        match self.get(key) {
            Some(Value::Number(n)) => n.as_i64().unwrap_or(default),
            Some(Value::String(s)) => substitute_env_vars(s).trim().parse().unwrap_or(default),
            _ => default,
        }
    }

    fn get_bool(&self, key: &str, default: bool) -> bool {
        match self.get(key) {
            Some(Value::Bool(b)) => *b,
            Some(Value::String(s)) => match substitute_env_vars(s).trim() {
                "true" | "yes" | "on" => true,
                "false" | "no" | "off" => false,
                _ => default,
            },
            _ => default,
        }
    }

    fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    fn put(&mut self, key: &str, value: ConfigValue) {
        self.values.insert(Value::String(key.to_string()), to_yaml(value));
    }

    fn save(&mut self, overwrite_comments: bool) -> ConfigResult<()> {
        if self.path.as_os_str().is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "path".to_string(),
                reason: "config is not bound to a file".to_string(),
            });
        }
        let content = self.render(overwrite_comments)?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, content)?;
        if overwrite_comments {
            self.header.clear();
        }
        debug!("Saved config to {:?}", self.path);
        Ok(())
    }
}
