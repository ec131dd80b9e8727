//! Host configuration contract.
//!
//! The key/value store itself is an external collaborator; this module only
//! fixes its interface, the default keys the host relies on, and the typed
//! [`HostSettings`] view over them.
//!
//! String values support environment substitution (`${VAR}` and `$VAR`)
//! at read time, so secrets can stay out of the file.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

/// Configuration store error
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config parsing error: {0}")]
    Parse(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid value for '{key}': {reason}")]
    InvalidValue { key: String, reason: String },
}

/// Result type for config operations
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Keys the host reads from its configuration.
pub mod keys {
    pub const BOT_ID: &str = "bot_id";
    pub const BOT_SECRET: &str = "bot_secret";
    pub const SERVER_IP: &str = "server-ip";
    pub const PORT: &str = "port";
    pub const VILLA_ID: &str = "villa-id";
    pub const HTTP_FILTER: &str = "http_filter";
    pub const HTTP_CALL_BACK: &str = "http_call_back";
}

/// A scalar configuration value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConfigValue {
    Bool(bool),
    Int(i64),
    String(String),
}

impl From<&str> for ConfigValue {
    fn from(value: &str) -> Self {
        ConfigValue::String(value.to_string())
    }
}

impl From<String> for ConfigValue {
    fn from(value: String) -> Self {
        ConfigValue::String(value)
    }
}

impl From<i64> for ConfigValue {
    fn from(value: i64) -> Self {
        ConfigValue::Int(value)
    }
}

impl From<bool> for ConfigValue {
    fn from(value: bool) -> Self {
        ConfigValue::Bool(value)
    }
}

/// Typed key/value store with explicit persistence.
pub trait ConfigStore: Send {
    fn get_string(&self, key: &str, default: &str) -> String;

    fn get_int(&self, key: &str, default: i64) -> i64;

    fn get_bool(&self, key: &str, default: bool) -> bool;

    fn contains(&self, key: &str) -> bool;

    fn put(&mut self, key: &str, value: ConfigValue);

    /// Write the store back to its backing file.
    ///
    /// With `overwrite_comments` the file is rewritten from the values alone;
    /// otherwise the existing leading comment block is kept.
    fn save(&mut self, overwrite_comments: bool) -> ConfigResult<()>;

    /// Insert every default whose key is missing. Returns how many were added.
    fn apply_defaults(&mut self, defaults: &[(&str, ConfigValue)]) -> usize {
        let mut added = 0;
        for (key, value) in defaults {
            if !self.contains(key) {
                self.put(key, value.clone());
                added += 1;
            }
        }
        added
    }
}

/// Default host keys, in the order they are written to a fresh file.
pub fn host_defaults() -> Vec<(&'static str, ConfigValue)> {
    vec![
        (keys::BOT_ID, ConfigValue::from("")),
        (keys::BOT_SECRET, ConfigValue::from("")),
        (keys::SERVER_IP, ConfigValue::from("0.0.0.0")),
        (keys::PORT, ConfigValue::Int(80)),
        (keys::VILLA_ID, ConfigValue::from("0")),
        (keys::HTTP_FILTER, ConfigValue::Bool(false)),
        (keys::HTTP_CALL_BACK, ConfigValue::from("/bot")),
    ]
}

/// Typed view of the host configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostSettings {
    pub bot_id: String,
    pub bot_secret: String,
    pub villa_id: String,
    pub bind_address: String,
    pub port: u16,
    pub callback_path: String,
    pub http_filter: bool,
}

impl Default for HostSettings {
    fn default() -> Self {
        Self {
            bot_id: String::new(),
            bot_secret: String::new(),
            villa_id: "0".to_string(),
            bind_address: "0.0.0.0".to_string(),
            port: 80,
            callback_path: "/bot".to_string(),
            http_filter: false,
        }
    }
}

impl HostSettings {
    /// Read the settings from a store, falling back to the defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] if `port` is outside `0..=65535`
    /// or the callback path does not start with `/`.
    pub fn from_store(store: &dyn ConfigStore) -> ConfigResult<Self> {
        let defaults = Self::default();

        let raw_port = store.get_int(keys::PORT, i64::from(defaults.port));
        let port = u16::try_from(raw_port).map_err(|_| ConfigError::InvalidValue {
            key: keys::PORT.to_string(),
            reason: format!("{} is not a valid TCP port", raw_port),
        })?;

        let callback_path = store.get_string(keys::HTTP_CALL_BACK, &defaults.callback_path);
        if !callback_path.starts_with('/') {
            return Err(ConfigError::InvalidValue {
                key: keys::HTTP_CALL_BACK.to_string(),
                reason: format!("'{}' must start with '/'", callback_path),
            });
        }

        Ok(Self {
            bot_id: store.get_string(keys::BOT_ID, &defaults.bot_id),
            bot_secret: store.get_string(keys::BOT_SECRET, &defaults.bot_secret),
            villa_id: store.get_string(keys::VILLA_ID, &defaults.villa_id),
            bind_address: store.get_string(keys::SERVER_IP, &defaults.bind_address),
            port,
            callback_path,
            http_filter: store.get_bool(keys::HTTP_FILTER, defaults.http_filter),
        })
    }
}

static BRACED_VAR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("braced env pattern is valid")
});

static SIMPLE_VAR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$([A-Za-z_][A-Za-z0-9_]*)\b").expect("simple env pattern is valid")
});

/// Substitute environment variables in a string
///
/// Supports both `${VAR_NAME}` and `$VAR_NAME` syntax. Unknown variables are
/// left untouched.
pub fn substitute_env_vars(content: &str) -> String {
    if !content.contains('$') {
        return content.to_string();
    }

    let braced = BRACED_VAR.replace_all(content, |caps: &regex::Captures| {
        std::env::var(&caps[1]).unwrap_or_else(|_| caps[0].to_string())
    });

    SIMPLE_VAR
        .replace_all(&braced, |caps: &regex::Captures| {
            std::env::var(&caps[1]).unwrap_or_else(|_| caps[0].to_string())
        })
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[derive(Default)]
    struct MapStore {
        values: HashMap<String, ConfigValue>,
        saves: usize,
    }

    impl ConfigStore for MapStore {
        fn get_string(&self, key: &str, default: &str) -> String {
            match self.values.get(key) {
                Some(ConfigValue::String(s)) => substitute_env_vars(s),
                Some(ConfigValue::Int(i)) => i.to_string(),
                Some(ConfigValue::Bool(b)) => b.to_string(),
                None => default.to_string(),
            }
        }

        fn get_int(&self, key: &str, default: i64) -> i64 {
            match self.values.get(key) {
                Some(ConfigValue::Int(i)) => *i,
                Some(ConfigValue::String(s)) => s.parse().unwrap_or(default),
                _ => default,
            }
        }

        fn get_bool(&self, key: &str, default: bool) -> bool {
            match self.values.get(key) {
                Some(ConfigValue::Bool(b)) => *b,
                _ => default,
            }
        }

        fn contains(&self, key: &str) -> bool {
            self.values.contains_key(key)
        }

        fn put(&mut self, key: &str, value: ConfigValue) {
            self.values.insert(key.to_string(), value);
        }

        fn save(&mut self, _overwrite_comments: bool) -> ConfigResult<()> {
            self.saves += 1;
            Ok(())
        }
    }

    #[test]
    fn apply_defaults_only_fills_missing_keys() {
        let mut store = MapStore::default();
        store.put(keys::PORT, ConfigValue::Int(8080));

        let added = store.apply_defaults(&host_defaults());

        assert_eq!(added, host_defaults().len() - 1);
        assert_eq!(store.get_int(keys::PORT, 0), 8080);
        assert_eq!(store.get_string(keys::SERVER_IP, ""), "0.0.0.0");
        assert_eq!(store.get_string(keys::HTTP_CALL_BACK, ""), "/bot");
        assert!(!store.get_bool(keys::HTTP_FILTER, true));
    }

    #[test]
    fn settings_from_defaults_match_default_impl() {
        let mut store = MapStore::default();
        store.apply_defaults(&host_defaults());
        let settings = HostSettings::from_store(&store).unwrap();
        assert_eq!(settings, HostSettings::default());
    }

    #[test]
    fn settings_accept_port_written_as_string() {
        let mut store = MapStore::default();
        store.put(keys::PORT, ConfigValue::from("9000"));
        let settings = HostSettings::from_store(&store).unwrap();
        assert_eq!(settings.port, 9000);
    }

    #[test]
    fn settings_reject_out_of_range_port() {
        let mut store = MapStore::default();
        store.put(keys::PORT, ConfigValue::Int(70000));
        let err = HostSettings::from_store(&store).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == keys::PORT));
    }

    #[test]
    fn settings_reject_relative_callback_path() {
        let mut store = MapStore::default();
        store.put(keys::HTTP_CALL_BACK, ConfigValue::from("bot"));
        assert!(HostSettings::from_store(&store).is_err());
    }

    #[test]
    fn substitutes_braced_and_simple_variables() {
        // SAFETY: test-local variable names, not read by other tests.
        unsafe {
            std::env::set_var("HOYO_TEST_SECRET", "s3cr3t");
            std::env::set_var("HOYO_TEST_HOST", "example.org");
        }

        assert_eq!(substitute_env_vars("${HOYO_TEST_SECRET}"), "s3cr3t");
        assert_eq!(
            substitute_env_vars("https://$HOYO_TEST_HOST/bot"),
            "https://example.org/bot"
        );
        assert_eq!(
            substitute_env_vars("${HOYO_TEST_UNSET_VARIABLE}"),
            "${HOYO_TEST_UNSET_VARIABLE}"
        );
        assert_eq!(substitute_env_vars("plain"), "plain");
    }

    #[test]
    fn config_value_untagged_serde() {
        let values: Vec<ConfigValue> = serde_json::from_str(r#"[true, 3, "x"]"#).unwrap();
        assert_eq!(
            values,
            vec![
                ConfigValue::Bool(true),
                ConfigValue::Int(3),
                ConfigValue::from("x")
            ]
        );
    }
}
