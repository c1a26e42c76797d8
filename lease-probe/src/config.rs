//! # Settings
//!
//! Two named string settings locate the queue:
//!
//! | key                                     | env override                   |
//! |-----------------------------------------|--------------------------------|
//! | `Microsoft.ServiceBus.ConnectionString` | `SERVICEBUS_CONNECTION_STRING` |
//! | `Microsoft.ServiceBus.QueueName`        | `SERVICEBUS_QUEUE_NAME`        |
//!
//! Values come from an optional JSON settings file and are then overridden
//! by the environment. Nested JSON objects are flattened with `.`, so
//! `{"Microsoft": {"ServiceBus": {"QueueName": "demo"}}}` and
//! `{"Microsoft.ServiceBus.QueueName": "demo"}` are equivalent.
//!
//! ```rust
//! use lease_probe::config::{Settings, QUEUE_NAME_KEY};
//!
//! let settings = Settings::from_json_str(r#"{"Microsoft.ServiceBus.QueueName": "demo"}"#).unwrap();
//! assert_eq!(settings.get(QUEUE_NAME_KEY), Some("demo"));
//! ```

use std::collections::HashMap;
use std::path::Path;

use lease_queue::backend::memory::{BrokerConfig, MemoryBroker};
use serde_json::Value;
use tracing::debug;

use crate::error::{ProbeError, ProbeResult};

pub const CONNECTION_STRING_KEY: &str = "Microsoft.ServiceBus.ConnectionString";
pub const QUEUE_NAME_KEY: &str = "Microsoft.ServiceBus.QueueName";

pub const CONNECTION_STRING_ENV: &str = "SERVICEBUS_CONNECTION_STRING";
pub const QUEUE_NAME_ENV: &str = "SERVICEBUS_QUEUE_NAME";

/// Endpoint scheme served by the in-process broker
pub const MEMORY_SCHEME: &str = "memory";

/// String key/value settings store
#[derive(Debug, Clone, Default)]
pub struct Settings {
    values: HashMap<String, String>,
}

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set<K, V>(&mut self, key: K, value: V)
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.values.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(|s| s.as_str())
    }

    /// Parse a JSON settings document
    pub fn from_json_str(text: &str) -> ProbeResult<Self> {
        let root: Value = serde_json::from_str(text)
            .map_err(|e| ProbeError::Config(format!("Invalid settings JSON: {}", e)))?;

        let Value::Object(map) = root else {
            return Err(ProbeError::Config(
                "Settings file must contain a JSON object".to_string(),
            ));
        };

        let mut settings = Self::new();
        for (key, value) in map {
            settings.flatten(key, value);
        }
        Ok(settings)
    }

    pub fn from_file(path: &Path) -> ProbeResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            ProbeError::Config(format!("Cannot read settings file {}: {}", path.display(), e))
        })?;
        Self::from_json_str(&text)
    }

    /// Read the settings file (if any) and apply environment overrides
    pub fn load(path: Option<&Path>) -> ProbeResult<Self> {
        let mut settings = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::new(),
        };
        settings.apply_env_from(|name| std::env::var(name).ok());
        Ok(settings)
    }

    /// Override the named settings from an environment lookup
    pub fn apply_env_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        for (env, key) in [
            (CONNECTION_STRING_ENV, CONNECTION_STRING_KEY),
            (QUEUE_NAME_ENV, QUEUE_NAME_KEY),
        ] {
            if let Some(value) = lookup(env) {
                debug!("Setting {} taken from {}", key, env);
                self.set(key, value);
            }
        }
    }

    /// Both queue settings, or a configuration error naming the missing one
    pub fn queue_settings(&self) -> ProbeResult<QueueSettings> {
        Ok(QueueSettings {
            connection_string: self.required(CONNECTION_STRING_KEY)?,
            queue_name: self.required(QUEUE_NAME_KEY)?,
        })
    }

    fn required(&self, key: &str) -> ProbeResult<String> {
        match self.get(key).map(str::trim) {
            Some(value) if !value.is_empty() => Ok(value.to_string()),
            _ => Err(ProbeError::Config(format!("Missing setting '{}'", key))),
        }
    }

    fn flatten(&mut self, key: String, value: Value) {
        match value {
            Value::Object(map) => {
                for (child, value) in map {
                    self.flatten(format!("{}.{}", key, child), value);
                }
            }
            Value::String(s) => self.set(key, s),
            Value::Null => {}
            other => self.set(key, other.to_string()),
        }
    }
}

/// Resolved queue location
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueSettings {
    pub connection_string: String,
    pub queue_name: String,
}

impl QueueSettings {
    /// Scheme of the connection string, if it has one
    pub fn scheme(&self) -> Option<&str> {
        self.connection_string
            .split_once("://")
            .map(|(scheme, _)| scheme)
    }

    /// Open the queue named by these settings.
    /// Only `memory://` endpoints can be reached from this process.
    pub fn connect(&self, config: BrokerConfig) -> ProbeResult<MemoryBroker> {
        match self.scheme() {
            Some(scheme) if scheme.eq_ignore_ascii_case(MEMORY_SCHEME) => {
                Ok(MemoryBroker::with_config(config))
            }
            Some(scheme) => Err(ProbeError::Config(format!(
                "Unsupported endpoint scheme '{}' for queue '{}'",
                scheme, self.queue_name
            ))),
            None => Err(ProbeError::Config(format!(
                "Connection string for queue '{}' has no endpoint scheme",
                self.queue_name
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn complete_settings() -> Settings {
        Settings::from_json_str(
            r#"{
                "Microsoft.ServiceBus.ConnectionString": "memory://local",
                "Microsoft.ServiceBus.QueueName": "demoqueue"
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn reads_flat_keys() {
        let queue = complete_settings().queue_settings().unwrap();
        assert_eq!(queue.connection_string, "memory://local");
        assert_eq!(queue.queue_name, "demoqueue");
    }

    #[test]
    fn flattens_nested_objects() {
        let settings = Settings::from_json_str(
            r#"{"Microsoft": {"ServiceBus": {"QueueName": "nested", "Retries": 3}}}"#,
        )
        .unwrap();
        assert_eq!(settings.get(QUEUE_NAME_KEY), Some("nested"));
        assert_eq!(settings.get("Microsoft.ServiceBus.Retries"), Some("3"));
    }

    #[test]
    fn environment_overrides_file() {
        let mut settings = complete_settings();
        settings.apply_env_from(|name| match name {
            QUEUE_NAME_ENV => Some("from-env".to_string()),
            _ => None,
        });

        let queue = settings.queue_settings().unwrap();
        assert_eq!(queue.queue_name, "from-env");
        assert_eq!(queue.connection_string, "memory://local");
    }

    #[test]
    fn missing_or_blank_values_are_config_errors() {
        let mut settings = Settings::new();
        settings.set(CONNECTION_STRING_KEY, "memory://local");
        settings.set(QUEUE_NAME_KEY, "   ");

        match settings.queue_settings() {
            Err(ProbeError::Config(message)) => assert!(message.contains(QUEUE_NAME_KEY)),
            other => panic!("expected config error, got {:?}", other),
        }
    }

    #[test]
    fn rejects_non_object_documents() {
        assert!(matches!(Settings::from_json_str("[1, 2]"), Err(ProbeError::Config(_))));
        assert!(matches!(Settings::from_json_str("{"), Err(ProbeError::Config(_))));
    }

    #[test]
    fn only_memory_endpoints_connect() {
        let memory = complete_settings().queue_settings().unwrap();
        assert!(memory.connect(BrokerConfig::default()).is_ok());

        let remote = QueueSettings {
            connection_string: "sb://namespace.servicebus.windows.net/;SharedAccessKey=secret".into(),
            queue_name: "demoqueue".into(),
        };
        match remote.connect(BrokerConfig::default()) {
            Err(ProbeError::Config(message)) => {
                assert!(message.contains("'sb'"));
                assert!(!message.contains("secret"));
            }
            other => panic!("expected config error, got {:?}", other.map(|_| ())),
        }
    }
}
