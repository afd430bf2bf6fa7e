// src/config/model.rs

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::types::MessageEncoding;

/// Configuration as read from an optional TOML file, before environment
/// overrides and validation.
///
/// ```toml
/// [daemon]
/// poll_interval = "10s"
/// keep_alive_interval = "1s"
/// lease_duration = "30s"
///
/// [plugin]
/// default_name = "hello-world"
/// dir = "/opt/traind/plugins"
///
/// [storage_queue]
/// account_name = "vott"
/// account_key = "..."
/// queue_name = "training"
/// message_count = 1
/// ```
///
/// Every field is optional; missing values get defaults during validation.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RawConfig {
    pub daemon: RawDaemonSection,
    pub plugin: RawPluginSection,
    pub storage_queue: RawStorageQueueSection,
    pub service_bus: RawServiceBusSection,
}

/// `[daemon]` section.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RawDaemonSection {
    /// Sleep after a `receive()` that returned no tasks.
    pub poll_interval: Option<String>,
    /// How often a task's lease is renewed while its plugin runs.
    pub keep_alive_interval: Option<String>,
    /// How far each renewal pushes the lease out.
    pub lease_duration: Option<String>,
    /// Upper bound on a single plugin run; unbounded when absent.
    pub plugin_timeout: Option<String>,
    /// Parent directory for task sandboxes; system temp dir when absent.
    pub sandbox_root: Option<PathBuf>,
}

/// `[plugin]` section.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RawPluginSection {
    pub default_name: Option<String>,
    pub default_url: Option<String>,
    pub dir: Option<PathBuf>,
    /// Interpreter used to launch the plugin entry. Empty string means the
    /// entry is executed directly.
    pub interpreter: Option<String>,
    pub entry: Option<String>,
}

/// `[storage_queue]` section.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RawStorageQueueSection {
    pub account_name: Option<String>,
    pub account_key: Option<String>,
    pub queue_name: Option<String>,
    pub message_count: Option<u32>,
    pub endpoint: Option<String>,
    pub message_encoding: Option<MessageEncoding>,
}

/// `[service_bus]` section.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RawServiceBusSection {
    pub namespace: Option<String>,
    pub key_name: Option<String>,
    pub key_value: Option<String>,
    pub queue_name: Option<String>,
    pub receive_timeout: Option<String>,
    pub endpoint: Option<String>,
}

/// Validated configuration, built once at startup and passed by reference.
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub daemon: DaemonConfig,
    pub plugin: PluginConfig,
    /// Present only when storage queue credentials are configured.
    pub storage_queue: Option<StorageQueueConfig>,
    /// Present only when a Service Bus namespace is configured.
    pub service_bus: Option<ServiceBusConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaemonConfig {
    pub poll_interval: Duration,
    pub keep_alive_interval: Duration,
    pub lease_duration: Duration,
    pub plugin_timeout: Option<Duration>,
    pub sandbox_root: Option<PathBuf>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(10),
            keep_alive_interval: Duration::from_secs(1),
            lease_duration: Duration::from_secs(30),
            plugin_timeout: None,
            sandbox_root: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginConfig {
    pub default_name: String,
    pub default_url: Option<String>,
    pub dir: PathBuf,
    pub interpreter: Option<String>,
    pub entry: String,
}

impl Default for PluginConfig {
    fn default() -> Self {
        Self {
            default_name: "hello-world".to_string(),
            default_url: None,
            dir: PathBuf::from("plugins"),
            interpreter: Some("python3".to_string()),
            entry: "plugin.py".to_string(),
        }
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct StorageQueueConfig {
    pub account_name: String,
    pub account_key: String,
    pub queue_name: String,
    pub message_count: u32,
    pub endpoint: String,
    pub message_encoding: MessageEncoding,
}

#[derive(Clone, PartialEq, Eq)]
pub struct ServiceBusConfig {
    pub namespace: String,
    pub key_name: String,
    pub key_value: String,
    pub queue_name: String,
    pub receive_timeout: Duration,
    pub endpoint: String,
}

// Credentials stay out of Debug output (and therefore out of logs).
impl std::fmt::Debug for StorageQueueConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageQueueConfig")
            .field("account_name", &self.account_name)
            .field("queue_name", &self.queue_name)
            .field("message_count", &self.message_count)
            .field("endpoint", &self.endpoint)
            .field("message_encoding", &self.message_encoding)
            .finish_non_exhaustive()
    }
}

impl std::fmt::Debug for ServiceBusConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceBusConfig")
            .field("namespace", &self.namespace)
            .field("key_name", &self.key_name)
            .field("queue_name", &self.queue_name)
            .field("receive_timeout", &self.receive_timeout)
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}
