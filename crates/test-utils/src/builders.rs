#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::time::Duration;

use traind::config::{Config, ServiceBusConfig, StorageQueueConfig};
use traind::types::MessageEncoding;

/// Builder for a validated `Config`, bypassing file and environment loading.
///
/// Starts from the production defaults with no backend configured.
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.daemon.poll_interval = interval;
        self
    }

    pub fn keep_alive_interval(mut self, interval: Duration) -> Self {
        self.config.daemon.keep_alive_interval = interval;
        self
    }

    pub fn lease_duration(mut self, lease: Duration) -> Self {
        self.config.daemon.lease_duration = lease;
        self
    }

    pub fn plugin_timeout(mut self, timeout: Duration) -> Self {
        self.config.daemon.plugin_timeout = Some(timeout);
        self
    }

    pub fn sandbox_root(mut self, root: &Path) -> Self {
        self.config.daemon.sandbox_root = Some(root.to_path_buf());
        self
    }

    pub fn default_plugin(mut self, name: &str, url: Option<&str>) -> Self {
        self.config.plugin.default_name = name.to_string();
        self.config.plugin.default_url = url.map(str::to_string);
        self
    }

    pub fn plugin_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.plugin.dir = dir.into();
        self
    }

    pub fn interpreter(mut self, interpreter: Option<&str>) -> Self {
        self.config.plugin.interpreter = interpreter.map(str::to_string);
        self
    }

    pub fn entry(mut self, entry: &str) -> Self {
        self.config.plugin.entry = entry.to_string();
        self
    }

    pub fn storage_queue(mut self, account: &str, key: &str, queue: &str) -> Self {
        self.config.storage_queue = Some(StorageQueueConfig {
            account_name: account.to_string(),
            account_key: key.to_string(),
            queue_name: queue.to_string(),
            message_count: 1,
            endpoint: format!("https://{account}.queue.core.windows.net"),
            message_encoding: MessageEncoding::Text,
        });
        self
    }

    pub fn service_bus(mut self, namespace: &str, key_name: &str, key_value: &str, queue: &str) -> Self {
        self.config.service_bus = Some(ServiceBusConfig {
            namespace: namespace.to_string(),
            key_name: key_name.to_string(),
            key_value: key_value.to_string(),
            queue_name: queue.to_string(),
            receive_timeout: Duration::from_secs(60),
            endpoint: format!("https://{namespace}.servicebus.windows.net"),
        });
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
