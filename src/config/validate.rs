// src/config/validate.rs

use std::path::PathBuf;
use std::time::Duration;

use crate::config::model::{
    Config, DaemonConfig, PluginConfig, RawConfig, RawDaemonSection, RawPluginSection,
    RawServiceBusSection, RawStorageQueueSection, ServiceBusConfig, StorageQueueConfig,
};
use tracing::warn;

use crate::errors::{Result, TraindError};
use crate::types::parse_duration;

/// Storage queues hand out at most this many messages per request.
pub const MAX_MESSAGE_COUNT: u32 = 32;

impl TryFrom<RawConfig> for Config {
    type Error = TraindError;

    fn try_from(raw: RawConfig) -> std::result::Result<Self, Self::Error> {
        let daemon = validate_daemon(raw.daemon)?;
        let plugin = validate_plugin(raw.plugin)?;
        let storage_queue = validate_storage_queue(raw.storage_queue)?;
        let service_bus = validate_service_bus(raw.service_bus)?;

        Ok(Config {
            daemon,
            plugin,
            storage_queue,
            service_bus,
        })
    }
}

fn validate_daemon(raw: RawDaemonSection) -> Result<DaemonConfig> {
    let defaults = DaemonConfig::default();

    let poll_interval = duration_or("daemon.poll_interval", raw.poll_interval, defaults.poll_interval)?;
    let keep_alive_interval = duration_or(
        "daemon.keep_alive_interval",
        raw.keep_alive_interval,
        defaults.keep_alive_interval,
    )?;
    let lease_duration = duration_or(
        "daemon.lease_duration",
        raw.lease_duration,
        defaults.lease_duration,
    )?;
    let plugin_timeout = raw
        .plugin_timeout
        .map(|s| non_zero_duration("daemon.plugin_timeout", &s))
        .transpose()?;

    if keep_alive_interval >= lease_duration {
        return Err(TraindError::ConfigError(format!(
            "daemon.keep_alive_interval ({keep_alive_interval:?}) must be shorter than \
             daemon.lease_duration ({lease_duration:?})"
        )));
    }

    Ok(DaemonConfig {
        poll_interval,
        keep_alive_interval,
        lease_duration,
        plugin_timeout,
        sandbox_root: raw.sandbox_root,
    })
}

fn validate_plugin(raw: RawPluginSection) -> Result<PluginConfig> {
    let defaults = PluginConfig::default();

    let default_name = raw.default_name.unwrap_or(defaults.default_name);
    if default_name.trim().is_empty() {
        return Err(TraindError::ConfigError(
            "plugin.default_name must not be empty".to_string(),
        ));
    }

    let interpreter = match raw.interpreter {
        Some(s) if s.trim().is_empty() => None,
        Some(s) => Some(s),
        None => defaults.interpreter,
    };

    Ok(PluginConfig {
        default_name,
        default_url: raw.default_url.filter(|u| !u.trim().is_empty()),
        dir: raw.dir.unwrap_or_else(default_plugin_dir),
        interpreter,
        entry: raw.entry.unwrap_or(defaults.entry),
    })
}

fn validate_storage_queue(raw: RawStorageQueueSection) -> Result<Option<StorageQueueConfig>> {
    let (account_name, account_key) = match (raw.account_name, raw.account_key) {
        (Some(name), Some(key)) => (name, key),
        (None, None) => return Ok(None),
        (Some(_), None) => {
            warn!("AZURE_STORAGE_ACCOUNT_NAME is set but AZURE_STORAGE_KEY is missing; ignoring storage queue");
            return Ok(None);
        }
        (None, Some(_)) => {
            warn!("AZURE_STORAGE_KEY is set but AZURE_STORAGE_ACCOUNT_NAME is missing; ignoring storage queue");
            return Ok(None);
        }
    };

    let message_count = raw.message_count.unwrap_or(1);
    if message_count == 0 || message_count > MAX_MESSAGE_COUNT {
        return Err(TraindError::ConfigError(format!(
            "storage_queue.message_count must be in 1..={MAX_MESSAGE_COUNT} (got {message_count})"
        )));
    }

    let queue_name = queue_name_or_default("storage_queue.queue_name", raw.queue_name)?;
    let endpoint = raw
        .endpoint
        .unwrap_or_else(|| format!("https://{account_name}.queue.core.windows.net"));

    Ok(Some(StorageQueueConfig {
        account_name,
        account_key,
        queue_name,
        message_count,
        endpoint: endpoint.trim_end_matches('/').to_string(),
        message_encoding: raw.message_encoding.unwrap_or_default(),
    }))
}

fn validate_service_bus(raw: RawServiceBusSection) -> Result<Option<ServiceBusConfig>> {
    let Some(namespace) = raw.namespace else {
        return Ok(None);
    };

    let (key_name, key_value) = match (raw.key_name, raw.key_value) {
        (Some(name), Some(value)) => (name, value),
        _ => {
            warn!(
                %namespace,
                "AZURE_SERVICE_BUS_ACCESS_KEY_NAME / AZURE_SERVICE_BUS_ACCESS_KEY_VALUE are incomplete; \
                 ignoring service bus"
            );
            return Ok(None);
        }
    };

    let queue_name = queue_name_or_default("service_bus.queue_name", raw.queue_name)?;
    let receive_timeout = duration_or(
        "service_bus.receive_timeout",
        raw.receive_timeout,
        Duration::from_secs(60),
    )?;
    let endpoint = raw
        .endpoint
        .unwrap_or_else(|| format!("https://{namespace}.servicebus.windows.net"));

    Ok(Some(ServiceBusConfig {
        namespace,
        key_name,
        key_value,
        queue_name,
        receive_timeout,
        endpoint: endpoint.trim_end_matches('/').to_string(),
    }))
}

fn queue_name_or_default(field: &str, value: Option<String>) -> Result<String> {
    let name = value.unwrap_or_else(|| "training".to_string());
    if name.trim().is_empty() {
        return Err(TraindError::ConfigError(format!("{field} must not be empty")));
    }
    Ok(name)
}

fn duration_or(field: &str, value: Option<String>, default: Duration) -> Result<Duration> {
    match value {
        Some(s) => non_zero_duration(field, &s),
        None => Ok(default),
    }
}

fn non_zero_duration(field: &str, s: &str) -> Result<Duration> {
    let d = parse_duration(s)
        .map_err(|e| TraindError::ConfigError(format!("{field}: {e}")))?;
    if d.is_zero() {
        return Err(TraindError::ConfigError(format!("{field} must be > 0")));
    }
    Ok(d)
}

/// `plugins/` next to the running executable, falling back to `./plugins`.
fn default_plugin_dir() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|p| p.join("plugins")))
        .unwrap_or_else(|| PathBuf::from("plugins"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml_src: &str) -> Result<Config> {
        let raw: RawConfig = toml::from_str(toml_src)?;
        Config::try_from(raw)
    }

    #[test]
    fn empty_config_gets_defaults_and_no_backends() {
        let cfg = parse("").unwrap();
        assert_eq!(cfg.daemon, DaemonConfig::default());
        assert_eq!(cfg.plugin.default_name, "hello-world");
        assert_eq!(cfg.plugin.interpreter.as_deref(), Some("python3"));
        assert!(cfg.storage_queue.is_none());
        assert!(cfg.service_bus.is_none());
    }

    #[test]
    fn storage_queue_defaults() {
        let cfg = parse(
            r#"
[storage_queue]
account_name = "acct"
account_key = "a2V5"
"#,
        )
        .unwrap();
        let sq = cfg.storage_queue.unwrap();
        assert_eq!(sq.queue_name, "training");
        assert_eq!(sq.message_count, 1);
        assert_eq!(sq.endpoint, "https://acct.queue.core.windows.net");
    }

    #[test]
    fn half_configured_storage_queue_is_absent() {
        let cfg = parse("[storage_queue]\naccount_name = \"acct\"\n").unwrap();
        assert!(cfg.storage_queue.is_none());
        let cfg = parse("[storage_queue]\naccount_key = \"a2V5\"\n").unwrap();
        assert!(cfg.storage_queue.is_none());
    }

    #[test]
    fn service_bus_without_both_key_parts_is_absent() {
        let cfg = parse(
            r#"
[service_bus]
namespace = "ns"
key_name = "RootManageSharedAccessKey"
"#,
        )
        .unwrap();
        assert!(cfg.service_bus.is_none());
    }

    #[test]
    fn message_count_is_bounded() {
        let src = |n: u32| {
            format!("[storage_queue]\naccount_name = \"a\"\naccount_key = \"k\"\nmessage_count = {n}\n")
        };
        assert!(parse(&src(0)).is_err());
        assert!(parse(&src(33)).is_err());
        assert_eq!(parse(&src(32)).unwrap().storage_queue.unwrap().message_count, 32);
    }

    #[test]
    fn keep_alive_must_be_shorter_than_lease() {
        let err = parse(
            r#"
[daemon]
keep_alive_interval = "30s"
lease_duration = "30s"
"#,
        )
        .unwrap_err();
        assert!(matches!(err, TraindError::ConfigError(msg) if msg.contains("keep_alive_interval")));
    }

    #[test]
    fn zero_durations_are_rejected() {
        assert!(parse("[daemon]\npoll_interval = \"0s\"\n").is_err());
        assert!(parse("[daemon]\nplugin_timeout = \"0ms\"\n").is_err());
    }

    #[test]
    fn empty_interpreter_means_direct_execution() {
        let cfg = parse("[plugin]\ninterpreter = \"\"\n").unwrap();
        assert!(cfg.plugin.interpreter.is_none());
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(matches!(
            parse("[daemon]\npoll = \"1s\"\n"),
            Err(TraindError::TomlError(_))
        ));
    }
}
