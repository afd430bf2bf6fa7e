// src/config/loader.rs

use std::fs;
use std::path::Path;

use crate::config::model::{Config, RawConfig};
use crate::errors::{Result, TraindError};

/// Load a configuration file from a given path and return the raw
/// `RawConfig`.
///
/// This only performs TOML deserialization; environment overrides and
/// validation happen in [`load_and_validate`].
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawConfig> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)?;

    let config: RawConfig = toml::from_str(&contents)?;

    Ok(config)
}

/// Load configuration from the process environment, on top of an optional
/// TOML file.
///
/// This is the entry point used by `traind::run`.
pub fn load_and_validate(path: Option<&Path>) -> Result<Config> {
    load_with_env(path, |key| std::env::var(key).ok())
}

/// Same as [`load_and_validate`] but with an injectable environment lookup.
///
/// - Reads TOML (if a path is given).
/// - Applies environment overrides.
/// - Applies defaults and validates (see `validate.rs`).
pub fn load_with_env<F>(path: Option<&Path>, lookup: F) -> Result<Config>
where
    F: Fn(&str) -> Option<String>,
{
    let mut raw = match path {
        Some(p) => load_from_path(p)?,
        None => RawConfig::default(),
    };
    apply_env(&mut raw, lookup)?;
    Config::try_from(raw)
}

/// Overlay environment variables onto a raw config.
///
/// Empty values count as unset, except `VOTT_PLUGIN_INTERPRETER` where an
/// empty value means "execute the plugin entry directly".
pub fn apply_env<F>(raw: &mut RawConfig, lookup: F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

    let sq = &mut raw.storage_queue;
    override_with(&mut sq.account_name, get("AZURE_STORAGE_ACCOUNT_NAME"));
    override_with(&mut sq.account_key, get("AZURE_STORAGE_KEY"));
    override_with(&mut sq.queue_name, get("AZURE_STORAGE_QUEUE_NAME"));
    override_with(&mut sq.endpoint, get("AZURE_STORAGE_QUEUE_ENDPOINT"));
    if let Some(count) = get("AZURE_STORAGE_QUEUE_MESSAGE_COUNT") {
        let parsed = count.trim().parse::<u32>().map_err(|e| {
            TraindError::ConfigError(format!(
                "AZURE_STORAGE_QUEUE_MESSAGE_COUNT must be a positive integer (got '{count}'): {e}"
            ))
        })?;
        sq.message_count = Some(parsed);
    }
    if let Some(enc) = get("AZURE_STORAGE_QUEUE_MESSAGE_ENCODING") {
        sq.message_encoding = Some(enc.parse().map_err(TraindError::ConfigError)?);
    }

    let sb = &mut raw.service_bus;
    override_with(&mut sb.namespace, get("AZURE_SERVICE_BUS_NAMESPACE"));
    override_with(&mut sb.key_name, get("AZURE_SERVICE_BUS_ACCESS_KEY_NAME"));
    override_with(&mut sb.key_value, get("AZURE_SERVICE_BUS_ACCESS_KEY_VALUE"));
    override_with(&mut sb.queue_name, get("AZURE_SERVICE_BUS_QUEUE_NAME"));
    override_with(&mut sb.endpoint, get("AZURE_SERVICE_BUS_ENDPOINT"));

    let d = &mut raw.daemon;
    override_with(&mut d.poll_interval, get("VOTT_POLL_INTERVAL"));
    override_with(&mut d.keep_alive_interval, get("VOTT_KEEP_ALIVE_IN_SECONDS"));
    override_with(&mut d.lease_duration, get("VOTT_LEASE_DURATION"));
    override_with(&mut d.plugin_timeout, get("VOTT_PLUGIN_TIMEOUT"));
    override_with(&mut d.sandbox_root, get("VOTT_SANDBOX_ROOT").map(Into::into));

    let p = &mut raw.plugin;
    override_with(&mut p.default_name, get("VOTT_KEEP_PLUGIN_NAME"));
    override_with(&mut p.default_url, get("VOTT_KEEP_PLUGIN_URL"));
    override_with(&mut p.dir, get("VOTT_PLUGIN_DIR").map(Into::into));
    override_with(&mut p.interpreter, lookup("VOTT_PLUGIN_INTERPRETER"));

    Ok(())
}

fn override_with<T>(slot: &mut Option<T>, value: Option<T>) {
    if value.is_some() {
        *slot = value;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn env_overrides_file_values() {
        let mut raw: RawConfig = toml::from_str(
            r#"
[storage_queue]
account_name = "from-file"
queue_name = "file-queue"
"#,
        )
        .unwrap();

        apply_env(
            &mut raw,
            env(&[
                ("AZURE_STORAGE_ACCOUNT_NAME", "from-env"),
                ("AZURE_STORAGE_QUEUE_MESSAGE_COUNT", "4"),
            ]),
        )
        .unwrap();

        assert_eq!(raw.storage_queue.account_name.as_deref(), Some("from-env"));
        assert_eq!(raw.storage_queue.queue_name.as_deref(), Some("file-queue"));
        assert_eq!(raw.storage_queue.message_count, Some(4));
    }

    #[test]
    fn empty_env_values_are_ignored() {
        let mut raw = RawConfig::default();
        apply_env(&mut raw, env(&[("AZURE_SERVICE_BUS_NAMESPACE", "  ")])).unwrap();
        assert!(raw.service_bus.namespace.is_none());
    }

    #[test]
    fn empty_interpreter_is_kept() {
        let mut raw = RawConfig::default();
        apply_env(&mut raw, env(&[("VOTT_PLUGIN_INTERPRETER", "")])).unwrap();
        assert_eq!(raw.plugin.interpreter.as_deref(), Some(""));
    }

    #[test]
    fn non_numeric_message_count_is_config_error() {
        let mut raw = RawConfig::default();
        let err = apply_env(
            &mut raw,
            env(&[("AZURE_STORAGE_QUEUE_MESSAGE_COUNT", "lots")]),
        )
        .unwrap_err();
        assert!(matches!(err, TraindError::ConfigError(msg) if msg.contains("lots")));
    }
}
