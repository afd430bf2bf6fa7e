use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

/// Boxed, sendable future returned by the object-safe traits at the
/// backend and plugin seams.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// How the text of a storage queue message is encoded.
///
/// - `Text`: the message text is the JSON task content itself (default).
/// - `Base64`: the JSON is wrapped in base64, as some queue SDKs do by
///   default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MessageEncoding {
    #[default]
    Text,
    Base64,
}

impl FromStr for MessageEncoding {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "text" => Ok(MessageEncoding::Text),
            "base64" => Ok(MessageEncoding::Base64),
            other => Err(format!(
                "invalid message_encoding: {other} (expected \"text\" or \"base64\")"
            )),
        }
    }
}

/// Which task source implementation is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    StorageQueue,
    ServiceBus,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceKind::StorageQueue => f.write_str("storage-queue"),
            SourceKind::ServiceBus => f.write_str("service-bus"),
        }
    }
}

/// Parse a simple duration string like `"3s"`, `"250ms"`, `"1m"`, `"2h"`.
///
/// A bare number is read as seconds, matching the `*_IN_SECONDS` style
/// environment variables.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty duration string".to_string());
    }

    let idx = s
        .chars()
        .position(|c| !c.is_ascii_digit())
        .unwrap_or(s.len());

    let (num_part, unit_part) = s.split_at(idx);
    let value: u64 = num_part
        .parse()
        .map_err(|e| format!("invalid duration number '{}': {}", num_part, e))?;
    let unit = unit_part.trim().to_lowercase();

    match unit.as_str() {
        "ms" => Ok(Duration::from_millis(value)),
        "" | "s" => Ok(Duration::from_secs(value)),
        "m" => scaled_secs(value, 60, s),
        "h" => scaled_secs(value, 60 * 60, s),
        _ => Err(format!(
            "unsupported duration unit '{}'; expected ms, s, m, or h",
            unit
        )),
    }
}

fn scaled_secs(value: u64, factor: u64, original: &str) -> Result<Duration, String> {
    value
        .checked_mul(factor)
        .map(Duration::from_secs)
        .ok_or_else(|| format!("duration '{original}' is too large"))
}
