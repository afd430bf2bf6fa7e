// src/azure/auth.rs

//! Request signing for the storage queue (SharedKeyLite) and Service Bus
//! (shared access signature) REST APIs.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::errors::{Result, TraindError};

type HmacSha256 = Hmac<Sha256>;

/// `x-ms-version` sent with every storage request.
pub const STORAGE_API_VERSION: &str = "2019-02-02";

fn hmac_sha256_base64(key: &[u8], data: &str) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| TraindError::ConfigError(format!("invalid signing key: {e}")))?;
    mac.update(data.as_bytes());
    Ok(STANDARD.encode(mac.finalize().into_bytes()))
}

/// Current time in the RFC 1123 form storage expects in `x-ms-date`.
pub fn rfc1123_now() -> String {
    Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// SharedKeyLite signer for one storage account.
#[derive(Clone)]
pub struct SharedKeyLite {
    account: String,
    key: Vec<u8>,
}

impl std::fmt::Debug for SharedKeyLite {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedKeyLite")
            .field("account", &self.account)
            .finish_non_exhaustive()
    }
}

impl SharedKeyLite {
    /// `account_key` is the base64 key shown in the storage account.
    pub fn new(account: &str, account_key: &str) -> Result<Self> {
        let key = STANDARD.decode(account_key.trim()).map_err(|e| {
            TraindError::ConfigError(format!("AZURE_STORAGE_KEY is not valid base64: {e}"))
        })?;
        Ok(Self {
            account: account.to_string(),
            key,
        })
    }

    /// Build the SharedKeyLite string-to-sign.
    ///
    /// `ms_headers` are the `x-ms-*` headers sent with the request; `path` is
    /// the request URL's (already percent-encoded) path.
    pub fn string_to_sign(&self, method: &str, ms_headers: &[(&str, &str)], path: &str) -> String {
        let mut headers: Vec<(String, &str)> = ms_headers
            .iter()
            .map(|(name, value)| (name.to_ascii_lowercase(), value.trim()))
            .collect();
        headers.sort_by(|a, b| a.0.cmp(&b.0));

        let canonical_headers: String = headers
            .iter()
            .map(|(name, value)| format!("{name}:{value}\n"))
            .collect();

        // VERB, Content-MD5, Content-Type, Date (empty: x-ms-date is used).
        format!(
            "{}\n\n\n\n{}/{}{}",
            method.to_ascii_uppercase(),
            canonical_headers,
            self.account,
            path
        )
    }

    /// Value for the `Authorization` header.
    pub fn authorization(&self, method: &str, ms_headers: &[(&str, &str)], path: &str) -> Result<String> {
        let signature = hmac_sha256_base64(&self.key, &self.string_to_sign(method, ms_headers, path))?;
        Ok(format!("SharedKeyLite {}:{}", self.account, signature))
    }
}

/// Shared access signature token for a Service Bus entity.
///
/// `expiry` is a unix timestamp in seconds.
pub fn service_bus_sas(resource_uri: &str, key_name: &str, key: &str, expiry: i64) -> Result<String> {
    let resource = urlencoding::encode(resource_uri);
    let signature = hmac_sha256_base64(key.as_bytes(), &format!("{resource}\n{expiry}"))?;
    Ok(format!(
        "SharedAccessSignature sr={}&sig={}&se={}&skn={}",
        resource,
        urlencoding::encode(&signature),
        expiry,
        key_name
    ))
}
