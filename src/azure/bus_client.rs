// src/azure/bus_client.rs

//! Service Bus queue REST client (peek-lock receive, renew, complete).

use std::time::Duration;

use chrono::Utc;
use reqwest::header::{AUTHORIZATION, CONTENT_LENGTH};
use reqwest::{Client, Method, Response, StatusCode, Url};
use serde::Deserialize;
use tracing::{debug, trace};

use super::auth::service_bus_sas;
use crate::config::ServiceBusConfig;
use crate::errors::{Result, TraindError};
use crate::source::{BusMessage, BusService};
use crate::types::BoxFuture;

/// Lifetime of each generated SAS token.
const TOKEN_TTL_SECS: i64 = 3600;
/// Added on top of the long-poll timeout for the HTTP request itself.
const REQUEST_SLACK: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct BrokerProperties {
    lock_token: String,
    message_id: String,
}

/// Parse the `BrokerProperties` header of a peek-locked message.
pub(crate) fn parse_broker_properties(header: &str) -> Result<(String, String)> {
    let props: BrokerProperties =
        serde_json::from_str(header).map_err(|e| TraindError::Backend {
            status: 201,
            message: format!("unreadable BrokerProperties header: {e}"),
        })?;
    Ok((props.message_id, props.lock_token))
}

#[derive(Debug, Clone)]
pub struct ServiceBusClient {
    http: Client,
    endpoint: String,
    queue: String,
    key_name: String,
    key_value: String,
    receive_timeout: Duration,
}

impl ServiceBusClient {
    pub fn new(config: &ServiceBusConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(config.receive_timeout + REQUEST_SLACK)
            .build()?;
        Ok(Self {
            http,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            queue: config.queue_name.clone(),
            key_name: config.key_name.clone(),
            key_value: config.key_value.clone(),
            receive_timeout: config.receive_timeout,
        })
    }

    fn resource_uri(&self) -> String {
        format!("{}/{}", self.endpoint, self.queue)
    }

    fn url(&self, suffix: &str) -> Result<Url> {
        let raw = format!("{}/messages/{}", self.resource_uri(), suffix);
        Url::parse(&raw).map_err(|e| {
            TraindError::ConfigError(format!("invalid service bus endpoint '{raw}': {e}"))
        })
    }

    fn message_url(&self, message_id: &str, lock_token: &str) -> Result<Url> {
        self.url(&format!(
            "{}/{}",
            urlencoding::encode(message_id),
            urlencoding::encode(lock_token)
        ))
    }

    async fn send(&self, method: Method, url: Url) -> Result<Response> {
        let expiry = Utc::now().timestamp() + TOKEN_TTL_SECS;
        let token = service_bus_sas(&self.resource_uri(), &self.key_name, &self.key_value, expiry)?;

        trace!(%method, %url, "service bus request");
        Ok(self
            .http
            .request(method, url)
            .header(AUTHORIZATION, token)
            .header(CONTENT_LENGTH, "0")
            .send()
            .await?)
    }
}

async fn check(response: Response, locked: bool) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    if locked && (status == StatusCode::NOT_FOUND || status == StatusCode::GONE) {
        return Err(TraindError::LeaseLost(format!("service bus returned {status}")));
    }
    Err(TraindError::Backend {
        status: status.as_u16(),
        message: body,
    })
}

impl BusService for ServiceBusClient {
    fn receive(&self) -> BoxFuture<'_, Result<Option<BusMessage>>> {
        Box::pin(async move {
            let mut url = self.url("head")?;
            url.query_pairs_mut()
                .append_pair("timeout", &self.receive_timeout.as_secs().to_string());

            let response = check(self.send(Method::POST, url).await?, false).await?;
            if response.status() == StatusCode::NO_CONTENT {
                return Ok(None);
            }

            let header = response
                .headers()
                .get("BrokerProperties")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
                .ok_or_else(|| TraindError::Backend {
                    status: response.status().as_u16(),
                    message: "locked message carried no BrokerProperties".to_string(),
                })?;
            let (message_id, lock_token) = parse_broker_properties(&header)?;
            let body = response.text().await?;

            debug!(queue = %self.queue, %message_id, "peek-locked message");
            Ok(Some(BusMessage {
                message_id,
                lock_token,
                body,
            }))
        })
    }

    fn renew_lock<'a>(&'a self, message_id: &'a str, lock_token: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let url = self.message_url(message_id, lock_token)?;
            check(self.send(Method::POST, url).await?, true).await?;
            Ok(())
        })
    }

    fn delete<'a>(&'a self, message_id: &'a str, lock_token: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let url = self.message_url(message_id, lock_token)?;
            check(self.send(Method::DELETE, url).await?, true).await?;
            Ok(())
        })
    }
}
