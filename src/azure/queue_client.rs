// src/azure/queue_client.rs

//! Storage queue REST client.

use std::time::Duration;

use reqwest::header::{AUTHORIZATION, CONTENT_LENGTH, HeaderMap, HeaderValue};
use reqwest::{Client, Method, Response, StatusCode, Url};
use serde::Deserialize;
use tracing::{debug, trace};

use super::auth::{STORAGE_API_VERSION, SharedKeyLite, rfc1123_now};
use crate::config::StorageQueueConfig;
use crate::errors::{Result, TraindError};
use crate::source::{QueueMessage, QueueService};
use crate::types::BoxFuture;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
struct QueueMessagesList {
    #[serde(rename = "QueueMessage", default)]
    messages: Vec<RawQueueMessage>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawQueueMessage {
    message_id: String,
    pop_receipt: String,
    #[serde(default)]
    dequeue_count: u32,
    #[serde(default)]
    message_text: String,
}

/// Parse the body of a "Get Messages" response.
pub(crate) fn parse_messages(body: &str) -> Result<Vec<QueueMessage>> {
    let body = body.trim_start_matches('\u{feff}').trim();
    if body.is_empty() {
        return Ok(Vec::new());
    }
    let list: QueueMessagesList = quick_xml::de::from_str(body)
        .map_err(|e| TraindError::Backend {
            status: 200,
            message: format!("unreadable queue response: {e}"),
        })?;
    Ok(list
        .messages
        .into_iter()
        .map(|m| QueueMessage {
            message_id: m.message_id,
            pop_receipt: m.pop_receipt,
            dequeue_count: m.dequeue_count,
            text: m.message_text,
        })
        .collect())
}

/// Client for the `messages` resource of one storage queue.
#[derive(Debug, Clone)]
pub struct StorageQueueClient {
    http: Client,
    signer: SharedKeyLite,
    endpoint: String,
    queue: String,
}

impl StorageQueueClient {
    pub fn new(config: &StorageQueueConfig) -> Result<Self> {
        let http = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            http,
            signer: SharedKeyLite::new(&config.account_name, &config.account_key)?,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            queue: config.queue_name.clone(),
        })
    }

    fn url(&self, message_id: Option<&str>) -> Result<Url> {
        let raw = match message_id {
            Some(id) => format!(
                "{}/{}/messages/{}",
                self.endpoint,
                self.queue,
                urlencoding::encode(id)
            ),
            None => format!("{}/{}/messages", self.endpoint, self.queue),
        };
        Url::parse(&raw)
            .map_err(|e| TraindError::ConfigError(format!("invalid queue endpoint '{raw}': {e}")))
    }

    async fn send(&self, method: Method, url: Url) -> Result<Response> {
        let date = rfc1123_now();
        let authorization = self.signer.authorization(
            method.as_str(),
            &[("x-ms-date", date.as_str()), ("x-ms-version", STORAGE_API_VERSION)],
            url.path(),
        )?;

        trace!(%method, %url, "storage queue request");
        let response = self
            .http
            .request(method, url)
            .header("x-ms-date", date)
            .header("x-ms-version", STORAGE_API_VERSION)
            .header(AUTHORIZATION, authorization)
            .header(CONTENT_LENGTH, "0")
            .send()
            .await?;
        Ok(response)
    }
}

/// Turn a failed response into an error. With `leased`, a missing message or
/// a stale pop receipt means the lease is gone.
async fn check(response: Response, leased: bool) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let lost = status == StatusCode::NOT_FOUND
        || (status == StatusCode::BAD_REQUEST && body.contains("PopReceiptMismatch"));
    if leased && lost {
        return Err(TraindError::LeaseLost(format!("storage queue returned {status}")));
    }
    Err(TraindError::Backend {
        status: status.as_u16(),
        message: body,
    })
}

fn renewed_receipt(headers: &HeaderMap) -> Result<String> {
    headers
        .get("x-ms-popreceipt")
        .and_then(|v: &HeaderValue| v.to_str().ok())
        .map(str::to_string)
        .ok_or_else(|| TraindError::Backend {
            status: 204,
            message: "update response carried no x-ms-popreceipt".to_string(),
        })
}

// The queue rejects a zero visibility timeout on update.
fn visibility_secs(timeout: Duration) -> String {
    timeout.as_secs().max(1).to_string()
}

impl QueueService for StorageQueueClient {
    fn get_messages(
        &self,
        count: u32,
        visibility_timeout: Duration,
    ) -> BoxFuture<'_, Result<Vec<QueueMessage>>> {
        Box::pin(async move {
            let mut url = self.url(None)?;
            url.query_pairs_mut()
                .append_pair("numofmessages", &count.to_string())
                .append_pair("visibilitytimeout", &visibility_secs(visibility_timeout));

            let response = check(self.send(Method::GET, url).await?, false).await?;
            let messages = parse_messages(&response.text().await?)?;
            debug!(queue = %self.queue, count = messages.len(), "dequeued messages");
            Ok(messages)
        })
    }

    fn update_message<'a>(
        &'a self,
        message_id: &'a str,
        pop_receipt: &'a str,
        visibility_timeout: Duration,
    ) -> BoxFuture<'a, Result<String>> {
        Box::pin(async move {
            let mut url = self.url(Some(message_id))?;
            url.query_pairs_mut()
                .append_pair("popreceipt", pop_receipt)
                .append_pair("visibilitytimeout", &visibility_secs(visibility_timeout));

            let response = check(self.send(Method::PUT, url).await?, true).await?;
            renewed_receipt(response.headers())
        })
    }

    fn delete_message<'a>(
        &'a self,
        message_id: &'a str,
        pop_receipt: &'a str,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let mut url = self.url(Some(message_id))?;
            url.query_pairs_mut().append_pair("popreceipt", pop_receipt);

            check(self.send(Method::DELETE, url).await?, true).await?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MessageEncoding;

    const RESPONSE: &str = "\u{feff}<?xml version=\"1.0\" encoding=\"utf-8\"?>\
        <QueueMessagesList>\
          <QueueMessage>\
            <MessageId>5974b586-0df3-4e2d-ad0c-18e3892bfca2</MessageId>\
            <InsertionTime>Mon, 19 Oct 2026 12:00:00 GMT</InsertionTime>\
            <ExpirationTime>Mon, 26 Oct 2026 12:00:00 GMT</ExpirationTime>\
            <PopReceipt>YzQ4Yzg1MDIGM0MDFiZDAwYzEw</PopReceipt>\
            <TimeNextVisible>Mon, 19 Oct 2026 12:00:30 GMT</TimeNextVisible>\
            <DequeueCount>2</DequeueCount>\
            <MessageText>{\"plugin\": \"retinanet\"}</MessageText>\
          </QueueMessage>\
        </QueueMessagesList>";

    #[test]
    fn parses_get_messages_response() {
        let messages = parse_messages(RESPONSE).unwrap();
        assert_eq!(
            messages,
            vec![QueueMessage {
                message_id: "5974b586-0df3-4e2d-ad0c-18e3892bfca2".to_string(),
                pop_receipt: "YzQ4Yzg1MDIGM0MDFiZDAwYzEw".to_string(),
                dequeue_count: 2,
                text: r#"{"plugin": "retinanet"}"#.to_string(),
            }]
        );
    }

    #[test]
    fn empty_list_and_empty_body() {
        assert!(parse_messages("<QueueMessagesList />").unwrap().is_empty());
        assert!(parse_messages("").unwrap().is_empty());
    }

    #[test]
    fn garbage_is_a_backend_error() {
        assert!(matches!(
            parse_messages("<QueueMessagesList><QueueMessage>"),
            Err(TraindError::Backend { .. })
        ));
    }

    #[test]
    fn message_urls() {
        let client = StorageQueueClient::new(&StorageQueueConfig {
            account_name: "acct".to_string(),
            account_key: "a2V5LWZvci10ZXN0cw==".to_string(),
            queue_name: "training".to_string(),
            message_count: 1,
            endpoint: "https://acct.queue.core.windows.net/".to_string(),
            message_encoding: MessageEncoding::Text,
        })
        .unwrap();

        assert_eq!(
            client.url(None).unwrap().as_str(),
            "https://acct.queue.core.windows.net/training/messages"
        );
        assert_eq!(
            client.url(Some("a b")).unwrap().path(),
            "/training/messages/a%20b"
        );
    }

    #[test]
    fn visibility_never_zero() {
        assert_eq!(visibility_secs(Duration::from_millis(300)), "1");
        assert_eq!(visibility_secs(Duration::from_secs(30)), "30");
    }
}
