//! HTTP transport for the remote store.

use super::RemoteStore;
use crate::config::{ClientConfig, ConfigError};
use crate::error::{ClientError, Result};
use async_trait::async_trait;
use ferry_engine::{ApplyRequest, ApplyResponse, FetchResponse, RemoteOutcome};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde_json::Value;

const DEVICE_HEADER: &str = "X-Device-Id";
const FETCH_PAGE_SIZE: u32 = 1_000;

/// Talks to a `ferry-server` over HTTP.
#[derive(Debug, Clone)]
pub struct HttpRemote {
    client: Client,
    base_url: String,
    auth_token: Option<String>,
    device_id: String,
}

impl HttpRemote {
    pub fn from_config(config: &ClientConfig) -> Result<Self> {
        let base_url = config
            .remote_url
            .clone()
            .ok_or(ConfigError::MissingRemoteUrl)?;
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ClientError::Remote(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            auth_token: config.auth_token.clone(),
            device_id: config.device_id.clone(),
        })
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        let request = request.header(DEVICE_HEADER, &self.device_id);
        match &self.auth_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

#[async_trait]
impl RemoteStore for HttpRemote {
    async fn apply(&self, request: &ApplyRequest) -> RemoteOutcome {
        let url = format!("{}/mutations", self.base_url);
        let response = match self
            .authorize(self.client.post(&url))
            .json(request)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                tracing::debug!(error = %e, "apply request failed");
                return RemoteOutcome::Unavailable(e.to_string());
            }
        };

        let status = response.status();
        if status.is_success() {
            return match response.json::<ApplyResponse>().await {
                Ok(body) => body.into(),
                // The write may have committed; the key makes a resend safe.
                Err(e) => RemoteOutcome::Unavailable(format!("unreadable response: {e}")),
            };
        }

        let body = response.text().await.unwrap_or_default();
        classify_status(status, &body)
    }

    async fn fetch(&self, table: &str) -> Result<Vec<Value>> {
        let url = format!("{}/records/{}", self.base_url, table);
        let mut records = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let mut request = self
                .authorize(self.client.get(&url))
                .query(&[("limit", FETCH_PAGE_SIZE.to_string())]);
            if let Some(after) = &cursor {
                request = request.query(&[("after", after)]);
            }
            let response = request
                .send()
                .await
                .map_err(|e| ClientError::Remote(e.to_string()))?;

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(ClientError::Remote(format!(
                    "fetch {table} returned {status}: {}",
                    error_message(&body)
                )));
            }

            let page: FetchResponse = response
                .json()
                .await
                .map_err(|e| ClientError::Remote(e.to_string()))?;
            records.extend(page.records);
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        tracing::debug!(table, count = records.len(), "fetched table");
        Ok(records)
    }
}

/// Map a non-success status to an outcome.
///
/// Timeouts, throttling and server errors are worth retrying; any other
/// client error is a policy decision the remote will repeat.
pub(crate) fn classify_status(status: StatusCode, body: &str) -> RemoteOutcome {
    let message = error_message(body);
    if status.is_server_error()
        || status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
    {
        RemoteOutcome::Unavailable(format!("{status}: {message}"))
    } else {
        RemoteOutcome::Rejected(message)
    }
}

/// The `error` field of a server error body, or the raw body.
fn error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("error").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| body.trim().to_string())
}
