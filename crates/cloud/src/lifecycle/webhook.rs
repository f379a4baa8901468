// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP client for TPA backend webhooks.

use std::time::Duration;

use serde::Serialize;
use serde_json::Value;

use crate::config::CloudConfig;

/// Backoff schedule between webhook attempts (two retries).
const RETRY_BACKOFF: [Duration; 2] = [Duration::from_secs(1), Duration::from_secs(2)];
/// Config discovery is best-effort and short.
const TPA_CONFIG_TIMEOUT: Duration = Duration::from_secs(5);

/// Session-start notification posted to `<publicUrl>/webhook`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRequestPayload {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub session_id: String,
    pub user_id: String,
    pub timestamp: u64,
    #[serde(rename = "augmentOSWebsocketUrl")]
    pub websocket_url: String,
}

impl SessionRequestPayload {
    pub fn new(session_id: String, user_id: String, websocket_url: String) -> Self {
        Self {
            kind: "session_request",
            session_id,
            user_id,
            timestamp: crate::protocol::epoch_ms(),
            websocket_url,
        }
    }
}

/// Stop notification posted to `<publicUrl>/webhook`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StopRequestPayload {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub session_id: String,
    pub user_id: String,
    pub reason: String,
    pub timestamp: u64,
}

impl StopRequestPayload {
    pub fn new(session_id: String, user_id: String, reason: &str) -> Self {
        Self {
            kind: "stop_request",
            session_id,
            user_id,
            reason: reason.to_owned(),
            timestamp: crate::protocol::epoch_ms(),
        }
    }
}

/// Outbound HTTP to TPA backends: start/stop webhooks with retries,
/// tool invocation, and config discovery.
pub struct WebhookClient {
    client: reqwest::Client,
}

impl WebhookClient {
    pub fn new(config: &CloudConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.webhook_timeout())
            .build()
            .unwrap_or_default();
        Self { client }
    }

    /// POST a session-start request, retrying on failure.
    pub async fn send_session_request(
        &self,
        public_url: &str,
        payload: &SessionRequestPayload,
    ) -> anyhow::Result<()> {
        self.post_with_retries(&webhook_url(public_url), &serde_json::to_value(payload)?).await
    }

    /// POST a stop request, retrying on failure.
    pub async fn send_stop_request(
        &self,
        public_url: &str,
        payload: &StopRequestPayload,
    ) -> anyhow::Result<()> {
        self.post_with_retries(&webhook_url(public_url), &serde_json::to_value(payload)?).await
    }

    async fn post_with_retries(&self, url: &str, body: &Value) -> anyhow::Result<()> {
        let mut attempt = 0;
        loop {
            let outcome = async {
                let resp = self.client.post(url).json(body).send().await?;
                resp.error_for_status()?;
                anyhow::Ok(())
            }
            .await;

            match outcome {
                Ok(()) => return Ok(()),
                Err(e) if attempt < RETRY_BACKOFF.len() => {
                    tracing::warn!(url, attempt, err = %e, "webhook attempt failed; retrying");
                    tokio::time::sleep(RETRY_BACKOFF[attempt]).await;
                    attempt += 1;
                }
                Err(e) => {
                    return Err(e.context(format!("webhook to {url} failed after {attempt} retries")))
                }
            }
        }
    }

    /// Invoke a tool endpoint with the app's hashed API key.
    pub async fn invoke_tool(
        &self,
        public_url: &str,
        hashed_api_key: &str,
        payload: &Value,
    ) -> anyhow::Result<Value> {
        let url = format!("{}/tool", public_url.trim_end_matches('/'));
        let resp = self
            .client
            .post(&url)
            .header("X-TPA-API-Key", hashed_api_key)
            .json(payload)
            .send()
            .await?
            .error_for_status()?;
        Ok(resp.json().await?)
    }

    /// Fetch `<publicUrl>/tpa_config.json`. A 404 means "no tools".
    pub async fn fetch_tpa_config(&self, public_url: &str) -> anyhow::Result<Option<Value>> {
        let url = format!("{}/tpa_config.json", public_url.trim_end_matches('/'));
        let resp = self.client.get(&url).timeout(TPA_CONFIG_TIMEOUT).send().await?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        Ok(Some(resp.error_for_status()?.json().await?))
    }
}

fn webhook_url(public_url: &str) -> String {
    format!("{}/webhook", public_url.trim_end_matches('/'))
}

#[cfg(test)]
#[path = "webhook_tests.rs"]
mod tests;
