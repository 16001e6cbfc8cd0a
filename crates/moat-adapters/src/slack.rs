// SPDX-License-Identifier: MIT OR Apache-2.0
//! Adapter that posts messages to Slack via `chat.postMessage`.

use crate::{Adapter, AdapterError};
use async_trait::async_trait;
use serde_json::{Value, json};
use std::sync::OnceLock;
use std::time::Duration;
use tracing::info;

const PROVIDER: &str = "slack";
const SLACK_API_BASE: &str = "https://slack.com/api";
const TIMEOUT: Duration = Duration::from_secs(10);

/// Adapter posting to Slack's `chat.postMessage`.
///
/// Expected `params` keys:
///
/// - `channel` (string): channel name (`#general`) or ID (`C0123456`).
/// - `text` (string): message body (Slack mrkdwn supported).
/// - `thread_ts` (string, optional): reply to a thread.
///
/// The bot token comes from the vault credential; `SLACK_BOT_TOKEN` is the
/// local-development fallback when no credential is connected.
pub struct SlackAdapter {
    client: OnceLock<reqwest::Client>,
}

impl SlackAdapter {
    /// Create the adapter; the pooled client is built on first use.
    pub fn new() -> Self {
        Self {
            client: OnceLock::new(),
        }
    }

    fn client(&self) -> &reqwest::Client {
        self.client.get_or_init(|| {
            reqwest::Client::builder()
                .timeout(TIMEOUT)
                .build()
                .expect("slack client construction")
        })
    }
}

impl Default for SlackAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Adapter for SlackAdapter {
    fn provider_name(&self) -> &'static str {
        PROVIDER
    }

    async fn execute(
        &self,
        capability_id: &str,
        _capability_name: &str,
        params: &Value,
        credential: Option<&str>,
    ) -> Result<Value, AdapterError> {
        let token = credential
            .map(str::to_string)
            .or_else(|| std::env::var("SLACK_BOT_TOKEN").ok().filter(|t| !t.is_empty()))
            .ok_or_else(|| {
                AdapterError::validation(
                    PROVIDER,
                    "no Slack bot token available; connect a credential or set SLACK_BOT_TOKEN",
                )
            })?;

        let channel = params.get("channel").and_then(Value::as_str).unwrap_or("");
        let text = params.get("text").and_then(Value::as_str).unwrap_or("");
        if channel.is_empty() || text.is_empty() {
            return Err(AdapterError::validation(
                PROVIDER,
                "'channel' and 'text' are required in params",
            ));
        }

        let mut payload = json!({"channel": channel, "text": text});
        if let Some(thread_ts) = params.get("thread_ts").and_then(Value::as_str) {
            payload["thread_ts"] = json!(thread_ts);
        }

        info!(
            capability_id,
            channel,
            // token and text content are NOT logged
            "posting to Slack"
        );

        let response = self
            .client()
            .post(format!("{SLACK_API_BASE}/chat.postMessage"))
            .bearer_auth(&token)
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AdapterError::timeout(PROVIDER, "Slack API request timed out")
                } else {
                    AdapterError::upstream(
                        PROVIDER,
                        format!("Slack API request failed: {e}"),
                        e.status().map(|s| s.as_u16()),
                    )
                }
            })?;

        let status_code = response.status().as_u16();
        let body: Value = response.json().await.map_err(|e| {
            AdapterError::upstream(PROVIDER, format!("Slack API returned non-JSON: {e}"), None)
        })?;

        // Slack reports errors in-band with ok=false.
        if body.get("ok").and_then(Value::as_bool) != Some(true) {
            let reason = body.get("error").and_then(Value::as_str).unwrap_or("unknown_error");
            return Err(AdapterError::upstream(
                PROVIDER,
                format!("Slack API error: {reason}"),
                Some(status_code),
            ));
        }

        Ok(json!({
            "ok": true,
            "channel": body.get("channel").cloned().unwrap_or(Value::Null),
            "ts": body.get("ts").cloned().unwrap_or(Value::Null),
            "message": body.get("message").cloned().unwrap_or(Value::Null),
        }))
    }
}
