use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;

use crate::errors::{BarryError, BarryResult};
use crate::llm::provider::LlmProvider;
use crate::llm::retry::RetryPolicy;
use crate::llm::sse_parser;
use crate::llm::types::{CallConfig, ChatMessage, LlmResponse};

pub struct OpenAiCompatibleProvider {
    id: String,
    api_base: String,
    api_key: String,
    client: reqwest::Client,
    retry: RetryPolicy,
}

impl OpenAiCompatibleProvider {
    pub fn new(id: String, api_base: String, api_key: String) -> Self {
        Self {
            id,
            api_base,
            api_key,
            client: reqwest::Client::new(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> BarryResult<Self> {
        self.client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(self)
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    async fn send_with_retry(&self, body: &serde_json::Value) -> BarryResult<reqwest::Response> {
        let mut attempt = 0u32;
        loop {
            let result = self
                .client
                .post(&self.api_base)
                .bearer_auth(&self.api_key)
                .json(body)
                .send()
                .await;

            let failure = match result {
                Ok(response) if response.status().is_success() => return Ok(response),
                Ok(response) => {
                    let status = response.status();
                    let err_body = response.text().await.unwrap_or_default();
                    let err = BarryError::LlmProvider(format!("{}: {}", status, err_body));
                    if !RetryPolicy::is_retryable_status(status) {
                        return Err(err);
                    }
                    err
                }
                Err(e) if e.is_timeout() || e.is_connect() || e.is_request() => BarryError::Http(e),
                Err(e) => return Err(BarryError::Http(e)),
            };

            match self.retry.next_delay(attempt) {
                Some(delay) => {
                    tracing::warn!(
                        provider = %self.id,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %failure,
                        "LLM request failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                None => return Err(failure),
            }
        }
    }
}

#[async_trait]
impl LlmProvider for OpenAiCompatibleProvider {
    fn name(&self) -> &str {
        &self.id
    }

    async fn chat(&self, messages: Vec<ChatMessage>, cfg: &CallConfig) -> BarryResult<LlmResponse> {
        let body = serde_json::json!({
            "model": cfg.model,
            "messages": &messages,
            "stream": cfg.stream,
            "temperature": cfg.temperature,
        });

        tracing::debug!(
            provider = %self.id,
            model = %cfg.model,
            stream = cfg.stream,
            messages = messages.len(),
            "sending LLM request"
        );
        tracing::trace!(body = %sanitized_body(&body), "request body (base64 omitted)");

        let response = self.send_with_retry(&body).await?;

        if cfg.stream {
            self.handle_stream(response).await
        } else {
            self.handle_json(response).await
        }
    }
}

impl OpenAiCompatibleProvider {
    /// Accumulate an SSE streaming response into a single reply.
    async fn handle_stream(&self, response: reqwest::Response) -> BarryResult<LlmResponse> {
        let mut byte_stream = response.bytes_stream();
        let mut acc = sse_parser::SseAccumulator::default();
        while let Some(result) = byte_stream.next().await {
            if acc.feed(&result?) {
                break;
            }
        }
        let reply = acc.finish();

        tracing::info!(
            provider = %self.id,
            content_len = reply.content.len(),
            reasoning_len = reply.reasoning.len(),
            "LLM stream complete"
        );
        Ok(reply)
    }

    /// Handle a non-streaming JSON response.
    async fn handle_json(&self, response: reqwest::Response) -> BarryResult<LlmResponse> {
        let json: serde_json::Value = response.json().await?;

        let message = &json["choices"][0]["message"];
        let Some(content) = message["content"].as_str() else {
            return Err(BarryError::LlmProvider(format!(
                "response has no choices[0].message.content: {}",
                truncate(&json.to_string(), 300)
            )));
        };
        let reasoning = message["reasoning_content"].as_str().unwrap_or("").to_string();

        tracing::info!(
            provider = %self.id,
            content_len = content.len(),
            "LLM JSON response received"
        );

        Ok(LlmResponse {
            content: content.to_string(),
            reasoning,
        })
    }
}

/// Clone of the request body with image payloads replaced, for logging only.
fn sanitized_body(body: &serde_json::Value) -> String {
    let mut log_body = body.clone();
    if let Some(msgs) = log_body.get_mut("messages").and_then(|m| m.as_array_mut()) {
        for msg in msgs {
            let Some(parts) = msg.get_mut("content").and_then(|c| c.as_array_mut()) else {
                continue;
            };
            for part in parts {
                if part.get("type").and_then(|t| t.as_str()) == Some("image_url") {
                    if let Some(url) = part.get_mut("image_url").and_then(|i| i.get_mut("url")) {
                        *url = serde_json::Value::String("<omitted_base64_image>".to_string());
                    }
                }
            }
        }
    }
    serde_json::to_string(&log_body).unwrap_or_default()
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
