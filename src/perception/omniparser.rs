use std::time::Duration;

use async_trait::async_trait;

use crate::errors::{BarryError, BarryResult};
use crate::perception::traits::{ParsedScreen, PerceptionBackend};

/// HTTP client for an OmniParser server (`POST {base}/parse/`).
pub struct OmniparserClient {
    endpoint: String,
    client: reqwest::Client,
}

impl OmniparserClient {
    pub fn new(server_url: &str, timeout: Duration) -> BarryResult<Self> {
        let base = server_url.trim().trim_end_matches('/');
        if base.is_empty() {
            return Err(BarryError::Config("perception server_url is empty".into()));
        }
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            endpoint: format!("{base}/parse/"),
            client,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl PerceptionBackend for OmniparserClient {
    fn name(&self) -> &str {
        "omniparser"
    }

    async fn parse(&self, image_base64: &str) -> BarryResult<ParsedScreen> {
        let unavailable = |e: reqwest::Error| {
            BarryError::PerceptionUnavailable(format!("{}: {e}", self.endpoint))
        };

        let started = std::time::Instant::now();
        let response = self
            .client
            .post(&self.endpoint)
            .json(&serde_json::json!({ "base64_image": image_base64 }))
            .send()
            .await
            .map_err(unavailable)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BarryError::PerceptionUnavailable(format!(
                "{} returned {status}: {}",
                self.endpoint,
                body.chars().take(200).collect::<String>()
            )));
        }

        let bytes = response.bytes().await.map_err(unavailable)?;
        let parsed: ParsedScreen = serde_json::from_slice(&bytes).map_err(|e| {
            BarryError::PerceptionUnavailable(format!("malformed parser payload: {e}"))
        })?;
        tracing::debug!(
            endpoint = %self.endpoint,
            elapsed_ms = started.elapsed().as_millis() as u64,
            regions = parsed.regions.as_ref().map(Vec::len).unwrap_or(0),
            "screen parsed"
        );
        Ok(parsed)
    }
}
