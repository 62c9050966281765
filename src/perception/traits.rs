use async_trait::async_trait;
use serde::Deserialize;

use crate::errors::BarryResult;

/// One region as reported by the backend, before validation.
#[derive(Debug, Clone, Deserialize)]
pub struct RawRegion {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default, alias = "interactive")]
    pub interactivity: Option<bool>,
    pub bbox: Vec<f64>,
}

/// Backend reply. Both fields are optional here so a missing one can be
/// reported precisely by the adapter.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ParsedScreen {
    #[serde(default, alias = "som_image_base64")]
    pub annotated_image: Option<String>,
    #[serde(default, alias = "parsed_content_list")]
    pub regions: Option<Vec<RawRegion>>,
}

/// Screen-parsing service that marks candidate regions on a screenshot.
#[async_trait]
pub trait PerceptionBackend: Send + Sync {
    fn name(&self) -> &str;

    async fn parse(&self, image_base64: &str) -> BarryResult<ParsedScreen>;
}
