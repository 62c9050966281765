/// Perception adapter: screenshot bytes in, validated [`PerceptionSnapshot`] out.
///
/// Any defect in the backend reply (missing annotated image, missing region
/// list, an unknown region type, a bounding box that is not four normalized
/// coordinates) is reported as `PerceptionUnavailable`. There is no fallback
/// to an empty region list and no retry here.
use std::sync::Arc;

use base64::Engine as _;

use crate::errors::{BarryError, BarryResult};
use crate::perception::traits::{PerceptionBackend, RawRegion};
use crate::perception::types::{PerceptionSnapshot, Region, RegionKind};

/// Slack allowed on normalized coordinates for rounding noise in the backend.
const BBOX_TOLERANCE: f64 = 0.01;

pub struct PerceptionAdapter {
    backend: Arc<dyn PerceptionBackend>,
}

impl PerceptionAdapter {
    pub fn new(backend: Arc<dyn PerceptionBackend>) -> Self {
        Self { backend }
    }

    pub async fn observe(&self, raw_screenshot: &[u8]) -> BarryResult<PerceptionSnapshot> {
        let (width, height) = image_dimensions(raw_screenshot)
            .map_err(|e| BarryError::PerceptionUnavailable(format!("screenshot: {e}")))?;

        let encoded = base64::engine::general_purpose::STANDARD.encode(raw_screenshot);
        let parsed = self.backend.parse(&encoded).await?;

        let annotated_b64 = parsed
            .annotated_image
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| malformed("annotated image missing"))?;
        let annotated_image = decode_image_base64(&annotated_b64)?;

        let raw_regions = parsed.regions.ok_or_else(|| malformed("region list missing"))?;
        let regions = raw_regions
            .iter()
            .enumerate()
            .map(|(index, raw)| validate_region(index, raw))
            .collect::<BarryResult<Vec<_>>>()?;

        tracing::info!(
            backend = self.backend.name(),
            width,
            height,
            regions = regions.len(),
            "perception snapshot ready"
        );

        Ok(PerceptionSnapshot {
            raw_image: raw_screenshot.to_vec(),
            annotated_image,
            regions,
            width,
            height,
        })
    }
}

fn malformed(what: &str) -> BarryError {
    BarryError::PerceptionUnavailable(format!("malformed parser payload: {what}"))
}

fn image_dimensions(bytes: &[u8]) -> Result<(u32, u32), image::ImageError> {
    let img = image::load_from_memory(bytes)?;
    Ok((img.width(), img.height()))
}

/// Accepts plain base64 or a `data:<mime>;base64,` URL.
fn decode_image_base64(src: &str) -> BarryResult<Vec<u8>> {
    let payload = match src.split_once(";base64,") {
        Some((prefix, rest)) if prefix.starts_with("data:") => rest,
        _ => src,
    };
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(payload.trim())
        .map_err(|e| malformed(&format!("annotated image is not base64 ({e})")))?;
    if bytes.is_empty() {
        return Err(malformed("annotated image is empty"));
    }
    Ok(bytes)
}

fn validate_region(index: usize, raw: &RawRegion) -> BarryResult<Region> {
    let kind = match raw.kind.trim().to_ascii_lowercase().as_str() {
        "text" => RegionKind::Text,
        "icon" => RegionKind::Icon,
        other => return Err(malformed(&format!("region {index} has unknown type '{other}'"))),
    };

    let [x0, y0, x1, y1] = match raw.bbox.as_slice() {
        [a, b, c, d] => [*a, *b, *c, *d],
        other => {
            return Err(malformed(&format!(
                "region {index} bbox has {} values, expected 4",
                other.len()
            )))
        }
    };
    let in_range = |v: f64| v.is_finite() && (-BBOX_TOLERANCE..=1.0 + BBOX_TOLERANCE).contains(&v);
    if ![x0, y0, x1, y1].into_iter().all(in_range) || x0 > x1 || y0 > y1 {
        return Err(malformed(&format!(
            "region {index} bbox [{x0}, {y0}, {x1}, {y1}] is not a normalized box"
        )));
    }
    let clamp = |v: f64| v.clamp(0.0, 1.0) as f32;

    Ok(Region {
        index,
        kind,
        content: raw.content.clone().unwrap_or_default().trim().to_string(),
        bbox: [clamp(x0), clamp(y0), clamp(x1), clamp(y1)],
        interactive: raw.interactivity.unwrap_or(false),
    })
}
