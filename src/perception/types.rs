use base64::Engine as _;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegionKind {
    Text,
    Icon,
}

impl RegionKind {
    pub fn label(&self) -> &'static str {
        match self {
            RegionKind::Text => "Text",
            RegionKind::Icon => "Icon",
        }
    }
}

/// One candidate interaction region of a snapshot. `index` is only the label
/// drawn on this snapshot's annotated image; it identifies nothing across
/// snapshots.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Region {
    pub index: usize,
    pub kind: RegionKind,
    pub content: String,
    /// Normalized bounding box [x0, y0, x1, y1] in range 0.0–1.0
    pub bbox: [f32; 4],
    pub interactive: bool,
}

impl Region {
    /// Centre of the bounding box in pixel coordinates of a `width`x`height` screen.
    pub fn center_px(&self, width: u32, height: u32) -> (i32, i32) {
        let cx = ((self.bbox[0] + self.bbox[2]) / 2.0 * width as f32).round() as i32;
        let cy = ((self.bbox[1] + self.bbox[3]) / 2.0 * height as f32).round() as i32;
        (cx, cy)
    }
}

/// Everything the experts see of one screenshot.
#[derive(Debug, Clone)]
pub struct PerceptionSnapshot {
    pub raw_image: Vec<u8>,
    pub annotated_image: Vec<u8>,
    pub regions: Vec<Region>,
    pub width: u32,
    pub height: u32,
}

impl PerceptionSnapshot {
    pub fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn raw_data_url(&self) -> String {
        data_url(&self.raw_image)
    }

    pub fn annotated_data_url(&self) -> String {
        data_url(&self.annotated_image)
    }

    /// Numbered, human-readable region list for oracle prompts.
    pub fn describe_regions(&self) -> String {
        if self.regions.is_empty() {
            return "(no regions detected)".to_string();
        }
        self.regions
            .iter()
            .map(|r| {
                let (cx, cy) = r.center_px(self.width, self.height);
                format!(
                    "{}. {}: '{}' (bbox [{:.3}, {:.3}, {:.3}, {:.3}], center ({cx}, {cy}), {})",
                    r.index,
                    r.kind.label(),
                    r.content,
                    r.bbox[0],
                    r.bbox[1],
                    r.bbox[2],
                    r.bbox[3],
                    if r.interactive { "interactive" } else { "non-interactive" }
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// `data:` URL with the MIME type sniffed from the image bytes.
pub fn data_url(bytes: &[u8]) -> String {
    let mime = image::guess_format(bytes)
        .map(|f| f.to_mime_type())
        .unwrap_or("image/png");
    format!(
        "data:{mime};base64,{}",
        base64::engine::general_purpose::STANDARD.encode(bytes)
    )
}
