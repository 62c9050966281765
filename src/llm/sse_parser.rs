use crate::errors::{BarryError, BarryResult};
use crate::llm::types::{LlmResponse, StreamChunk, StreamChunkKind};

/// Parses a raw SSE line (OpenAI-compatible format) into a StreamChunk.
/// Returns None if the line is a keep-alive or non-data line.
pub fn parse_sse_line(line: &str) -> BarryResult<Option<StreamChunk>> {
    if line.is_empty() || line.starts_with(':') {
        return Ok(None);
    }

    let data = if let Some(d) = line.strip_prefix("data:") {
        d.trim()
    } else {
        return Ok(None);
    };

    if data == "[DONE]" {
        return Ok(Some(StreamChunk {
            kind: StreamChunkKind::Done,
            content: String::new(),
        }));
    }

    let json: serde_json::Value =
        serde_json::from_str(data).map_err(|e| BarryError::SseParsing(e.to_string()))?;

    if let Some(choices) = json["choices"].as_array() {
        if let Some(first) = choices.first() {
            let delta = &first["delta"];

            // Some models (DeepSeek, Qwen) expose their reasoning separately.
            if let Some(reasoning) = delta["reasoning_content"].as_str() {
                if !reasoning.is_empty() {
                    return Ok(Some(StreamChunk {
                        kind: StreamChunkKind::Reasoning,
                        content: reasoning.to_string(),
                    }));
                }
            }

            if let Some(content) = delta["content"].as_str() {
                if !content.is_empty() {
                    return Ok(Some(StreamChunk {
                        kind: StreamChunkKind::Content,
                        content: content.to_string(),
                    }));
                }
            }

            if first["finish_reason"].as_str().is_some() {
                return Ok(Some(StreamChunk {
                    kind: StreamChunkKind::Done,
                    content: String::new(),
                }));
            }
        }
    }

    Ok(None)
}

/// Assembles a streamed reply from raw body bytes split at arbitrary points.
#[derive(Debug, Default)]
pub struct SseAccumulator {
    line_buf: Vec<u8>,
    content: String,
    reasoning: String,
    done: bool,
}

impl SseAccumulator {
    /// Consume one body chunk. Returns true once the stream signalled its end.
    pub fn feed(&mut self, bytes: &[u8]) -> bool {
        for &b in bytes {
            if self.done {
                break;
            }
            if b != b'\n' {
                self.line_buf.push(b);
                continue;
            }
            let line = std::mem::take(&mut self.line_buf);
            self.apply(&line);
        }
        self.done
    }

    /// Decode whatever is left after the last newline and return the reply.
    pub fn finish(mut self) -> LlmResponse {
        if !self.done && !self.line_buf.is_empty() {
            let line = std::mem::take(&mut self.line_buf);
            self.apply(&line);
        }
        LlmResponse {
            content: self.content,
            reasoning: self.reasoning,
        }
    }

    fn apply(&mut self, raw: &[u8]) {
        let line = String::from_utf8_lossy(raw);
        match parse_sse_line(line.trim()) {
            Ok(Some(chunk)) => match chunk.kind {
                StreamChunkKind::Reasoning => self.reasoning.push_str(&chunk.content),
                StreamChunkKind::Content => self.content.push_str(&chunk.content),
                StreamChunkKind::Done => self.done = true,
            },
            Ok(None) => {}
            Err(e) => tracing::debug!("SSE parse skipped: {e}"),
        }
    }
}
