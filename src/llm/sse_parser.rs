use crate::errors::{AgentError, AgentResult};
use crate::llm::types::StreamChunk;

/// Parses a raw SSE line (OpenAI-compatible format) into a StreamChunk.
/// Returns None if the line is a keep-alive or non-data line.
pub fn parse_sse_line(line: &str) -> AgentResult<Option<StreamChunk>> {
    if line.is_empty() || line.starts_with(':') {
        return Ok(None);
    }

    let data = if let Some(d) = line.strip_prefix("data:") {
        d.trim()
    } else {
        return Ok(None);
    };

    if data == "[DONE]" {
        return Ok(Some(StreamChunk::Done));
    }

    let json: serde_json::Value =
        serde_json::from_str(data).map_err(|e| AgentError::SseParsing(e.to_string()))?;

    if let Some(first) = json["choices"].as_array().and_then(|c| c.first()) {
        let delta = &first["delta"];

        // Reasoning content (some models expose this separately)
        if let Some(reasoning) = delta["reasoning_content"].as_str() {
            if !reasoning.is_empty() {
                return Ok(Some(StreamChunk::Reasoning(reasoning.to_string())));
            }
        }

        if let Some(content) = delta["content"].as_str() {
            if !content.is_empty() {
                return Ok(Some(StreamChunk::Content(content.to_string())));
            }
        }
    }

    // Usage arrives in a trailing chunk, usually with an empty `choices`.
    if let Some(total) = json["usage"]["total_tokens"].as_u64() {
        return Ok(Some(StreamChunk::Usage(total)));
    }

    Ok(None)
}
