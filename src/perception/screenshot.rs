use std::io::Cursor;

use base64::Engine as _;

use crate::errors::{AgentError, AgentResult};
use crate::perception::types::{ScreenContext, ScreenshotContext, ScreenshotOutput};

/// Strips an optional `data:image/...;base64,` prefix.
pub fn strip_data_uri(base64: &str) -> &str {
    match base64.split_once(";base64,") {
        Some((prefix, payload)) if prefix.starts_with("data:") => payload,
        _ => base64,
    }
}

pub fn decode_base64(base64: &str) -> AgentResult<Vec<u8>> {
    Ok(base64::engine::general_purpose::STANDARD.decode(strip_data_uri(base64).trim())?)
}

/// Reads the image dimensions from the encoded header without decoding pixels.
pub fn image_dimensions(bytes: &[u8]) -> AgentResult<(u32, u32)> {
    let reader = image::ImageReader::new(Cursor::new(bytes)).with_guessed_format()?;
    Ok(reader.into_dimensions()?)
}

/// Accepts a capture only if it decodes to a non-empty image.
pub fn validate_screenshot(shot: &ScreenshotOutput) -> AgentResult<ScreenshotContext> {
    if strip_data_uri(&shot.base64).trim().is_empty() {
        return Err(AgentError::Perception("screenshot is empty".into()));
    }
    let bytes = decode_base64(&shot.base64)
        .map_err(|e| AgentError::Perception(format!("screenshot is not valid base64: {e}")))?;
    let (width, height) = image_dimensions(&bytes)
        .map_err(|e| AgentError::Perception(format!("screenshot does not decode: {e}")))?;
    if width == 0 || height == 0 {
        return Err(AgentError::Perception(format!("screenshot has no area ({width}x{height})")));
    }

    let scale_factor = if shot.scale_factor.is_finite() && shot.scale_factor > 0.0 {
        shot.scale_factor
    } else {
        1.0
    };

    Ok(ScreenshotContext {
        size: ScreenContext { width, height },
        scale_factor,
    })
}
