use std::io::Cursor;

use base64::Engine as _;

use crate::errors::AgentResult;
use crate::perception::screenshot::{decode_base64, strip_data_uri};

/// Target size for an image of `width`×`height` under `max_pixels`.
/// Images already within budget keep their size.
pub fn target_size(width: u32, height: u32, max_pixels: u64) -> (u32, u32) {
    let area = width as u64 * height as u64;
    if area <= max_pixels || area == 0 {
        return (width, height);
    }
    let factor = (max_pixels as f64 / area as f64).sqrt();
    let w = ((width as f64 * factor).floor() as u32).max(1);
    let h = ((height as f64 * factor).floor() as u32).max(1);
    (w, h)
}

/// Returns a base64 PNG no larger than `max_pixels`. Images within budget
/// are passed through untouched (minus any `data:` prefix).
pub fn resize_to_budget(base64: &str, max_pixels: u64) -> AgentResult<String> {
    let bytes = decode_base64(base64)?;
    let img = image::load_from_memory(&bytes)?;
    let (w, h) = (img.width(), img.height());
    let (tw, th) = target_size(w, h, max_pixels);
    if (tw, th) == (w, h) {
        return Ok(strip_data_uri(base64).trim().to_string());
    }

    let resized = img.resize_exact(tw, th, image::imageops::FilterType::Lanczos3);
    let mut png_bytes = Vec::new();
    resized.write_to(&mut Cursor::new(&mut png_bytes), image::ImageFormat::Png)?;
    tracing::debug!(from = %format!("{w}x{h}"), to = %format!("{tw}x{th}"), "screenshot downscaled");

    Ok(base64::engine::general_purpose::STANDARD.encode(&png_bytes))
}

/// Wraps a base64 image in a `data:` URI whose MIME type matches the
/// encoded bytes. Unrecognized payloads are labelled PNG.
pub fn to_data_uri(base64: &str) -> String {
    let payload = strip_data_uri(base64).trim();
    let mime = decode_base64(payload)
        .ok()
        .and_then(|bytes| image::guess_format(&bytes).ok())
        .map(|format| format.to_mime_type())
        .unwrap_or("image/png");
    format!("data:{mime};base64,{payload}")
}
