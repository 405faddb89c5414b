use serde::{Deserialize, Serialize};

/// Pixel size of the captured surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ScreenContext {
    pub width: u32,
    pub height: u32,
}

/// What an operator hands back from a capture.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScreenshotOutput {
    /// PNG or JPEG bytes, base64 encoded, with or without a `data:` URI prefix.
    pub base64: String,
    /// Device pixel ratio of the captured surface.
    #[serde(default = "default_scale_factor")]
    pub scale_factor: f64,
}

fn default_scale_factor() -> f64 {
    1.0
}

/// Decoded dimensions of an accepted screenshot plus its device scale.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScreenshotContext {
    pub size: ScreenContext,
    pub scale_factor: f64,
}
