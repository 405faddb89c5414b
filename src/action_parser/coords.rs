use crate::action_parser::types::Factors;
use crate::perception::types::ScreenContext;

/// Grid alignment used by the smart-resize computation.
pub const IMAGE_FACTOR: u32 = 28;
pub const MIN_PIXELS: u64 = 100 * 28 * 28;
pub const MAX_PIXELS: u64 = 16384 * 28 * 28;
pub const MAX_RATIO: f64 = 200.0;

#[derive(Debug, Clone, Copy)]
pub struct SmartResizeParams {
    pub factor: u32,
    pub min_pixels: u64,
    pub max_pixels: u64,
    pub max_ratio: f64,
}

impl Default for SmartResizeParams {
    fn default() -> Self {
        Self {
            factor: IMAGE_FACTOR,
            min_pixels: MIN_PIXELS,
            max_pixels: MAX_PIXELS,
            max_ratio: MAX_RATIO,
        }
    }
}

fn round_by_factor(n: f64, factor: f64) -> f64 {
    (n / factor).round() * factor
}

fn floor_by_factor(n: f64, factor: f64) -> f64 {
    (n / factor).floor() * factor
}

fn ceil_by_factor(n: f64, factor: f64) -> f64 {
    (n / factor).ceil() * factor
}

/// Normalization grid `(width, height)` for a screen of the given size.
///
/// This never resizes an image; it only picks the divisors the newer model
/// generation uses for its coordinates. Returns `None` for extreme aspect
/// ratios.
pub fn smart_resize(height: u32, width: u32, params: SmartResizeParams) -> Option<(f64, f64)> {
    if height == 0 || width == 0 {
        return None;
    }
    let (h, w) = (height as f64, width as f64);
    let factor = params.factor as f64;

    if h.max(w) / h.min(w) > params.max_ratio {
        tracing::warn!(height, width, max_ratio = params.max_ratio, "aspect ratio too large for smart resize");
        return None;
    }

    let mut w_bar = factor.max(round_by_factor(w, factor));
    let mut h_bar = factor.max(round_by_factor(h, factor));
    let (min_pixels, max_pixels) = (params.min_pixels as f64, params.max_pixels as f64);

    if h_bar * w_bar > max_pixels {
        let beta = ((h * w) / max_pixels).sqrt();
        h_bar = floor_by_factor(h / beta, factor);
        w_bar = floor_by_factor(w / beta, factor);
    } else if h_bar * w_bar < min_pixels {
        let beta = (min_pixels / (h * w)).sqrt();
        h_bar = ceil_by_factor(h * beta, factor);
        w_bar = ceil_by_factor(w * beta, factor);
    }

    Some((w_bar, h_bar))
}

/// Parses a box literal such as `(100,200)` or `[1,2,3,4]` and divides
/// each number by its axis divisor. A point is widened to `[x, y, x, y]`.
/// Unparseable numbers become `NaN`.
pub fn normalize_box(raw: &str, divisors: Factors) -> Vec<f64> {
    let cleaned: String = raw.chars().filter(|c| !matches!(c, '(' | ')' | '[' | ']')).collect();

    let mut values: Vec<f64> = cleaned
        .split(',')
        .filter(|n| !n.is_empty())
        .enumerate()
        .map(|(idx, n)| n.trim().parse::<f64>().unwrap_or(f64::NAN) / divisors.axis(idx))
        .collect();

    if values.len() == 2 {
        values.extend_from_within(..);
    }
    values
}

/// Inverse of [`normalize_box`] for operators that want model-native units back.
pub fn denormalize_box(normalized: &[f64], factors: Factors) -> Vec<f64> {
    normalized
        .iter()
        .enumerate()
        .map(|(idx, v)| v * factors.axis(idx))
        .collect()
}

/// Absolute pixel midpoint of a normalized box.
///
/// The midpoint is scaled up to the factor grid, rounded, and scaled back
/// before the device scale factor is applied. Returns an empty vector when
/// any of the four values is missing or not finite.
pub fn absolute_midpoint(
    normalized: &[f64],
    screen: ScreenContext,
    factors: Factors,
    scale_factor: f64,
) -> Vec<f64> {
    let x1 = normalized.first().copied();
    let y1 = normalized.get(1).copied();
    let x2 = normalized.get(2).copied().or(x1);
    let y2 = normalized.get(3).copied().or(y1);

    let (Some(x1), Some(y1), Some(x2), Some(y2)) = (x1, y1, x2, y2) else {
        return Vec::new();
    };
    if ![x1, y1, x2, y2].iter().all(|v| v.is_finite()) {
        return Vec::new();
    }

    let quantize = |mid: f64, extent: u32, factor: f64| -> f64 {
        // half rounds up
        (mid * extent as f64 * factor + 0.5).floor() / factor * scale_factor
    };

    vec![
        quantize((x1 + x2) / 2.0, screen.width, factors.width),
        quantize((y1 + y2) / 2.0, screen.height, factors.height),
    ]
}

/// Renders numbers the way a JSON array of plain numbers is usually
/// written: integral values without a fractional part, shortest
/// round-trip form otherwise, `null` for non-finite values.
pub fn format_box(values: &[f64]) -> String {
    let parts: Vec<String> = values
        .iter()
        .map(|v| {
            if !v.is_finite() {
                "null".to_string()
            } else if v.fract() == 0.0 && v.abs() < 1e15 {
                format!("{}", *v as i64)
            } else {
                v.to_string()
            }
        })
        .collect();
    format!("[{}]", parts.join(","))
}
