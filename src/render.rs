use image::{imageops, GrayImage, ImageBuffer, Luma, Rgb, RgbImage, Rgba, RgbaImage};

use crate::cam::ActivationMap;
use crate::error::ExplainError;
use crate::{HEIGHT, WIDTH};

/// Guard against division by zero when an activation map is constant.
pub const EPS: f32 = 1e-8;

/// Default blend factor for [`overlay_heatmap`].
pub const OVERLAY_ALPHA: f32 = 0.5;

/// Anchor colors of the built-in palette, sampled at even intervals over the
/// 0..255 range and linearly interpolated in between.
///
/// The ramp runs dark purple (low activation) to bright cyan (high
/// activation) with perceptually even luminance steps. Its red channel ends
/// lowest at the top of the ramp, which the renderer exploits for opacity:
/// `alpha = 255 - red`, so the most intense regions render most opaque while
/// weak activations fade out.
const CAM_ANCHORS: [[u8; 3]; 10] = [
    [84, 1, 68],
    [120, 40, 72],
    [137, 73, 62],
    [142, 104, 49],
    [142, 130, 38],
    [137, 158, 31],
    [121, 183, 53],
    [88, 206, 110],
    [43, 222, 181],
    [37, 231, 253],
];

/// Perceptually-ordered color map from quantized activation values to RGB.
#[derive(Debug, Clone)]
pub struct Colormap {
    anchors: &'static [[u8; 3]],
}

impl Colormap {
    /// Color for a quantized activation value.
    pub fn color(&self, value: u8) -> Rgb<u8> {
        let last = self.anchors.len() - 1;
        let position = value as f32 / 255.0 * last as f32;
        let low = position.floor() as usize;
        let high = (low + 1).min(last);
        let t = position - low as f32;

        let mut channels = [0u8; 3];
        for (i, channel) in channels.iter_mut().enumerate() {
            let a = self.anchors[low][i] as f32;
            let b = self.anchors[high][i] as f32;
            *channel = (a + (b - a) * t).round() as u8;
        }
        Rgb(channels)
    }
}

impl Default for Colormap {
    fn default() -> Self {
        Self {
            anchors: &CAM_ANCHORS,
        }
    }
}

/// Resize an activation map to the given size (bilinear), normalize it to
/// [0, 1] with an epsilon-guarded range, and quantize to 8 bits.
///
/// A constant map is defined behavior, not an error: the epsilon keeps the
/// division finite and the result is an all-zero map.
pub fn quantize_map(cam: &ActivationMap, size: (u32, u32)) -> GrayImage {
    let resized = imageops::resize(cam, size.0, size.1, imageops::FilterType::Triangle);

    let mut min = f32::INFINITY;
    let mut max = f32::NEG_INFINITY;
    for pixel in resized.pixels() {
        min = min.min(pixel.0[0]);
        max = max.max(pixel.0[0]);
    }

    let range = max - min + EPS;
    ImageBuffer::from_fn(size.0, size.1, |x, y| {
        let value = resized.get_pixel(x, y).0[0];
        Luma([((value - min) / range * 255.0) as u8])
    })
}

/// Turn a raw activation map into a display-ready RGBA heatmap.
///
/// The map is resized to the classifier's native input size, normalized and
/// quantized, colorized, and resized again to the canonical display
/// resolution (both resizes are required: native and display size may
/// differ). Opacity follows the palette: `alpha = 255 - red` for every pixel,
/// re-derived after the final resample so the invariant holds exactly.
pub fn render_heatmap(cam: &ActivationMap, native_size: (u32, u32), cmap: &Colormap) -> RgbaImage {
    let quantized = quantize_map(cam, native_size);

    let colorized = ImageBuffer::from_fn(native_size.0, native_size.1, |x, y| {
        let Rgb([r, g, b]) = cmap.color(quantized.get_pixel(x, y).0[0]);
        Rgba([r, g, b, 255 - r])
    });

    let mut display = imageops::resize(&colorized, WIDTH, HEIGHT, imageops::FilterType::Triangle);
    for pixel in display.pixels_mut() {
        pixel.0[3] = 255 - pixel.0[0];
    }
    display
}

/// Colorize a raw (non-colorized) heatmap and alpha-blend it with a base
/// image: `output = alpha * base + (1 - alpha) * colorized`, per channel,
/// clipped to the valid range.
///
/// Returns the colorized heatmap together with the blended overlay.
pub fn overlay_heatmap(
    raw: &GrayImage,
    base: &RgbImage,
    alpha: f32,
    cmap: &Colormap,
) -> Result<(RgbImage, RgbImage), ExplainError> {
    if raw.dimensions() != base.dimensions() {
        return Err(ExplainError::InvalidImageShape {
            expected: base.dimensions(),
            got: raw.dimensions(),
        });
    }

    let colorized: RgbImage = ImageBuffer::from_fn(raw.width(), raw.height(), |x, y| {
        cmap.color(raw.get_pixel(x, y).0[0])
    });

    let blended = ImageBuffer::from_fn(raw.width(), raw.height(), |x, y| {
        let b = base.get_pixel(x, y).0;
        let c = colorized.get_pixel(x, y).0;
        let mut out = [0u8; 3];
        for i in 0..3 {
            let value = alpha * b[i] as f32 + (1.0 - alpha) * c[i] as f32;
            out[i] = value.round().clamp(0.0, 255.0) as u8;
        }
        Rgb(out)
    });

    Ok((colorized, blended))
}
