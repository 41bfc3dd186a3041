use image::{imageops, GrayImage, Luma, Rgb, RgbImage, Rgba, RgbaImage};
use imageproc::contours::{find_contours, BorderType, Contour};
use imageproc::drawing::{draw_hollow_rect_mut, draw_line_segment_mut};
use imageproc::map::map_colors;
use imageproc::rect::Rect;

use crate::{HEIGHT, WIDTH};

/// Intensity threshold separating salient from background pixels.
pub const THRESHOLD: u8 = 100;
/// Bounding rectangles are tightened toward the most salient sub-region by
/// these fixed factors. Behavioral contract, not fitted parameters.
pub const SHRINK_W: f32 = 0.9;
pub const SHRINK_H: f32 = 0.65;

const BOX_COLOR: Rgb<u8> = Rgb([36, 255, 12]);
const ARROW_COLOR: Rgb<u8> = Rgb([245, 0, 0]);
/// Arrowhead length as a fraction of the shaft.
const TIP_LENGTH: f32 = 0.1;

/// Derives bounding boxes or directional arrows from a colorized heatmap,
/// drawn onto a transparent canvas of canonical size.
///
/// The solid-white canvas template is built once and never mutated; every
/// draw call works on a private copy, so concurrent callers cannot interfere
/// and repeated calls are bit-identical.
pub struct Annotator {
    template: RgbImage,
}

impl Annotator {
    pub fn new() -> Self {
        Self {
            template: RgbImage::from_pixel(WIDTH, HEIGHT, Rgb([255, 255, 255])),
        }
    }

    /// Draw the outline of each detected region onto a transparent canvas.
    ///
    /// A heatmap without any above-threshold region yields a fully
    /// transparent canvas, not an error.
    pub fn bounding_boxes(&self, heatmap: &RgbaImage) -> RgbaImage {
        let mut canvas = self.template.clone();
        for rect in regions(heatmap) {
            // 2px stroke: the rectangle outline plus a 1px inset.
            draw_hollow_rect_mut(&mut canvas, rect, BOX_COLOR);
            if rect.width() > 2 && rect.height() > 2 {
                let inset = Rect::at(rect.left() + 1, rect.top() + 1)
                    .of_size(rect.width() - 2, rect.height() - 2);
                draw_hollow_rect_mut(&mut canvas, inset, BOX_COLOR);
            }
        }
        white_to_transparent(&canvas)
    }

    /// Draw four inward-pointing arrows per detected region, one from each
    /// corner toward the 25%/75% points of the rectangle.
    pub fn arrows(&self, heatmap: &RgbaImage) -> RgbaImage {
        let mut canvas = self.template.clone();
        for rect in regions(heatmap) {
            let (x, y) = (rect.left() as f32, rect.top() as f32);
            let (w, h) = (rect.width() as f32, rect.height() as f32);
            let (quarter_w, quarter_h) = ((0.25 * w).trunc(), (0.25 * h).trunc());
            let (far_w, far_h) = ((0.75 * w).trunc(), (0.75 * h).trunc());

            // top left
            draw_arrow_mut(&mut canvas, (x, y), (x + quarter_w, y + quarter_h));
            // bottom right
            draw_arrow_mut(&mut canvas, (x + w, y + h), (x + far_w, y + far_h));
            // bottom left
            draw_arrow_mut(&mut canvas, (x, y + h), (x + quarter_w, y + far_h));
            // top right
            draw_arrow_mut(&mut canvas, (x + w, y), (x + far_w, y + quarter_h));
        }
        white_to_transparent(&canvas)
    }
}

impl Default for Annotator {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared pre-processing: grayscale, threshold, outermost contours, shrunk
/// bounding rectangles.
fn regions(heatmap: &RgbaImage) -> Vec<Rect> {
    let gray: GrayImage = imageops::grayscale(heatmap);
    let mask = map_colors(&gray, |p| {
        if p.0[0] >= THRESHOLD {
            Luma([255u8])
        } else {
            Luma([0u8])
        }
    });

    find_contours::<i32>(&mask)
        .iter()
        .filter(|c| c.border_type == BorderType::Outer && c.parent.is_none())
        .filter_map(bounding_rect)
        .collect()
}

/// Axis-aligned bounding rectangle of a contour, shrunk by the fixed factors
/// (widths truncate; degenerate rects clamp to one pixel so drawing stays
/// valid).
fn bounding_rect(contour: &Contour<i32>) -> Option<Rect> {
    let first = contour.points.first()?;
    let (mut min_x, mut min_y, mut max_x, mut max_y) = (first.x, first.y, first.x, first.y);
    for point in &contour.points {
        min_x = min_x.min(point.x);
        min_y = min_y.min(point.y);
        max_x = max_x.max(point.x);
        max_y = max_y.max(point.y);
    }

    let width = (max_x - min_x + 1) as f32;
    let height = (max_y - min_y + 1) as f32;
    let width = ((width * SHRINK_W) as u32).max(1);
    let height = ((height * SHRINK_H) as u32).max(1);
    Some(Rect::at(min_x, min_y).of_size(width, height))
}

/// Arrowed line, 2px stroke: shaft plus two head strokes at 45 degrees.
fn draw_arrow_mut(canvas: &mut RgbImage, from: (f32, f32), to: (f32, f32)) {
    let (dx, dy) = (to.0 - from.0, to.1 - from.1);
    let length = (dx * dx + dy * dy).sqrt();

    thick_line_mut(canvas, from, to);
    if length == 0.0 {
        return;
    }

    let angle = dy.atan2(dx);
    let tip = TIP_LENGTH * length;
    for side in [-1.0f32, 1.0] {
        let theta = angle + std::f32::consts::PI + side * std::f32::consts::FRAC_PI_4;
        let head = (to.0 + tip * theta.cos(), to.1 + tip * theta.sin());
        thick_line_mut(canvas, to, head);
    }
}

fn thick_line_mut(canvas: &mut RgbImage, from: (f32, f32), to: (f32, f32)) {
    for (ox, oy) in [(0.0, 0.0), (1.0, 0.0), (0.0, 1.0)] {
        draw_line_segment_mut(
            canvas,
            (from.0 + ox, from.1 + oy),
            (to.0 + ox, to.1 + oy),
            ARROW_COLOR,
        );
    }
}

/// Canvas pixels left pure white are background: make them fully transparent.
fn white_to_transparent(canvas: &RgbImage) -> RgbaImage {
    map_colors(canvas, |p| {
        if p.0 == [255, 255, 255] {
            Rgba([0, 0, 0, 0])
        } else {
            Rgba([p.0[0], p.0[1], p.0[2], 255])
        }
    })
}
