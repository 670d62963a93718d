use super::contours::Contour;
use image::{Rgb, RgbImage};
use imageproc::drawing::draw_filled_rect_mut;
use imageproc::rect::Rect;

pub const OUTLINE_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
pub const OUTLINE_THICKNESS: u32 = 2;

/// Outline every contour in `contours` on `frame` in place.
///
/// Pass a one-element slice to draw a single contour.
pub fn draw_contours(frame: &mut RgbImage, contours: &[Contour], color: Rgb<u8>, thickness: u32) {
    let _span = tracing::debug_span!("draw_contours").entered();

    let thickness = thickness.max(1);
    let offset = (thickness / 2) as i32;
    for contour in contours {
        for point in &contour.points {
            let stamp = Rect::at(point.x - offset, point.y - offset).of_size(thickness, thickness);
            draw_filled_rect_mut(frame, stamp, color);
        }
    }
}
