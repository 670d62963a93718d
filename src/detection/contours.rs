use image::GrayImage;
use imageproc::contours::{find_contours, BorderType};
use imageproc::point::Point;

/// Closed boundary of one connected foreground region, every border pixel in tracing order
#[derive(Debug, Clone, PartialEq)]
pub struct Contour {
    pub points: Vec<Point<i32>>,
}

impl Contour {
    /// (min_x, min_y, max_x, max_y), or `None` for an empty contour
    pub fn bounds(&self) -> Option<(i32, i32, i32, i32)> {
        let first = self.points.first()?;
        Some(self.points.iter().fold(
            (first.x, first.y, first.x, first.y),
            |(min_x, min_y, max_x, max_y), p| {
                (min_x.min(p.x), min_y.min(p.y), max_x.max(p.x), max_y.max(p.y))
            },
        ))
    }
}

/// Outer boundaries of the outermost foreground regions in `mask`.
///
/// Holes, and regions sitting inside holes, are skipped. Any non-zero pixel
/// counts as foreground. The order of the result carries no meaning.
pub fn extract_contours(mask: &GrayImage) -> Vec<Contour> {
    let _span = tracing::debug_span!("extract_contours").entered();

    find_contours::<i32>(mask)
        .into_iter()
        .filter(|contour| matches!(contour.border_type, BorderType::Outer) && contour.parent.is_none())
        .map(|contour| Contour {
            points: contour.points,
        })
        .collect()
}
