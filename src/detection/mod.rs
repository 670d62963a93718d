mod annotate;
mod cleanup;
mod contours;

pub use annotate::{draw_contours, OUTLINE_COLOR, OUTLINE_THICKNESS};
pub use cleanup::clean_mask;
pub use contours::{extract_contours, Contour};
