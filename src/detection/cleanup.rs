use image::GrayImage;
use imageproc::distance_transform::Norm;
use imageproc::morphology::{dilate_mut, erode_mut};

/// Chebyshev radius 1, i.e. a 3x3 square structuring element
const RADIUS: u8 = 1;

/// Remove speckle noise from a foreground mask in place.
///
/// One erosion drops isolated pixels and thin strands, one dilation
/// grows the surviving regions back to their original extent.
pub fn clean_mask(mask: &mut GrayImage) {
    let _span = tracing::debug_span!("clean_mask").entered();
    erode_mut(mask, Norm::LInf, RADIUS);
    dilate_mut(mask, Norm::LInf, RADIUS);
}
