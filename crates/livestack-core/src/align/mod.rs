pub mod phase_correlation;
pub mod subpixel;

use tracing::debug;

use crate::consts::MIN_ALIGNMENT_PSR;
use crate::error::{LiveStackError, Result};
use crate::frame::Image;

pub use phase_correlation::{bilinear_sample, compute_offset, shift_frame};

/// Register `target` onto `reference` by translation.
///
/// The offset is measured on the luminance of both images and applied to
/// every channel of `target`. Registration fails when the geometries differ
/// or the correlation peak does not stand out of the surface.
pub fn align_image(reference: &Image, target: &Image) -> Result<Image> {
    reference.data.check_geometry(&target.data).map_err(|e| {
        LiveStackError::AlignmentFailed(format!("incompatible frame geometry ({e})"))
    })?;

    let ref_lum = reference.data.luminance();
    let tgt_lum = target.data.luminance();
    let (offset, psr) = compute_offset(&ref_lum, &tgt_lum)?;
    debug!(dx = offset.dx, dy = offset.dy, psr, "Phase correlation");

    if psr < MIN_ALIGNMENT_PSR {
        return Err(LiveStackError::AlignmentFailed(format!(
            "no significant correlation peak (PSR {psr:.1} < {MIN_ALIGNMENT_PSR})"
        )));
    }

    Ok(target.with_data(target.data.map_channels(|f| shift_frame(f, &offset))))
}
