use anyhow::Result;
use image::RgbImage;

use crate::detect::result::Detection;

/// Entity detector backend.
///
/// Receives the fixed-region crop of one frame and returns labeled boxes in
/// crop-local coordinates. An empty vector is a valid answer and means
/// nothing was seen. Confidence filtering is applied by the caller, so
/// backends may return low-confidence boxes.
///
/// Backends are shared across probe threads and must not rely on call order.
pub trait DetectorBackend: Send + Sync {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection on a crop.
    fn detect(&self, frame_id: &str, crop: &RgbImage) -> Result<Vec<Detection>>;

    /// Optional warm-up hook.
    fn warm_up(&self) -> Result<()> {
        Ok(())
    }
}
