use anyhow::Result;
use image::DynamicImage;

use crate::detect::result::Detection;

/// Parameters for one detector invocation.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DetectRequest {
    /// Instances below this confidence are dropped by the backend.
    pub confidence_threshold: f32,
    /// Square inference resolution in pixels.
    pub inference_size: u32,
}

/// Object-detection collaborator.
///
/// Backends run over the full image and report boxes in the pixel
/// coordinates of the image they were given, in detector-defined order.
pub trait DetectorBackend {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection on a decoded image.
    fn detect(&mut self, image: &DynamicImage, request: &DetectRequest) -> Result<Vec<Detection>>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
