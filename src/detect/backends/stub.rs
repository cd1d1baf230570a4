use anyhow::Result;
use image::DynamicImage;

use crate::detect::backend::{DetectRequest, DetectorBackend};
use crate::detect::result::Detection;

/// Stub backend for testing. Returns the same scripted detections for every
/// image, filtered by the request's confidence threshold.
#[derive(Default)]
pub struct StubBackend {
    detections: Vec<Detection>,
    calls: usize,
}

impl StubBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_detections(detections: Vec<Detection>) -> Self {
        Self {
            detections,
            calls: 0,
        }
    }

    /// Number of `detect` calls served.
    pub fn calls(&self) -> usize {
        self.calls
    }
}

impl DetectorBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn detect(&mut self, _image: &DynamicImage, request: &DetectRequest) -> Result<Vec<Detection>> {
        self.calls += 1;
        Ok(self
            .detections
            .iter()
            .filter(|d| d.confidence >= request.confidence_threshold)
            .cloned()
            .collect())
    }
}
