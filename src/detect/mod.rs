mod backend;
mod backends;
mod result;

pub use backend::{DetectRequest, DetectorBackend};
pub use backends::StubBackend;
pub use result::{BoundingBox, Detection, ObjectClass};

#[cfg(feature = "backend-tract")]
pub use backends::TractBackend;

use anyhow::Result;

use crate::config::{BackendKind, DetectorSettings};

/// Construct the configured detector backend.
pub fn build_detector(settings: &DetectorSettings) -> Result<Box<dyn DetectorBackend>> {
    match settings.backend {
        BackendKind::Stub => {
            log::warn!("detector: stub backend selected, every image will read as flat_lay");
            Ok(Box::new(StubBackend::new()))
        }
        BackendKind::Tract => {
            #[cfg(feature = "backend-tract")]
            {
                Ok(Box::new(TractBackend::new(
                    &settings.model_path,
                    settings.inference_size,
                )?))
            }
            #[cfg(not(feature = "backend-tract"))]
            {
                Err(anyhow::anyhow!(
                    "detector backend 'tract' requires the backend-tract feature"
                ))
            }
        }
    }
}
